//! Secondary values computed from raw inputs before rule evaluation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Gender, PanelError, PatientContext, Result};

/// Key under which BMI is added to the evaluation map.
pub const BMI_KEY: &str = "bmi";
/// Key under which the estimated GFR is added to the evaluation map.
pub const EGFR_KEY: &str = "egfr";

const RACE_FACTOR_BLACK: f64 = 1.212;
const FEMALE_FACTOR: f64 = 0.742;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct DerivedMetrics {
    pub bmi: Option<f64>,
    /// Full precision; see [`DerivedMetrics::egfr_display`] for the rounded value.
    pub egfr: Option<f64>,
}

impl DerivedMetrics {
    pub fn egfr_display(&self) -> Option<f64> {
        self.egfr.map(|value| (value * 10.0).round() / 10.0)
    }

    /// Insert the derived values into the evaluation map without
    /// overriding values the caller measured directly. Afterwards `self`
    /// holds the values the rules will see.
    pub fn augment(&mut self, values: &mut BTreeMap<String, f64>) {
        if let Some(bmi) = self.bmi {
            values.entry(BMI_KEY.to_string()).or_insert(bmi);
        }
        if let Some(egfr) = self.egfr {
            values.entry(EGFR_KEY.to_string()).or_insert(egfr);
        }
        self.bmi = values.get(BMI_KEY).copied();
        self.egfr = values.get(EGFR_KEY).copied();
    }
}

/// Body mass index in kg/m².
pub fn compute_bmi(height_cm: Option<f64>, weight_kg: Option<f64>) -> Result<f64> {
    let height = height_cm
        .filter(|h| h.is_finite() && *h > 0.0)
        .ok_or(PanelError::MissingInput("height"))?;
    let weight = weight_kg
        .filter(|w| w.is_finite() && *w > 0.0)
        .ok_or(PanelError::MissingInput("weight"))?;

    let meters = height / 100.0;
    Ok(weight / (meters * meters))
}

/// Estimated glomerular filtration rate (mL/min/1.73m²), simplified CKD-EPI.
pub fn estimate_gfr(creatinine: f64, age: i32, gender: Gender, is_black: bool) -> Result<f64> {
    if !creatinine.is_finite() || creatinine <= 0.0 {
        return Err(PanelError::MissingInput("creatinine"));
    }
    if age < 0 {
        return Err(PanelError::MissingInput("age"));
    }

    let race_factor = if is_black { RACE_FACTOR_BLACK } else { 1.0 };
    let gfr = match gender {
        Gender::Male => male_gfr(creatinine, age),
        Gender::Female => female_gfr(creatinine, age),
    };
    Ok(gfr * race_factor)
}

fn male_gfr(creatinine: f64, age: i32) -> f64 {
    let ratio = creatinine / 0.9;
    141.0 * ratio.min(1.0).powf(-0.411) * ratio.max(1.0).powf(-1.209) * 0.993_f64.powi(age)
}

fn female_gfr(creatinine: f64, age: i32) -> f64 {
    let ratio = creatinine / 0.7;
    141.0
        * ratio.min(1.0).powf(-0.329)
        * ratio.max(1.0).powf(-1.209)
        * 0.993_f64.powi(age)
        * FEMALE_FACTOR
}

/// Compute every derived metric the inputs allow. Missing inputs only
/// skip the affected metric.
pub fn derive_metrics(values: &BTreeMap<String, f64>, patient: &PatientContext) -> DerivedMetrics {
    let bmi = match compute_bmi(patient.height_cm, patient.weight_kg) {
        Ok(bmi) => Some(bmi),
        Err(err) => {
            log::debug!("BMI skipped: {err}");
            None
        }
    };

    let egfr = match values.get("creatinine") {
        Some(&creatinine) => {
            let age = i32::try_from(patient.age).unwrap_or(i32::MAX);
            match estimate_gfr(creatinine, age, patient.gender, patient.is_black()) {
                Ok(gfr) => Some(gfr),
                Err(err) => {
                    log::debug!("eGFR skipped: {err}");
                    None
                }
            }
        }
        None => None,
    };

    DerivedMetrics { bmi, egfr }
}
