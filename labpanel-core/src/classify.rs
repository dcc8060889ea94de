//! Reference-range classification of individual parameters.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::{Panel, ReferenceRange, ReferenceTable, Severity};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ParameterStatus {
    Normal,
    Low,
    High,
    /// No reference range is known for the parameter.
    Unknown,
}

/// One parameter after comparison with its reference range.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluatedParameter {
    pub key: String,
    pub value: f64,
    pub unit: Option<String>,
    pub range: Option<ReferenceRange>,
    pub is_abnormal: bool,
    pub status: ParameterStatus,
    /// Distance beyond the violated bound, as a percentage of that bound.
    pub deviation_percent: f64,
    /// Set only for abnormal parameters.
    pub severity: Option<Severity>,
    pub extraction_confidence: Option<f64>,
}

impl EvaluatedParameter {
    fn group(&self) -> u8 {
        match self.status {
            ParameterStatus::Low | ParameterStatus::High => 0,
            ParameterStatus::Normal => 1,
            ParameterStatus::Unknown => 2,
        }
    }
}

/// Classify every sample of the panel.
///
/// Output is ordered: abnormal parameters first (highest severity, then
/// largest deviation), then normal, then unknown; ties fall back to the key.
pub fn classify(panel: &Panel, table: &ReferenceTable) -> Vec<EvaluatedParameter> {
    let mut evaluated: Vec<EvaluatedParameter> = panel
        .iter()
        .map(|sample| {
            let Some(range) = table.get(&sample.key) else {
                log::warn!("Reference range not found for parameter: {}", sample.key);
                return EvaluatedParameter {
                    key: sample.key.clone(),
                    value: sample.value,
                    unit: sample.unit.clone(),
                    range: None,
                    is_abnormal: false,
                    status: ParameterStatus::Unknown,
                    deviation_percent: 0.0,
                    severity: None,
                    extraction_confidence: sample.confidence,
                };
            };

            let (status, deviation) = if range.contains(sample.value) {
                (ParameterStatus::Normal, 0.0)
            } else if sample.value < range.min {
                (
                    ParameterStatus::Low,
                    deviation_percent(sample.value, range.min),
                )
            } else {
                (
                    ParameterStatus::High,
                    deviation_percent(sample.value, range.max),
                )
            };

            EvaluatedParameter {
                key: sample.key.clone(),
                value: sample.value,
                unit: sample.unit.clone().or_else(|| Some(range.unit.clone())),
                range: Some(range.clone()),
                is_abnormal: status != ParameterStatus::Normal,
                status,
                deviation_percent: deviation,
                severity: severity_bucket(status, deviation),
                extraction_confidence: sample.confidence,
            }
        })
        .collect();

    evaluated.sort_by(compare_evaluated);
    evaluated
}

/// `|value - bound| / bound * 100`. A zero bound yields 100 for any excursion.
pub fn deviation_percent(value: f64, bound: f64) -> f64 {
    let distance = (value - bound).abs();
    if bound.abs() < f64::EPSILON {
        return if distance > 0.0 { 100.0 } else { 0.0 };
    }
    distance / bound.abs() * 100.0
}

// Low-side excursions use tighter cut-points than high-side ones.
fn severity_bucket(status: ParameterStatus, deviation: f64) -> Option<Severity> {
    let (high, moderate) = match status {
        ParameterStatus::High => (50.0, 20.0),
        ParameterStatus::Low => (40.0, 15.0),
        ParameterStatus::Normal | ParameterStatus::Unknown => return None,
    };

    Some(if deviation > high {
        Severity::High
    } else if deviation > moderate {
        Severity::Moderate
    } else {
        Severity::Mild
    })
}

fn compare_evaluated(a: &EvaluatedParameter, b: &EvaluatedParameter) -> Ordering {
    a.group()
        .cmp(&b.group())
        .then_with(|| b.severity.cmp(&a.severity))
        .then_with(|| b.deviation_percent.total_cmp(&a.deviation_percent))
        .then_with(|| a.key.cmp(&b.key))
}
