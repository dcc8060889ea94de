//! Input side of an evaluation: parameter samples and key normalization.

use std::collections::{btree_map::Entry, BTreeMap};

use serde::{Deserialize, Serialize};

use crate::PatientContext;

/// One lab value as delivered by an extraction provider or manual entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParameterSample {
    pub key: String,
    pub value: f64,
    #[serde(default)]
    pub unit: Option<String>,
    /// Extraction certainty in `[0, 1]` when the provider reports one.
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl ParameterSample {
    pub fn new(key: impl Into<String>, value: f64) -> Self {
        Self {
            key: key.into(),
            value,
            unit: None,
            confidence: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }
}

/// Canonicalized parameter bag for one evaluation. Keys are unique.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Panel {
    samples: BTreeMap<String, ParameterSample>,
}

impl Panel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values<I, K>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: AsRef<str>,
    {
        Self::from_samples(
            values
                .into_iter()
                .map(|(key, value)| ParameterSample::new(key.as_ref(), value)),
        )
    }

    pub fn from_samples(samples: impl IntoIterator<Item = ParameterSample>) -> Self {
        let mut panel = Self::new();
        for sample in samples {
            panel.insert(sample);
        }
        panel
    }

    /// Add a sample under its canonical key. Non-finite values are dropped
    /// with a warning; a later sample for the same key replaces the earlier.
    pub fn insert(&mut self, mut sample: ParameterSample) {
        if !sample.value.is_finite() {
            log::warn!(
                "Skipping non-numeric parameter value: {} = {}",
                sample.key,
                sample.value
            );
            return;
        }

        sample.key = canonical_key(&sample.key);
        match self.samples.entry(sample.key.clone()) {
            Entry::Occupied(mut entry) => {
                log::warn!("Duplicate parameter {}, keeping the later value", sample.key);
                entry.insert(sample);
            }
            Entry::Vacant(entry) => {
                entry.insert(sample);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParameterSample> {
        self.samples.values()
    }

    /// Plain `key -> value` view used by the rule evaluators.
    pub fn values(&self) -> BTreeMap<String, f64> {
        self.samples
            .iter()
            .map(|(key, sample)| (key.clone(), sample.value))
            .collect()
    }
}

/// Serialized request shape shared by the CLI, the WASM bridge and the FHIR
/// adapter. Keys may be raw aliases; [`PanelInput::panel`] canonicalizes them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PanelInput {
    pub patient: PatientContext,
    #[serde(default)]
    pub parameters: BTreeMap<String, f64>,
    #[serde(default)]
    pub confidence: BTreeMap<String, f64>,
    #[serde(default)]
    pub units: BTreeMap<String, String>,
}

impl PanelInput {
    pub fn new(patient: PatientContext) -> Self {
        Self {
            patient,
            ..Self::default()
        }
    }

    pub fn push(&mut self, sample: ParameterSample) {
        if let Some(unit) = sample.unit {
            self.units.insert(sample.key.clone(), unit);
        }
        if let Some(confidence) = sample.confidence {
            self.confidence.insert(sample.key.clone(), confidence);
        }
        self.parameters.insert(sample.key, sample.value);
    }

    pub fn panel(&self) -> Panel {
        Panel::from_samples(self.parameters.iter().map(|(key, value)| {
            let mut sample = ParameterSample::new(key.as_str(), *value);
            sample.unit = self.units.get(key).cloned();
            sample.confidence = self.confidence.get(key).map(|c| c.clamp(0.0, 1.0));
            sample
        }))
    }
}

/// Map a lab label or abbreviation onto its canonical key.
///
/// Matching ignores case, whitespace and punctuation, so `"HbA1c"`,
/// `"hb a1c"` and `"HBA1C%"` all resolve to `hba1c`.
pub fn normalize_key(raw: &str) -> Option<&'static str> {
    let squashed = squash(raw);
    if squashed.is_empty() {
        return None;
    }
    KEY_ALIASES
        .iter()
        .find(|(alias, _)| *alias == squashed)
        .map(|(_, canonical)| *canonical)
}

fn canonical_key(raw: &str) -> String {
    match normalize_key(raw) {
        Some(canonical) => canonical.to_string(),
        None => raw.trim().to_lowercase(),
    }
}

fn squash(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

const KEY_ALIASES: &[(&str, &str)] = &[
    ("hemoglobin", "hemoglobin"),
    ("haemoglobin", "hemoglobin"),
    ("hgb", "hemoglobin"),
    ("hb", "hemoglobin"),
    ("hematocrit", "hematocrit"),
    ("haematocrit", "hematocrit"),
    ("hct", "hematocrit"),
    ("wbc", "wbc"),
    ("whitebloodcells", "wbc"),
    ("whitebloodcell", "wbc"),
    ("leukocytes", "wbc"),
    ("rbc", "rbc"),
    ("redbloodcells", "rbc"),
    ("redbloodcell", "rbc"),
    ("erythrocytes", "rbc"),
    ("platelets", "platelets"),
    ("platelet", "platelets"),
    ("plt", "platelets"),
    ("glucose", "glucose"),
    ("bloodsugar", "glucose"),
    ("fbs", "glucose"),
    ("glu", "glucose"),
    ("hba1c", "hba1c"),
    ("a1c", "hba1c"),
    ("glycatedhemoglobin", "hba1c"),
    ("glycatedhaemoglobin", "hba1c"),
    ("cholesterol", "cholesterol"),
    ("totalcholesterol", "cholesterol"),
    ("ldl", "ldl"),
    ("ldlc", "ldl"),
    ("lowdensitylipoprotein", "ldl"),
    ("hdl", "hdl"),
    ("hdlc", "hdl"),
    ("highdensitylipoprotein", "hdl"),
    ("triglycerides", "triglycerides"),
    ("triglyceride", "triglycerides"),
    ("tg", "triglycerides"),
    ("sodium", "sodium"),
    ("na", "sodium"),
    ("potassium", "potassium"),
    ("chloride", "chloride"),
    ("calcium", "calcium"),
    ("creatinine", "creatinine"),
    ("urea", "urea"),
    ("bun", "urea"),
    ("bloodureanitrogen", "urea"),
    ("uricacid", "uric_acid"),
    ("albumin", "albumin"),
    ("globulin", "globulin"),
    ("totalprotein", "total_protein"),
    ("bilirubin", "bilirubin"),
    ("totalbilirubin", "bilirubin"),
    ("tbil", "bilirubin"),
    ("directbilirubin", "direct_bilirubin"),
    ("dbil", "direct_bilirubin"),
    ("alt", "alt"),
    ("sgpt", "alt"),
    ("alanineaminotransferase", "alt"),
    ("ast", "ast"),
    ("sgot", "ast"),
    ("aspartateaminotransferase", "ast"),
    ("alp", "alp"),
    ("alkalinephosphatase", "alp"),
    ("ggt", "ggt"),
    ("gammagt", "ggt"),
    ("mcv", "mcv"),
    ("mch", "mch"),
    ("mchc", "mchc"),
];
