//! Rule-based evaluation of a blood panel.
//!
//! The engine takes a parameter map and the patient demographics and derives
//! abnormal parameters, staged conditions with weighted risk scores, a
//! composite health score and ranked recommendations. Every evaluation is a
//! pure function of its inputs plus the read-only [`Catalog`].

mod aggregate;
mod catalog;
mod classify;
mod engine;
mod insights;
mod metrics;
mod panel;
mod ranges;
mod risk;
mod staging;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use aggregate::{
    aggregate_conditions, baseline_conditions, BaselineMatch, ConditionAssessment, ConditionGroup,
    SeverityTexts,
};
pub use catalog::{Catalog, CatalogSources};
pub use classify::{classify, deviation_percent, EvaluatedParameter, ParameterStatus};
pub use engine::{AnalysisReport, Engine};
pub use insights::{
    analysis_confidence, generate_insights, health_score, lifestyle_recommendations,
    recommendations, Insight, KEY_PARAMETERS,
};
pub use metrics::{compute_bmi, derive_metrics, estimate_gfr, DerivedMetrics, BMI_KEY, EGFR_KEY};
pub use panel::{normalize_key, Panel, PanelInput, ParameterSample};
pub use ranges::{ReferenceRange, ReferenceTable};
pub use risk::{
    Bounds, FactorInput, RiskAssessment, RiskFactor, RiskModel, RiskTier, ScoreBand, StageVariant,
    Subtype,
};
pub use staging::{match_stages, DiseaseStageDefinition, DiseaseStaging, StageCriterion, StageMatch};

/// Result type for panel evaluation.
pub type Result<T> = std::result::Result<T, PanelError>;

/// Errors raised while loading the catalog or evaluating a single rule.
#[derive(Debug, thiserror::Error)]
pub enum PanelError {
    /// A derived metric could not be computed. The dependent rule is skipped.
    #[error("Missing input: {0}")]
    MissingInput(&'static str),
    /// Catalog entry is malformed. Fatal at load time.
    #[error("Invalid catalog entry: {0}")]
    Configuration(String),
    #[error("Cannot parse data: {0}")]
    Parse(String),
    /// One rule failed; the rest of the evaluation continues without it.
    #[error("Rule {rule} failed: {reason}")]
    Rule { rule: String, reason: String },
}

impl From<serde_json::Error> for PanelError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Three-level severity shared by deviation buckets and conditions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Mild,
    Moderate,
    High,
}

impl Severity {
    /// Ordinal used for ranking, 1 (mild) to 3 (high).
    pub fn rank(self) -> u8 {
        match self {
            Self::Mild => 1,
            Self::Moderate => 2,
            Self::High => 3,
        }
    }

    /// Map a stage severity rank onto the three display buckets.
    pub fn from_rank(rank: u8) -> Self {
        match rank {
            0 | 1 => Self::Mild,
            2 => Self::Moderate,
            _ => Self::High,
        }
    }

    /// Upper bound for a heuristic confidence at this severity.
    pub fn confidence_cap(self) -> f64 {
        match self {
            Self::Mild => 0.85,
            Self::Moderate => 0.9,
            Self::High => 0.95,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mild => write!(f, "Mild"),
            Self::Moderate => write!(f, "Moderate"),
            Self::High => write!(f, "High"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    #[default]
    Male,
    Female,
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Male => write!(f, "male"),
            Self::Female => write!(f, "female"),
        }
    }
}

impl FromStr for Gender {
    type Err = PanelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "male" | "m" => Ok(Self::Male),
            "female" | "f" => Ok(Self::Female),
            other => Err(PanelError::Parse(format!("Unknown gender {other}"))),
        }
    }
}

/// Only `Black` changes anything (the eGFR race coefficient).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Race {
    Black,
    White,
    Asian,
    Hispanic,
    Other,
}

/// Demographics supplied once per evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PatientContext {
    pub age: u32,
    #[serde(default)]
    pub gender: Gender,
    #[serde(default)]
    pub race: Option<Race>,
    #[serde(default)]
    pub height_cm: Option<f64>,
    #[serde(default)]
    pub weight_kg: Option<f64>,
}

impl PatientContext {
    pub fn new(age: u32, gender: Gender) -> Self {
        Self {
            age,
            gender,
            ..Self::default()
        }
    }

    pub fn with_race(mut self, race: Race) -> Self {
        self.race = Some(race);
        self
    }

    pub fn with_body(mut self, height_cm: f64, weight_kg: f64) -> Self {
        self.height_cm = Some(height_cm);
        self.weight_kg = Some(weight_kg);
        self
    }

    pub fn is_black(&self) -> bool {
        self.race == Some(Race::Black)
    }
}

/// Thresholds that tune aggregation and report assembly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Minimum abnormal/present ratio for a parameter-group condition.
    pub condition_min_ratio: f64,
    /// Conditions above this probability (percent) contribute recommendations.
    pub recommendation_probability_threshold: u8,
    pub staged_recommendation_limit: usize,
    pub baseline_recommendation_limit: usize,
    /// Number of insights a visual summary should show.
    pub insight_display_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            condition_min_ratio: 0.30,
            recommendation_probability_threshold: 50,
            staged_recommendation_limit: 3,
            baseline_recommendation_limit: 2,
            insight_display_limit: 5,
        }
    }
}

/// Render a number without trailing zeros, the way lab values are printed.
pub(crate) fn format_numeric(value: f64) -> String {
    if value.fract().abs() < f64::EPSILON {
        format!("{value:.0}")
    } else if (value * 10.0).fract().abs() < 1e-9 {
        format!("{value:.1}")
    } else {
        format!("{value:.2}")
    }
}
