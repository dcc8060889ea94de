//! Weighted risk-score model.
//!
//! Each model accumulates fixed point deltas from the factors it can
//! evaluate, then maps the raw (unclamped) score onto ordered tiers. The
//! reported percentage is clamped to `[0, 100]`; the tier lookup is not.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{format_numeric, Gender, PanelError, PatientContext, Result, EGFR_KEY};

/// What a factor, variant or subtype looks at.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FactorInput {
    /// A panel parameter or derived metric (`bmi`, `egfr`).
    Parameter(String),
    Ratio {
        numerator: String,
        denominator: String,
    },
    Age,
}

/// Interval test with optional strict/inclusive ends. No ends means "any".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Bounds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gt: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gte: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lt: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lte: Option<f64>,
}

impl Bounds {
    pub fn contains(&self, value: f64) -> bool {
        self.gt.map_or(true, |b| value > b)
            && self.gte.map_or(true, |b| value >= b)
            && self.lt.map_or(true, |b| value < b)
            && self.lte.map_or(true, |b| value <= b)
    }

    fn validate(&self, owner: &str) -> Result<()> {
        if self.gt.is_some() && self.gte.is_some() || self.lt.is_some() && self.lte.is_some() {
            return Err(PanelError::Configuration(format!(
                "{owner}: band sets both strict and inclusive bound on one side"
            )));
        }
        let ends = [self.gt, self.gte, self.lt, self.lte];
        if ends.iter().flatten().any(|b| !b.is_finite()) {
            return Err(PanelError::Configuration(format!(
                "{owner}: band bound is not finite"
            )));
        }
        let lower = self.gt.or(self.gte);
        let upper = self.lt.or(self.lte);
        if let (Some(lower), Some(upper)) = (lower, upper) {
            if lower > upper {
                return Err(PanelError::Configuration(format!(
                    "{owner}: band lower bound {lower} above upper bound {upper}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreBand {
    #[serde(flatten)]
    pub bounds: Bounds,
    pub points: f64,
}

/// Additive (or, with negative points, protective) contribution.
/// The first band containing the value wins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskFactor {
    pub input: FactorInput,
    #[serde(default)]
    pub gender: Option<Gender>,
    pub bands: Vec<ScoreBand>,
}

/// Overrides a tier's stage name and/or interpretation when its condition matches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageVariant {
    pub input: FactorInput,
    #[serde(flatten)]
    pub bounds: Bounds,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub interpretation: Option<String>,
}

/// Qualifies the stage name, e.g. anemia morphology from MCV.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subtype {
    pub input: FactorInput,
    #[serde(flatten)]
    pub bounds: Bounds,
    pub label: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskTier {
    pub min_score: f64,
    #[serde(default)]
    pub display_name: Option<String>,
    pub stage: String,
    pub confidence_cap: f64,
    /// May contain `{key}` placeholders.
    pub interpretation: String,
    #[serde(default)]
    pub variants: Vec<StageVariant>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskModel {
    pub key: String,
    pub name: String,
    pub evidence: Vec<String>,
    pub factors: Vec<RiskFactor>,
    /// Ascending by `min_score`; position is the severity index.
    pub tiers: Vec<RiskTier>,
    #[serde(default)]
    pub subtypes: Vec<Subtype>,
    #[serde(default)]
    pub default_subtype: Option<String>,
}

/// Output of one weighted model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskAssessment {
    pub disease_key: String,
    pub display_name: String,
    pub stage_name: String,
    pub severity_rank: u8,
    /// Unclamped accumulator.
    pub raw_score: f64,
    /// Percentage in `[0, 100]`.
    pub risk_score: f64,
    pub confidence: f64,
    pub interpretation: String,
    pub recommendations: Vec<String>,
}

impl RiskModel {
    pub(crate) fn validate(&self) -> Result<()> {
        let owner = format!("risk model {}", self.key);
        if self.evidence.is_empty() || self.factors.is_empty() {
            return Err(PanelError::Configuration(format!(
                "{owner} needs evidence parameters and factors"
            )));
        }
        for factor in &self.factors {
            if factor.bands.is_empty() {
                return Err(PanelError::Configuration(format!(
                    "{owner} has a factor without bands"
                )));
            }
            for band in &factor.bands {
                band.bounds.validate(&owner)?;
            }
        }

        let Some(first) = self.tiers.first() else {
            return Err(PanelError::Configuration(format!("{owner} has no tiers")));
        };
        if first.min_score <= 0.0 {
            return Err(PanelError::Configuration(format!(
                "{owner}: lowest cut-point must be positive"
            )));
        }
        for pair in self.tiers.windows(2) {
            if pair[1].min_score <= pair[0].min_score {
                return Err(PanelError::Configuration(format!(
                    "{owner}: tiers must have ascending cut-points"
                )));
            }
        }
        for tier in &self.tiers {
            if !(tier.confidence_cap > 0.0 && tier.confidence_cap <= 1.0) {
                return Err(PanelError::Configuration(format!(
                    "{owner}: confidence cap {} outside (0, 1]",
                    tier.confidence_cap
                )));
            }
            for variant in &tier.variants {
                variant.bounds.validate(&owner)?;
            }
        }
        for subtype in &self.subtypes {
            subtype.bounds.validate(&owner)?;
        }
        Ok(())
    }

    /// Score the model. `Ok(None)` means no evidence or a score below the
    /// lowest cut-point.
    pub(crate) fn assess(&self, ctx: &ScoringContext<'_>) -> Result<Option<RiskAssessment>> {
        if !self.evidence.iter().any(|param| ctx.values.contains_key(param)) {
            log::debug!("Skipping risk model {}: no evidence parameters", self.key);
            return Ok(None);
        }

        let mut raw = 0.0;
        for factor in &self.factors {
            if factor.gender.is_some_and(|scope| scope != ctx.patient.gender) {
                continue;
            }
            let Some(value) = ctx.resolve(&factor.input, &self.key)? else {
                continue;
            };
            if let Some(band) = factor.bands.iter().find(|band| band.bounds.contains(value)) {
                raw += band.points;
            }
        }

        let Some((index, tier)) = self
            .tiers
            .iter()
            .enumerate()
            .rev()
            .find(|(_, tier)| raw >= tier.min_score)
        else {
            return Ok(None);
        };

        let mut stage = None;
        let mut interpretation = None;
        for variant in &tier.variants {
            if !ctx.matches(&variant.input, &variant.bounds, &self.key)? {
                continue;
            }
            if stage.is_none() {
                stage = variant.stage.clone();
            }
            if interpretation.is_none() {
                interpretation = variant.interpretation.clone();
            }
        }
        let mut stage = stage.unwrap_or_else(|| tier.stage.clone());
        let mut interpretation = interpretation.unwrap_or_else(|| tier.interpretation.clone());

        if let Some((label, note)) = self.qualifier(ctx)? {
            stage = format!("{stage} {label}");
            if let Some(note) = note {
                interpretation = format!("{note} {interpretation}");
            }
        }

        Ok(Some(RiskAssessment {
            disease_key: self.key.clone(),
            display_name: tier.display_name.clone().unwrap_or_else(|| self.name.clone()),
            stage_name: stage,
            severity_rank: u8::try_from(index + 1).unwrap_or(u8::MAX),
            raw_score: raw,
            risk_score: raw.clamp(0.0, 100.0).round(),
            confidence: (raw / 100.0).min(tier.confidence_cap).max(0.0),
            interpretation: ctx.fill_template(&interpretation),
            recommendations: tier.recommendations.clone(),
        }))
    }

    fn qualifier(&self, ctx: &ScoringContext<'_>) -> Result<Option<(String, Option<String>)>> {
        for subtype in &self.subtypes {
            if ctx.matches(&subtype.input, &subtype.bounds, &self.key)? {
                return Ok(Some((subtype.label.clone(), subtype.note.clone())));
            }
        }
        Ok(self.default_subtype.clone().map(|label| (label, None)))
    }
}

/// Read-only view over the augmented value map and the patient.
pub(crate) struct ScoringContext<'a> {
    values: &'a BTreeMap<String, f64>,
    patient: &'a PatientContext,
}

impl<'a> ScoringContext<'a> {
    pub(crate) fn new(values: &'a BTreeMap<String, f64>, patient: &'a PatientContext) -> Self {
        Self { values, patient }
    }

    fn resolve(&self, input: &FactorInput, rule: &str) -> Result<Option<f64>> {
        let value = match input {
            FactorInput::Parameter(key) => self.values.get(key).copied(),
            FactorInput::Age => Some(f64::from(self.patient.age)),
            FactorInput::Ratio {
                numerator,
                denominator,
            } => {
                let (Some(top), Some(bottom)) =
                    (self.values.get(numerator), self.values.get(denominator))
                else {
                    return Ok(None);
                };
                if bottom.abs() < f64::EPSILON {
                    return Err(PanelError::Rule {
                        rule: rule.to_string(),
                        reason: format!("{numerator}/{denominator} ratio with zero denominator"),
                    });
                }
                Some(top / bottom)
            }
        };

        match value {
            Some(v) if !v.is_finite() => Err(PanelError::Rule {
                rule: rule.to_string(),
                reason: format!("non-finite input {input:?}"),
            }),
            other => Ok(other),
        }
    }

    fn matches(&self, input: &FactorInput, bounds: &Bounds, rule: &str) -> Result<bool> {
        Ok(self
            .resolve(input, rule)?
            .is_some_and(|value| bounds.contains(value)))
    }

    fn placeholder(&self, name: &str) -> String {
        match name {
            "gender" => self.patient.gender.to_string(),
            "age" => self.patient.age.to_string(),
            EGFR_KEY => self
                .values
                .get(EGFR_KEY)
                .map(|v| format!("{v:.1}"))
                .unwrap_or_else(|| "not available".to_string()),
            key => self
                .values
                .get(key)
                .map(|v| format_numeric(*v))
                .unwrap_or_else(|| "not available".to_string()),
        }
    }

    /// Replace `{name}` placeholders; an unterminated brace is kept verbatim.
    fn fill_template(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            match after.find('}') {
                Some(end) => {
                    out.push_str(&self.placeholder(&after[..end]));
                    rest = &after[end + 1..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// Run every model in isolation. A failing model is logged and omitted.
pub(crate) fn assess_models(
    models: &[RiskModel],
    values: &BTreeMap<String, f64>,
    patient: &PatientContext,
) -> Vec<RiskAssessment> {
    let ctx = ScoringContext::new(values, patient);
    models
        .iter()
        .filter_map(|model| match model.assess(&ctx) {
            Ok(assessment) => assessment,
            Err(err) => {
                log::warn!("Risk model {} omitted: {err}", model.key);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band(bounds: Bounds, points: f64) -> ScoreBand {
        ScoreBand { bounds, points }
    }

    fn tier(min_score: f64, stage: &str, cap: f64) -> RiskTier {
        RiskTier {
            min_score,
            display_name: None,
            stage: stage.to_string(),
            confidence_cap: cap,
            interpretation: format!("{stage} at {{marker}} for {{gender}}"),
            variants: Vec::new(),
            recommendations: vec![format!("{stage} advice")],
        }
    }

    fn marker_model() -> RiskModel {
        RiskModel {
            key: "marker".to_string(),
            name: "Marker Disease".to_string(),
            evidence: vec!["marker".to_string()],
            factors: vec![
                RiskFactor {
                    input: FactorInput::Parameter("marker".to_string()),
                    gender: None,
                    bands: vec![
                        band(
                            Bounds {
                                gte: Some(100.0),
                                ..Bounds::default()
                            },
                            50.0,
                        ),
                        band(
                            Bounds {
                                gte: Some(50.0),
                                ..Bounds::default()
                            },
                            25.0,
                        ),
                    ],
                },
                RiskFactor {
                    input: FactorInput::Parameter("shield".to_string()),
                    gender: None,
                    bands: vec![band(
                        Bounds {
                            gt: Some(60.0),
                            ..Bounds::default()
                        },
                        -30.0,
                    )],
                },
                RiskFactor {
                    input: FactorInput::Age,
                    gender: Some(Gender::Female),
                    bands: vec![band(
                        Bounds {
                            gt: Some(55.0),
                            ..Bounds::default()
                        },
                        10.0,
                    )],
                },
            ],
            tiers: vec![tier(25.0, "Low", 0.85), tier(50.0, "High", 0.95)],
            subtypes: Vec::new(),
            default_subtype: None,
        }
    }

    fn values(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn bands_respect_strictness() {
        let bounds = Bounds {
            gte: Some(100.0),
            lt: Some(126.0),
            ..Bounds::default()
        };
        assert!(bounds.contains(100.0));
        assert!(!bounds.contains(126.0));
        assert!(Bounds::default().contains(-5.0));
    }

    #[test]
    fn score_maps_to_highest_reached_tier() {
        let patient = PatientContext::new(60, Gender::Female);
        let vals = values(&[("marker", 120.0)]);
        let assessment = marker_model()
            .assess(&ScoringContext::new(&vals, &patient))
            .unwrap()
            .unwrap();
        assert_eq!(assessment.stage_name, "High");
        assert_eq!(assessment.severity_rank, 2);
        assert!((assessment.raw_score - 60.0).abs() < f64::EPSILON);
        assert!((assessment.confidence - 0.6).abs() < 1e-9);
        assert_eq!(assessment.interpretation, "High at 120 for female");
    }

    #[test]
    fn gender_scoped_factor_only_counts_for_its_gender() {
        let male = PatientContext::new(60, Gender::Male);
        let vals = values(&[("marker", 50.0)]);
        let assessment = marker_model()
            .assess(&ScoringContext::new(&vals, &male))
            .unwrap()
            .unwrap();
        assert!((assessment.raw_score - 25.0).abs() < f64::EPSILON);
        assert_eq!(assessment.stage_name, "Low");
    }

    #[test]
    fn protective_factor_can_drop_below_cut_point() {
        let patient = PatientContext::new(30, Gender::Male);
        let vals = values(&[("marker", 55.0), ("shield", 70.0)]);
        let assessment = marker_model()
            .assess(&ScoringContext::new(&vals, &patient))
            .unwrap();
        assert!(assessment.is_none());
    }

    #[test]
    fn percentage_is_clamped_but_raw_is_not() {
        let mut model = marker_model();
        model.factors[0].bands[0].points = 140.0;
        let patient = PatientContext::new(30, Gender::Male);
        let vals = values(&[("marker", 200.0)]);
        let assessment = model
            .assess(&ScoringContext::new(&vals, &patient))
            .unwrap()
            .unwrap();
        assert!((assessment.raw_score - 140.0).abs() < f64::EPSILON);
        assert!((assessment.risk_score - 100.0).abs() < f64::EPSILON);
        assert!((assessment.confidence - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn variant_and_subtype_shape_the_stage() {
        let mut model = marker_model();
        model.tiers[1].variants.push(StageVariant {
            input: FactorInput::Parameter("marker".to_string()),
            bounds: Bounds {
                gte: Some(150.0),
                ..Bounds::default()
            },
            stage: Some("Critical".to_string()),
            interpretation: None,
        });
        model.subtypes.push(Subtype {
            input: FactorInput::Parameter("size".to_string()),
            bounds: Bounds {
                lt: Some(80.0),
                ..Bounds::default()
            },
            label: "Small".to_string(),
            note: Some("Small size.".to_string()),
        });
        model.default_subtype = Some("Plain".to_string());

        let patient = PatientContext::new(30, Gender::Male);
        let ctx_vals = values(&[("marker", 160.0), ("size", 70.0)]);
        let assessment = model
            .assess(&ScoringContext::new(&ctx_vals, &patient))
            .unwrap()
            .unwrap();
        assert_eq!(assessment.stage_name, "Critical Small");
        assert!(assessment.interpretation.starts_with("Small size. High at 160"));

        let plain_vals = values(&[("marker", 120.0)]);
        let plain = model
            .assess(&ScoringContext::new(&plain_vals, &patient))
            .unwrap()
            .unwrap();
        assert_eq!(plain.stage_name, "High Plain");
    }

    #[test]
    fn failing_model_does_not_block_others() {
        let mut broken = marker_model();
        broken.key = "broken".to_string();
        broken.factors.push(RiskFactor {
            input: FactorInput::Ratio {
                numerator: "marker".to_string(),
                denominator: "zero".to_string(),
            },
            gender: None,
            bands: vec![band(Bounds::default(), 5.0)],
        });

        let patient = PatientContext::new(30, Gender::Male);
        let vals = values(&[("marker", 120.0), ("zero", 0.0)]);
        let results = assess_models(&[broken, marker_model()], &vals, &patient);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].disease_key, "marker");
    }

    #[test]
    fn missing_placeholder_reads_not_available() {
        let patient = PatientContext::new(30, Gender::Male);
        let vals = values(&[("egfr", 54.321)]);
        let ctx = ScoringContext::new(&vals, &patient);
        assert_eq!(
            ctx.fill_template("eGFR {egfr}, Hb {hemoglobin}, {open"),
            "eGFR 54.3, Hb not available, {open"
        );
    }

    #[test]
    fn conflicting_bounds_fail_validation() {
        let mut model = marker_model();
        model.factors[0].bands[0].bounds = Bounds {
            gt: Some(1.0),
            gte: Some(1.0),
            ..Bounds::default()
        };
        assert!(model.validate().is_err());

        let mut unordered = marker_model();
        unordered.tiers.swap(0, 1);
        assert!(unordered.validate().is_err());
    }
}
