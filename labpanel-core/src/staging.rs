//! Threshold-stage matcher: picks the most severe stage whose criteria hold.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Gender, PanelError, Result};

/// A single inclusive bound test within a stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageCriterion {
    pub parameter: String,
    pub min: f64,
    pub max: f64,
    /// When set, the criterion is skipped for patients of the other gender.
    #[serde(default)]
    pub gender: Option<Gender>,
}

impl StageCriterion {
    fn applies_to(&self, gender: Gender) -> bool {
        self.gender.map_or(true, |scope| scope == gender)
    }

    fn accepts(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiseaseStageDefinition {
    pub key: String,
    pub name: String,
    /// AND-combined.
    pub criteria: Vec<StageCriterion>,
    pub description: String,
    pub recommendations: Vec<String>,
}

impl DiseaseStageDefinition {
    fn matches(&self, values: &BTreeMap<String, f64>, gender: Gender) -> bool {
        let mut applied = 0;
        for criterion in &self.criteria {
            if !criterion.applies_to(gender) {
                continue;
            }
            match values.get(&criterion.parameter) {
                Some(value) if criterion.accepts(*value) => applied += 1,
                _ => return false,
            }
        }
        // A stage whose criteria were all skipped carries no evidence.
        applied > 0
    }
}

/// Ordered stage list for one disease. Position is the severity index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiseaseStaging {
    pub key: String,
    pub name: String,
    /// Parameters of which at least one must be present to stage the disease.
    pub evidence: Vec<String>,
    pub stages: Vec<DiseaseStageDefinition>,
}

impl DiseaseStaging {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            return Err(PanelError::Configuration(format!(
                "disease {} has no stages",
                self.key
            )));
        }
        if self.evidence.is_empty() {
            return Err(PanelError::Configuration(format!(
                "disease {} lists no evidence parameters",
                self.key
            )));
        }
        for stage in &self.stages {
            if stage.criteria.is_empty() {
                return Err(PanelError::Configuration(format!(
                    "stage {}.{} has no criteria",
                    self.key, stage.key
                )));
            }
            for criterion in &stage.criteria {
                if !criterion.min.is_finite()
                    || !criterion.max.is_finite()
                    || criterion.min > criterion.max
                {
                    return Err(PanelError::Configuration(format!(
                        "stage {}.{} criterion on {} has min {} above max {}",
                        self.key, stage.key, criterion.parameter, criterion.min, criterion.max
                    )));
                }
            }
        }
        Ok(())
    }

    /// Stage the disease. Returns `None` when no evidence parameter is
    /// present or when no stage matches.
    pub fn evaluate(&self, values: &BTreeMap<String, f64>, gender: Gender) -> Option<StageMatch> {
        if !self.evidence.iter().any(|param| values.contains_key(param)) {
            log::debug!("Skipping staging for {}: no evidence parameters", self.key);
            return None;
        }

        // Later stages are more severe, so the last match wins.
        let (index, stage) = self
            .stages
            .iter()
            .enumerate()
            .filter(|(_, stage)| stage.matches(values, gender))
            .last()?;

        Some(StageMatch {
            disease_key: self.key.clone(),
            disease_name: self.name.clone(),
            stage_key: stage.key.clone(),
            stage_name: stage.name.clone(),
            description: stage.description.clone(),
            severity_rank: u8::try_from(index + 1).unwrap_or(u8::MAX),
            recommendations: stage.recommendations.clone(),
        })
    }
}

/// The stage selected for one disease.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageMatch {
    pub disease_key: String,
    pub disease_name: String,
    pub stage_key: String,
    pub stage_name: String,
    pub description: String,
    /// 1-based position of the stage in its disease's list.
    pub severity_rank: u8,
    pub recommendations: Vec<String>,
}

/// Run the matcher for every disease of the catalog.
pub fn match_stages(
    catalog: &[DiseaseStaging],
    values: &BTreeMap<String, f64>,
    gender: Gender,
) -> Vec<StageMatch> {
    catalog
        .iter()
        .filter_map(|disease| disease.evaluate(values, gender))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn criterion(parameter: &str, min: f64, max: f64, gender: Option<Gender>) -> StageCriterion {
        StageCriterion {
            parameter: parameter.to_string(),
            min,
            max,
            gender,
        }
    }

    fn stage(key: &str, criteria: Vec<StageCriterion>) -> DiseaseStageDefinition {
        DiseaseStageDefinition {
            key: key.to_string(),
            name: key.to_uppercase(),
            criteria,
            description: String::new(),
            recommendations: vec![format!("{key} advice")],
        }
    }

    fn values(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn most_severe_overlapping_stage_wins() {
        let disease = DiseaseStaging {
            key: "marker".to_string(),
            name: "Marker".to_string(),
            evidence: vec!["x".to_string()],
            stages: vec![
                stage("a", vec![criterion("x", 10.0, 50.0, None)]),
                stage("b", vec![criterion("x", 60.0, 70.0, None)]),
                stage("c", vec![criterion("x", 40.0, 100.0, None)]),
            ],
        };

        let matched = disease
            .evaluate(&values(&[("x", 45.0)]), Gender::Male)
            .unwrap();
        assert_eq!(matched.stage_key, "c");
        assert_eq!(matched.severity_rank, 3);
    }

    #[test]
    fn gender_scoped_criterion_is_skipped_not_failed() {
        let disease = DiseaseStaging {
            key: "anemia".to_string(),
            name: "Anemia".to_string(),
            evidence: vec!["hemoglobin".to_string()],
            stages: vec![stage(
                "mild",
                vec![
                    criterion("hemoglobin", 11.0, 12.9, Some(Gender::Female)),
                    criterion("hematocrit", 30.0, 40.0, None),
                ],
            )],
        };

        // 13.5 would fail the female bound, but the patient is male.
        let male = disease.evaluate(
            &values(&[("hemoglobin", 13.5), ("hematocrit", 35.0)]),
            Gender::Male,
        );
        assert_eq!(male.map(|m| m.stage_key), Some("mild".to_string()));

        let female = disease.evaluate(
            &values(&[("hemoglobin", 13.5), ("hematocrit", 35.0)]),
            Gender::Female,
        );
        assert!(female.is_none());
    }

    #[test]
    fn missing_parameter_fails_the_stage() {
        let disease = DiseaseStaging {
            key: "diabetes".to_string(),
            name: "Diabetes".to_string(),
            evidence: vec!["glucose".to_string(), "hba1c".to_string()],
            stages: vec![stage(
                "early",
                vec![
                    criterion("glucose", 126.0, 180.0, None),
                    criterion("hba1c", 6.5, 7.5, None),
                ],
            )],
        };
        assert!(disease
            .evaluate(&values(&[("glucose", 130.0)]), Gender::Male)
            .is_none());
    }

    #[test]
    fn disease_without_evidence_is_skipped() {
        let disease = DiseaseStaging {
            key: "liver".to_string(),
            name: "Liver".to_string(),
            evidence: vec!["alt".to_string()],
            stages: vec![stage("any", vec![criterion("ast", 0.0, 1000.0, None)])],
        };
        assert!(disease
            .evaluate(&values(&[("ast", 30.0)]), Gender::Male)
            .is_none());
    }

    #[test]
    fn inverted_criterion_fails_validation() {
        let disease = DiseaseStaging {
            key: "bad".to_string(),
            name: "Bad".to_string(),
            evidence: vec!["x".to_string()],
            stages: vec![stage("a", vec![criterion("x", 5.0, 1.0, None)])],
        };
        assert!(matches!(
            disease.validate(),
            Err(PanelError::Configuration(_))
        ));
    }
}
