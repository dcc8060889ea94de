//! Condition aggregation: parameter-group baseline merged with staging and
//! weighted-risk results into one ranked list.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{EvaluatedParameter, PanelError, Result, RiskAssessment, Severity, StageMatch};

// Confidence for a condition that only the threshold matcher found.
const STAGED_ONLY_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeverityTexts {
    pub mild: String,
    pub moderate: String,
    pub high: String,
}

impl SeverityTexts {
    pub fn text(&self, severity: Severity) -> &str {
        match severity {
            Severity::Mild => &self.mild,
            Severity::Moderate => &self.moderate,
            Severity::High => &self.high,
        }
    }
}

/// A condition suggested by how many of its related parameters are abnormal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConditionGroup {
    pub key: String,
    pub name: String,
    pub description: String,
    pub parameters: Vec<String>,
    pub severity_levels: SeverityTexts,
    pub recommendations: Vec<String>,
}

impl ConditionGroup {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.parameters.is_empty() {
            return Err(PanelError::Configuration(format!(
                "condition group {} has no parameters",
                self.key
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BaselineMatch {
    pub disease_key: String,
    pub display_name: String,
    /// Abnormal over present parameters of the group.
    pub ratio: f64,
    pub matched: usize,
    pub present: usize,
    pub severity: Severity,
    /// `ratio` as a whole percentage.
    pub probability: u8,
    pub severity_text: String,
    pub description: String,
    pub recommendations: Vec<String>,
}

/// One ranked condition in the report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConditionAssessment {
    pub disease_key: String,
    pub display_name: String,
    pub stage_name: String,
    pub severity_rank: u8,
    pub severity: Severity,
    pub risk_score: f64,
    pub confidence: f64,
    /// Baseline match percentage, or 100 when only rule output backs the entry.
    pub probability: u8,
    pub interpretation: String,
    pub description: String,
    pub recommendations: Vec<String>,
    /// A threshold stage matched. Weighted-model output alone does not count.
    pub has_staging: bool,
    pub staging: Option<StageMatch>,
    pub risk: Option<RiskAssessment>,
}

/// Match every group against the classified parameters.
pub fn baseline_conditions(
    groups: &[ConditionGroup],
    evaluated: &[EvaluatedParameter],
    min_ratio: f64,
) -> Vec<BaselineMatch> {
    let by_key: BTreeMap<&str, &EvaluatedParameter> =
        evaluated.iter().map(|p| (p.key.as_str(), p)).collect();

    groups
        .iter()
        .filter_map(|group| {
            let present: Vec<&EvaluatedParameter> = group
                .parameters
                .iter()
                .filter_map(|param| by_key.get(param.as_str()).copied())
                .collect();
            if present.is_empty() {
                return None;
            }

            let matched = present.iter().filter(|p| p.is_abnormal).count();
            let ratio = matched as f64 / present.len() as f64;
            if ratio < min_ratio {
                return None;
            }

            let severity = if ratio < 0.5 {
                Severity::Mild
            } else if ratio < 0.8 {
                Severity::Moderate
            } else {
                Severity::High
            };

            Some(BaselineMatch {
                disease_key: group.key.clone(),
                display_name: group.name.clone(),
                ratio,
                matched,
                present: present.len(),
                severity,
                probability: (ratio * 100.0).round().clamp(0.0, 100.0) as u8,
                severity_text: group.severity_levels.text(severity).to_string(),
                description: group.description.clone(),
                recommendations: group.recommendations.clone(),
            })
        })
        .collect()
}

/// Merge the three result sources by disease key and rank the outcome.
///
/// Staging supplies the stage name, rank and description when present; the
/// weighted model supplies score and confidence; the baseline keeps its
/// probability.
pub fn aggregate_conditions(
    baseline: Vec<BaselineMatch>,
    stages: Vec<StageMatch>,
    risks: Vec<RiskAssessment>,
) -> Vec<ConditionAssessment> {
    let mut baseline: BTreeMap<String, BaselineMatch> = baseline
        .into_iter()
        .map(|b| (b.disease_key.clone(), b))
        .collect();
    let mut stages: BTreeMap<String, StageMatch> = stages
        .into_iter()
        .map(|s| (s.disease_key.clone(), s))
        .collect();
    let mut risks: BTreeMap<String, RiskAssessment> = risks
        .into_iter()
        .map(|r| (r.disease_key.clone(), r))
        .collect();

    let keys: BTreeSet<String> = baseline
        .keys()
        .chain(stages.keys())
        .chain(risks.keys())
        .cloned()
        .collect();

    let mut conditions: Vec<ConditionAssessment> = keys
        .into_iter()
        .map(|key| {
            let base = baseline.remove(&key);
            let staged = stages.remove(&key);
            let risk = risks.remove(&key);
            merge(key, base, staged, risk)
        })
        .collect();

    conditions.sort_by(compare_conditions);
    conditions
}

fn merge(
    disease_key: String,
    base: Option<BaselineMatch>,
    staged: Option<StageMatch>,
    risk: Option<RiskAssessment>,
) -> ConditionAssessment {
    let display_name = risk
        .as_ref()
        .map(|r| r.display_name.clone())
        .or_else(|| staged.as_ref().map(|s| s.disease_name.clone()))
        .or_else(|| base.as_ref().map(|b| b.display_name.clone()))
        .unwrap_or_else(|| disease_key.clone());

    let stage_name = staged
        .as_ref()
        .map(|s| s.stage_name.clone())
        .or_else(|| risk.as_ref().map(|r| r.stage_name.clone()))
        .or_else(|| base.as_ref().map(|b| b.severity.to_string()))
        .unwrap_or_default();

    let severity_rank = staged
        .as_ref()
        .map(|s| s.severity_rank)
        .or_else(|| risk.as_ref().map(|r| r.severity_rank))
        .or_else(|| base.as_ref().map(|b| b.severity.rank()))
        .unwrap_or(1);

    let risk_score = risk
        .as_ref()
        .map(|r| r.risk_score)
        .or_else(|| base.as_ref().map(|b| f64::from(b.probability)))
        .unwrap_or(0.0)
        .clamp(0.0, 100.0);

    let confidence = risk
        .as_ref()
        .map(|r| r.confidence)
        .or_else(|| {
            base.as_ref()
                .map(|b| b.ratio.min(b.severity.confidence_cap()))
        })
        .unwrap_or(STAGED_ONLY_CONFIDENCE)
        .clamp(0.0, 1.0);

    let interpretation = risk
        .as_ref()
        .map(|r| r.interpretation.clone())
        .or_else(|| base.as_ref().map(|b| b.severity_text.clone()))
        .or_else(|| staged.as_ref().map(|s| s.description.clone()))
        .unwrap_or_default();

    let description = staged
        .as_ref()
        .map(|s| s.description.clone())
        .or_else(|| base.as_ref().map(|b| b.description.clone()))
        .unwrap_or_default();

    let recommendations = staged
        .as_ref()
        .map(|s| s.recommendations.clone())
        .or_else(|| risk.as_ref().map(|r| r.recommendations.clone()))
        .or_else(|| base.as_ref().map(|b| b.recommendations.clone()))
        .unwrap_or_default();

    ConditionAssessment {
        disease_key,
        display_name,
        stage_name,
        severity_rank,
        severity: Severity::from_rank(severity_rank),
        risk_score,
        confidence,
        probability: base.as_ref().map_or(100, |b| b.probability),
        interpretation,
        description,
        recommendations,
        has_staging: staged.is_some(),
        staging: staged,
        risk,
    }
}

fn compare_conditions(a: &ConditionAssessment, b: &ConditionAssessment) -> Ordering {
    b.severity_rank
        .cmp(&a.severity_rank)
        .then_with(|| b.confidence.total_cmp(&a.confidence))
        .then_with(|| a.display_name.cmp(&b.display_name))
        .then_with(|| a.disease_key.cmp(&b.disease_key))
}
