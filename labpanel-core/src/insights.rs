//! Composite scores, textual insights and recommendation lists.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{
    ConditionAssessment, EngineConfig, EvaluatedParameter, Gender, ParameterStatus,
    PatientContext, Severity, EGFR_KEY,
};

/// Parameters whose absence lowers the analysis confidence.
pub const KEY_PARAMETERS: [&str; 4] = ["hemoglobin", "glucose", "creatinine", "alt"];

const BASE_HEALTH_SCORE: f64 = 80.0;
const BASE_CONFIDENCE: i32 = 70;

const GENERAL_RECOMMENDATIONS: [&str; 6] = [
    "Schedule a follow-up appointment with your healthcare provider to discuss these results.",
    "Maintain a balanced diet rich in fruits, vegetables, whole grains, and lean proteins.",
    "Stay hydrated by drinking enough water throughout the day.",
    "Get regular physical activity appropriate for your health status.",
    "Ensure you get adequate sleep (7-9 hours for most adults).",
    "Manage stress through relaxation techniques, exercise, or counseling if needed.",
];

const DIETARY_CONDITIONS: [&str; 4] = ["diabetes", "cardiovascular", "kidney_disease", "liver_disease"];
const EXERCISE_CONDITIONS: [&str; 2] = ["diabetes", "cardiovascular"];

/// Rule-triggered observation about the panel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Insight {
    pub title: String,
    pub description: String,
    /// 1 (informational) to 3 (needs attention).
    pub impact_level: u8,
    pub parameters: BTreeMap<String, f64>,
}

impl Insight {
    fn new(title: &str, description: &str, impact_level: u8, parameters: &[(&str, f64)]) -> Self {
        Self {
            title: title.to_string(),
            description: description.to_string(),
            impact_level,
            parameters: parameters
                .iter()
                .map(|(key, value)| (key.to_string(), *value))
                .collect(),
        }
    }
}

/// Overall health score in `[0, 100]`, starting from 80.
pub fn health_score(
    evaluated: &[EvaluatedParameter],
    conditions: &[ConditionAssessment],
    bmi: Option<f64>,
    patient: &PatientContext,
) -> u8 {
    let mut score = BASE_HEALTH_SCORE;

    let abnormal: Vec<&EvaluatedParameter> = evaluated.iter().filter(|p| p.is_abnormal).collect();
    for param in &abnormal {
        score -= match param.severity {
            Some(Severity::High) => 5.0,
            Some(Severity::Moderate) => 3.0,
            Some(Severity::Mild) | None => 1.0,
        };
    }

    for condition in conditions {
        score -= match condition.severity_rank {
            rank if rank >= 3 => 8.0,
            2 => 5.0,
            _ => 2.0,
        };
    }

    match bmi {
        Some(bmi) if bmi >= 30.0 => score -= 5.0,
        Some(bmi) if bmi >= 25.0 => score -= 2.0,
        _ => {}
    }

    if patient.age > 60 {
        score -= 0.5 * abnormal.len() as f64;
    }

    score.round().clamp(0.0, 100.0) as u8
}

/// Heuristic certainty of the whole analysis in `[0.40, 0.95]`.
pub fn analysis_confidence(
    evaluated: &[EvaluatedParameter],
    conditions: &[ConditionAssessment],
    values: &BTreeMap<String, f64>,
) -> f64 {
    let mut points = BASE_CONFIDENCE;

    let known = evaluated
        .iter()
        .filter(|p| p.status != ParameterStatus::Unknown)
        .count();
    if known >= 15 {
        points += 20;
    } else if known >= 8 {
        points += 10;
    }

    if !conditions.is_empty() {
        points += 5;
    }

    let missing = KEY_PARAMETERS
        .iter()
        .filter(|key| !values.contains_key(**key))
        .count();
    points -= 5 * missing as i32;

    f64::from(points.clamp(40, 95)) / 100.0
}

/// Value-band insights, most impactful first. Equal impact keeps rule order.
pub fn generate_insights(values: &BTreeMap<String, f64>, patient: &PatientContext) -> Vec<Insight> {
    let mut insights = Vec::new();

    if let Some(&glucose) = values.get("glucose") {
        if glucose >= 126.0 {
            insights.push(Insight::new(
                "Elevated Blood Glucose",
                "Your blood glucose level is significantly elevated, which is consistent with diabetes. This requires medical attention.",
                3,
                &[("glucose", glucose)],
            ));
        } else if glucose >= 100.0 {
            insights.push(Insight::new(
                "Pre-diabetic Blood Glucose",
                "Your blood glucose level is in the pre-diabetic range. This suggests increased risk for developing diabetes.",
                2,
                &[("glucose", glucose)],
            ));
        }
    }

    if let (Some(&ldl), Some(&hdl)) = (values.get("ldl"), values.get("hdl")) {
        if ldl > 130.0 && hdl < 40.0 {
            insights.push(Insight::new(
                "Unfavorable Cholesterol Profile",
                "Both elevated LDL ('bad' cholesterol) and low HDL ('good' cholesterol) significantly increase cardiovascular risk.",
                3,
                &[("ldl", ldl), ("hdl", hdl)],
            ));
        } else if ldl > 130.0 {
            insights.push(Insight::new(
                "Elevated LDL Cholesterol",
                "Your LDL ('bad' cholesterol) level is above the desirable range, which may increase cardiovascular risk.",
                2,
                &[("ldl", ldl)],
            ));
        } else if hdl < 40.0 {
            insights.push(Insight::new(
                "Low HDL Cholesterol",
                "Your HDL ('good' cholesterol) level is below the recommended range. HDL helps remove other forms of cholesterol from your bloodstream.",
                2,
                &[("hdl", hdl)],
            ));
        }
    }

    if let Some(&hemoglobin) = values.get("hemoglobin") {
        let (low, severe) = match patient.gender {
            Gender::Male => (13.5, 10.0),
            Gender::Female => (12.0, 9.0),
        };
        if hemoglobin < severe {
            insights.push(Insight::new(
                "Significant Anemia",
                "Your hemoglobin level is significantly below normal range, indicating moderate to severe anemia. This requires medical attention.",
                3,
                &[("hemoglobin", hemoglobin)],
            ));
        } else if hemoglobin < low {
            insights.push(Insight::new(
                "Mild Anemia",
                "Your hemoglobin level is slightly below normal range, suggesting mild anemia.",
                2,
                &[("hemoglobin", hemoglobin)],
            ));
        }
    }

    if let Some(&egfr) = values.get(EGFR_KEY) {
        if egfr < 60.0 {
            insights.push(Insight::new(
                "Reduced Kidney Function",
                "Your estimated glomerular filtration rate is below 60, which suggests your kidneys are not filtering blood as well as they should.",
                3,
                &[(EGFR_KEY, egfr)],
            ));
        } else if egfr < 90.0 {
            insights.push(Insight::new(
                "Mildly Reduced Kidney Function",
                "Your estimated glomerular filtration rate is slightly below the normal range. Kidney function should be rechecked.",
                2,
                &[(EGFR_KEY, egfr)],
            ));
        }
    }

    let alt = values.get("alt").copied();
    let ast = values.get("ast").copied();
    if alt.is_some_and(|v| v > 55.0) || ast.is_some_and(|v| v > 48.0) {
        let shown: Vec<(&str, f64)> = [("alt", alt), ("ast", ast)]
            .into_iter()
            .filter_map(|(key, value)| value.map(|v| (key, v)))
            .collect();
        insights.push(Insight::new(
            "Elevated Liver Enzymes",
            "One or more liver enzymes are above the normal range, which can point to liver stress or inflammation.",
            2,
            &shown,
        ));
    }

    if let Some(&bmi) = values.get(crate::BMI_KEY) {
        if bmi >= 30.0 {
            insights.push(Insight::new(
                "Obesity Range BMI",
                "Your body mass index is in the obese range, which raises the risk of diabetes and heart disease.",
                2,
                &[(crate::BMI_KEY, bmi)],
            ));
        } else if bmi >= 25.0 {
            insights.push(Insight::new(
                "Overweight Range BMI",
                "Your body mass index is in the overweight range. Modest weight loss can improve several blood markers.",
                1,
                &[(crate::BMI_KEY, bmi)],
            ));
        }
    }

    insights.sort_by(|a, b| b.impact_level.cmp(&a.impact_level));
    insights
}

/// Specific recommendations first, then the general list, without duplicates.
pub fn recommendations(
    conditions: &[ConditionAssessment],
    evaluated: &[EvaluatedParameter],
    patient: &PatientContext,
    config: &EngineConfig,
) -> Vec<String> {
    let mut specific: Vec<String> = Vec::new();

    for condition in conditions {
        if condition.probability <= config.recommendation_probability_threshold {
            continue;
        }
        let limit = if condition.has_staging {
            config.staged_recommendation_limit
        } else {
            config.baseline_recommendation_limit
        };
        specific.extend(condition.recommendations.iter().take(limit).cloned());
    }

    let status_of = |key: &str| {
        evaluated
            .iter()
            .find(|p| p.key == key)
            .map(|p| p.status)
    };
    if status_of("hemoglobin") == Some(ParameterStatus::Low) {
        specific.push(
            "Consider iron-rich foods like spinach, beans, and lean meats to improve hemoglobin levels."
                .to_string(),
        );
    }
    if status_of("cholesterol") == Some(ParameterStatus::High) {
        specific.push(
            "Reduce intake of saturated fats and increase consumption of omega-3 rich foods to help manage cholesterol."
                .to_string(),
        );
    }
    if status_of("glucose") == Some(ParameterStatus::High) {
        specific.push(
            "Limit consumption of refined carbohydrates and sugars to help manage blood glucose levels."
                .to_string(),
        );
    }

    if patient.age >= 50 {
        specific.push(
            "Consider regular screenings for colorectal cancer as recommended for adults over 50."
                .to_string(),
        );
    }
    match patient.gender {
        Gender::Female if patient.age >= 40 => specific.push(
            "Schedule regular mammograms as recommended for breast cancer screening.".to_string(),
        ),
        Gender::Male if patient.age >= 50 => specific.push(
            "Discuss prostate health and PSA testing with your healthcare provider.".to_string(),
        ),
        _ => {}
    }

    dedup(
        specific
            .into_iter()
            .chain(GENERAL_RECOMMENDATIONS.iter().map(|s| s.to_string())),
    )
}

/// Diet, exercise, weight and wellness advice keyed off the condition set.
pub fn lifestyle_recommendations(conditions: &[ConditionAssessment], bmi: Option<f64>) -> Vec<String> {
    let has_any = |keys: &[&str]| {
        conditions
            .iter()
            .any(|c| keys.contains(&c.disease_key.as_str()))
    };

    let mut out: Vec<&str> = Vec::new();
    if has_any(&DIETARY_CONDITIONS) {
        out.extend([
            "Consider consulting with a registered dietitian for a personalized nutrition plan",
            "Focus on eating a balanced diet with plenty of vegetables, fruits, and whole grains",
            "Limit processed foods, added sugars, and foods high in sodium",
        ]);
    }
    if has_any(&EXERCISE_CONDITIONS) {
        out.extend([
            "Aim for at least 150 minutes of moderate-intensity exercise per week",
            "Include both aerobic exercise and strength training in your routine",
            "Start slowly and gradually increase intensity if you haven't been active",
        ]);
    }
    if bmi.is_some_and(|bmi| bmi >= 25.0) {
        out.extend([
            "Consider working with a healthcare provider on a weight management plan",
            "Focus on sustainable lifestyle changes rather than crash diets",
            "Set realistic goals for gradual weight loss (1-2 pounds per week)",
        ]);
    }
    out.extend([
        "Practice stress management techniques such as meditation, deep breathing, or yoga",
        "Ensure you get 7-9 hours of quality sleep each night",
        "Stay socially connected with friends, family, and community",
    ]);
    if has_any(&["diabetes"]) {
        out.extend([
            "Monitor your blood glucose levels as recommended by your healthcare provider",
            "Be aware of the symptoms of high and low blood sugar",
            "Maintain a consistent eating schedule",
        ]);
    }

    dedup(out.into_iter().map(str::to_string))
}

fn dedup(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}
