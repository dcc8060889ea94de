use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::risk::assess_models;
use crate::{
    aggregate_conditions, analysis_confidence, baseline_conditions, classify, derive_metrics,
    generate_insights, health_score, lifestyle_recommendations, match_stages, recommendations,
    Catalog, ConditionAssessment, DerivedMetrics, EngineConfig, EvaluatedParameter, Insight,
    Panel, PanelInput, ParameterStatus, PatientContext, Result, BMI_KEY,
};

/// Evaluates panels against a shared, read-only catalog.
///
/// Each call is independent: the engine holds no per-evaluation state, so one
/// instance can serve any number of patients from any number of threads.
#[derive(Debug, Clone)]
pub struct Engine {
    catalog: Arc<Catalog>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(catalog: Arc<Catalog>, config: EngineConfig) -> Self {
        Self { catalog, config }
    }

    pub fn with_embedded_catalog(config: EngineConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(Catalog::embedded()?), config))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn evaluate(
        &self,
        parameters: &BTreeMap<String, f64>,
        patient: &PatientContext,
    ) -> AnalysisReport {
        let panel = Panel::from_values(parameters.iter().map(|(key, value)| (key.as_str(), *value)));
        self.evaluate_panel(&panel, patient)
    }

    pub fn evaluate_input(&self, input: &PanelInput) -> AnalysisReport {
        self.evaluate_panel(&input.panel(), &input.patient)
    }

    pub fn evaluate_panel(&self, panel: &Panel, patient: &PatientContext) -> AnalysisReport {
        let evaluated = classify(panel, self.catalog.ranges());

        let mut values = panel.values();
        let mut derived = derive_metrics(&values, patient);
        derived.augment(&mut values);

        let stages = match_stages(self.catalog.staging(), &values, patient.gender);
        let risks = assess_models(self.catalog.risk_models(), &values, patient);
        let baseline = baseline_conditions(
            self.catalog.condition_groups(),
            &evaluated,
            self.config.condition_min_ratio,
        );
        let conditions = aggregate_conditions(baseline, stages, risks);

        let bmi = values.get(BMI_KEY).copied();
        let overall_health_score = health_score(&evaluated, &conditions, bmi, patient);
        let overall_confidence = analysis_confidence(&evaluated, &conditions, &values);
        let insights = generate_insights(&values, patient);
        let recommendations = recommendations(&conditions, &evaluated, patient, &self.config);
        let lifestyle_recommendations = lifestyle_recommendations(&conditions, bmi);

        log::debug!(
            "Evaluated {} parameters: {} conditions, health score {}",
            evaluated.len(),
            conditions.len(),
            overall_health_score
        );

        AnalysisReport {
            evaluated_parameters: evaluated,
            derived,
            conditions,
            overall_health_score,
            overall_confidence,
            insights,
            recommendations,
            lifestyle_recommendations,
        }
    }
}

/// Everything one evaluation produces.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisReport {
    pub evaluated_parameters: Vec<EvaluatedParameter>,
    pub derived: DerivedMetrics,
    pub conditions: Vec<ConditionAssessment>,
    pub overall_health_score: u8,
    pub overall_confidence: f64,
    /// Full ranked list; see [`AnalysisReport::top_insights`].
    pub insights: Vec<Insight>,
    pub recommendations: Vec<String>,
    pub lifestyle_recommendations: Vec<String>,
}

impl AnalysisReport {
    pub fn abnormal_parameters(&self) -> impl Iterator<Item = &EvaluatedParameter> {
        self.evaluated_parameters.iter().filter(|p| p.is_abnormal)
    }

    pub fn normal_parameters(&self) -> impl Iterator<Item = &EvaluatedParameter> {
        self.evaluated_parameters
            .iter()
            .filter(|p| p.status == ParameterStatus::Normal)
    }

    pub fn unknown_parameters(&self) -> impl Iterator<Item = &EvaluatedParameter> {
        self.evaluated_parameters
            .iter()
            .filter(|p| p.status == ParameterStatus::Unknown)
    }

    pub fn top_insights(&self, limit: usize) -> &[Insight] {
        &self.insights[..self.insights.len().min(limit)]
    }

    pub fn most_concerning_parameter(&self) -> Option<&EvaluatedParameter> {
        self.abnormal_parameters().next()
    }

    pub fn primary_condition(&self) -> Option<&ConditionAssessment> {
        self.conditions.first()
    }
}
