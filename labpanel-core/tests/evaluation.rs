use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;

use labpanel_core::{
    match_stages, Catalog, CatalogSources, Engine, EngineConfig, Gender, PanelInput,
    ParameterStatus, PatientContext,
};

fn fixture_path(name: &str) -> String {
    format!("{}/tests/data/{name}", env!("CARGO_MANIFEST_DIR"))
}

fn engine() -> Engine {
    Engine::with_embedded_catalog(EngineConfig::default()).expect("embedded catalog is valid")
}

fn params(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

#[test]
fn normal_glucose_emits_no_diabetes() {
    let report = engine().evaluate(
        &params(&[("glucose", 95.0)]),
        &PatientContext::new(30, Gender::Male),
    );

    assert_eq!(report.evaluated_parameters[0].status, ParameterStatus::Normal);
    assert!(report.conditions.iter().all(|c| c.disease_key != "diabetes"));
}

#[test]
fn diabetic_values_score_type_two_diabetes() {
    let patient = PatientContext::new(50, Gender::Male).with_body(170.0, 89.6);
    let report = engine().evaluate(&params(&[("glucose", 130.0), ("hba1c", 7.0)]), &patient);

    let diabetes = report
        .conditions
        .iter()
        .find(|c| c.disease_key == "diabetes")
        .expect("diabetes condition");
    let risk = diabetes.risk.as_ref().expect("weighted result");

    assert!(risk.raw_score >= 85.0);
    assert_eq!(risk.display_name, "Diabetes Mellitus");
    assert_eq!(risk.stage_name, "Type 2 Diabetes");
    assert_eq!(risk.interpretation, "Fasting glucose ≥ 126 mg/dL indicates diabetes");
    assert!((diabetes.confidence - 0.95).abs() < 1e-9);
    assert!((diabetes.risk_score - 100.0).abs() < f64::EPSILON);
    assert_eq!(diabetes.display_name, "Diabetes Mellitus");
    // The threshold matcher wins the stage label.
    assert_eq!(diabetes.stage_name, "Early Stage Diabetes (Stage 1)");
}

#[test]
fn female_anemia_uses_female_cut_points() {
    let report = engine().evaluate(
        &params(&[("hemoglobin", 9.5), ("hematocrit", 30.0)]),
        &PatientContext::new(35, Gender::Female),
    );

    let anemia = report
        .conditions
        .iter()
        .find(|c| c.disease_key == "anemia")
        .expect("anemia condition");
    let risk = anemia.risk.as_ref().expect("weighted result");

    // hemoglobin 9.5 sits above the 9.0 severe cut-point: 30 points, plus 20
    // for hematocrit.
    assert!((risk.raw_score - 50.0).abs() < f64::EPSILON);
    assert_eq!(risk.stage_name, "Moderate to Severe Anemia");
    assert_eq!(
        risk.interpretation,
        "Hemoglobin of 9.5 g/dL is significantly below the normal range for female."
    );
    assert!((anemia.confidence - 0.5).abs() < 1e-9);
    assert_eq!(anemia.staging.as_ref().map(|s| s.stage_key.as_str()), Some("moderate"));
    assert_eq!(anemia.probability, 100);
}

#[test]
fn male_creatinine_feeds_egfr_without_kidney_finding() {
    let report = engine().evaluate(
        &params(&[("creatinine", 0.9)]),
        &PatientContext::new(40, Gender::Male),
    );

    let egfr = report.derived.egfr.expect("egfr derived");
    assert!((egfr - 141.0 * 0.993_f64.powi(40)).abs() < 1e-9);
    assert!(report.conditions.iter().all(|c| c.disease_key != "kidney_disease"));
}

#[test]
fn evaluation_is_idempotent() {
    let input: PanelInput =
        serde_json::from_str(&fs::read_to_string(fixture_path("metabolic_panel.json")).unwrap())
            .unwrap();
    let engine = engine();

    let first = serde_json::to_string(&engine.evaluate_input(&input)).unwrap();
    let second = serde_json::to_string(&engine.evaluate_input(&input)).unwrap();
    assert_eq!(first, second);
}

#[test]
fn metabolic_fixture_produces_ranked_conditions() {
    let input: PanelInput =
        serde_json::from_str(&fs::read_to_string(fixture_path("metabolic_panel.json")).unwrap())
            .unwrap();
    let report = engine().evaluate_input(&input);

    let unknown: Vec<_> = report.unknown_parameters().map(|p| p.key.as_str()).collect();
    assert_eq!(unknown, ["ferritin"]);
    assert_eq!(
        report.abnormal_parameters().count() + report.normal_parameters().count() + 1,
        report.evaluated_parameters.len()
    );
    assert!(report
        .normal_parameters()
        .all(|p| p.range.as_ref().is_some_and(|r| r.contains(p.value))));

    let glucose = report
        .evaluated_parameters
        .iter()
        .find(|p| p.key == "glucose")
        .unwrap();
    assert_eq!(glucose.unit.as_deref(), Some("mg/dL"));
    assert_eq!(glucose.extraction_confidence, Some(0.92));

    let diabetes = report
        .conditions
        .iter()
        .find(|c| c.disease_key == "diabetes")
        .unwrap();
    assert_eq!(
        diabetes.staging.as_ref().map(|s| s.stage_key.as_str()),
        Some("intermediate")
    );

    let kidney = report
        .conditions
        .iter()
        .find(|c| c.disease_key == "kidney_disease")
        .unwrap();
    let kidney_risk = kidney.risk.as_ref().unwrap();
    assert_eq!(kidney_risk.severity_rank, 3);
    assert!(kidney_risk.interpretation.starts_with("eGFR of 46.8 "));

    for pair in report.conditions.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        assert!(
            a.severity_rank > b.severity_rank
                || a.severity_rank == b.severity_rank && a.confidence > b.confidence
                || a.severity_rank == b.severity_rank
                    && a.confidence == b.confidence
                    && a.display_name <= b.display_name,
            "{} before {}",
            a.display_name,
            b.display_name
        );
    }

    assert!((report.overall_confidence - 0.95).abs() < 1e-9);
    assert_eq!(
        report.primary_condition().map(|c| c.disease_key.as_str()),
        Some(report.conditions[0].disease_key.as_str())
    );
    assert!(report.top_insights(5).len() <= 5);

    let mut seen = std::collections::HashSet::new();
    assert!(report.recommendations.iter().all(|r| seen.insert(r)));
}

#[test]
fn thirty_abnormal_parameters_clamp_score_at_zero() {
    let engine = engine();
    let values: BTreeMap<String, f64> = engine
        .catalog()
        .ranges()
        .iter()
        .map(|range| (range.parameter.clone(), range.max * 3.0 + 10.0))
        .collect();
    assert_eq!(values.len(), 30);

    let report = engine.evaluate(&values, &PatientContext::new(70, Gender::Female));

    assert_eq!(report.abnormal_parameters().count(), 30);
    assert_eq!(report.overall_health_score, 0);
    for condition in &report.conditions {
        assert!((0.0..=100.0).contains(&condition.risk_score));
        assert!((0.0..=1.0).contains(&condition.confidence));
    }
}

#[test]
fn failing_liver_rule_leaves_other_conditions_intact() {
    // alt = 0 makes the AST/ALT ratio undefined.
    let report = engine().evaluate(
        &params(&[("alt", 0.0), ("ast", 120.0), ("glucose", 150.0)]),
        &PatientContext::new(40, Gender::Male),
    );

    let liver = report
        .conditions
        .iter()
        .find(|c| c.disease_key == "liver_disease")
        .expect("baseline liver condition");
    assert!(liver.risk.is_none());

    let diabetes = report
        .conditions
        .iter()
        .find(|c| c.disease_key == "diabetes")
        .expect("diabetes condition");
    assert!(diabetes.risk.is_some());
}

#[test]
fn replaced_catalog_documents_take_effect() {
    let sources = CatalogSources {
        risk_models: "[]".to_string(),
        ..CatalogSources::default()
    };
    let catalog = Catalog::from_sources(&sources).unwrap();
    let engine = Engine::new(Arc::new(catalog), EngineConfig::default());

    let report = engine.evaluate(
        &params(&[("glucose", 150.0)]),
        &PatientContext::new(40, Gender::Male),
    );
    assert!(report.conditions.iter().all(|c| c.risk.is_none()));
    assert!(report.conditions.iter().any(|c| c.disease_key == "diabetes"));
}

#[test]
fn stricter_ratio_config_suppresses_weak_groups() {
    let config = EngineConfig {
        condition_min_ratio: 0.9,
        ..EngineConfig::default()
    };
    let engine = Engine::with_embedded_catalog(config).unwrap();
    // One of two electrolytes abnormal: ratio 0.5.
    let report = engine.evaluate(
        &params(&[("sodium", 150.0), ("potassium", 4.0)]),
        &PatientContext::new(40, Gender::Male),
    );
    assert!(report.conditions.is_empty());
}

fn stage_key(pairs: &[(&str, f64)], disease: &str, gender: Gender) -> Option<String> {
    let engine = engine();
    match_stages(engine.catalog().staging(), &params(pairs), gender)
        .into_iter()
        .find(|m| m.disease_key == disease)
        .map(|m| m.stage_key)
}

#[test]
fn values_between_stage_bounds_still_stage() {
    let male = Gender::Male;
    assert_eq!(stage_key(&[("hemoglobin", 11.5)], "anemia", male).as_deref(), Some("mild"));
    assert_eq!(stage_key(&[("hemoglobin", 10.95)], "anemia", male).as_deref(), Some("moderate"));
    assert_eq!(stage_key(&[("hemoglobin", 7.95)], "anemia", male).as_deref(), Some("severe"));

    let diabetes = |glucose: f64, hba1c: f64| {
        stage_key(&[("glucose", glucose), ("hba1c", hba1c)], "diabetes", male)
    };
    assert_eq!(diabetes(125.5, 6.45).as_deref(), Some("early"));
    assert_eq!(diabetes(180.5, 7.55).as_deref(), Some("intermediate"));
    assert_eq!(diabetes(300.5, 9.05).as_deref(), Some("advanced"));

    let kidney = |creatinine: f64, egfr: f64| {
        stage_key(&[("creatinine", creatinine), ("egfr", egfr)], "kidney_disease", male)
    };
    assert_eq!(kidney(1.5, 89.995).as_deref(), Some("stage2"));
    assert_eq!(kidney(1.95, 59.995).as_deref(), Some("stage3"));

    assert_eq!(
        stage_key(&[("alt", 80.5), ("ast", 80.5), ("bilirubin", 2.05)], "liver_disease", male)
            .as_deref(),
        Some("moderate")
    );
}

#[test]
fn staging_catalog_has_no_gaps_between_stages() {
    let engine = engine();
    for disease in engine.catalog().staging() {
        for gender in [Gender::Male, Gender::Female] {
            let mut by_parameter: BTreeMap<&str, Vec<(f64, f64)>> = BTreeMap::new();
            for stage in &disease.stages {
                for criterion in stage
                    .criteria
                    .iter()
                    .filter(|c| c.gender.map_or(true, |scope| scope == gender))
                {
                    by_parameter
                        .entry(criterion.parameter.as_str())
                        .or_default()
                        .push((criterion.min, criterion.max));
                }
            }
            for (parameter, mut intervals) in by_parameter {
                intervals.sort_by(|a, b| a.0.total_cmp(&b.0));
                for pair in intervals.windows(2) {
                    assert!(
                        pair[1].0 <= pair[0].1,
                        "{} {parameter} ({gender}): gap between {} and {}",
                        disease.key,
                        pair[0].1,
                        pair[1].0
                    );
                }
            }
        }
    }
}

#[test]
fn supplied_egfr_is_the_one_reported() {
    let report = engine().evaluate(
        &params(&[("creatinine", 0.9), ("egfr", 25.0)]),
        &PatientContext::new(40, Gender::Male),
    );

    assert_eq!(report.derived.egfr, Some(25.0));
    let kidney_insight = report
        .insights
        .iter()
        .find(|i| i.title == "Reduced Kidney Function")
        .expect("kidney insight");
    assert_eq!(kidney_insight.parameters.get("egfr"), Some(&25.0));
}
