//! Framework-neutral WASM <-> JavaScript bridge.

use std::sync::{Arc, OnceLock};

use labpanel_core::{AnalysisReport, Catalog, Engine, EngineConfig, PanelError, PanelInput};
use serde::Deserialize;
use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;

static CATALOG: OnceLock<Result<Arc<Catalog>, String>> = OnceLock::new();

#[derive(Deserialize, Default)]
struct JsEngineConfig {
    #[serde(default)]
    condition_min_ratio: Option<f64>,
    #[serde(default)]
    recommendation_probability_threshold: Option<u8>,
    #[serde(default)]
    staged_recommendation_limit: Option<usize>,
    #[serde(default)]
    baseline_recommendation_limit: Option<usize>,
    #[serde(default)]
    insight_display_limit: Option<usize>,
}

impl From<JsEngineConfig> for EngineConfig {
    fn from(cfg: JsEngineConfig) -> Self {
        let mut base = EngineConfig::default();
        if let Some(ratio) = cfg.condition_min_ratio {
            base.condition_min_ratio = ratio;
        }
        if let Some(threshold) = cfg.recommendation_probability_threshold {
            base.recommendation_probability_threshold = threshold;
        }
        if let Some(limit) = cfg.staged_recommendation_limit {
            base.staged_recommendation_limit = limit;
        }
        if let Some(limit) = cfg.baseline_recommendation_limit {
            base.baseline_recommendation_limit = limit;
        }
        if let Some(limit) = cfg.insight_display_limit {
            base.insight_display_limit = limit;
        }
        base
    }
}

/// Evaluate a `PanelInput`-shaped object: `{patient, parameters, confidence?, units?}`.
#[wasm_bindgen]
pub fn evaluate_panel(input: JsValue, config: Option<JsValue>) -> Result<JsValue, JsValue> {
    #[cfg(target_arch = "wasm32")]
    console_error_panic_hook::set_once();

    let input: PanelInput = from_value(input)
        .map_err(|err| JsValue::from_str(&format!("Cannot read panel input: {err}")))?;
    let engine = build_engine(config)?;

    report_to_js(&engine.evaluate_input(&input))
}

/// Convert a FHIR R4 bundle and evaluate it. Ages are computed against today's date.
#[wasm_bindgen]
pub fn evaluate_bundle(input_bundle: JsValue, config: Option<JsValue>) -> Result<JsValue, JsValue> {
    #[cfg(target_arch = "wasm32")]
    console_error_panic_hook::set_once();

    let bundle_value = from_value::<serde_json::Value>(input_bundle)
        .map_err(|err| JsValue::from_str(&format!("Cannot read JSON bundle: {err}")))?;
    let engine = build_engine(config)?;

    let today = chrono::Utc::now().date_naive();
    let input = labpanel_fhir::panel_from_bundle_value(&bundle_value, today)
        .map_err(|err| JsValue::from_str(&format_panel_error(err)))?;

    report_to_js(&engine.evaluate_input(&input))
}

fn build_engine(config: Option<JsValue>) -> Result<Engine, JsValue> {
    let cfg = match config {
        Some(js_cfg) if !js_cfg.is_undefined() && !js_cfg.is_null() => {
            let cfg: JsEngineConfig = from_value(js_cfg)
                .map_err(|err| JsValue::from_str(&format!("Cannot read config: {err}")))?;
            EngineConfig::from(cfg)
        }
        _ => EngineConfig::default(),
    };

    let catalog = shared_catalog().map_err(|err| JsValue::from_str(&err))?;
    Ok(Engine::new(catalog, cfg))
}

/// The embedded catalog, parsed and validated once per module instance.
fn shared_catalog() -> Result<Arc<Catalog>, String> {
    CATALOG
        .get_or_init(|| {
            Catalog::embedded()
                .map(Arc::new)
                .map_err(format_panel_error)
        })
        .clone()
}

fn report_to_js(report: &AnalysisReport) -> Result<JsValue, JsValue> {
    to_value(report).map_err(|err| JsValue::from_str(&format!("Cannot serialize report: {err}")))
}

fn format_panel_error(err: PanelError) -> String {
    format!("Panel error: {err}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_merges_over_defaults() {
        let cfg: JsEngineConfig =
            serde_json::from_str(r#"{"condition_min_ratio": 0.5, "insight_display_limit": 3}"#)
                .unwrap();
        let merged = EngineConfig::from(cfg);
        assert!((merged.condition_min_ratio - 0.5).abs() < f64::EPSILON);
        assert_eq!(merged.insight_display_limit, 3);
        assert_eq!(
            merged.recommendation_probability_threshold,
            EngineConfig::default().recommendation_probability_threshold
        );
    }

    #[test]
    fn empty_config_is_default() {
        assert_eq!(EngineConfig::from(JsEngineConfig::default()), EngineConfig::default());
    }

    #[test]
    fn catalog_is_cached() {
        let first = shared_catalog().unwrap();
        let second = shared_catalog().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
