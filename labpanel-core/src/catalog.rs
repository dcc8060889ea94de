//! Read-only rule catalog: reference ranges, threshold stages, weighted
//! risk models and parameter-group conditions.

use std::collections::BTreeSet;

use serde::de::DeserializeOwned;

use crate::{
    ConditionGroup, DiseaseStaging, PanelError, ReferenceRange, ReferenceTable, Result, RiskModel,
};

const REFERENCE_RANGES: &str = include_str!("../data/reference_ranges.json");
const STAGING: &str = include_str!("../data/staging.json");
const RISK_MODELS: &str = include_str!("../data/risk_models.json");
const CONDITION_GROUPS: &str = include_str!("../data/condition_groups.json");

/// Raw JSON documents a catalog is built from.
///
/// `Default` yields the documents compiled into the crate. Callers that keep
/// their own tables (CLI `--catalog-dir`) replace individual fields.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogSources {
    pub reference_ranges: String,
    pub staging: String,
    pub risk_models: String,
    pub condition_groups: String,
}

impl Default for CatalogSources {
    fn default() -> Self {
        Self {
            reference_ranges: REFERENCE_RANGES.to_string(),
            staging: STAGING.to_string(),
            risk_models: RISK_MODELS.to_string(),
            condition_groups: CONDITION_GROUPS.to_string(),
        }
    }
}

/// Validated catalog. Built once and shared read-only across evaluations.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    ranges: ReferenceTable,
    staging: Vec<DiseaseStaging>,
    risk_models: Vec<RiskModel>,
    condition_groups: Vec<ConditionGroup>,
}

impl Catalog {
    /// Catalog compiled into the crate.
    pub fn embedded() -> Result<Self> {
        Self::from_sources(&CatalogSources::default())
    }

    pub fn from_sources(sources: &CatalogSources) -> Result<Self> {
        Self::from_parts(
            parse_document("reference_ranges", &sources.reference_ranges)?,
            parse_document("staging", &sources.staging)?,
            parse_document("risk_models", &sources.risk_models)?,
            parse_document("condition_groups", &sources.condition_groups)?,
        )
    }

    /// Validate and assemble. Any malformed entry fails the whole catalog.
    pub fn from_parts(
        ranges: Vec<ReferenceRange>,
        staging: Vec<DiseaseStaging>,
        risk_models: Vec<RiskModel>,
        condition_groups: Vec<ConditionGroup>,
    ) -> Result<Self> {
        let ranges = ReferenceTable::from_entries(ranges)?;

        ensure_unique("staging", staging.iter().map(|d| d.key.as_str()))?;
        for disease in &staging {
            disease.validate()?;
        }

        ensure_unique("risk model", risk_models.iter().map(|m| m.key.as_str()))?;
        for model in &risk_models {
            model.validate()?;
        }

        ensure_unique(
            "condition group",
            condition_groups.iter().map(|g| g.key.as_str()),
        )?;
        for group in &condition_groups {
            group.validate()?;
        }

        log::debug!(
            "Catalog loaded: {} ranges, {} staged diseases, {} risk models, {} condition groups",
            ranges.len(),
            staging.len(),
            risk_models.len(),
            condition_groups.len()
        );

        Ok(Self {
            ranges,
            staging,
            risk_models,
            condition_groups,
        })
    }

    pub fn ranges(&self) -> &ReferenceTable {
        &self.ranges
    }

    pub fn staging(&self) -> &[DiseaseStaging] {
        &self.staging
    }

    pub fn risk_models(&self) -> &[RiskModel] {
        &self.risk_models
    }

    pub fn condition_groups(&self) -> &[ConditionGroup] {
        &self.condition_groups
    }
}

fn parse_document<T: DeserializeOwned>(name: &str, json: &str) -> Result<T> {
    serde_json::from_str(json).map_err(|err| PanelError::Parse(format!("{name}: {err}")))
}

fn ensure_unique<'a>(kind: &str, keys: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = BTreeSet::new();
    for key in keys {
        if !seen.insert(key) {
            return Err(PanelError::Configuration(format!("duplicate {kind} {key}")));
        }
    }
    Ok(())
}
