use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{PanelError, Result};

/// Normal interval for one lab parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReferenceRange {
    pub parameter: String,
    pub min: f64,
    pub max: f64,
    pub unit: String,
    pub description: String,
}

impl ReferenceRange {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn display(&self) -> String {
        format!(
            "{} - {}",
            crate::format_numeric(self.min),
            crate::format_numeric(self.max)
        )
    }

    fn validate(&self) -> Result<()> {
        if self.parameter.trim().is_empty() {
            return Err(PanelError::Configuration(
                "reference range without parameter key".to_string(),
            ));
        }
        if !self.min.is_finite() || !self.max.is_finite() || self.min > self.max {
            return Err(PanelError::Configuration(format!(
                "reference range for {} has min {} above max {}",
                self.parameter, self.min, self.max
            )));
        }
        Ok(())
    }
}

/// Reference ranges keyed by canonical parameter key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceTable {
    ranges: BTreeMap<String, ReferenceRange>,
}

impl ReferenceTable {
    /// Build the table, rejecting malformed or duplicated entries.
    pub fn from_entries(entries: Vec<ReferenceRange>) -> Result<Self> {
        let mut ranges = BTreeMap::new();
        for entry in entries {
            entry.validate()?;
            let key = entry.parameter.clone();
            if ranges.insert(key.clone(), entry).is_some() {
                return Err(PanelError::Configuration(format!(
                    "duplicate reference range for {key}"
                )));
            }
        }
        Ok(Self { ranges })
    }

    pub fn get(&self, parameter: &str) -> Option<&ReferenceRange> {
        self.ranges.get(parameter)
    }

    pub fn contains(&self, parameter: &str) -> bool {
        self.ranges.contains_key(parameter)
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReferenceRange> {
        self.ranges.values()
    }
}
