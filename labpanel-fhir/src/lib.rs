//! FHIR R4 bundle to `PanelInput` converter.
//!
//! Reads the `Patient` resource for demographics and laboratory
//! `Observation` resources for parameter values. Everything else in the
//! bundle is ignored.

use std::collections::{hash_map::Entry, HashMap};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use labpanel_core::{normalize_key, Gender, PanelError, PanelInput, ParameterSample, PatientContext, Race};
use serde_json::Value;

const LOINC_SYSTEM: &str = "http://loinc.org";
const US_CORE_RACE: &str = "http://hl7.org/fhir/us/core/StructureDefinition/us-core-race";
const US_CORE_ETHNICITY: &str =
    "http://hl7.org/fhir/us/core/StructureDefinition/us-core-ethnicity";

const BODY_HEIGHT: &str = "8302-2";
const BODY_WEIGHT: &str = "29463-7";

const LOINC_CONFIDENCE: f64 = 1.0;
const TEXT_CONFIDENCE: f64 = 0.8;

/// Build a panel from a bundle JSON string.
pub fn panel_from_bundle_str(bundle_json: &str, as_of: NaiveDate) -> Result<PanelInput, PanelError> {
    let value: Value =
        serde_json::from_str(bundle_json).map_err(|err| PanelError::Parse(err.to_string()))?;
    panel_from_bundle_value(&value, as_of)
}

/// Build a panel from a parsed bundle. `as_of` anchors the patient's age.
pub fn panel_from_bundle_value(bundle: &Value, as_of: NaiveDate) -> Result<PanelInput, PanelError> {
    let bundle_type = bundle
        .get("resourceType")
        .and_then(Value::as_str)
        .ok_or(PanelError::MissingInput("resourceType"))?;

    if bundle_type != "Bundle" {
        return Err(PanelError::Parse(format!(
            "Expected resourceType Bundle, received {bundle_type}"
        )));
    }

    let entries = bundle
        .get("entry")
        .and_then(Value::as_array)
        .ok_or(PanelError::MissingInput("entry"))?;

    let mut collector = PanelCollector::new(as_of);

    for entry in entries {
        let Some(resource) = entry.get("resource") else {
            continue;
        };

        match resource
            .get("resourceType")
            .and_then(Value::as_str)
            .unwrap_or_default()
        {
            "Patient" => collector.handle_patient(resource),
            "Observation" => collector.handle_observation(resource),
            _ => {}
        }
    }

    Ok(collector.finalize())
}

struct PanelCollector {
    as_of: NaiveDate,
    patient: Option<PatientContext>,
    labs: HashMap<String, LabRecord>,
    height_cm: Option<Measurement>,
    weight_kg: Option<Measurement>,
}

struct LabRecord {
    sample: ParameterSample,
    recorded_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy)]
struct Measurement {
    value: f64,
    recorded_at: Option<DateTime<Utc>>,
}

impl PanelCollector {
    fn new(as_of: NaiveDate) -> Self {
        Self {
            as_of,
            patient: None,
            labs: HashMap::new(),
            height_cm: None,
            weight_kg: None,
        }
    }

    fn handle_patient(&mut self, resource: &Value) {
        let mut patient = PatientContext::default();

        match resource.get("gender").and_then(Value::as_str) {
            Some("male") => patient.gender = Gender::Male,
            Some("female") => patient.gender = Gender::Female,
            other => log::warn!(
                "Patient gender {} not usable for reference ranges, assuming male",
                other.unwrap_or("missing")
            ),
        }

        match extract_patient_age(resource, self.as_of) {
            Some(age) => patient.age = age,
            None => log::warn!("Patient birthDate missing or after {}", self.as_of),
        }

        if let Some(race) = extract_race(resource) {
            patient = patient.with_race(race);
        }

        if self.patient.is_some() {
            log::warn!("Bundle carries several Patient resources, keeping the last");
        }
        self.patient = Some(patient);
    }

    fn handle_observation(&mut self, resource: &Value) {
        let Some(code) = resource.get("code") else {
            return;
        };
        let recorded_at = extract_observation_timestamp(resource);

        let Some((value, unit)) = parse_value_quantity(resource) else {
            log::debug!(
                "Observation {} has no numeric value, skipping",
                resource_id(resource)
            );
            return;
        };

        let loinc = loinc_codes(code);
        if loinc.contains(&BODY_HEIGHT) {
            match height_in_cm(value, unit.as_deref()) {
                Some(cm) => upsert_measurement(&mut self.height_cm, cm, recorded_at),
                None => log::warn!("Unsupported body height unit {unit:?}"),
            }
            return;
        }
        if loinc.contains(&BODY_WEIGHT) {
            match weight_in_kg(value, unit.as_deref()) {
                Some(kg) => upsert_measurement(&mut self.weight_kg, kg, recorded_at),
                None => log::warn!("Unsupported body weight unit {unit:?}"),
            }
            return;
        }

        let matched = loinc
            .iter()
            .find_map(|code| parameter_for_loinc(code))
            .map(|key| (key, LOINC_CONFIDENCE))
            .or_else(|| {
                extract_codeable_text(code)
                    .and_then(|text| normalize_key(&text))
                    .map(|key| (key, TEXT_CONFIDENCE))
            });

        let Some((key, confidence)) = matched else {
            log::debug!(
                "Observation {} does not map to a panel parameter, skipping",
                resource_id(resource)
            );
            return;
        };

        let mut sample = ParameterSample::new(key, value).with_confidence(confidence);
        sample.unit = unit;
        self.upsert_lab(LabRecord {
            sample,
            recorded_at,
        });
    }

    fn upsert_lab(&mut self, record: LabRecord) {
        match self.labs.entry(record.sample.key.clone()) {
            Entry::Occupied(mut entry) => {
                if !is_more_recent(entry.get().recorded_at, record.recorded_at) {
                    entry.insert(record);
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(record);
            }
        }
    }

    fn finalize(self) -> PanelInput {
        let mut patient = self.patient.unwrap_or_else(|| {
            log::warn!("Bundle has no Patient resource, using default demographics");
            PatientContext::default()
        });
        patient.height_cm = self.height_cm.map(|m| m.value);
        patient.weight_kg = self.weight_kg.map(|m| m.value);

        let mut input = PanelInput::new(patient);
        for record in self.labs.into_values() {
            input.push(record.sample);
        }
        input
    }
}

fn upsert_measurement(
    slot: &mut Option<Measurement>,
    value: f64,
    recorded_at: Option<DateTime<Utc>>,
) {
    let keep_existing = slot
        .as_ref()
        .is_some_and(|existing| is_more_recent(existing.recorded_at, recorded_at));
    if !keep_existing {
        *slot = Some(Measurement { value, recorded_at });
    }
}

fn extract_patient_age(resource: &Value, as_of: NaiveDate) -> Option<u32> {
    let birth_date = resource
        .get("birthDate")
        .and_then(Value::as_str)
        .and_then(parse_date)?;
    let mut age = as_of.year() - birth_date.year();

    if (as_of.month(), as_of.day()) < (birth_date.month(), birth_date.day()) {
        age -= 1;
    }

    u32::try_from(age).ok()
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

/// Race from the US Core race extension, falling back to the ethnicity
/// extension for Hispanic or Latino.
fn extract_race(resource: &Value) -> Option<Race> {
    let extensions = resource.get("extension").and_then(Value::as_array)?;

    let omb_code = |url: &str| {
        extensions
            .iter()
            .filter(|ext| ext.get("url").and_then(Value::as_str) == Some(url))
            .filter_map(|ext| ext.get("extension").and_then(Value::as_array))
            .flatten()
            .filter(|inner| inner.get("url").and_then(Value::as_str) == Some("ombCategory"))
            .find_map(|inner| {
                inner
                    .get("valueCoding")
                    .and_then(|coding| coding.get("code"))
                    .and_then(Value::as_str)
            })
    };

    let race = omb_code(US_CORE_RACE).map(|code| match code {
        "2054-5" => Race::Black,
        "2106-3" => Race::White,
        "2028-9" => Race::Asian,
        _ => Race::Other,
    });

    race.or_else(|| match omb_code(US_CORE_ETHNICITY) {
        Some("2135-2") => Some(Race::Hispanic),
        _ => None,
    })
}

fn extract_codeable_text(value: &Value) -> Option<String> {
    if let Some(text) = value.get("text").and_then(Value::as_str) {
        if !text.trim().is_empty() {
            return Some(text.trim().to_string());
        }
    }

    value
        .get("coding")
        .and_then(Value::as_array)?
        .iter()
        .filter_map(|coding| coding.get("display").and_then(Value::as_str))
        .map(str::trim)
        .find(|display| !display.is_empty())
        .map(str::to_string)
}

fn loinc_codes(code: &Value) -> Vec<&str> {
    code.get("coding")
        .and_then(Value::as_array)
        .map(|codings| {
            codings
                .iter()
                .filter(|coding| coding.get("system").and_then(Value::as_str) == Some(LOINC_SYSTEM))
                .filter_map(|coding| coding.get("code").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default()
}

fn parameter_for_loinc(code: &str) -> Option<&'static str> {
    LOINC_PARAMETERS
        .iter()
        .find(|(loinc, _)| *loinc == code)
        .map(|(_, key)| *key)
}

fn resource_id(resource: &Value) -> &str {
    resource
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or("without id")
}

fn extract_datetime(resource: &Value, fields: &[&str]) -> Option<DateTime<Utc>> {
    for field in fields {
        let Some(value) = resource.get(*field) else {
            continue;
        };

        if let Some(text) = value.as_str() {
            if let Some(dt) = parse_datetime(text) {
                return Some(dt);
            }
        }

        if let Some(obj) = value.as_object() {
            for bound in ["end", "start"] {
                if let Some(dt) = obj.get(bound).and_then(Value::as_str).and_then(parse_datetime) {
                    return Some(dt);
                }
            }
        }
    }
    None
}

/// RFC 3339 timestamps, or a bare date taken as midnight UTC.
fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            parse_date(value)
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        })
}

fn extract_observation_timestamp(resource: &Value) -> Option<DateTime<Utc>> {
    extract_datetime(
        resource,
        &[
            "effectiveDateTime",
            "effectiveInstant",
            "effectivePeriod",
            "issued",
        ],
    )
}

fn parse_value_quantity(resource: &Value) -> Option<(f64, Option<String>)> {
    let quantity = resource.get("valueQuantity")?;
    let value = quantity.get("value").and_then(Value::as_f64)?;
    let unit = quantity
        .get("unit")
        .or_else(|| quantity.get("code"))
        .and_then(Value::as_str)
        .map(str::to_string);
    Some((value, unit))
}

fn height_in_cm(value: f64, unit: Option<&str>) -> Option<f64> {
    match unit.unwrap_or("cm") {
        "cm" => Some(value),
        "m" => Some(value * 100.0),
        "in" | "[in_i]" => Some(value * 2.54),
        _ => None,
    }
}

fn weight_in_kg(value: f64, unit: Option<&str>) -> Option<f64> {
    match unit.unwrap_or("kg") {
        "kg" => Some(value),
        "g" => Some(value / 1000.0),
        "lb" | "lbs" | "[lb_av]" => Some(value * 0.453_592_37),
        _ => None,
    }
}

fn is_more_recent(candidate: Option<DateTime<Utc>>, current: Option<DateTime<Utc>>) -> bool {
    match (candidate, current) {
        (Some(a), Some(b)) => a > b,
        (Some(_), None) => true,
        _ => false,
    }
}

const LOINC_PARAMETERS: &[(&str, &str)] = &[
    ("718-7", "hemoglobin"),
    ("4544-3", "hematocrit"),
    ("6690-2", "wbc"),
    ("789-8", "rbc"),
    ("777-3", "platelets"),
    ("787-2", "mcv"),
    ("785-6", "mch"),
    ("786-4", "mchc"),
    ("2345-7", "glucose"),
    ("1558-6", "glucose"),
    ("4548-4", "hba1c"),
    ("2093-3", "cholesterol"),
    ("2089-1", "ldl"),
    ("13457-7", "ldl"),
    ("2085-9", "hdl"),
    ("2571-8", "triglycerides"),
    ("2951-2", "sodium"),
    ("2823-3", "potassium"),
    ("2075-0", "chloride"),
    ("17861-6", "calcium"),
    ("2160-0", "creatinine"),
    ("3094-0", "urea"),
    ("3084-1", "uric_acid"),
    ("1751-7", "albumin"),
    ("2885-2", "total_protein"),
    ("10834-0", "globulin"),
    ("1975-2", "bilirubin"),
    ("1968-7", "direct_bilirubin"),
    ("1742-6", "alt"),
    ("1920-8", "ast"),
    ("6768-6", "alp"),
    ("2324-2", "ggt"),
    ("33914-3", "egfr"),
    ("62238-1", "egfr"),
];
