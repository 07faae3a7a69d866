//! On-wire event schema for the bus.
//!
//! Events cross a process boundary, so the wire types are flat records with
//! explicit presence bits (`has_lower`/`has_upper`/`has_value`) because 0 and
//! the empty string are legal payloads. Timestamps travel as unsigned
//! milliseconds since epoch, 0 meaning unset; domain timestamps therefore
//! round-trip at millisecond precision. Measurement values travel as strings
//! and are typed back through the spec kind they were judged against.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{
    BooleanSpec, Measurement, NoSpec, NoSpecAction, NumericSpec, Spec, Step, StepResult,
    StringSpec, TaggedValue, Verdict,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("unsupported spec kind on wire: {0}")]
    UnknownSpecKind(String),
    #[error("unsupported no-spec action on wire: {0}")]
    UnknownAction(String),
    #[error("unknown comparator on wire: {0}")]
    UnknownComparator(String),
}

/// Tagged union carried in each frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WireEvent {
    StepStarted { step: WireStep },
    StepEnded { result: WireStepResult },
    Log { message: String, level: String },
}

impl WireEvent {
    pub fn is_log(&self) -> bool {
        matches!(self, Self::Log { .. })
    }
}

/// Step identity as published; specs stay on the producer side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireStep {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireStepResult {
    pub step: WireStep,
    pub verdict: Verdict,
    pub measurements: Vec<WireMeasurement>,
    pub start_time_ms: u64,
    pub end_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMeasurement {
    pub spec: WireSpec,
    pub value: String,
    pub has_value: bool,
    pub passed: bool,
}

/// Flat spec record; which fields are meaningful depends on `kind`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WireSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub action: String,
    pub pass_if_true: bool,
    pub comparator: String,
    pub lower: f64,
    pub upper: f64,
    pub has_lower: bool,
    pub has_upper: bool,
    pub units: String,
    pub expected: String,
    pub case_sensitive: bool,
}

// --- domain -> wire ---

pub fn step_to_wire(step: &Step) -> WireStep {
    WireStep {
        id: step.id,
        name: step.name.clone(),
    }
}

pub fn step_result_to_wire(result: &StepResult) -> WireStepResult {
    WireStepResult {
        step: WireStep {
            id: result.id,
            name: result.name.clone(),
        },
        verdict: result.verdict,
        measurements: result.results.iter().map(measurement_to_wire).collect(),
        start_time_ms: datetime_to_ms(result.start_time),
        end_time_ms: datetime_to_ms(result.end_time),
    }
}

pub fn measurement_to_wire(measurement: &Measurement) -> WireMeasurement {
    WireMeasurement {
        spec: spec_to_wire(&measurement.spec),
        value: measurement
            .value
            .as_ref()
            .map(value_to_string)
            .unwrap_or_default(),
        has_value: measurement.value.is_some(),
        passed: measurement.passed,
    }
}

pub fn spec_to_wire(spec: &Spec) -> WireSpec {
    match spec {
        Spec::None(s) => WireSpec {
            kind: "none".to_string(),
            name: s.name.clone(),
            action: s.action.as_str().to_string(),
            ..WireSpec::default()
        },
        Spec::Boolean(s) => WireSpec {
            kind: "boolean".to_string(),
            name: s.name.clone(),
            pass_if_true: s.pass_if_true,
            ..WireSpec::default()
        },
        Spec::Numeric(s) => WireSpec {
            kind: "numeric".to_string(),
            name: s.name.clone(),
            comparator: s.comparator.as_str().to_string(),
            lower: s.lower.unwrap_or(0.0),
            upper: s.upper.unwrap_or(0.0),
            has_lower: s.lower.is_some(),
            has_upper: s.upper.is_some(),
            units: s.units.clone(),
            ..WireSpec::default()
        },
        Spec::String(s) => WireSpec {
            kind: "string".to_string(),
            name: s.name.clone(),
            expected: s.expected.clone(),
            case_sensitive: s.case_sensitive,
            ..WireSpec::default()
        },
    }
}

/// Render a measurement value; integers stay bare, floats always carry a
/// decimal point or exponent so the receiving side can tell them apart.
fn value_to_string(value: &TaggedValue) -> String {
    match value {
        TaggedValue::Float(v) => format!("{v:?}"),
        other => other.to_string(),
    }
}

fn datetime_to_ms(time: Option<DateTime<Utc>>) -> u64 {
    time.map_or(0, |t| t.timestamp_millis().max(0) as u64)
}

// --- wire -> domain ---

pub fn step_from_wire(step: &WireStep) -> Step {
    Step::new(step.id, step.name.clone(), Vec::new())
}

pub fn step_result_from_wire(result: &WireStepResult) -> Result<StepResult, WireError> {
    let measurements = result
        .measurements
        .iter()
        .map(measurement_from_wire)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(StepResult {
        id: result.step.id,
        name: result.step.name.clone(),
        start_time: ms_to_datetime(result.start_time_ms),
        end_time: ms_to_datetime(result.end_time_ms),
        verdict: result.verdict,
        results: measurements,
    })
}

pub fn measurement_from_wire(measurement: &WireMeasurement) -> Result<Measurement, WireError> {
    let spec = spec_from_wire(&measurement.spec)?;
    let value = measurement
        .has_value
        .then(|| typed_value(&measurement.value, &spec));
    Ok(Measurement {
        value,
        passed: measurement.passed,
        spec,
    })
}

pub fn spec_from_wire(spec: &WireSpec) -> Result<Spec, WireError> {
    match spec.kind.as_str() {
        "none" => {
            let action = match spec.action.as_str() {
                "log" => NoSpecAction::Log,
                "ignore" => NoSpecAction::Ignore,
                other => return Err(WireError::UnknownAction(other.to_string())),
            };
            Ok(Spec::None(NoSpec {
                name: spec.name.clone(),
                action,
            }))
        }
        "boolean" => Ok(Spec::Boolean(BooleanSpec {
            name: spec.name.clone(),
            pass_if_true: spec.pass_if_true,
        })),
        "numeric" => {
            let comparator = spec
                .comparator
                .parse()
                .map_err(|_| WireError::UnknownComparator(spec.comparator.clone()))?;
            Ok(Spec::Numeric(NumericSpec {
                name: spec.name.clone(),
                comparator,
                lower: spec.has_lower.then_some(spec.lower),
                upper: spec.has_upper.then_some(spec.upper),
                units: spec.units.clone(),
            }))
        }
        "string" => Ok(Spec::String(StringSpec {
            name: spec.name.clone(),
            expected: spec.expected.clone(),
            case_sensitive: spec.case_sensitive,
        })),
        other => Err(WireError::UnknownSpecKind(other.to_string())),
    }
}

/// Recover the value type from its string form via the spec it belongs to.
fn typed_value(raw: &str, spec: &Spec) -> TaggedValue {
    match spec {
        Spec::Boolean(_) => TaggedValue::Bool(raw.eq_ignore_ascii_case("true")),
        Spec::Numeric(_) => {
            if !raw.contains(['.', 'e', 'E']) {
                if let Ok(v) = raw.parse::<i64>() {
                    return TaggedValue::Int(v);
                }
            }
            raw.parse::<f64>()
                .map_or_else(|_| TaggedValue::Str(raw.to_string()), TaggedValue::Float)
        }
        _ => TaggedValue::Str(raw.to_string()),
    }
}

fn ms_to_datetime(ms: u64) -> Option<DateTime<Utc>> {
    if ms == 0 {
        return None;
    }
    Utc.timestamp_millis_opt(ms as i64).single()
}
