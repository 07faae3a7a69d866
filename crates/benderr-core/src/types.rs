//! Shared data model for sequences, specs, and results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Final outcome of a step or a whole sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    #[default]
    Undefined,
    Passed,
    Failed,
    Aborted,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with a step value that has no pass/fail criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoSpecAction {
    /// Record the value as a passing measurement and log it.
    Log,
    /// Drop the value; only a debug line is emitted.
    Ignore,
}

impl NoSpecAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Ignore => "ignore",
        }
    }
}

/// Numeric comparison operator.
///
/// `Gt`/`Ge`/`Eq`/`Neq` compare against the lower bound, `Lt`/`Le` against
/// the upper bound; the four `GtLt..GeLe` operators are in-band (conjunctive)
/// and the four `LtGt..LeGe` operators are out-of-band (disjunctive). The
/// disjunctive operators test the lower bound first and only look at the
/// upper bound when that fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NumericComparator {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Neq,
    GtLt,
    GeLt,
    GtLe,
    GeLe,
    LtGt,
    LtGe,
    LeGt,
    LeGe,
}

impl NumericComparator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gt => "GT",
            Self::Ge => "GE",
            Self::Lt => "LT",
            Self::Le => "LE",
            Self::Eq => "EQ",
            Self::Neq => "NEQ",
            Self::GtLt => "GTLT",
            Self::GeLt => "GELT",
            Self::GtLe => "GTLE",
            Self::GeLe => "GELE",
            Self::LtGt => "LTGT",
            Self::LtGe => "LTGE",
            Self::LeGt => "LEGT",
            Self::LeGe => "LEGE",
        }
    }

    /// True when the operator needs the lower bound.
    pub fn requires_lower(&self) -> bool {
        !matches!(self, Self::Lt | Self::Le)
    }

    /// True when the operator needs the upper bound.
    pub fn requires_upper(&self) -> bool {
        !matches!(self, Self::Gt | Self::Ge | Self::Eq | Self::Neq)
    }
}

impl std::str::FromStr for NumericComparator {
    type Err = InvalidSpec;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GT" => Ok(Self::Gt),
            "GE" => Ok(Self::Ge),
            "LT" => Ok(Self::Lt),
            "LE" => Ok(Self::Le),
            "EQ" => Ok(Self::Eq),
            "NEQ" => Ok(Self::Neq),
            "GTLT" => Ok(Self::GtLt),
            "GELT" => Ok(Self::GeLt),
            "GTLE" => Ok(Self::GtLe),
            "GELE" => Ok(Self::GeLe),
            "LTGT" => Ok(Self::LtGt),
            "LTGE" => Ok(Self::LtGe),
            "LEGT" => Ok(Self::LeGt),
            "LEGE" => Ok(Self::LeGe),
            other => Err(InvalidSpec(format!("unknown comparator: {other}"))),
        }
    }
}

/// Spec raised at load time for missing or contradictory bounds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid spec: {0}")]
pub struct InvalidSpec(pub String);

/// Criterion-free spec: the value is logged or ignored, never judged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoSpec {
    pub name: String,
    pub action: NoSpecAction,
}

/// Expects a single boolean value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BooleanSpec {
    pub name: String,
    pub pass_if_true: bool,
}

/// Expects a single numeric value, judged by `comparator` against the bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericSpec {
    pub name: String,
    pub comparator: NumericComparator,
    #[serde(default)]
    pub lower: Option<f64>,
    #[serde(default)]
    pub upper: Option<f64>,
    #[serde(default)]
    pub units: String,
}

impl NumericSpec {
    /// Check that the bounds required by the comparator are present and that
    /// the band is not inverted.
    pub fn validate(&self) -> Result<(), InvalidSpec> {
        if self.comparator.requires_lower() && self.lower.is_none() {
            return Err(InvalidSpec(format!(
                "comparator {} requires a lower limit to be set",
                self.comparator.as_str()
            )));
        }
        if self.comparator.requires_upper() && self.upper.is_none() {
            return Err(InvalidSpec(format!(
                "comparator {} requires an upper limit to be set",
                self.comparator.as_str()
            )));
        }
        if let (Some(lower), Some(upper)) = (self.lower, self.upper) {
            if upper < lower {
                return Err(InvalidSpec(
                    "upper limit should be greater or equal to lower limit".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Expects a single string value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringSpec {
    pub name: String,
    pub expected: String,
    #[serde(default = "default_true")]
    pub case_sensitive: bool,
}

fn default_true() -> bool {
    true
}

/// Pass/fail criterion attached to a step, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Spec {
    #[serde(rename = "none")]
    None(NoSpec),
    #[serde(rename = "boolean")]
    Boolean(BooleanSpec),
    #[serde(rename = "numeric")]
    Numeric(NumericSpec),
    #[serde(rename = "string")]
    String(StringSpec),
}

impl Spec {
    pub fn name(&self) -> &str {
        match self {
            Self::None(s) => &s.name,
            Self::Boolean(s) => &s.name,
            Self::Numeric(s) => &s.name,
            Self::String(s) => &s.name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::None(_) => "none",
            Self::Boolean(_) => "boolean",
            Self::Numeric(_) => "numeric",
            Self::String(_) => "string",
        }
    }

    /// Validate kind-specific constraints; only numeric specs carry any.
    pub fn validate(&self) -> Result<(), InvalidSpec> {
        match self {
            Self::Numeric(s) => s.validate(),
            _ => Ok(()),
        }
    }
}

/// Value returned by a step handler.
///
/// Handlers in the original system returned whatever the device transport
/// produced; here the possibilities are an explicit sum so the matcher can
/// switch on the tag. `Int` and `Float` are both numeric for matching
/// purposes; `Bool` is not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaggedValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Seq(Vec<TaggedValue>),
}

impl TaggedValue {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Seq(_) => "sequence",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_))
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Collapse non-scalar values to their display form for measurement rows.
    pub fn normalized(&self) -> TaggedValue {
        match self {
            Self::Seq(_) => Self::Str(self.to_string()),
            other => other.clone(),
        }
    }
}

impl std::fmt::Display for TaggedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => f.write_str(v),
            Self::Seq(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<bool> for TaggedValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for TaggedValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for TaggedValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for TaggedValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

/// Observed value paired with the spec it was judged against.
///
/// `value` is absent only for no-spec log entries recorded for a handler
/// that produced nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<TaggedValue>,
    pub passed: bool,
    pub spec: Spec,
}

/// One named operation in a test sequence, as configured by the steps file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub specs: Vec<Spec>,
    #[serde(default)]
    pub ignore_fail: bool,
}

impl Step {
    pub fn new(id: u64, name: impl Into<String>, specs: Vec<Spec>) -> Self {
        Self {
            id,
            name: name.into(),
            specs,
            ignore_fail: false,
        }
    }
}

/// Result of one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub verdict: Verdict,
    #[serde(default)]
    pub results: Vec<Measurement>,
}

impl StepResult {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            start_time: None,
            end_time: None,
            verdict: Verdict::Undefined,
            results: Vec::new(),
        }
    }

    /// Result entered at the current instant, as recorded when the handler
    /// is about to run.
    pub fn begin(step: &Step) -> Self {
        Self {
            start_time: Some(Utc::now()),
            ..Self::new(step.id, step.name.clone())
        }
    }
}

/// Result of a whole sequence run, rendered into the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceResult {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub log_file: String,
    pub verdict: Verdict,
    pub step_results: Vec<StepResult>,
}

/// Overall verdict: the first non-passed step verdict, else passed.
pub fn overall_verdict(step_results: &[StepResult]) -> Verdict {
    step_results
        .iter()
        .map(|r| r.verdict)
        .find(|v| *v != Verdict::Passed)
        .unwrap_or(Verdict::Passed)
}
