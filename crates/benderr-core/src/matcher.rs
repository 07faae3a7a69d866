//! Spec matching: judging a handler's value against a step's spec list.
//!
//! The matcher dispatches on the tag of the returned [`TaggedValue`] and on
//! the spec kinds, producing one [`Measurement`] per judged value. Mismatches
//! between value shape and spec shape are reported as [`SpecMismatch`] and
//! are always fatal to the run, regardless of failure-continuation settings.

use thiserror::Error;
use tracing::{debug, info};

use crate::types::{
    BooleanSpec, Measurement, NoSpecAction, NumericComparator, NumericSpec, Spec, StepResult,
    StringSpec, TaggedValue, Verdict,
};

/// Value shape and spec shape disagree (wrong kind, wrong arity, or an
/// unsupported element inside a sequence value).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("spec mismatch: {0}")]
pub struct SpecMismatch(pub String);

/// Judge `value` against `specs`, appending measurements to `result` and
/// setting its verdict.
///
/// An absent value with non-empty specs leaves the verdict `Undefined`;
/// partial measurements appended before a mismatch stay in `result`.
pub fn apply_specs(
    value: Option<&TaggedValue>,
    specs: &[Spec],
    result: &mut StepResult,
) -> Result<(), SpecMismatch> {
    if specs.is_empty() {
        result.verdict = Verdict::Passed;
        return Ok(());
    }

    let contains_no_spec = specs.iter().any(|s| matches!(s, Spec::None(_)));
    if contains_no_spec {
        if !specs.iter().all(|s| matches!(s, Spec::None(_))) {
            return Err(SpecMismatch(
                "no-spec entries cannot be mixed with other spec types in the same step"
                    .to_string(),
            ));
        }
        return apply_no_specs(value, specs, result);
    }

    let Some(value) = value else {
        // Nothing to judge: the step stays undefined.
        return Ok(());
    };

    match value {
        TaggedValue::Seq(items) => apply_seq(items, specs, result),
        scalar => apply_single(scalar, specs, result),
    }
}

fn apply_no_specs(
    value: Option<&TaggedValue>,
    specs: &[Spec],
    result: &mut StepResult,
) -> Result<(), SpecMismatch> {
    let normalized = value.map(TaggedValue::normalized);
    for spec in specs {
        let Spec::None(no_spec) = spec else {
            continue;
        };
        match no_spec.action {
            NoSpecAction::Log => {
                info!(
                    step = %result.name,
                    value = %normalized
                        .as_ref()
                        .map_or_else(|| "none".to_string(), ToString::to_string),
                    "no-spec log"
                );
                result.results.push(Measurement {
                    value: normalized.clone(),
                    passed: true,
                    spec: spec.clone(),
                });
            }
            NoSpecAction::Ignore => {
                debug!(step = %result.name, "no-spec ignore");
            }
        }
    }
    result.verdict = Verdict::Passed;
    Ok(())
}

fn apply_single(
    value: &TaggedValue,
    specs: &[Spec],
    result: &mut StepResult,
) -> Result<(), SpecMismatch> {
    if specs.len() != 1 {
        return Err(SpecMismatch(format!(
            "result is a single {} but spec count ({}) is not exactly one",
            value.kind(),
            specs.len()
        )));
    }
    let spec = &specs[0];
    let passed = match_scalar(value, spec)?;
    result.results.push(Measurement {
        value: Some(value.clone()),
        passed,
        spec: spec.clone(),
    });
    result.verdict = if passed { Verdict::Passed } else { Verdict::Failed };
    Ok(())
}

fn apply_seq(
    items: &[TaggedValue],
    specs: &[Spec],
    result: &mut StepResult,
) -> Result<(), SpecMismatch> {
    if items.len() != specs.len() {
        return Err(SpecMismatch(format!(
            "result sequence length ({}) does not match specs count ({})",
            items.len(),
            specs.len()
        )));
    }
    let mut verdict = Verdict::Passed;
    for (value, spec) in items.iter().zip(specs) {
        let passed = match_scalar(value, spec)?;
        result.results.push(Measurement {
            value: Some(value.clone()),
            passed,
            spec: spec.clone(),
        });
        if !passed {
            verdict = Verdict::Failed;
        }
    }
    result.verdict = verdict;
    Ok(())
}

/// Judge one scalar value against one spec, by tag.
fn match_scalar(value: &TaggedValue, spec: &Spec) -> Result<bool, SpecMismatch> {
    match value {
        TaggedValue::Bool(v) => match spec {
            Spec::Boolean(s) => Ok(boolean_spec_passes(*v, s)),
            other => Err(SpecMismatch(format!(
                "boolean result encountered but spec '{}' is a {} check",
                other.name(),
                other.kind()
            ))),
        },
        TaggedValue::Int(_) | TaggedValue::Float(_) => match spec {
            Spec::Numeric(s) => {
                // The numeric view always exists for these tags.
                let v = value.as_f64().unwrap_or_default();
                Ok(numeric_spec_passes(v, s))
            }
            other => Err(SpecMismatch(format!(
                "numeric result encountered but spec '{}' is a {} check",
                other.name(),
                other.kind()
            ))),
        },
        TaggedValue::Str(v) => match spec {
            Spec::String(s) => Ok(string_spec_passes(v, s)),
            other => Err(SpecMismatch(format!(
                "string result encountered but spec '{}' is a {} check",
                other.name(),
                other.kind()
            ))),
        },
        TaggedValue::Seq(_) => Err(SpecMismatch(
            "unsupported result type 'sequence' as an element; only bool, numeric, and string \
             supported"
                .to_string(),
        )),
    }
}

pub fn boolean_spec_passes(value: bool, spec: &BooleanSpec) -> bool {
    spec.pass_if_true == value
}

pub fn string_spec_passes(value: &str, spec: &StringSpec) -> bool {
    if spec.case_sensitive {
        value == spec.expected
    } else {
        value.eq_ignore_ascii_case(&spec.expected)
    }
}

/// Evaluate the comparator against the spec bounds.
///
/// Bounds are validated at load time; a missing bound makes the clause that
/// needs it false. The out-of-band operators only evaluate the upper clause
/// when the lower clause fails.
pub fn numeric_spec_passes(value: f64, spec: &NumericSpec) -> bool {
    let lower = spec.lower;
    let upper = spec.upper;
    match spec.comparator {
        NumericComparator::Gt => lower.is_some_and(|l| value > l),
        NumericComparator::Ge => lower.is_some_and(|l| value >= l),
        NumericComparator::Lt => upper.is_some_and(|u| value < u),
        NumericComparator::Le => upper.is_some_and(|u| value <= u),
        NumericComparator::Eq => lower.is_some_and(|l| value == l),
        NumericComparator::Neq => lower.is_some_and(|l| value != l),
        NumericComparator::GtLt => {
            lower.zip(upper).is_some_and(|(l, u)| l < value && value < u)
        }
        NumericComparator::GeLt => {
            lower.zip(upper).is_some_and(|(l, u)| l <= value && value < u)
        }
        NumericComparator::GtLe => {
            lower.zip(upper).is_some_and(|(l, u)| l < value && value <= u)
        }
        NumericComparator::GeLe => {
            lower.zip(upper).is_some_and(|(l, u)| l <= value && value <= u)
        }
        NumericComparator::LtGt => {
            lower.is_some_and(|l| l > value) || upper.is_some_and(|u| value > u)
        }
        NumericComparator::LtGe => {
            lower.is_some_and(|l| l > value) || upper.is_some_and(|u| value >= u)
        }
        NumericComparator::LeGt => {
            lower.is_some_and(|l| l >= value) || upper.is_some_and(|u| value > u)
        }
        NumericComparator::LeGe => {
            lower.is_some_and(|l| l >= value) || upper.is_some_and(|u| value >= u)
        }
    }
}
