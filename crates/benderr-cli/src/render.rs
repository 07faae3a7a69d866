//! Console rendering of bus events.
//!
//! The renderer is just another bus subscriber; it prints each step as it
//! starts and finishes, with one line per measurement.

use benderr_core::bus::EventHandler;
use benderr_core::types::{Step, StepResult, Verdict};

/// Line printed when a step starts.
pub fn step_started_line(step: &Step) -> String {
    format!("── Step start: {}", step.name)
}

/// Lines printed when a step ends: verdict first, then one per measurement.
pub fn step_ended_lines(result: &StepResult) -> Vec<String> {
    let icon = match result.verdict {
        Verdict::Passed => "✅",
        Verdict::Failed => "❌",
        Verdict::Aborted => "💥",
        Verdict::Undefined => "❓",
    };
    let mut lines = vec![format!(
        "{icon} Step complete: {} [{}]",
        result.name, result.verdict
    )];
    for measurement in &result.results {
        let mark = if measurement.passed { "✔" } else { "✘" };
        let value = measurement
            .value
            .as_ref()
            .map_or_else(|| "-".to_string(), ToString::to_string);
        lines.push(format!("  {mark} {}: {value}", measurement.spec.name()));
    }
    lines
}

/// Bus subscriber that renders to stdout.
#[derive(Debug)]
pub struct ConsoleRenderer {
    show_logs: bool,
}

impl ConsoleRenderer {
    pub fn new(show_logs: bool) -> Self {
        Self { show_logs }
    }
}

impl EventHandler for ConsoleRenderer {
    fn on_step_started(&mut self, step: Step) {
        println!("{}", step_started_line(&step));
    }

    fn on_step_ended(&mut self, result: StepResult) {
        for line in step_ended_lines(&result) {
            println!("{line}");
        }
    }

    fn on_log(&mut self, message: String, level: String) {
        if self.show_logs {
            println!("  [{level}] {message}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use benderr_core::types::{BooleanSpec, Measurement, Spec, TaggedValue};

    #[test]
    fn started_line_names_the_step() {
        let step = Step::new(1, "Step 1. Boolean Spec", Vec::new());
        assert_eq!(
            step_started_line(&step),
            "── Step start: Step 1. Boolean Spec"
        );
    }

    #[test]
    fn ended_lines_include_verdict_and_measurements() {
        let result = StepResult {
            verdict: Verdict::Failed,
            results: vec![Measurement {
                value: Some(TaggedValue::Bool(false)),
                passed: false,
                spec: Spec::Boolean(BooleanSpec {
                    name: "ExpectedTrue".to_string(),
                    pass_if_true: true,
                }),
            }],
            ..StepResult::new(1, "Step 1")
        };
        let lines = step_ended_lines(&result);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("Step complete: Step 1 [failed]"));
        assert!(lines[1].contains("✘ ExpectedTrue: false"));
    }

    #[test]
    fn measurement_without_value_renders_dash() {
        let result = StepResult {
            verdict: Verdict::Passed,
            results: vec![Measurement {
                value: None,
                passed: true,
                spec: Spec::Boolean(BooleanSpec {
                    name: "flag".to_string(),
                    pass_if_true: true,
                }),
            }],
            ..StepResult::new(1, "Step 1")
        };
        assert!(step_ended_lines(&result)[1].contains("flag: -"));
    }
}
