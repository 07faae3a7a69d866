//! Sequence execution: binding registered step handlers to configured steps
//! and running them in declaration order.
//!
//! A sequence type registers its handlers through [`StepRegistry`], which
//! fixes their order at registration time. [`SequenceRunner::new`] binds the
//! registered handlers to the loader-supplied step list and rejects any
//! mismatch up front; `run()` then executes handlers one by one, judges each
//! returned value through the matcher, publishes lifecycle events, and
//! enforces the failure-continuation policy.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::error;

use crate::bus::EventPublisher;
use crate::config::AppConfig;
use crate::matcher::{apply_specs, SpecMismatch};
use crate::report::{write_report, ReportError, ReportFormatter};
use crate::runlog::RunLog;
use crate::steps::StepsDefinition;
use crate::types::{overall_verdict, InvalidSpec, SequenceResult, Step, StepResult, TaggedValue, Verdict};

/// What a step handler produces: a value to judge, nothing, or a failure.
pub type HandlerResult = eyre::Result<Option<TaggedValue>>;

type Handler<C> = Box<dyn FnMut(&mut C) -> HandlerResult + Send>;

#[derive(Debug, Error)]
pub enum SequenceError {
    #[error(transparent)]
    InvalidSpec(#[from] InvalidSpec),
    #[error("registered step name must not be empty")]
    EmptyStepName,
    #[error("declared handler count ({registered}) does not match configured step count ({configured})")]
    StepCount { registered: usize, configured: usize },
    #[error("declared step '{declared}' differs from configured step '{configured}'")]
    StepsConfig { declared: String, configured: String },
    #[error(transparent)]
    SpecMismatch(#[from] SpecMismatch),
    #[error("step '{}' failed", .0.name)]
    StepFailure(StepResult),
    #[error("step '{step}' aborted: {cause}")]
    Handler { step: String, cause: eyre::Report },
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SequenceError>;

struct RegisteredStep<C> {
    name: String,
    handler: Handler<C>,
}

/// Accumulates step handlers in source order.
///
/// The push index is the declaration order: strictly increasing, stable
/// across runs, independent of any discovery mechanism.
pub struct StepRegistry<C> {
    handlers: Vec<RegisteredStep<C>>,
}

impl<C> Default for StepRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> StepRegistry<C> {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Register a handler under a step name. The name must match the step at
    /// the same position in the configured step list.
    pub fn step(
        mut self,
        name: impl Into<String>,
        handler: impl FnMut(&mut C) -> HandlerResult + Send + 'static,
    ) -> Self {
        self.handlers.push(RegisteredStep {
            name: name.into(),
            handler: Box::new(handler),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<C> std::fmt::Debug for StepRegistry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field(
                "handlers",
                &self.handlers.iter().map(|h| &h.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Executes one sequence against one step configuration.
pub struct SequenceRunner<C> {
    registered: Vec<RegisteredStep<C>>,
    steps: Vec<Step>,
    stop_at_step_fail: bool,
    publisher: Option<EventPublisher>,
    formatter: Option<Box<dyn ReportFormatter>>,
    settings: AppConfig,
    start_time: Option<DateTime<Utc>>,
    step_results: Vec<StepResult>,
}

impl<C> std::fmt::Debug for SequenceRunner<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceRunner")
            .field(
                "registered",
                &self.registered.iter().map(|h| &h.name).collect::<Vec<_>>(),
            )
            .field("steps", &self.steps.len())
            .field("stop_at_step_fail", &self.stop_at_step_fail)
            .finish_non_exhaustive()
    }
}

impl<C> SequenceRunner<C> {
    /// Bind `registry` to `definition`.
    ///
    /// Fails fast on an empty handler name, a handler/step count mismatch, a
    /// positional name mismatch, or an invalid spec.
    pub fn new(
        registry: StepRegistry<C>,
        definition: StepsDefinition,
        settings: AppConfig,
    ) -> Result<Self> {
        let registered = registry.handlers;
        let steps = definition.steps;

        if registered.iter().any(|h| h.name.trim().is_empty()) {
            return Err(SequenceError::EmptyStepName);
        }
        if registered.len() != steps.len() {
            return Err(SequenceError::StepCount {
                registered: registered.len(),
                configured: steps.len(),
            });
        }
        for (handler, step) in registered.iter().zip(&steps) {
            if handler.name != step.name {
                return Err(SequenceError::StepsConfig {
                    declared: handler.name.clone(),
                    configured: step.name.clone(),
                });
            }
            for spec in &step.specs {
                spec.validate()?;
            }
        }

        Ok(Self {
            registered,
            steps,
            stop_at_step_fail: definition.config.stop_at_step_fail,
            publisher: None,
            formatter: None,
            settings,
            start_time: None,
            step_results: Vec::new(),
        })
    }

    /// Publish lifecycle and log events onto the given bus.
    pub fn with_publisher(mut self, publisher: EventPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Render a report with `formatter` after each run, when the settings
    /// enable reporting.
    pub fn with_report_formatter(mut self, formatter: Box<dyn ReportFormatter>) -> Self {
        self.formatter = Some(formatter);
        self
    }

    /// Results of the last run, in execution order.
    pub fn step_results(&self) -> &[StepResult] {
        &self.step_results
    }

    /// Execute every bound step in declaration order.
    ///
    /// The report, when enabled, is rendered whether the run finished or was
    /// cut short; the original run error takes precedence over a report
    /// error.
    pub fn run(&mut self, ctx: &mut C) -> Result<()> {
        self.start_time = Some(Utc::now());
        self.step_results.clear();

        let mut run_log = if self.settings.log_to_file {
            RunLog::with_file(&self.settings.output_dir, self.publisher.clone())?
        } else {
            RunLog::new(self.publisher.clone())
        };

        let mut run_error: Option<SequenceError> = None;
        for index in 0..self.registered.len() {
            let step = self.steps[index].clone();
            if let Err(e) = self.run_step(index, &step, ctx, &mut run_log) {
                run_error = Some(e);
                break;
            }
        }

        let report_outcome = self.finish_report(&run_log);
        match run_error {
            Some(e) => {
                if let Err(report_err) = report_outcome {
                    error!(error = %report_err, "report rendering failed after run error");
                }
                Err(e)
            }
            None => report_outcome.map(|_| ()),
        }
    }

    fn run_step(
        &mut self,
        index: usize,
        step: &Step,
        ctx: &mut C,
        run_log: &mut RunLog,
    ) -> Result<()> {
        if let Some(publisher) = &self.publisher {
            publisher.step_started(step);
        }
        run_log.info(&format!("Start step: {}", step.name));

        let mut result = StepResult::begin(step);
        let mut step_error: Option<SequenceError> = None;

        match (self.registered[index].handler)(ctx) {
            Ok(value) => {
                if let Err(mismatch) = apply_specs(value.as_ref(), &step.specs, &mut result) {
                    result.verdict = Verdict::Aborted;
                    step_error = Some(SequenceError::SpecMismatch(mismatch));
                }
            }
            Err(cause) => {
                result.verdict = Verdict::Aborted;
                step_error = Some(SequenceError::Handler {
                    step: step.name.clone(),
                    cause,
                });
            }
        }

        result.end_time = Some(Utc::now());
        run_log.info(&format!(
            "Result from step {}: {}",
            step.name, result.verdict
        ));
        run_log.info(&format!("End step: {}", step.name));
        self.step_results.push(result.clone());
        if let Some(publisher) = &self.publisher {
            publisher.step_ended(&result);
        }

        if let Some(err) = step_error {
            if matches!(err, SequenceError::SpecMismatch(_)) {
                run_log.error(&format!("Spec mismatch in step '{}'", step.name));
                return Err(err);
            }
            if step.ignore_fail {
                run_log.warn(&format!(
                    "Ignoring failure for step '{}' because ignore_fail is set",
                    step.name
                ));
                return Ok(());
            }
            if self.stop_at_step_fail {
                return Err(err);
            }
            run_log.warn(&format!(
                "Continuing after failure for step '{}' because stop_at_step_fail is off",
                step.name
            ));
            return Ok(());
        }

        if result.verdict == Verdict::Failed {
            if step.ignore_fail {
                run_log.warn(&format!(
                    "Step '{}' failed but will be ignored because ignore_fail is set",
                    step.name
                ));
            } else if self.stop_at_step_fail {
                return Err(SequenceError::StepFailure(result));
            }
        }
        Ok(())
    }

    fn finish_report(&self, run_log: &RunLog) -> Result<Option<std::path::PathBuf>> {
        if !self.settings.report_enabled {
            return Ok(None);
        }
        let Some(formatter) = &self.formatter else {
            return Ok(None);
        };
        let result = SequenceResult {
            start_time: self.start_time,
            end_time: Some(Utc::now()),
            log_file: run_log
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            verdict: overall_verdict(&self.step_results),
            step_results: self.step_results.clone(),
        };
        let path = write_report(&self.settings.output_dir, formatter.as_ref(), &result)?;
        Ok(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::JsonReportFormatter;
    use crate::steps::{steps_from_str, SequenceConfig};
    use crate::types::{
        BooleanSpec, NumericComparator, NumericSpec, Spec, StringSpec,
    };
    use std::time::Duration;

    fn settings() -> AppConfig {
        AppConfig::default()
    }

    fn definition(steps: Vec<Step>) -> StepsDefinition {
        StepsDefinition {
            steps,
            config: SequenceConfig::default(),
        }
    }

    fn numeric_spec(comparator: NumericComparator, lower: Option<f64>, upper: Option<f64>) -> Spec {
        Spec::Numeric(NumericSpec {
            name: "Expect".to_string(),
            comparator,
            lower,
            upper,
            units: String::new(),
        })
    }

    fn bool_spec(pass_if_true: bool) -> Spec {
        Spec::Boolean(BooleanSpec {
            name: "flag".to_string(),
            pass_if_true,
        })
    }

    fn three_step_registry() -> StepRegistry<()> {
        StepRegistry::new()
            .step("Step 1", |_| Ok(None))
            .step("Step 2", |_| Ok(None))
            .step("Step 3", |_| Ok(None))
    }

    #[test]
    fn binding_rejects_count_mismatch() {
        let err = SequenceRunner::new(three_step_registry(), definition(vec![]), settings())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            SequenceError::StepCount {
                registered: 3,
                configured: 0
            }
        ));

        let four = vec![
            Step::new(1, "Step 1", vec![]),
            Step::new(2, "Step 2", vec![]),
            Step::new(3, "Step 3", vec![]),
            Step::new(4, "Step 4", vec![]),
        ];
        assert!(matches!(
            SequenceRunner::new(three_step_registry(), definition(four), settings()),
            Err(SequenceError::StepCount { .. })
        ));
    }

    #[test]
    fn binding_rejects_positional_name_mismatch() {
        let steps = vec![
            Step::new(1, "Step 1", vec![]),
            Step::new(2, "Step Other", vec![]),
            Step::new(3, "Step 3", vec![]),
        ];
        let err = SequenceRunner::new(three_step_registry(), definition(steps), settings())
            .err()
            .unwrap();
        match err {
            SequenceError::StepsConfig {
                declared,
                configured,
            } => {
                assert_eq!(declared, "Step 2");
                assert_eq!(configured, "Step Other");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn binding_rejects_empty_handler_name() {
        let registry = StepRegistry::<()>::new().step("  ", |_| Ok(None));
        let steps = vec![Step::new(1, "  ", vec![])];
        assert!(matches!(
            SequenceRunner::new(registry, definition(steps), settings()),
            Err(SequenceError::EmptyStepName)
        ));
    }

    #[test]
    fn binding_rejects_invalid_spec() {
        let registry = StepRegistry::<()>::new().step("Step 1", |_| Ok(None));
        let steps = vec![Step::new(
            1,
            "Step 1",
            vec![numeric_spec(NumericComparator::Gt, None, None)],
        )];
        assert!(matches!(
            SequenceRunner::new(registry, definition(steps), settings()),
            Err(SequenceError::InvalidSpec(_))
        ));
    }

    #[test]
    fn run_without_specs_passes_every_step() {
        let registry = StepRegistry::<()>::new()
            .step("Step Add", |_| Ok(Some(TaggedValue::Float(4.0))))
            .step("Step Pi", |_| Ok(Some(TaggedValue::Float(3.14))))
            .step("Step Print", |_| Ok(None));
        let steps = vec![
            Step::new(1000, "Step Add", vec![]),
            Step::new(2000, "Step Pi", vec![]),
            Step::new(3000, "Step Print", vec![]),
        ];
        let mut runner = SequenceRunner::new(registry, definition(steps), settings()).unwrap();
        runner.run(&mut ()).unwrap();
        assert_eq!(runner.step_results().len(), 3);
        assert!(runner
            .step_results()
            .iter()
            .all(|r| r.verdict == Verdict::Passed));
    }

    #[test]
    fn boolean_steps_pass_and_fail_by_expectation() {
        let registry = StepRegistry::<()>::new()
            .step("Step True", |_| Ok(Some(TaggedValue::Bool(false))))
            .step("Step True", |_| Ok(Some(TaggedValue::Bool(true))))
            .step("Step False", |_| Ok(Some(TaggedValue::Bool(false))))
            .step("Step False", |_| Ok(Some(TaggedValue::Bool(true))));
        let steps = vec![
            Step::new(1, "Step True", vec![bool_spec(true)]),
            Step::new(2, "Step True", vec![bool_spec(true)]),
            Step::new(3, "Step False", vec![bool_spec(false)]),
            Step::new(4, "Step False", vec![bool_spec(false)]),
        ];
        let mut def = definition(steps);
        def.config.stop_at_step_fail = false;
        let mut runner = SequenceRunner::new(registry, def, settings()).unwrap();
        runner.run(&mut ()).unwrap();

        let verdicts: Vec<_> = runner.step_results().iter().map(|r| r.verdict).collect();
        assert_eq!(
            verdicts,
            vec![
                Verdict::Failed,
                Verdict::Passed,
                Verdict::Passed,
                Verdict::Failed
            ]
        );
        let passed: Vec<_> = runner
            .step_results()
            .iter()
            .map(|r| r.results[0].passed)
            .collect();
        assert_eq!(passed, vec![false, true, true, false]);
    }

    #[test]
    fn list_result_passes_parallel_specs() {
        let registry = StepRegistry::<()>::new().step("List Step", |_| {
            Ok(Some(TaggedValue::Seq(vec![
                TaggedValue::Bool(true),
                TaggedValue::Float(1.5),
                TaggedValue::Str("Done".to_string()),
            ])))
        });
        let steps = vec![Step::new(
            1,
            "List Step",
            vec![
                bool_spec(true),
                numeric_spec(NumericComparator::Gt, Some(1.0), None),
                Spec::String(StringSpec {
                    name: "Status".to_string(),
                    expected: "Done".to_string(),
                    case_sensitive: true,
                }),
            ],
        )];
        let mut runner = SequenceRunner::new(registry, definition(steps), settings()).unwrap();
        runner.run(&mut ()).unwrap();
        let result = &runner.step_results()[0];
        assert_eq!(result.verdict, Verdict::Passed);
        assert!(result.results.iter().all(|m| m.passed));
    }

    #[test]
    fn list_result_with_failing_element_fails_step() {
        let registry = StepRegistry::<()>::new().step("List Step", |_| {
            Ok(Some(TaggedValue::Seq(vec![
                TaggedValue::Bool(true),
                TaggedValue::Float(-1.0),
            ])))
        });
        let steps = vec![Step::new(
            1,
            "List Step",
            vec![
                bool_spec(true),
                numeric_spec(NumericComparator::Gt, Some(0.0), None),
            ],
        )];
        let mut runner = SequenceRunner::new(registry, definition(steps), settings()).unwrap();
        let err = runner.run(&mut ()).unwrap_err();
        assert!(matches!(err, SequenceError::StepFailure(_)));
        let result = &runner.step_results()[0];
        assert_eq!(result.verdict, Verdict::Failed);
        assert!(result.results[0].passed);
        assert!(!result.results[1].passed);
    }

    #[test]
    fn arity_mismatch_aborts_run_regardless_of_policy() {
        let registry = StepRegistry::<()>::new()
            .step("List Step", |_| {
                Ok(Some(TaggedValue::Seq(vec![
                    TaggedValue::Bool(true),
                    TaggedValue::Bool(false),
                ])))
            })
            .step("Never Reached", |_| Ok(None));
        let steps = vec![
            Step {
                ignore_fail: true,
                ..Step::new(1, "List Step", vec![bool_spec(true)])
            },
            Step::new(2, "Never Reached", vec![]),
        ];
        let mut def = definition(steps);
        def.config.stop_at_step_fail = false;
        let mut runner = SequenceRunner::new(registry, def, settings()).unwrap();
        let err = runner.run(&mut ()).unwrap_err();
        assert!(matches!(err, SequenceError::SpecMismatch(_)));
        // The mismatching step is recorded as aborted and nothing follows it.
        assert_eq!(runner.step_results().len(), 1);
        assert_eq!(runner.step_results()[0].verdict, Verdict::Aborted);
    }

    #[test]
    fn handler_failure_with_ignore_fail_continues() {
        let registry = StepRegistry::<Vec<&'static str>>::new()
            .step("Flaky", |log: &mut Vec<&'static str>| {
                log.push("flaky");
                Err(eyre::eyre!("transport timed out"))
            })
            .step("Next", |log: &mut Vec<&'static str>| {
                log.push("next");
                Ok(Some(TaggedValue::Bool(true)))
            });
        let steps = vec![
            Step {
                ignore_fail: true,
                ..Step::new(1, "Flaky", vec![])
            },
            Step::new(2, "Next", vec![bool_spec(true)]),
        ];
        let mut runner = SequenceRunner::new(registry, definition(steps), settings()).unwrap();
        let mut executed = Vec::new();
        runner.run(&mut executed).unwrap();
        assert_eq!(executed, vec!["flaky", "next"]);
        assert_eq!(runner.step_results()[0].verdict, Verdict::Aborted);
        assert_eq!(runner.step_results()[1].verdict, Verdict::Passed);
    }

    #[test]
    fn handler_failure_stops_run_when_stop_at_step_fail() {
        let registry = StepRegistry::<Vec<&'static str>>::new()
            .step("Boom", |log: &mut Vec<&'static str>| {
                log.push("boom");
                Err(eyre::eyre!("device not responding"))
            })
            .step("Unreached", |log: &mut Vec<&'static str>| {
                log.push("unreached");
                Ok(None)
            });
        let steps = vec![Step::new(1, "Boom", vec![]), Step::new(2, "Unreached", vec![])];
        let mut runner = SequenceRunner::new(registry, definition(steps), settings()).unwrap();
        let mut executed = Vec::new();
        let err = runner.run(&mut executed).unwrap_err();
        assert!(matches!(err, SequenceError::Handler { .. }));
        assert_eq!(executed, vec!["boom"]);
        assert_eq!(runner.step_results().len(), 1);
        assert_eq!(runner.step_results()[0].verdict, Verdict::Aborted);
    }

    #[test]
    fn handler_failure_continues_when_stop_at_step_fail_is_off() {
        let registry = StepRegistry::<Vec<&'static str>>::new()
            .step("Boom", |log: &mut Vec<&'static str>| {
                log.push("boom");
                Err(eyre::eyre!("glitch"))
            })
            .step("After", |log: &mut Vec<&'static str>| {
                log.push("after");
                Ok(None)
            });
        let steps = vec![Step::new(1, "Boom", vec![]), Step::new(2, "After", vec![])];
        let mut def = definition(steps);
        def.config.stop_at_step_fail = false;
        let mut runner = SequenceRunner::new(registry, def, settings()).unwrap();
        let mut executed = Vec::new();
        runner.run(&mut executed).unwrap();
        assert_eq!(executed, vec!["boom", "after"]);
    }

    #[test]
    fn failed_verdict_raises_step_failure() {
        let registry =
            StepRegistry::<()>::new().step("Range", |_| Ok(Some(TaggedValue::Float(10.0))));
        let steps = vec![Step::new(
            1,
            "Range",
            vec![numeric_spec(NumericComparator::GtLt, Some(0.0), Some(10.0))],
        )];
        let mut runner = SequenceRunner::new(registry, definition(steps), settings()).unwrap();
        let err = runner.run(&mut ()).unwrap_err();
        match err {
            SequenceError::StepFailure(result) => {
                assert_eq!(result.name, "Range");
                assert_eq!(result.verdict, Verdict::Failed);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn failed_verdict_with_ignore_fail_continues() {
        let registry = StepRegistry::<()>::new()
            .step("Range", |_| Ok(Some(TaggedValue::Float(10.0))))
            .step("After", |_| Ok(Some(TaggedValue::Bool(true))));
        let steps = vec![
            Step {
                ignore_fail: true,
                ..Step::new(
                    1,
                    "Range",
                    vec![numeric_spec(NumericComparator::GtLt, Some(0.0), Some(10.0))],
                )
            },
            Step::new(2, "After", vec![bool_spec(true)]),
        ];
        let mut runner = SequenceRunner::new(registry, definition(steps), settings()).unwrap();
        runner.run(&mut ()).unwrap();
        assert_eq!(runner.step_results()[0].verdict, Verdict::Failed);
        assert_eq!(runner.step_results()[1].verdict, Verdict::Passed);
    }

    #[test]
    fn step_timestamps_are_monotonic() {
        let registry = StepRegistry::<()>::new()
            .step("delay", |_| {
                std::thread::sleep(Duration::from_millis(10));
                Ok(None)
            })
            .step("raises", |_| {
                std::thread::sleep(Duration::from_millis(10));
                Err(eyre::eyre!("late failure"))
            });
        let steps = vec![Step::new(1, "delay", vec![]), Step::new(2, "raises", vec![])];
        let mut runner = SequenceRunner::new(registry, definition(steps), settings()).unwrap();
        let before = Utc::now();
        let _ = runner.run(&mut ()).unwrap_err();

        let results = runner.step_results();
        assert!(before <= results[0].start_time.unwrap());
        assert!(results[0].start_time.unwrap() < results[0].end_time.unwrap());
        assert!(results[0].end_time.unwrap() <= results[1].start_time.unwrap());
        assert!(results[1].start_time.unwrap() < results[1].end_time.unwrap());
    }

    #[test]
    fn undefined_verdict_when_handler_returns_nothing_under_specs() {
        let registry = StepRegistry::<()>::new()
            .step("Silent", |_| Ok(None))
            .step("After", |_| Ok(None));
        let steps = vec![
            Step::new(1, "Silent", vec![bool_spec(true)]),
            Step::new(2, "After", vec![]),
        ];
        let mut runner = SequenceRunner::new(registry, definition(steps), settings()).unwrap();
        runner.run(&mut ()).unwrap();
        assert_eq!(runner.step_results()[0].verdict, Verdict::Undefined);
        assert_eq!(runner.step_results()[1].verdict, Verdict::Passed);
        assert_eq!(overall_verdict(runner.step_results()), Verdict::Undefined);
    }

    #[test]
    fn report_is_written_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let settings = AppConfig {
            report_enabled: true,
            ..AppConfig::default()
        }
        .with_output_dir(dir.path());

        let registry =
            StepRegistry::<()>::new().step("Step 1", |_| Ok(Some(TaggedValue::Bool(true))));
        let steps = vec![Step::new(1, "Step 1", vec![bool_spec(true)])];
        let mut runner = SequenceRunner::new(registry, definition(steps), settings)
            .unwrap()
            .with_report_formatter(Box::new(JsonReportFormatter));
        runner.run(&mut ()).unwrap();

        let report = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .find(|p| p.to_string_lossy().ends_with("_report.json"))
            .expect("report file missing");
        let rendered: SequenceResult =
            serde_json::from_str(&std::fs::read_to_string(report).unwrap()).unwrap();
        assert_eq!(rendered.verdict, Verdict::Passed);
        assert_eq!(rendered.step_results.len(), 1);
    }

    #[test]
    fn report_is_written_even_when_run_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let settings = AppConfig {
            report_enabled: true,
            ..AppConfig::default()
        }
        .with_output_dir(dir.path());

        let registry =
            StepRegistry::<()>::new().step("Boom", |_| Err(eyre::eyre!("dead transport")));
        let steps = vec![Step::new(1, "Boom", vec![])];
        let mut runner = SequenceRunner::new(registry, definition(steps), settings)
            .unwrap()
            .with_report_formatter(Box::new(JsonReportFormatter));
        let _ = runner.run(&mut ()).unwrap_err();

        let report = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .find(|p| p.to_string_lossy().ends_with("_report.json"))
            .expect("report file missing");
        let rendered: SequenceResult =
            serde_json::from_str(&std::fs::read_to_string(report).unwrap()).unwrap();
        assert_eq!(rendered.verdict, Verdict::Aborted);
    }

    #[test]
    fn steps_file_shapes_bind_to_registry() {
        let def = steps_from_str(
            r#"{
                "config": {"stop_at_step_fail": false},
                "steps": [
                    {"id": 1, "name": "greater_than_zero", "specs": [
                        {"type": "numeric", "name": "Expect pass", "comparator": "GT", "lower": 0}
                    ]},
                    {"id": 2, "name": "range_fail_high", "specs": [
                        {"type": "numeric", "name": "Expect fail", "comparator": "LEGE",
                         "lower": -2, "upper": 2}
                    ]}
                ]
            }"#,
        )
        .unwrap();
        let registry = StepRegistry::<()>::new()
            .step("greater_than_zero", |_| Ok(Some(TaggedValue::Float(1.0))))
            .step("range_fail_high", |_| Ok(Some(TaggedValue::Int(0))));
        let mut runner = SequenceRunner::new(registry, def, settings()).unwrap();
        runner.run(&mut ()).unwrap();
        assert_eq!(runner.step_results()[0].verdict, Verdict::Passed);
        assert_eq!(runner.step_results()[1].verdict, Verdict::Failed);
        assert_eq!(overall_verdict(runner.step_results()), Verdict::Failed);
    }
}
