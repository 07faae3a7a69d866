pub mod bus;
pub mod config;
pub mod events;
pub mod matcher;
pub mod report;
pub mod runlog;
pub mod sequence;
pub mod steps;
pub mod types;

pub use bus::{BusAddress, EventBus, EventHandler, EventPublisher, EventSubscriber};
pub use config::AppConfig;
pub use report::{JsonReportFormatter, ReportFormatter};
pub use sequence::{HandlerResult, SequenceError, SequenceRunner, StepRegistry};
pub use steps::{steps_from_file, steps_from_str, SequenceConfig, StepsDefinition};
pub use types::{
    overall_verdict, BooleanSpec, InvalidSpec, Measurement, NoSpec, NoSpecAction,
    NumericComparator, NumericSpec, SequenceResult, Spec, Step, StepResult, StringSpec,
    TaggedValue, Verdict,
};
