//! Built-in sequence registry.
//!
//! A sequence is a named set of step handlers; the name is what `--sequence`
//! selects. Handlers receive a [`BenchContext`], which is where device
//! transports live for real benches. The demo sequence exercises every spec
//! kind without any hardware attached.

use std::time::Duration;

use benderr_core::{StepRegistry, TaggedValue};

/// Shared state handed to every step handler of a run.
///
/// Real sequences hold their device transports here and open them lazily in
/// the first step that needs them.
#[derive(Debug, Default)]
pub struct BenchContext;

/// Look up a registered sequence by name.
pub fn find_sequence(name: &str) -> Option<StepRegistry<BenchContext>> {
    match name {
        "demo-sequence" => Some(demo_sequence()),
        _ => None,
    }
}

/// Names that `find_sequence` accepts.
pub fn available_sequences() -> Vec<&'static str> {
    vec!["demo-sequence"]
}

/// Hardware-free walk through the spec kinds: booleans, a no-spec step, and
/// the single- and double-bounded numeric comparators.
fn demo_sequence() -> StepRegistry<BenchContext> {
    StepRegistry::new()
        .step("Step 1. Boolean Spec", |_ctx: &mut BenchContext| {
            Ok(Some(TaggedValue::Bool(true)))
        })
        .step("Step 2. Boolean Spec", |_ctx: &mut BenchContext| {
            std::thread::sleep(Duration::from_millis(250));
            Ok(Some(TaggedValue::Bool(true)))
        })
        .step("Step 3. No Specs", |_ctx: &mut BenchContext| {
            std::thread::sleep(Duration::from_millis(250));
            Ok(None)
        })
        .step("Step 4. Lower limit", |_ctx: &mut BenchContext| {
            Ok(Some(TaggedValue::Int(1)))
        })
        .step("Step 5. Upper limit", |_ctx: &mut BenchContext| {
            Ok(Some(TaggedValue::Int(-1)))
        })
        .step(
            "Step 6. Equality (use lower limit)",
            |_ctx: &mut BenchContext| Ok(Some(TaggedValue::Int(0))),
        )
        .step(
            "Step 7. Lower and upper limit",
            |_ctx: &mut BenchContext| Ok(Some(TaggedValue::Float(0.5))),
        )
}
