// External tool invocation
pub mod command_template;
pub mod stage_runner;

pub use command_template::{CommandTemplate, RenderedCommand, StageVars};
pub use stage_runner::{run_stage, StageOutcome, TailBuffer, OUTPUT_TAIL_BYTES};
