//! Raster-pipeline backend: a stack-machine instruction builder, the
//! lowering of its instructions to flat stages, and a reference interpreter.

pub mod builder;
pub mod codegen;
pub mod debug_trace;
pub mod interp;
pub mod pipeline;
pub mod program;
pub mod stages;

pub use builder::{Builder, SlotRange};
pub use debug_trace::DebugTrace;
pub use interp::{evaluate, Interpreter, Pixel, RunOutput};
pub use pipeline::{Callbacks, Pipeline, StageList};
pub use program::{Program, SlotData};
pub use stages::Stage;
