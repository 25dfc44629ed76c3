//! Runtime Module - run context and materialization
//!
//! - `context`: RunContext, the explicit per-run state
//! - `driver`: Materializer, walks the graph with one task per node
//! - `report`: RunReport and NodeOutcome

mod context;
mod driver;
mod report;

pub use context::RunContext;
pub use driver::Materializer;
pub use report::{NodeOutcome, RunReport};
