pub mod plan;
pub mod trace;

pub use plan::format_plan;
pub use trace::format_trace;
