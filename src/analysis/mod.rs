pub mod telemetry;
pub mod topology;

pub use telemetry::PlanTelemetry;
