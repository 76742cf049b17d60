//! Tower middleware layered onto the authenticated route group.

pub mod metrics;
pub mod tracing_layer;
