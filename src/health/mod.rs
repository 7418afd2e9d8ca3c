mod checker;
mod probe;

pub use checker::{HealthChecker, RoundSummary, DEFAULT_PROBE_TIMEOUT};
pub use probe::{Probe, TcpProbe};
