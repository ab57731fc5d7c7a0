//! Service configuration.

use std::time::Duration;

/// Tunables for one service node.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Interval between witnesses. The engine starts ticking once a roster
    /// is configured.
    pub epoch_duration: Duration,

    /// How old a witness timestamp may be before committee members and
    /// clients reject it.
    pub reasonable_time: Duration,

    /// Hard deadline for best-effort head propagation.
    pub propagation_deadline: Duration,

    /// Upper bound on one collective signing round; an overrun skips the
    /// epoch and keeps serving the previous witness.
    pub cosign_timeout: Duration,

    /// Stop the engine after this many epochs; 0 means run until stopped.
    /// Only useful for tests and simulations.
    pub max_iterations: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            epoch_duration: Duration::from_secs(10),
            reasonable_time: Duration::from_secs(3600),
            propagation_deadline: Duration::from_secs(120),
            cosign_timeout: Duration::from_secs(60),
            max_iterations: 0,
        }
    }
}
