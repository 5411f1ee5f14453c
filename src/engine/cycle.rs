use std::time::Duration;

/// Declared rate of a cyclic job.
///
/// Rates are normalized to the engine clock at registration; `Ticks(n)`
/// means every n engine iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleRate {
    Seconds(u64),
    Milliseconds(u64),
    Ticks(u64),
}

impl CycleRate {
    /// Normalize to wall time against the given engine rate.
    pub fn to_duration(self, engine_rate: Duration) -> Duration {
        match self {
            Self::Seconds(secs) => Duration::from_secs(secs),
            Self::Milliseconds(millis) => Duration::from_millis(millis),
            Self::Ticks(ticks) => engine_rate.saturating_mul(ticks as u32),
        }
    }
}
