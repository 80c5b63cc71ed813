use std::time::Duration;

use quanta::Clock;
use tracing::debug;

use crate::Error;

pub const DEFAULT_WARMUP: usize = 1;
pub const DEFAULT_TRIALS: usize = 10;

/// Run `trial` `warmup` times untimed, then `trials` times timed, and
/// return the mean of the timed runs. The first error aborts the
/// measurement.
pub fn measure<F>(clock: &Clock, mut trial: F, warmup: usize, trials: usize) -> Result<Duration, Error>
where
    F: FnMut() -> Result<(), Error>,
{
    if trials == 0 {
        return Err(Error::InvalidConfig("trial count must be at least 1".into()));
    }
    let divisor = u32::try_from(trials)
        .map_err(|_| Error::InvalidConfig(format!("{} trials exceed u32", trials)))?;

    for _ in 0..warmup {
        trial()?;
    }

    let mut total = Duration::ZERO;
    for _ in 0..trials {
        let start = clock.raw();
        trial()?;
        let end = clock.raw();
        total += clock.delta(start, end);
    }

    let mean = total / divisor;
    debug!(warmup, trials, mean_ns = mean.as_nanos() as u64, "measured");
    Ok(mean)
}
