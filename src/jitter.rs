use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Spreads `seconds` uniformly over `[seconds - 25%, seconds + 25%)`.
pub fn apply_jitter(seconds: u64) -> u64 {
    apply_jitter_with(seconds, &mut rand::thread_rng())
}

pub fn apply_jitter_with<R>(seconds: u64, rng: &mut R) -> u64
where
    R: Rng + ?Sized,
{
    let deviation = seconds / 4;
    if deviation == 0 {
        return seconds;
    }

    seconds - deviation + rng.gen_range(0..2 * deviation)
}

/// Sleeps for a jittered amount of seconds.
///
/// Returns `false` when the sleep was cut short by `token`.
pub async fn sleep_with_jitter(seconds: u64, token: &CancellationToken) -> bool {
    let seconds = apply_jitter(seconds);
    log::info!("Sleeping for {} seconds...", seconds);

    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        _ = sleep(Duration::from_secs(seconds)) => true,
    }
}
