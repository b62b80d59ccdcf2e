//! Fixed-rate tick scheduler.
//!
//! A single task fires `on_tick` every `1 / tick_rate` seconds. Firings are
//! sequential: a callback that overruns its period delays the next firing,
//! and missed firings collapse into one instead of bursting to catch up.
//! The loop exits at the first firing after shutdown is requested and never
//! restarts.

use std::time::Duration;

use tickframe_proto::Message;
use tokio::time::{Interval, MissedTickBehavior};

use crate::{client::ClientState, handler::catch_panic, server::Server};

pub(crate) async fn run<T, M>(server: Server<T, M>)
where
    T: ClientState,
    M: Message,
{
    let period = server.config().tick_period();
    let mut interval = ticker(period);
    let mut ticks: u64 = 0;

    loop {
        tokio::select! {
            biased;
            () = server.cancel_token().cancelled() => break,
            _ = interval.tick() => {},
        }

        ticks += 1;
        if let Err(panic) = catch_panic(server.handler().on_tick(&server)).await {
            tracing::error!(tick = ticks, "Tick handler panicked: {}", panic);
        }
    }

    tracing::debug!(ticks, "Tick loop stopped");
}

// First firing one period from now, not immediately.
fn ticker(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticker_waits_one_period_before_first_firing() {
        let period = Duration::from_millis(100);
        let start = tokio::time::Instant::now();
        let mut interval = ticker(period);

        interval.tick().await;
        assert!(start.elapsed() >= period);

        interval.tick().await;
        assert!(start.elapsed() >= period * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_skips_missed_firings() {
        let period = Duration::from_millis(10);
        let mut interval = ticker(period);

        interval.tick().await;
        tokio::time::advance(period * 5 + Duration::from_millis(1)).await;

        // One overdue firing fires at once, then the schedule realigns
        interval.tick().await;
        let before = tokio::time::Instant::now();
        interval.tick().await;
        assert!(before.elapsed() > Duration::ZERO);
    }
}
