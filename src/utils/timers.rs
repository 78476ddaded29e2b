//! Game clock arithmetic.
//!
//! The game runs on a 15 ms tick and calls 60 ticks a "second" (900 ms).
//! Protocol timeouts and heartbeat intervals are expressed in ticks.
//!
//! Two tick streams are provided: [`steady_tick`] fires every [`TICK`], and
//! [`dynamic_tick`] adapts its period between [`MAX_TICK_RATE`] and
//! [`MIN_TICK_RATE`] to how busy its consumer is.

use futures::{stream, Stream, StreamExt};
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_stream::wrappers::IntervalStream;
use tokio_util::sync::CancellationToken;

/// One game tick
pub const TICK: Duration = Duration::from_millis(15);

/// Ticks in one game "second"
pub const SECOND: u64 = 60;

/// Slowest adaptive rate, in ticks per real second (20 ms period)
pub const MIN_TICK_RATE: u32 = 50;

/// Fastest adaptive rate, in ticks per real second (10 ms period)
pub const MAX_TICK_RATE: u32 = 100;

/// Duration of `count` ticks
pub const fn ticks(count: u64) -> Duration {
    Duration::from_millis(count * TICK.as_millis() as u64)
}

/// Whole ticks in `duration`, rounded down
pub fn to_ticks(duration: Duration) -> u64 {
    (duration.as_millis() / TICK.as_millis()) as u64
}

/// Ticks every [`TICK`] until `token` is cancelled.
///
/// Each item is the time since the previous one, in (fractional) ticks, so
/// consumers can scale simulation steps when the runtime falls behind.
pub fn steady_tick(token: CancellationToken) -> impl Stream<Item = f64> + Send + 'static {
    let start = Instant::now();
    let mut timer = interval_at(start + TICK, TICK);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut last = start;
    IntervalStream::new(timer)
        .map(move |now| {
            let delta = now.duration_since(last).as_secs_f64() / TICK.as_secs_f64();
            last = now;
            delta
        })
        .take_until(token.cancelled_owned())
}

/// Adaptive tick period for a consumer busy `utilization` (0.0 to 1.0) of
/// the time: idle runs at [`MAX_TICK_RATE`], saturated at [`MIN_TICK_RATE`]
pub fn dynamic_period(utilization: f64) -> Duration {
    let fastest = Duration::from_secs(1) / MAX_TICK_RATE;
    let slowest = Duration::from_secs(1) / MIN_TICK_RATE;
    let utilization = if utilization.is_nan() { 0.0 } else { utilization.clamp(0.0, 1.0) };
    fastest + (slowest - fastest).mul_f64(utilization)
}

struct DynamicState {
    token: CancellationToken,
    last: Instant,
    yielded: Instant,
    slept: Duration,
}

/// Ticks at a rate that follows the consumer's load until `token` is cancelled.
///
/// Utilization is the share of the previous cycle the consumer spent between
/// receiving a tick and asking for the next one. Items are deltas in ticks,
/// as with [`steady_tick`].
pub fn dynamic_tick(token: CancellationToken) -> impl Stream<Item = f64> + Send + 'static {
    let start = Instant::now();
    let state = DynamicState {
        token,
        last: start,
        yielded: start,
        slept: Duration::ZERO,
    };
    stream::unfold(state, |mut state| async move {
        let busy = state.yielded.elapsed();
        let cycle = busy + state.slept;
        let utilization = if cycle.is_zero() {
            0.0
        } else {
            busy.as_secs_f64() / cycle.as_secs_f64()
        };
        let period = dynamic_period(utilization);

        tokio::select! {
            biased;
            _ = state.token.cancelled() => return None,
            _ = tokio::time::sleep(period) => {}
        }

        let now = Instant::now();
        let delta = now.duration_since(state.last).as_secs_f64() / TICK.as_secs_f64();
        state.last = now;
        state.yielded = now;
        state.slept = period;
        Some((delta, state))
    })
}
