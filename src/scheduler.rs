//! Periodic jobs driving the feedback engine.
//!
//! Two independent loops share one engine: a fast telemetry tick and a
//! slower voice feedback tick that starts after an initial delay. Both stop
//! when the cancellation token fires.

use crate::config::Config;
use crate::engine::FeedbackEngine;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Handles of the running loops.
pub struct SchedulerHandle {
    pub telemetry: JoinHandle<()>,
    pub feedback: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Wait for both loops to exit.
    pub async fn join(self) {
        let _ = tokio::join!(self.telemetry, self.feedback);
    }
}

/// Spawn both loops on the current runtime.
pub fn spawn(
    engine: Arc<FeedbackEngine>,
    config: &Config,
    cancel_token: CancellationToken,
) -> SchedulerHandle {
    let telemetry = tokio::spawn(telemetry_loop(
        Arc::clone(&engine),
        config.telemetry_interval,
        cancel_token.clone(),
    ));
    let feedback = tokio::spawn(feedback_loop(
        engine,
        config.feedback_initial_delay,
        config.feedback_interval,
        cancel_token,
    ));
    SchedulerHandle {
        telemetry,
        feedback,
    }
}

pub async fn telemetry_loop(
    engine: Arc<FeedbackEngine>,
    period: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let delivered = engine.telemetry_tick();
                tracing::trace!("telemetry tick delivered {}", delivered);
            }
            _ = cancel_token.cancelled() => {
                tracing::info!("Telemetry loop shutting down");
                break;
            }
        }
    }
}

pub async fn feedback_loop(
    engine: Arc<FeedbackEngine>,
    initial_delay: Duration,
    period: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + initial_delay, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let delivered = engine.feedback_tick();
                tracing::debug!("Feedback tick delivered {} voice message(s)", delivered);
            }
            _ = cancel_token.cancelled() => {
                tracing::info!("Feedback loop shutting down");
                break;
            }
        }
    }
}
