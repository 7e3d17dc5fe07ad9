//! C5: periodic sweep marking grants and pending requests past their
//! deadlines as `expired`.
//!
//! Modeled as a scoped task holding its own cancellation handle rather
//! than a bare global background task (§9 design note): the caller owns
//! a [`CancellationToken`] and can stop the sweep promptly without a
//! process-wide signal.

use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::error::ConsentError;
use crate::state::AppState;

/// Runs a single sweep pass and returns the number of rows transitioned
/// to `expired`. Used both by the background loop and by the
/// `/internal/api/v1/admin/expiry-check` endpoint (§6.1).
#[instrument(skip(state))]
pub async fn sweep_once(state: &AppState) -> Result<u64, ConsentError> {
    let count = state.engine.sweep_expired(OffsetDateTime::now_utc()).await?;
    if count > 0 {
        info!(count, "expiry sweep transitioned records");
    }
    Ok(count)
}

/// `StartBackgroundExpiryProcess`: spawns the periodic sweep and
/// returns a handle that also owns the [`CancellationToken`]. Dropping
/// or cancelling the token causes the loop to stop at the next tick
/// boundary; per-row/per-tick failures are logged and do not abort the
/// loop (§4.5).
pub struct ExpiryMonitor {
    token: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl ExpiryMonitor {
    pub fn start(state: AppState, interval: std::time::Duration) -> Self {
        let token = CancellationToken::new();
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => {
                        info!("expiry monitor stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = sweep_once(&state).await {
                            error!(%err, "expiry sweep tick failed");
                        }
                    }
                }
            }
        });

        Self { token, handle }
    }

    /// `StopBackgroundExpiryProcess`.
    pub async fn stop(self) {
        self.token.cancel();
        let _ = self.handle.await;
    }
}
