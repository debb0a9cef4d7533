use std::sync::Arc;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, instrument};

use super::DeploymentController;

/// Start the health loop.
///
/// [`Future`] returned from this function should be
/// spawned as a background process. It never completes.
///
/// [`Future`]: std::future::Future
#[instrument(skip_all)]
pub async fn supervise(controller: Arc<DeploymentController>) {
    let period = controller.settings().health_check_interval;

    info!(?period, "started deployment supervision");

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        controller.sweep().await;
    }
}
