use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

use crate::api::users;
use crate::gateway::Gateway;

/// Send one heartbeat if someone is signed in. Failures are logged and dropped.
pub async fn beat(gateway: &Gateway) -> bool {
    if gateway.credentials().access_token().is_none()
        && gateway.credentials().refresh_token().is_none()
    {
        debug!("Skipping heartbeat: not signed in");
        return false;
    }

    match users::heartbeat(gateway).await {
        Ok(ack) => {
            debug!(last_seen = ?ack.last_seen, "Heartbeat acknowledged");
            ack.ok
        }
        Err(err) => {
            debug!("Heartbeat failed: {}", err);
            false
        }
    }
}

/// Beat immediately and then every `period` until the handle is aborted
pub fn spawn(gateway: Gateway, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // The first tick completes immediately
            ticker.tick().await;
            beat(&gateway).await;
        }
    })
}
