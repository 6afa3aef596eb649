//! Background tasks.

use crate::AppState;
use std::sync::Arc;
use std::time::Duration;

/// How often monitors get a fresh roster push.
const ROSTER_REFRESH_PERIOD: Duration = Duration::from_secs(10);

/// Spawns the periodic roster and directory refresh for the monitoring
/// audience. Each tick takes a fresh snapshot, so monitors converge even
/// if an incremental broadcast was dropped.
pub fn spawn_roster_refresh(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ROSTER_REFRESH_PERIOD);
        loop {
            ticker.tick().await;
            state.relay.broadcast_roster_to_monitors();
            state.relay.broadcast_monitor_directory();
        }
    });
}
