//! Idle reaper: supervised background sweeps over presence and connections.
//!
//! Two independent cadences: a presence sweep that demotes long-silent
//! online users, and a connection liveness sweep that probes every channel
//! with a keepalive ping. Both loops observe a stop token at each iteration
//! and survive a failed iteration with a short backoff — the reaper must
//! never take the process down.

use chrono::Utc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::RealtimeConfig;
use crate::state::AppState;
use crate::ws::protocol::ServerEvent;

/// Spawn both sweep loops. Cancelling `shutdown` stops them cooperatively;
/// the returned handles let the caller wait for in-flight sweeps to finish.
pub fn spawn_reaper(
    state: AppState,
    config: &RealtimeConfig,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let presence_handle = spawn_presence_sweep(
        state.clone(),
        Duration::from_secs(config.presence_sweep_secs),
        chrono::Duration::minutes(config.idle_threshold_mins as i64),
        Duration::from_secs(config.error_backoff_secs),
        shutdown.clone(),
    );
    let connection_handle = spawn_connection_sweep(
        state,
        Duration::from_secs(config.connection_sweep_secs),
        Duration::from_secs(config.error_backoff_secs),
        shutdown,
    );

    vec![presence_handle, connection_handle]
}

/// Periodically demote online users whose last-seen is older than the idle
/// threshold. One aggregated broadcast per sweep.
fn spawn_presence_sweep(
    state: AppState,
    interval: Duration,
    threshold: chrono::Duration,
    backoff: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip the first immediate tick
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("presence sweep loop stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let st = state.clone();
                    // Run the sweep as its own task so a panic is caught
                    // and logged instead of killing the loop.
                    match tokio::spawn(async move { st.presence.sweep_idle(threshold).await }).await {
                        Ok(0) => {
                            tracing::debug!("presence sweep: nothing to demote");
                        }
                        Ok(count) => {
                            tracing::info!(count, "presence sweep demoted idle users");
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "presence sweep failed");
                            tokio::time::sleep(backoff).await;
                        }
                    }
                }
            }
        }
    })
}

/// Periodically probe every registered channel with a keepalive ping.
/// Channels whose write fails go down the same evict-and-offline path as an
/// explicit disconnect.
fn spawn_connection_sweep(
    state: AppState,
    interval: Duration,
    backoff: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("connection sweep loop stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let st = state.clone();
                    let result = tokio::spawn(async move {
                        let ping = ServerEvent::Ping {
                            timestamp: Utc::now().to_rfc3339(),
                        };
                        let evicted = st.registry.broadcast(&ping, None);
                        st.presence.demote_evicted(&evicted).await;
                        evicted.len()
                    })
                    .await;

                    match result {
                        Ok(0) => {
                            tracing::debug!("connection sweep: all channels alive");
                        }
                        Ok(count) => {
                            tracing::info!(count, "connection sweep evicted dead channels");
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "connection sweep failed");
                            tokio::time::sleep(backoff).await;
                        }
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db_in_memory;
    use crate::store::profiles;
    use tokio::sync::mpsc::unbounded_channel;

    async fn state_with_user(user_id: i64) -> AppState {
        let db = init_db_in_memory().unwrap();
        profiles::insert_user(&db, user_id, &format!("user{user_id}"))
            .await
            .unwrap();
        AppState::new(db)
    }

    #[tokio::test]
    async fn connection_sweep_evicts_dead_channels_and_stops_on_cancel() {
        let state = state_with_user(1).await;

        let (tx, rx) = unbounded_channel();
        state.registry.admit(1, tx);
        drop(rx); // channel is dead, keepalive will fail

        let config = RealtimeConfig {
            presence_sweep_secs: 3600,
            connection_sweep_secs: 1,
            idle_threshold_mins: 30,
            error_backoff_secs: 1,
        };
        let shutdown = CancellationToken::new();
        let handles = spawn_reaper(state.clone(), &config, shutdown.clone());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!state.registry.is_connected(1));
        assert_eq!(state.presence.get(1).unwrap().status, "offline");

        shutdown.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn cancelled_reaper_stops_promptly() {
        let state = state_with_user(1).await;
        let shutdown = CancellationToken::new();
        let handles = spawn_reaper(state, &RealtimeConfig::default(), shutdown.clone());

        shutdown.cancel();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .expect("loop did not observe the stop token")
                .unwrap();
        }
    }
}
