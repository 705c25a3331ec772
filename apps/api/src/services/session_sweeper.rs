//! Background deletion of expired sessions

use std::time::Duration;

use tokio::task::JoinHandle;

use crate::repositories::SessionRepository;

/// Rows deleted per statement
pub const SWEEP_BATCH_SIZE: i64 = 1000;

/// Delete every expired session, one batch at a time
///
/// # Returns
/// Total number of deleted sessions
pub async fn sweep_expired_sessions(repo: &SessionRepository) -> Result<u64, sqlx::Error> {
    let mut total = 0;
    loop {
        let deleted = repo.delete_expired(SWEEP_BATCH_SIZE).await?;
        total += deleted;
        if deleted < SWEEP_BATCH_SIZE as u64 {
            break;
        }
    }
    Ok(total)
}

/// Spawn the periodic sweeper
pub fn spawn_session_sweeper(repo: SessionRepository, interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match sweep_expired_sessions(&repo).await {
                Ok(0) => tracing::debug!("No expired sessions to clean up"),
                Ok(deleted) => tracing::info!(deleted, "Cleaned up expired sessions"),
                Err(e) => tracing::error!(error = ?e, "Failed to clean up expired sessions"),
            }
        }
    })
}
