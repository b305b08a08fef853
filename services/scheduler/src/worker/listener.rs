//! Postgres LISTEN task feeding the recompute worker.

use std::time::Duration;

use rota_id::OrgId;
use sqlx::postgres::{PgListener, PgPool};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

use super::ChangeNotice;

/// Delay before retrying after a listener error.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Maps a notification payload to a notice. Anything that is not an org ID
/// widens to a full recompute.
pub fn parse_notice(payload: &str) -> ChangeNotice {
    match OrgId::parse(payload.trim()) {
        Ok(org_id) => ChangeNotice::Org(org_id),
        Err(e) => {
            warn!(payload, error = %e, "Unrecognized change payload; recomputing all");
            ChangeNotice::All
        }
    }
}

/// Forwards notifications on one channel into an mpsc queue.
pub struct ChangeListener {
    pool: PgPool,
    channel: String,
}

impl ChangeListener {
    pub fn new(pool: PgPool, channel: impl Into<String>) -> Self {
        Self {
            pool,
            channel: channel.into(),
        }
    }

    /// Listen until shutdown is signaled or the receiving side goes away.
    #[instrument(skip_all, fields(channel = %self.channel))]
    pub async fn run(
        self,
        notices: mpsc::Sender<ChangeNotice>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), sqlx::Error> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(&self.channel).await?;
        info!("Listening for change notifications");

        loop {
            let notice = tokio::select! {
                received = listener.try_recv() => match received {
                    Ok(Some(notification)) => parse_notice(notification.payload()),
                    Ok(None) => {
                        // Connection dropped; the next call reconnects. Anything
                        // sent meanwhile is lost.
                        warn!("Notification connection lost; scheduling full recompute");
                        ChangeNotice::All
                    }
                    Err(e) => {
                        warn!(error = %e, "Notification listener error");
                        tokio::time::sleep(RETRY_DELAY).await;
                        continue;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Change listener shutting down");
                        return Ok(());
                    }
                    continue;
                }
            };

            debug!(?notice, "Change notice");
            if notices.send(notice).await.is_err() {
                info!("Recompute worker gone; change listener stopping");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_notice_org() {
        let org_id = OrgId::new();
        assert_eq!(
            parse_notice(&format!(" {org_id}\n")),
            ChangeNotice::Org(org_id)
        );
    }

    #[test]
    fn test_parse_notice_garbage_is_all() {
        assert_eq!(parse_notice(""), ChangeNotice::All);
        assert_eq!(parse_notice("rsv_01HV4Z2WQXKJNM8GPQY6VBKC3D"), ChangeNotice::All);
    }
}
