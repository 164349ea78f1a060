//! Startup catch-up: brings the canonical database level with the ledger.

use super::{OverrideWriter, PublishOutcome, WriterState};
use crate::error_handling::PublishError;

/// Result of a [`OverrideWriter::catch_up`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatchUpOutcome {
    /// This call ran the replay.
    Completed(PublishOutcome),
    /// Catch-up was already triggered by an earlier call; nothing was done.
    AlreadyTriggered(WriterState),
}

impl OverrideWriter {
    /// Replays every entry after the checkpoint, once per writer lifetime.
    ///
    /// Only the first call does any work: it moves the writer from `Idle` to
    /// `CatchingUp` and then to `Ready`, or to `Failed` if the replay fails.
    /// Every later or concurrent call returns
    /// [`CatchUpOutcome::AlreadyTriggered`] immediately.
    pub async fn catch_up(&self) -> Result<CatchUpOutcome, PublishError> {
        if !self.transition(WriterState::Idle, WriterState::CatchingUp) {
            return Ok(CatchUpOutcome::AlreadyTriggered(self.state()));
        }

        log::debug!("Catching up database {}", self.database_path.display());
        match self.publish().await {
            Ok(outcome) => {
                match &outcome {
                    PublishOutcome::UpToDate { version } => {
                        log::info!("Database is up to date at version {version:?}")
                    }
                    PublishOutcome::Published {
                        version, entries, ..
                    } => log::info!(
                        "Caught up {entries} pending ledger entries; database is at version {version:?}"
                    ),
                }
                self.transition(WriterState::CatchingUp, WriterState::Ready);
                Ok(CatchUpOutcome::Completed(outcome))
            }
            Err(e) => {
                log::error!("Catch-up replay failed: {e}");
                self.transition(WriterState::CatchingUp, WriterState::Failed);
                Err(e)
            }
        }
    }
}
