//! Tally replication
//!
//! Every node holds a replica of the recording flag. Only the Hub's copy is
//! authoritative and changed by the operator; it is pushed verbatim over the
//! open control channels and replicas overwrite on receipt.

pub use crate::net::message::TallyState;

use crate::net::message::ControlMessage;
use crate::net::transport::ControlChannel;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TallyError {
    #[error("only the hub may change the tally")]
    NotAuthoritative,
}

/// Outcome of one broadcast, per channel.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl fmt::Display for BroadcastReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sent {}, skipped {}, failed {}", self.sent, self.skipped, self.failed)
    }
}

#[derive(Debug, Clone)]
pub struct TallyBroadcaster {
    authoritative: bool,
    state: TallyState,
}

impl TallyBroadcaster {
    pub fn new(authoritative: bool) -> Self {
        TallyBroadcaster {
            authoritative,
            state: TallyState::Standby,
        }
    }

    pub fn state(&self) -> TallyState {
        self.state
    }

    pub fn is_authoritative(&self) -> bool {
        self.authoritative
    }

    /// Updates the local value, then sends it once over every open channel.
    ///
    /// Closed channels are skipped and send failures only counted; nothing
    /// is queued or retried.
    pub async fn set(
        &mut self,
        value: TallyState,
        links: &[Arc<dyn ControlChannel>],
    ) -> Result<BroadcastReport, TallyError> {
        if !self.authoritative {
            return Err(TallyError::NotAuthoritative);
        }
        self.state = value;

        let message = ControlMessage::tally(value);
        let mut report = BroadcastReport::default();
        for link in links {
            if !link.is_open() {
                report.skipped += 1;
                continue;
            }
            match link.send(&message).await {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    log::debug!("Tally to {} not delivered: {}", link.peer(), e);
                    report.failed += 1;
                }
            }
        }

        log::info!("Tally set to {} ({})", value, report);
        Ok(report)
    }

    pub async fn toggle(
        &mut self,
        links: &[Arc<dyn ControlChannel>],
    ) -> Result<BroadcastReport, TallyError> {
        self.set(self.state.toggled(), links).await
    }

    /// Overwrites the replica with a received value, last write wins.
    pub fn apply(&mut self, message: &ControlMessage) -> TallyState {
        match *message {
            ControlMessage::Tally { status } => {
                if status != self.state {
                    log::info!("Tally replica {} -> {}", self.state, status);
                }
                self.state = status;
            }
        }
        self.state
    }
}
