//! State machine for one company-verification round.
//!
//! The surrounding workflow uploads documents, waits for their extraction, and then either
//! proceeds or asks the user to confirm a company mismatch. Only one round may be in flight
//! at a time, and a round whose extraction never reports back is failed by a timeout. Times
//! are passed in by the caller.

use crate::error::{ProfileEngineError, Result};
use crate::reconciler::MismatchReport;
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    TimedOut,
    ExtractionFailed { message: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut => write!(f, "document extraction timed out"),
            Self::ExtractionFailed { message } => write!(f, "document extraction failed: {}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RoundState {
    #[default]
    Idle,
    Verifying {
        started_at: DateTime<Utc>,
    },
    MismatchPending {
        report: MismatchReport,
    },
    Verified,
    Failed {
        reason: FailureReason,
    },
}

impl RoundState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Verifying { .. } => "verifying",
            Self::MismatchPending { .. } => "mismatch_pending",
            Self::Verified => "verified",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Verifying { .. } | Self::MismatchPending { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationRound {
    state: RoundState,
}

impl VerificationRound {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &RoundState {
        &self.state
    }

    pub fn is_in_flight(&self) -> bool {
        self.state.is_in_flight()
    }

    /// Opens a round. Refused while another round is verifying or awaiting confirmation.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.state.is_in_flight() {
            return Err(ProfileEngineError::RoundInFlight);
        }
        info!("Verification round started at {}", now);
        self.state = RoundState::Verifying { started_at: now };
        Ok(())
    }

    /// Records the extraction outcome. A conflicting report parks the round until the user
    /// confirms or cancels.
    pub fn complete(&mut self, report: MismatchReport) -> Result<&RoundState> {
        self.expect_verifying("complete")?;
        self.state = if report.requires_confirmation {
            warn!("Verification round awaiting confirmation: {}", report.reason);
            RoundState::MismatchPending { report }
        } else {
            RoundState::Verified
        };
        Ok(&self.state)
    }

    pub fn fail(&mut self, reason: FailureReason) -> Result<()> {
        self.expect_verifying("fail")?;
        warn!("Verification round failed: {}", reason);
        self.state = RoundState::Failed { reason };
        Ok(())
    }

    pub fn confirm(&mut self) -> Result<()> {
        self.expect_pending("confirm")?;
        self.state = RoundState::Verified;
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.expect_pending("cancel")?;
        self.state = RoundState::Idle;
        Ok(())
    }

    /// Fails a round that has been verifying for at least `timeout`. Returns whether it did.
    pub fn check_timeout(&mut self, now: DateTime<Utc>, timeout: Duration) -> bool {
        match self.state {
            RoundState::Verifying { started_at } if now.signed_duration_since(started_at) >= timeout => {
                warn!(
                    "Verification round started at {} timed out after {}s",
                    started_at,
                    timeout.num_seconds()
                );
                self.state = RoundState::Failed {
                    reason: FailureReason::TimedOut,
                };
                true
            }
            _ => false,
        }
    }

    fn expect_verifying(&self, event: &str) -> Result<()> {
        match self.state {
            RoundState::Verifying { .. } => Ok(()),
            _ => Err(self.invalid(event)),
        }
    }

    fn expect_pending(&self, event: &str) -> Result<()> {
        match self.state {
            RoundState::MismatchPending { .. } => Ok(()),
            _ => Err(self.invalid(event)),
        }
    }

    fn invalid(&self, event: &str) -> ProfileEngineError {
        ProfileEngineError::InvalidTransition {
            state: self.state.name().to_string(),
            event: event.to_string(),
        }
    }
}
