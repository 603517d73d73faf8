use std::time::{Duration, SystemTime};

use thiserror::Error;
use uuid::Uuid;

use crate::dao::models::{EvaluationClaimEntity, EvaluationRecordEntity, SessionPhaseEntity};

/// Evaluation phase of a debate session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    /// The debate runs, or ended and nobody claimed the evaluation yet.
    Active,
    /// One participant holds the claim and is running the scoring call.
    Evaluating(Claim),
    /// Ratings were applied, or the debate was empty.
    Complete,
}

/// Exclusive right to run the evaluation of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    /// Token the completion commit must present.
    pub id: Uuid,
    /// Participant running the evaluation.
    pub claimed_by: String,
    /// Start of the lease.
    pub claimed_at: SystemTime,
}

impl Claim {
    /// Fresh claim for `user_id` taken at `now`.
    pub fn new(user_id: &str, now: SystemTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            claimed_by: user_id.to_owned(),
            claimed_at: now,
        }
    }

    /// Whether the lease ran out, meaning the claimer is presumed gone.
    pub fn is_expired(&self, now: SystemTime, lease: Duration) -> bool {
        now.duration_since(self.claimed_at)
            .is_ok_and(|held| held >= lease)
    }
}

/// Events driving [`SessionPhase`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Take the evaluation claim.
    Claim(Claim),
    /// Replace a claim whose lease expired.
    Reclaim(Claim),
    /// Give the claim back after a failed scoring call.
    Release {
        /// Claim being released.
        claim_id: Uuid,
    },
    /// Finish with results, guarded by the claim.
    Complete {
        /// Claim under which the results were computed.
        claim_id: Uuid,
    },
    /// Finish a debate that has no debate messages.
    CompleteEmpty,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// Phase the session was in.
    pub from: SessionPhase,
    /// Rejected event.
    pub event: SessionEvent,
}

impl SessionPhase {
    /// Compute the phase reached by applying `event`.
    pub fn apply(&self, event: SessionEvent) -> Result<SessionPhase, InvalidTransition> {
        let next = match (self, &event) {
            (SessionPhase::Active, SessionEvent::Claim(claim)) => {
                SessionPhase::Evaluating(claim.clone())
            }
            (SessionPhase::Active, SessionEvent::CompleteEmpty) => SessionPhase::Complete,
            (SessionPhase::Evaluating(_), SessionEvent::Reclaim(claim)) => {
                SessionPhase::Evaluating(claim.clone())
            }
            (SessionPhase::Evaluating(current), SessionEvent::Release { claim_id })
                if current.id == *claim_id =>
            {
                SessionPhase::Active
            }
            (SessionPhase::Evaluating(current), SessionEvent::Complete { claim_id })
                if current.id == *claim_id =>
            {
                SessionPhase::Complete
            }
            _ => {
                return Err(InvalidTransition {
                    from: self.clone(),
                    event,
                });
            }
        };
        Ok(next)
    }

    /// Live claim, if any.
    pub fn claim(&self) -> Option<&Claim> {
        match self {
            SessionPhase::Evaluating(claim) => Some(claim),
            _ => None,
        }
    }

    /// Read the phase out of the persisted record.
    ///
    /// A record stuck in `evaluating` without a claim can only come from a
    /// partial write; it is treated as unclaimed so the evaluation can run again.
    pub fn from_record(record: &EvaluationRecordEntity) -> Self {
        match (record.phase, &record.claim) {
            (SessionPhaseEntity::Complete, _) => SessionPhase::Complete,
            (SessionPhaseEntity::Evaluating, Some(claim)) => SessionPhase::Evaluating(Claim {
                id: claim.claim_id,
                claimed_by: claim.claimed_by.clone(),
                claimed_at: claim.claimed_at,
            }),
            _ => SessionPhase::Active,
        }
    }

    /// Store the phase and claim into the persisted record.
    pub fn write_to(&self, record: &mut EvaluationRecordEntity) {
        let (phase, claim) = match self {
            SessionPhase::Active => (SessionPhaseEntity::Active, None),
            SessionPhase::Evaluating(claim) => (
                SessionPhaseEntity::Evaluating,
                Some(EvaluationClaimEntity {
                    claim_id: claim.id,
                    claimed_by: claim.claimed_by.clone(),
                    claimed_at: claim.claimed_at,
                }),
            ),
            SessionPhase::Complete => (SessionPhaseEntity::Complete, None),
        };
        record.phase = phase;
        record.claim = claim;
    }
}
