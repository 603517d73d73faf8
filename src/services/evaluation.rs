//! Evaluation coordinator: scores a finished debate and applies the rating
//! update exactly once per session.
//!
//! The run is split in three steps. A claim transaction moves the session to
//! `Evaluating` under a fresh claim id, the scoring call runs outside of any
//! transaction, and a completion transaction guarded by the claim id writes
//! the ratings, the scorecards and the announcement in one commit. Whoever
//! loses the claim race gets [`EvaluationOutcome::AlreadyHandled`].

use std::fmt::Write as _;

use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::TriggerPolicy,
    dao::{
        models::{
            EvaluationOutcomeEntity, MessageDraft, MessageEntity, MessageKind, Position,
            SessionEntity,
        },
        store::{Document, transaction::run_transaction},
    },
    error::ServiceError,
    identity::Identity,
    services::{
        rating::{self, MatchResult},
        scoring::{DebaterRef, DebaterScore, EvaluationRequest, ScoreSheet, ScoringError, ScoringRubric},
        session_service::{self, RemainingTime},
    },
    state::{
        SharedState,
        state_machine::{Claim, SessionEvent, SessionPhase},
    },
};

/// Sender id and name of coordinator-written messages.
pub const SYSTEM_SENDER: &str = "system";

/// Result of one participant in an applied evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantResult {
    /// Participant user id.
    pub user_id: String,
    /// Display name captured in the session.
    pub name: String,
    /// Debate role.
    pub position: Position,
    /// Weighted rubric total.
    pub total: u32,
    /// Win, draw or loss.
    pub result: MatchResult,
    /// Rating before the update.
    pub rating_before: i32,
    /// Rating after the update.
    pub rating_after: i32,
}

/// Applied evaluation, proponent first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationReport {
    /// Evaluated session.
    pub session_id: Uuid,
    /// Both participants.
    pub participants: [ParticipantResult; 2],
}

/// What a trigger call ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluationOutcome {
    /// This call scored the debate and applied the ratings.
    Evaluated(EvaluationReport),
    /// No debate messages were exchanged; the session closed without scoring.
    CompletedWithoutDebate,
    /// Another invocation completed the evaluation or holds a live claim.
    AlreadyHandled,
    /// The trigger policy leaves the evaluation to the other participant.
    Deferred,
}

enum ClaimStep {
    Finished(EvaluationOutcome),
    Run { claim: Claim, session: SessionEntity },
}

/// Evaluate a session whose debate time is over.
pub async fn trigger_evaluation(
    state: &SharedState,
    identity: &Identity,
    session_id: Uuid,
) -> Result<EvaluationOutcome, ServiceError> {
    let store = state.require_store().await?;
    let settings = &state.config().evaluation;
    let now = state.now();

    let session = session_service::load_session(&store, session_id).await?;
    session_service::require_participant(&session, identity)?;
    let timer = RemainingTime::of(&session, now, state.config().debate.duration);
    if !timer.is_over() {
        return Err(ServiceError::InvalidState(format!(
            "the debate is still running, {} seconds left",
            timer.remaining_secs
        )));
    }

    let debate: Vec<MessageEntity> = store
        .list_messages(session_id)
        .await?
        .into_iter()
        .filter(|message| message.kind == MessageKind::Debate)
        .collect();
    let last_speaker = debate.last().map(|message| message.sender_id.clone());
    let lease = settings.claim_lease;
    let policy = settings.trigger_policy;

    let step = run_transaction(&store, &state.config().store.retry, move |tx| {
        let caller = identity.user_id.clone();
        let last_speaker = last_speaker.clone();
        Box::pin(async move {
            let mut session = tx
                .session(session_id)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("session `{session_id}`")))?;

            let phase = SessionPhase::from_record(&session.evaluation);
            let event = match &phase {
                SessionPhase::Complete => {
                    return Ok(ClaimStep::Finished(EvaluationOutcome::AlreadyHandled));
                }
                SessionPhase::Evaluating(claim) if !claim.is_expired(now, lease) => {
                    return Ok(ClaimStep::Finished(EvaluationOutcome::AlreadyHandled));
                }
                SessionPhase::Evaluating(_) => SessionEvent::Reclaim(Claim::new(&caller, now)),
                SessionPhase::Active if last_speaker.is_none() => SessionEvent::CompleteEmpty,
                SessionPhase::Active => {
                    if policy == TriggerPolicy::LastSpeaker
                        && last_speaker.as_deref() != Some(caller.as_str())
                    {
                        return Ok(ClaimStep::Finished(EvaluationOutcome::Deferred));
                    }
                    SessionEvent::Claim(Claim::new(&caller, now))
                }
            };

            let next = phase.apply(event)?;
            next.write_to(&mut session.evaluation);

            let Some(claim) = next.claim().cloned() else {
                session.is_active = false;
                session.evaluation.completed_at = Some(now);
                for participant in session.participants.clone() {
                    session_service::detach_user(tx, &participant, session_id, now).await?;
                }
                tx.put(Document::Session(session));
                return Ok::<_, ServiceError>(ClaimStep::Finished(
                    EvaluationOutcome::CompletedWithoutDebate,
                ));
            };
            tx.put(Document::Session(session.clone()));
            Ok(ClaimStep::Run { claim, session })
        })
    })
    .await?;

    let (claim, session) = match step {
        ClaimStep::Finished(outcome) => {
            debug!(%session_id, user_id = %identity.user_id, ?outcome, "evaluation not run");
            if outcome == EvaluationOutcome::CompletedWithoutDebate {
                info!(%session_id, "session closed without debate messages");
            }
            return Ok(outcome);
        }
        ClaimStep::Run { claim, session } => (claim, session),
    };
    info!(%session_id, claim_id = %claim.id, user_id = %identity.user_id, "evaluation claimed");

    let sheet = match score(state, identity, &session, &debate).await {
        Ok(sheet) => sheet,
        Err(err) => {
            warn!(%session_id, error = %err, "scoring failed; releasing claim");
            release_claim(state, session_id, claim.id).await;
            return Err(ServiceError::UpstreamEvaluationFailure {
                retryable: err.is_retryable(),
                message: err.to_string(),
            });
        }
    };

    match complete(state, &session, claim.id, sheet).await {
        Ok(report) => {
            info!(
                %session_id,
                proponent_rating = report.participants[0].rating_after,
                opponent_rating = report.participants[1].rating_after,
                "evaluation applied"
            );
            Ok(EvaluationOutcome::Evaluated(report))
        }
        Err(ServiceError::AlreadyCompleted) => {
            debug!(%session_id, claim_id = %claim.id, "claim lost before completion");
            Ok(EvaluationOutcome::AlreadyHandled)
        }
        Err(err) => Err(err),
    }
}

async fn score(
    state: &SharedState,
    identity: &Identity,
    session: &SessionEntity,
    debate: &[MessageEntity],
) -> Result<ScoreSheet, ScoringError> {
    let debaters = [Position::Proponent, Position::Opponent].map(|position| DebaterRef {
        user_id: session.participants[position.index()].clone(),
        name: session.participant_names[position.index()].clone(),
        position,
    });
    let opponent_id = session
        .participants
        .iter()
        .find(|participant| **participant != identity.user_id)
        .cloned()
        .unwrap_or_default();
    let request = EvaluationRequest {
        session_id: session.id,
        topic: session.topic.clone(),
        transcript: format_transcript(session, debate),
        self_name: identity.display_name.clone(),
        opponent_id,
        debaters,
    };

    let scoring = state.scoring();
    let limit = state.config().evaluation.scoring_timeout;
    let sheet = timeout(limit, scoring.evaluate(request))
        .await
        .map_err(|_| ScoringError::Transient(format!("no answer within {}s", limit.as_secs())))??;

    for participant in &session.participants {
        if sheet.for_user(participant).is_none() {
            return Err(ScoringError::Transient(format!(
                "scorecard for `{participant}` missing from the response"
            )));
        }
    }
    Ok(sheet)
}

/// Put the session back to `Active` so the evaluation can be triggered again.
/// A claim that was already replaced or completed is left alone.
async fn release_claim(state: &SharedState, session_id: Uuid, claim_id: Uuid) {
    let Ok(store) = state.require_store().await else {
        return;
    };
    let released = run_transaction(&store, &state.config().store.retry, move |tx| {
        Box::pin(async move {
            let Some(mut session) = tx.session(session_id).await? else {
                return Ok::<_, ServiceError>(false);
            };
            let phase = SessionPhase::from_record(&session.evaluation);
            let Ok(next) = phase.apply(SessionEvent::Release { claim_id }) else {
                return Ok(false);
            };
            next.write_to(&mut session.evaluation);
            tx.put(Document::Session(session));
            Ok(true)
        })
    })
    .await;

    match released {
        Ok(true) => debug!(%session_id, %claim_id, "claim released"),
        Ok(false) => debug!(%session_id, %claim_id, "claim no longer held"),
        Err(err) => warn!(%session_id, %claim_id, error = %err, "failed to release claim"),
    }
}

async fn complete(
    state: &SharedState,
    claimed: &SessionEntity,
    claim_id: Uuid,
    sheet: ScoreSheet,
) -> Result<EvaluationReport, ServiceError> {
    let store = state.require_store().await?;
    let now = state.now();
    let rubric = state.config().scoring.clone();
    let k_factor = state.config().rating.k_factor;
    let session_id = claimed.id;

    let cards: [DebaterScore; 2] = [0, 1].map(|index| {
        let user_id = &claimed.participants[index];
        sheet.for_user(user_id).cloned().unwrap_or_else(|| DebaterScore {
            user_id: user_id.clone(),
            categories: Default::default(),
        })
    });
    let totals = [0, 1].map(|index| rubric.weighted_total(&cards[index].categories));
    let result = MatchResult::from_totals(totals[0], totals[1]);

    run_transaction(&store, &state.config().store.retry, move |tx| {
        let rubric = rubric.clone();
        let cards = cards.clone();
        Box::pin(async move {
            let mut session = tx
                .session(session_id)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("session `{session_id}`")))?;
            let phase = SessionPhase::from_record(&session.evaluation);
            let next = phase
                .apply(SessionEvent::Complete { claim_id })
                .map_err(|_| ServiceError::AlreadyCompleted)?;

            let mut users = Vec::with_capacity(2);
            for participant in &session.participants {
                let user = tx.user(participant).await?.ok_or_else(|| {
                    ServiceError::NotFound(format!("user `{participant}`"))
                })?;
                users.push(user);
            }
            let before = [users[0].rating, users[1].rating];
            let after = rating::update_pair(before, result, k_factor);

            for (index, mut user) in users.into_iter().enumerate() {
                user.rating = after[index];
                if user.session_id == Some(session_id) {
                    user.session_id = None;
                }
                user.updated_at = now;
                tx.put(Document::User(user));
            }

            let participants = [Position::Proponent, Position::Opponent].map(|position| {
                let index = position.index();
                ParticipantResult {
                    user_id: session.participants[index].clone(),
                    name: session.participant_names[index].clone(),
                    position,
                    total: totals[index],
                    result: if index == 0 { result } else { result.inverse() },
                    rating_before: before[index],
                    rating_after: after[index],
                }
            });

            for participant in &participants {
                tx.append(system_message(
                    session_id,
                    format_scorecard(&rubric, participant, &cards[participant.position.index()]),
                    Some(participant.position),
                ));
            }
            tx.append(system_message(
                session_id,
                format_announcement(&rubric, &participants),
                None,
            ));

            next.write_to(&mut session.evaluation);
            session.is_active = false;
            session.evaluation.completed_at = Some(now);
            session.evaluation.outcome = Some(EvaluationOutcomeEntity {
                totals,
                rating_before: before,
                rating_after: after,
            });
            tx.put(Document::Session(session));

            Ok::<_, ServiceError>(EvaluationReport {
                session_id,
                participants,
            })
        })
    })
    .await
}

fn system_message(session_id: Uuid, text: String, position: Option<Position>) -> MessageDraft {
    MessageDraft {
        session_id,
        sender_id: SYSTEM_SENDER.to_owned(),
        sender_name: SYSTEM_SENDER.to_owned(),
        text,
        kind: MessageKind::System,
        position,
    }
}

/// One line per debate message: `"{name} ({Proponent|Opponent}): {text}"`.
///
/// Names come from the session so a later profile rename does not change the
/// transcript. Messages from non-participants are skipped.
pub fn format_transcript(session: &SessionEntity, messages: &[MessageEntity]) -> String {
    messages
        .iter()
        .filter(|message| message.kind == MessageKind::Debate)
        .filter_map(|message| {
            let position = session.position_of(&message.sender_id)?;
            Some(format!(
                "{} ({}): {}",
                session.participant_names[position.index()],
                position,
                message.text
            ))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_scorecard(rubric: &ScoringRubric, participant: &ParticipantResult, card: &DebaterScore) -> String {
    let mut text = format!("Scorecard: {} ({})", participant.name, participant.position);
    for category in &rubric.categories {
        let entry = card.categories.get(&category.key);
        let raw = entry.map_or(0, |score| score.score.min(rubric.max_category_score));
        let _ = write!(
            text,
            "\n- {}: {}/{} (x{})",
            category.label, raw, rubric.max_category_score, category.weight
        );
        if let Some(evidence) = entry.and_then(|score| score.evidence.as_deref()) {
            let _ = write!(text, " \"{evidence}\"");
        }
    }
    let _ = write!(text, "\nWeighted total: {}/{}", participant.total, rubric.max_total());
    text
}

fn format_announcement(rubric: &ScoringRubric, participants: &[ParticipantResult; 2]) -> String {
    let mut text = String::from("Debate evaluated.");
    for participant in participants {
        let delta = participant.rating_after - participant.rating_before;
        let _ = write!(
            text,
            "\n{} ({}): {} with {}/{}, rating {} -> {} ({:+})",
            participant.name,
            participant.position,
            participant.result.label(),
            participant.total,
            rubric.max_total(),
            participant.rating_before,
            participant.rating_after,
            delta
        );
    }
    text
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;
    use crate::dao::models::EvaluationRecordEntity;
    use crate::services::scoring::CategoryScore;

    fn session() -> SessionEntity {
        SessionEntity {
            id: Uuid::new_v4(),
            participants: ["alice".into(), "bob".into()],
            participant_names: ["Alice".into(), "Bob".into()],
            topic: "Cities should ban cars".into(),
            is_active: true,
            start_time: SystemTime::UNIX_EPOCH,
            current_turn: Some("alice".into()),
            evaluation: EvaluationRecordEntity::default(),
        }
    }

    fn message(session: &SessionEntity, seq: u64, sender: &str, text: &str, kind: MessageKind) -> MessageEntity {
        MessageEntity {
            id: Uuid::new_v4(),
            session_id: session.id,
            seq,
            sender_id: sender.into(),
            sender_name: sender.into(),
            text: text.into(),
            kind,
            position: session.position_of(sender),
            timestamp: SystemTime::UNIX_EPOCH + Duration::from_secs(seq),
        }
    }

    #[test]
    fn transcript_lines_name_positions() {
        let session = session();
        let log = vec![
            message(&session, 1, "alice", "Cars pollute.", MessageKind::Debate),
            message(&session, 2, "bob", "brb", MessageKind::Meta),
            message(&session, 3, "bob", "Buses need roads too.", MessageKind::Debate),
            message(&session, 4, "mallory", "spam", MessageKind::Debate),
        ];
        assert_eq!(
            format_transcript(&session, &log),
            "Alice (Proponent): Cars pollute.\nBob (Opponent): Buses need roads too."
        );
    }

    #[test]
    fn scorecard_lists_every_category() {
        let rubric = ScoringRubric::default();
        let mut card = DebaterScore {
            user_id: "alice".into(),
            categories: Default::default(),
        };
        card.categories.insert(
            "logic".into(),
            CategoryScore {
                score: 4,
                evidence: Some("Cars pollute.".into()),
            },
        );
        let participant = ParticipantResult {
            user_id: "alice".into(),
            name: "Alice".into(),
            position: Position::Proponent,
            total: 12,
            result: MatchResult::Win,
            rating_before: 1500,
            rating_after: 1516,
        };

        let text = format_scorecard(&rubric, &participant, &card);
        assert!(text.starts_with("Scorecard: Alice (Proponent)"));
        assert!(text.contains("- Logical consistency: 4/5 (x3) \"Cars pollute.\""));
        assert!(text.contains("- Manners: 0/5 (x1)"));
        assert!(text.ends_with("Weighted total: 12/60"));
    }

    #[test]
    fn announcement_shows_signed_deltas() {
        let rubric = ScoringRubric::default();
        let participants = [
            ParticipantResult {
                user_id: "alice".into(),
                name: "Alice".into(),
                position: Position::Proponent,
                total: 40,
                result: MatchResult::Win,
                rating_before: 1500,
                rating_after: 1516,
            },
            ParticipantResult {
                user_id: "bob".into(),
                name: "Bob".into(),
                position: Position::Opponent,
                total: 30,
                result: MatchResult::Loss,
                rating_before: 1500,
                rating_after: 1484,
            },
        ];
        let text = format_announcement(&rubric, &participants);
        assert!(text.contains("Alice (Proponent): win with 40/60, rating 1500 -> 1516 (+16)"));
        assert!(text.contains("Bob (Opponent): loss with 30/60, rating 1500 -> 1484 (-16)"));
    }
}
