mod common;

use std::time::Duration;

use common::{Harness, ScriptedScoring, scorecard_positions, system_messages, user};
use debate_back::{
    config::{AppConfig, TriggerPolicy},
    dao::{
        models::{EvaluationClaimEntity, Position, SessionPhaseEntity},
        store::{DebateStore, DocKey, Document, WriteBatch, WriteOp},
    },
    error::ServiceError,
    identity::Identity,
    services::{
        evaluation::{self, EvaluationOutcome},
        rating::MatchResult,
        session_service::{self, LeaveOutcome},
    },
    state::state_machine::SessionPhase,
};
use uuid::Uuid;

async fn debated(harness: &Harness) -> (Identity, Identity, Uuid) {
    let (alice, bob) = (user("alice"), user("bob"));
    let session_id = harness.pair(&alice, &bob, "Remote work").await;
    harness.say(&alice, session_id, "Remote work saves commuting time.").await;
    harness.say(&bob, session_id, "Offices build team culture.").await;
    (alice, bob, session_id)
}

#[tokio::test]
async fn evaluation_waits_for_the_deadline() {
    let harness = Harness::new().await;
    let (alice, _, session_id) = debated(&harness).await;

    let err = evaluation::trigger_evaluation(&harness.state, &alice, session_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));
    assert_eq!(harness.scoring.calls(), 0);
}

#[tokio::test]
async fn outsiders_cannot_trigger() {
    let harness = Harness::new().await;
    let (_, _, session_id) = debated(&harness).await;
    harness.past_deadline();

    let err = evaluation::trigger_evaluation(&harness.state, &user("mallory"), session_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));
}

#[tokio::test]
async fn empty_debate_completes_without_scoring() {
    let harness = Harness::new().await;
    let (alice, bob) = (user("alice"), user("bob"));
    let session_id = harness.pair(&alice, &bob, "Silence").await;
    harness.say_meta(&alice, session_id, "hello?").await;
    harness.past_deadline();

    let outcome = evaluation::trigger_evaluation(&harness.state, &alice, session_id)
        .await
        .unwrap();
    assert_eq!(outcome, EvaluationOutcome::CompletedWithoutDebate);
    assert_eq!(harness.scoring.calls(), 0);

    let again = evaluation::trigger_evaluation(&harness.state, &bob, session_id)
        .await
        .unwrap();
    assert_eq!(again, EvaluationOutcome::AlreadyHandled);

    assert_eq!(harness.profile(&alice).await.rating, 1500);
    assert_eq!(harness.profile(&bob).await.session_id, None);
    assert!(system_messages(&harness.log(&alice, session_id).await).is_empty());
}

#[tokio::test]
async fn scored_debate_updates_ratings_once() {
    let harness = Harness::new().await;
    let (alice, bob, session_id) = debated(&harness).await;
    harness.past_deadline();

    let EvaluationOutcome::Evaluated(report) =
        evaluation::trigger_evaluation(&harness.state, &bob, session_id)
            .await
            .unwrap()
    else {
        panic!("expected an evaluation");
    };

    let [proponent, opponent] = &report.participants;
    assert_eq!(proponent.user_id, "alice");
    assert_eq!(proponent.total, 48);
    assert_eq!(opponent.total, 36);
    assert_eq!(proponent.result, MatchResult::Win);
    assert_eq!(opponent.result, MatchResult::Loss);
    assert_eq!((proponent.rating_after, opponent.rating_after), (1516, 1484));

    let alice_profile = harness.profile(&alice).await;
    let bob_profile = harness.profile(&bob).await;
    assert_eq!(alice_profile.rating, 1516);
    assert_eq!(bob_profile.rating, 1484);
    assert_eq!(alice_profile.session_id, None);
    assert_eq!(bob_profile.session_id, None);

    let log = harness.log(&alice, session_id).await;
    assert_eq!(
        scorecard_positions(&log),
        vec![Some(Position::Proponent), Some(Position::Opponent), None]
    );
    assert!(system_messages(&log)[2].text.contains("1500 -> 1516 (+16)"));

    let view = session_service::get_session(&harness.state, &alice, session_id)
        .await
        .unwrap();
    assert!(!view.session.is_active);
    assert_eq!(view.phase, SessionPhase::Complete);

    let again = evaluation::trigger_evaluation(&harness.state, &alice, session_id)
        .await
        .unwrap();
    assert_eq!(again, EvaluationOutcome::AlreadyHandled);
    assert_eq!(harness.profile(&alice).await.rating, 1516);
    assert_eq!(harness.scoring.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_triggers_score_exactly_once() {
    let harness = Harness::build(
        AppConfig::default(),
        ScriptedScoring::new(2, 5).with_delay(Duration::from_millis(50)),
    )
    .await;
    let (alice, bob, session_id) = debated(&harness).await;
    harness.past_deadline();

    let (first, second) = tokio::join!(
        evaluation::trigger_evaluation(&harness.state, &alice, session_id),
        evaluation::trigger_evaluation(&harness.state, &bob, session_id),
    );
    let outcomes = [first.unwrap(), second.unwrap()];

    let evaluated = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, EvaluationOutcome::Evaluated(_)))
        .count();
    assert_eq!(evaluated, 1);
    assert!(outcomes.contains(&EvaluationOutcome::AlreadyHandled));
    assert_eq!(harness.scoring.calls(), 1);

    assert_eq!(harness.profile(&alice).await.rating, 1484);
    assert_eq!(harness.profile(&bob).await.rating, 1516);
    assert_eq!(system_messages(&harness.log(&bob, session_id).await).len(), 3);
}

#[tokio::test]
async fn last_speaker_policy_defers_to_the_other_participant() {
    let mut config = AppConfig::default();
    config.evaluation.trigger_policy = TriggerPolicy::LastSpeaker;
    let harness = Harness::build(config, ScriptedScoring::new(3, 3)).await;
    let (alice, bob, session_id) = debated(&harness).await;
    harness.past_deadline();

    let deferred = evaluation::trigger_evaluation(&harness.state, &alice, session_id)
        .await
        .unwrap();
    assert_eq!(deferred, EvaluationOutcome::Deferred);
    assert_eq!(harness.scoring.calls(), 0);

    let EvaluationOutcome::Evaluated(report) =
        evaluation::trigger_evaluation(&harness.state, &bob, session_id)
            .await
            .unwrap()
    else {
        panic!("the last speaker runs the evaluation");
    };
    assert_eq!(report.participants[0].result, MatchResult::Draw);
    assert_eq!(report.participants[0].rating_after, 1500);
    assert_eq!(report.participants[1].rating_after, 1500);
}

#[tokio::test]
async fn scoring_failure_releases_the_claim() {
    let harness = Harness::build(AppConfig::default(), ScriptedScoring::new(4, 3).failing(1)).await;
    let (alice, _, session_id) = debated(&harness).await;
    harness.past_deadline();

    let err = evaluation::trigger_evaluation(&harness.state, &alice, session_id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::UpstreamEvaluationFailure {
            retryable: true,
            ..
        }
    ));

    let view = session_service::get_session(&harness.state, &alice, session_id)
        .await
        .unwrap();
    assert_eq!(view.phase, SessionPhase::Active);
    assert!(view.session.is_active);
    assert_eq!(harness.profile(&alice).await.rating, 1500);
    assert!(system_messages(&harness.log(&alice, session_id).await).is_empty());

    let outcome = evaluation::trigger_evaluation(&harness.state, &alice, session_id)
        .await
        .unwrap();
    assert!(matches!(outcome, EvaluationOutcome::Evaluated(_)));
    assert_eq!(harness.scoring.calls(), 2);
}

#[tokio::test]
async fn leaving_does_not_cancel_the_evaluation() {
    let harness = Harness::new().await;
    let (alice, bob, session_id) = debated(&harness).await;

    let left = session_service::leave_session(&harness.state, &alice, session_id)
        .await
        .unwrap();
    assert_eq!(left, LeaveOutcome::Left);
    assert_eq!(harness.profile(&alice).await.session_id, None);

    harness.past_deadline();
    let outcome = evaluation::trigger_evaluation(&harness.state, &bob, session_id)
        .await
        .unwrap();
    assert!(matches!(outcome, EvaluationOutcome::Evaluated(_)));
    assert_eq!(harness.profile(&alice).await.rating, 1516);
    assert_eq!(harness.profile(&bob).await.rating, 1484);
    assert_eq!(harness.profile(&bob).await.session_id, None);

    let again = session_service::leave_session(&harness.state, &alice, session_id)
        .await
        .unwrap();
    assert_eq!(again, LeaveOutcome::AlreadyInactive);
    assert_eq!(
        evaluation::trigger_evaluation(&harness.state, &alice, session_id)
            .await
            .unwrap(),
        EvaluationOutcome::AlreadyHandled
    );
}

#[tokio::test]
async fn expired_claim_can_be_taken_over() {
    let harness = Harness::new().await;
    let (alice, bob, session_id) = debated(&harness).await;
    harness.past_deadline();

    // Simulate a participant that claimed the evaluation and vanished.
    let Some(stored) = harness.store.get(DocKey::Session(session_id)).await.unwrap() else {
        panic!("session exists");
    };
    let Document::Session(mut session) = stored.value else {
        panic!("session document");
    };
    session.evaluation.phase = SessionPhaseEntity::Evaluating;
    session.evaluation.claim = Some(EvaluationClaimEntity {
        claim_id: Uuid::new_v4(),
        claimed_by: alice.user_id.clone(),
        claimed_at: harness.state.now(),
    });
    harness
        .store
        .commit(WriteBatch {
            preconditions: Vec::new(),
            writes: vec![WriteOp::Put(Document::Session(session))],
        })
        .await
        .unwrap();

    let blocked = evaluation::trigger_evaluation(&harness.state, &bob, session_id)
        .await
        .unwrap();
    assert_eq!(blocked, EvaluationOutcome::AlreadyHandled);
    assert_eq!(harness.scoring.calls(), 0);

    harness.clock.advance(Duration::from_secs(601));
    let outcome = evaluation::trigger_evaluation(&harness.state, &bob, session_id)
        .await
        .unwrap();
    assert!(matches!(outcome, EvaluationOutcome::Evaluated(_)));
    assert_eq!(harness.scoring.calls(), 1);
    assert_eq!(system_messages(&harness.log(&bob, session_id).await).len(), 3);
}
