mod common;

use common::{Harness, user};
use debate_back::{
    dao::models::{MessageKind, Position},
    error::ServiceError,
    identity::Identity,
    services::session_service::{self, SubmitMessage},
};
use uuid::Uuid;

async fn submit(
    harness: &Harness,
    author: &Identity,
    session_id: Uuid,
    text: String,
    kind: MessageKind,
) -> Result<(), ServiceError> {
    session_service::submit_message(&harness.state, author, session_id, SubmitMessage { text, kind })
        .await
        .map(|_| ())
}

#[tokio::test]
async fn debate_budget_rejects_the_overflowing_message() {
    let harness = Harness::new().await;
    let (alice, bob) = (user("alice"), user("bob"));
    let session_id = harness.pair(&alice, &bob, "Budgets").await;

    harness.say(&alice, session_id, &"a".repeat(600)).await;
    let err = submit(&harness, &alice, session_id, "b".repeat(401), MessageKind::Debate)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidArgument(message) if message.contains("400 characters left")));

    // The budget is per user.
    submit(&harness, &bob, session_id, "c".repeat(1000), MessageKind::Debate)
        .await
        .unwrap();
    // Chat messages do not count.
    submit(&harness, &alice, session_id, "d".repeat(500), MessageKind::Meta)
        .await
        .unwrap();
}

#[tokio::test]
async fn debate_budget_accepts_the_exact_remainder() {
    let harness = Harness::new().await;
    let (alice, bob) = (user("alice"), user("bob"));
    let session_id = harness.pair(&alice, &bob, "Budgets").await;

    harness.say(&alice, session_id, &"a".repeat(600)).await;
    harness.say(&alice, session_id, &"b".repeat(400)).await;

    let err = submit(&harness, &alice, session_id, "c".into(), MessageKind::Debate)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidArgument(_)));

    let log = harness.log(&bob, session_id).await;
    assert_eq!(log.len(), 2);
    assert!(log.windows(2).all(|pair| pair[0].seq < pair[1].seq));
    assert!(log.iter().all(|message| message.position == Some(Position::Proponent)));
}

#[tokio::test]
async fn debate_messages_are_rejected_after_the_deadline() {
    let harness = Harness::new().await;
    let (alice, bob) = (user("alice"), user("bob"));
    let session_id = harness.pair(&alice, &bob, "Deadlines").await;
    harness.say(&alice, session_id, "Opening statement.").await;

    harness.past_deadline();
    let err = submit(&harness, &bob, session_id, "Too late.".into(), MessageKind::Debate)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));
    assert_eq!(harness.log(&alice, session_id).await.len(), 1);
}

#[tokio::test]
async fn debate_messages_are_rejected_after_leave() {
    let harness = Harness::new().await;
    let (alice, bob) = (user("alice"), user("bob"));
    let session_id = harness.pair(&alice, &bob, "Leaving").await;

    session_service::leave_session(&harness.state, &bob, session_id)
        .await
        .unwrap();

    for author in [&alice, &bob] {
        let err = submit(&harness, author, session_id, "Still here?".into(), MessageKind::Debate)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }
}

#[tokio::test]
async fn outsiders_cannot_post() {
    let harness = Harness::new().await;
    let session_id = harness.pair(&user("alice"), &user("bob"), "Privacy").await;

    let err = submit(&harness, &user("mallory"), session_id, "Hi".into(), MessageKind::Debate)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));
}
