mod common;

use std::collections::{HashMap, HashSet};

use common::{Harness, user};
use debate_back::{
    dao::models::Position,
    error::ServiceError,
    services::{
        matchmaker::{self, EnqueueOutcome, EnqueueRequest},
        session_service,
    },
};

#[tokio::test]
async fn waiting_user_becomes_proponent() {
    let harness = Harness::new().await;
    let (alice, bob) = (user("alice"), user("bob"));

    let session_id = harness.pair(&alice, &bob, "Nuclear power").await;

    let view = session_service::get_session(&harness.state, &alice, session_id)
        .await
        .unwrap();
    assert_eq!(view.position, Position::Proponent);
    assert_eq!(view.session.participants, ["alice".to_string(), "bob".to_string()]);
    assert_eq!(view.session.participant_names, ["Alice".to_string(), "Bob".to_string()]);
    assert!(view.session.is_active);
    assert_eq!(view.session.current_turn.as_deref(), Some("alice"));

    assert_eq!(harness.profile(&alice).await.session_id, Some(session_id));
    assert_eq!(harness.profile(&bob).await.session_id, Some(session_id));
    assert!(matchmaker::list_rooms(&harness.state, &user("carol")).await.unwrap().is_empty());
}

#[tokio::test]
async fn topics_must_match_exactly() {
    let harness = Harness::new().await;

    let first = harness.enqueue(&user("alice"), "Nuclear power").await;
    let second = harness.enqueue(&user("bob"), "nuclear power").await;

    assert!(matches!(first, EnqueueOutcome::Waiting { .. }));
    assert!(matches!(second, EnqueueOutcome::Waiting { .. }));
    assert_eq!(matchmaker::list_rooms(&harness.state, &user("carol")).await.unwrap().len(), 2);
}

#[tokio::test]
async fn topic_is_trimmed_before_matching() {
    let harness = Harness::new().await;
    harness.enqueue(&user("alice"), "  Tax reform ").await;
    let outcome = harness.enqueue(&user("bob"), "Tax reform").await;
    assert!(matches!(outcome, EnqueueOutcome::Matched { .. }));
}

#[tokio::test]
async fn blank_topic_is_rejected() {
    let harness = Harness::new().await;
    let err = matchmaker::enqueue(
        &harness.state,
        &user("alice"),
        EnqueueRequest {
            topic: "   ".into(),
            room_id: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidArgument(_)));
}

#[tokio::test]
async fn room_join_checks_topic_and_owner() {
    let harness = Harness::new().await;
    let alice = user("alice");
    let EnqueueOutcome::Waiting { room_id } = harness.enqueue(&alice, "AI art").await else {
        panic!("alice should wait");
    };

    let mismatch = matchmaker::enqueue(
        &harness.state,
        &user("bob"),
        EnqueueRequest {
            topic: "Space travel".into(),
            room_id: Some(room_id),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(mismatch, ServiceError::NotFound(_)));

    let own = matchmaker::enqueue(
        &harness.state,
        &alice,
        EnqueueRequest {
            topic: "AI art".into(),
            room_id: Some(room_id),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(own, ServiceError::InvalidArgument(_)));

    let joined = matchmaker::enqueue(
        &harness.state,
        &user("bob"),
        EnqueueRequest {
            topic: "AI art".into(),
            room_id: Some(room_id),
        },
    )
    .await
    .unwrap();
    assert!(matches!(joined, EnqueueOutcome::Matched { .. }));
}

#[tokio::test]
async fn re_enqueue_replaces_previous_room() {
    let harness = Harness::new().await;
    let alice = user("alice");
    harness.enqueue(&alice, "Cats").await;
    let EnqueueOutcome::Waiting { room_id } = harness.enqueue(&alice, "Dogs").await else {
        panic!("alice should wait");
    };

    let rooms = matchmaker::list_rooms(&harness.state, &user("bob")).await.unwrap();
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].id, room_id);
    assert_eq!(rooms[0].topic, "Dogs");

    // The caller never sees their own room.
    assert!(matchmaker::list_rooms(&harness.state, &alice).await.unwrap().is_empty());
}

#[tokio::test]
async fn users_in_an_active_session_cannot_enqueue() {
    let harness = Harness::new().await;
    let (alice, bob) = (user("alice"), user("bob"));
    harness.pair(&alice, &bob, "Chess").await;

    let err = matchmaker::enqueue(
        &harness.state,
        &alice,
        EnqueueRequest {
            topic: "Chess".into(),
            room_id: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));
}

#[tokio::test]
async fn leaving_frees_the_user_for_a_new_match() {
    let harness = Harness::new().await;
    let (alice, bob, carol) = (user("alice"), user("bob"), user("carol"));
    let session_id = harness.pair(&alice, &bob, "Chess").await;

    session_service::leave_session(&harness.state, &alice, session_id)
        .await
        .unwrap();

    let second = harness.pair(&alice, &carol, "Go").await;
    assert_ne!(second, session_id);
}

#[tokio::test]
async fn cancel_waiting_removes_the_room() {
    let harness = Harness::new().await;
    let alice = user("alice");
    harness.enqueue(&alice, "Chess").await;

    assert!(matchmaker::cancel_waiting(&harness.state, &alice).await.unwrap());
    assert!(!matchmaker::cancel_waiting(&harness.state, &alice).await.unwrap());
    assert!(matchmaker::list_rooms(&harness.state, &user("bob")).await.unwrap().is_empty());

    let outcome = harness.enqueue(&user("bob"), "Chess").await;
    assert!(matches!(outcome, EnqueueOutcome::Waiting { .. }));
}

#[tokio::test]
async fn first_waiting_user_is_matched_first() {
    let harness = Harness::new().await;
    harness.enqueue(&user("alice"), "Chess").await;
    harness.clock.advance(std::time::Duration::from_secs(1));
    harness.enqueue(&user("bob"), "Checkers").await;
    harness.clock.advance(std::time::Duration::from_secs(1));

    let carol = user("carol");
    let EnqueueOutcome::Matched { session_id } = harness.enqueue(&carol, "Chess").await else {
        panic!("carol should match alice");
    };
    let view = session_service::get_session(&harness.state, &carol, session_id)
        .await
        .unwrap();
    assert_eq!(view.session.participants[0], "alice");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_enqueues_pair_everyone_exactly_once() {
    let harness = Harness::new().await;
    let users: Vec<_> = (0..12).map(|index| user(&format!("user{index}"))).collect();

    let handles: Vec<_> = users
        .iter()
        .cloned()
        .map(|identity| {
            let state = harness.state.clone();
            tokio::spawn(async move {
                matchmaker::enqueue(
                    &state,
                    &identity,
                    EnqueueRequest {
                        topic: "Crowded topic".into(),
                        room_id: None,
                    },
                )
                .await
            })
        })
        .collect();

    let mut matched = 0;
    for handle in handles {
        if let EnqueueOutcome::Matched { .. } = handle.await.unwrap().unwrap() {
            matched += 1;
        }
    }
    assert_eq!(matched, 6);

    let mut members: HashMap<_, Vec<String>> = HashMap::new();
    for identity in &users {
        let profile = harness.profile(identity).await;
        let session_id = profile.session_id.expect("every user is paired");
        members.entry(session_id).or_default().push(profile.id);
    }
    assert_eq!(members.len(), 6);

    for (session_id, ids) in members {
        let view = session_service::get_session(&harness.state, &user(&ids[0]), session_id)
            .await
            .unwrap();
        let participants: HashSet<_> = view.session.participants.iter().cloned().collect();
        assert_eq!(participants.len(), 2, "participants must be distinct");
        assert_eq!(participants, ids.into_iter().collect::<HashSet<_>>());
    }

    assert!(
        matchmaker::list_rooms(&harness.state, &user("observer"))
            .await
            .unwrap()
            .is_empty()
    );
}
