#![allow(dead_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use debate_back::{
    clock::ManualClock,
    config::AppConfig,
    dao::{
        models::{MessageKind, MessageEntity, Position, UserEntity},
        store::{DebateStore, memory::MemoryStore, transaction::RetryPolicy},
    },
    identity::Identity,
    services::{
        matchmaker::{self, EnqueueOutcome, EnqueueRequest},
        scoring::{
            CategoryScore, DebaterScore, EvaluationRequest, ScoreSheet, ScoringError,
            ScoringService,
        },
        session_service::{self, SubmitMessage},
        user_service,
    },
    state::{AppState, SharedState},
};
use futures::future::BoxFuture;
use uuid::Uuid;

pub const DEBATE: Duration = Duration::from_secs(300);

/// Scoring double giving every category of a position the same raw score.
pub struct ScriptedScoring {
    raw: [u32; 2],
    calls: AtomicUsize,
    failures_left: AtomicUsize,
    delay: Duration,
}

impl ScriptedScoring {
    pub fn new(proponent: u32, opponent: u32) -> Self {
        Self {
            raw: [proponent, opponent],
            calls: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(self, times: usize) -> Self {
        self.failures_left.store(times, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ScoringService for ScriptedScoring {
    fn evaluate(
        &self,
        request: EvaluationRequest,
    ) -> BoxFuture<'static, Result<ScoreSheet, ScoringError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        let raw = self.raw;
        let delay = self.delay;

        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if fail {
                return Err(ScoringError::Transient("scripted outage".into()));
            }
            let categories = ["logic", "evidence", "rebuttal", "clarity", "expression", "manners"];
            let debaters = request
                .debaters
                .iter()
                .map(|debater| DebaterScore {
                    user_id: debater.user_id.clone(),
                    categories: categories
                        .iter()
                        .map(|key| {
                            (
                                (*key).to_owned(),
                                CategoryScore {
                                    score: raw[debater.position.index()],
                                    evidence: None,
                                },
                            )
                        })
                        .collect(),
                })
                .collect();
            Ok(ScoreSheet { debaters })
        })
    }
}

pub struct Harness {
    pub state: SharedState,
    pub store: Arc<dyn DebateStore>,
    pub clock: Arc<ManualClock>,
    pub scoring: Arc<ScriptedScoring>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::build(AppConfig::default(), ScriptedScoring::new(4, 3)).await
    }

    pub async fn build(mut config: AppConfig, scoring: ScriptedScoring) -> Self {
        config.store.retry = RetryPolicy {
            max_attempts: 200,
            initial_delay_ms: 1,
            max_delay_ms: 10,
        };
        let clock = Arc::new(ManualClock::starting_now());
        let scoring = Arc::new(scoring);
        let store: Arc<dyn DebateStore> = Arc::new(MemoryStore::with_clock(clock.clone()));
        let state = AppState::with_clock(config, scoring.clone(), clock.clone());
        state.install_store(store.clone()).await;
        Self {
            state,
            store,
            clock,
            scoring,
        }
    }

    pub fn past_deadline(&self) {
        self.clock.advance(DEBATE + Duration::from_secs(1));
    }

    pub async fn enqueue(&self, user: &Identity, topic: &str) -> EnqueueOutcome {
        matchmaker::enqueue(
            &self.state,
            user,
            EnqueueRequest {
                topic: topic.into(),
                room_id: None,
            },
        )
        .await
        .unwrap()
    }

    /// Pair `a` (proponent) with `b` (opponent) and return the session id.
    pub async fn pair(&self, a: &Identity, b: &Identity, topic: &str) -> Uuid {
        assert!(matches!(self.enqueue(a, topic).await, EnqueueOutcome::Waiting { .. }));
        match self.enqueue(b, topic).await {
            EnqueueOutcome::Matched { session_id } => session_id,
            other => panic!("expected a match, got {other:?}"),
        }
    }

    pub async fn say(&self, user: &Identity, session_id: Uuid, text: &str) -> MessageEntity {
        self.submit(user, session_id, text, MessageKind::Debate).await
    }

    pub async fn say_meta(&self, user: &Identity, session_id: Uuid, text: &str) -> MessageEntity {
        self.submit(user, session_id, text, MessageKind::Meta).await
    }

    async fn submit(
        &self,
        user: &Identity,
        session_id: Uuid,
        text: &str,
        kind: MessageKind,
    ) -> MessageEntity {
        session_service::submit_message(
            &self.state,
            user,
            session_id,
            SubmitMessage {
                text: text.into(),
                kind,
            },
        )
        .await
        .unwrap()
    }

    pub async fn profile(&self, user: &Identity) -> UserEntity {
        user_service::get_profile(&self.state, user).await.unwrap()
    }

    pub async fn log(&self, user: &Identity, session_id: Uuid) -> Vec<MessageEntity> {
        session_service::list_messages(&self.state, user, session_id)
            .await
            .unwrap()
    }
}

pub fn user(id: &str) -> Identity {
    let mut name = id.to_owned();
    if let Some(first) = name.get_mut(0..1) {
        first.make_ascii_uppercase();
    }
    Identity::new(id, Some(&name)).unwrap()
}

pub fn system_messages(log: &[MessageEntity]) -> Vec<&MessageEntity> {
    log.iter().filter(|message| message.kind == MessageKind::System).collect()
}

pub fn scorecard_positions(log: &[MessageEntity]) -> Vec<Option<Position>> {
    system_messages(log).iter().map(|message| message.position).collect()
}
