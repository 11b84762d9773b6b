//! Enhancement orchestration service.
//!
//! Ties platform detection, instruction selection, the upstream generation
//! backend, the offline fallback, and the quota ledger into the single
//! request flow both HTTP endpoints share.

use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use promptlift_core::{
    enhance_offline, system_instruction, EnhanceRequest, Enhancement, EnhancementPath,
    GenerationBackend, Platform, QuotaLedger, QuotaSnapshot, Result,
};
use promptlift_inference::StreamingGeneration;

/// Model name reported when the offline fallback produced the text.
pub const OFFLINE_MODEL_NAME: &str = "offline-fallback";

/// Model name reported when quota exhaustion produced no text at all.
pub const NO_MODEL_NAME: &str = "none";

/// One event of a streaming enhancement.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A piece of enhanced text, in order.
    Chunk(String),
    /// Terminal event after all chunks; carries the post-commit snapshot.
    Complete {
        model_used: String,
        platform: Platform,
        snapshot: QuotaSnapshot,
    },
    /// Terminal event when the daily allowance is exhausted. No chunks
    /// precede it.
    LimitReached { snapshot: QuotaSnapshot },
}

/// Stream of enhancement events.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Core enhancement service, generic over the generation backend and the
/// quota ledger.
pub struct EnhancementService<B, L> {
    backend: Arc<B>,
    ledger: Arc<L>,
}

impl<B, L> Clone for EnhancementService<B, L> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            ledger: self.ledger.clone(),
        }
    }
}

impl<B, L> EnhancementService<B, L>
where
    B: GenerationBackend + StreamingGeneration + 'static,
    L: QuotaLedger + 'static,
{
    pub fn new(backend: Arc<B>, ledger: Arc<L>) -> Self {
        Self { backend, ledger }
    }

    /// Name of the upstream model the service enhances with.
    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    fn resolve_platform(req: &EnhanceRequest) -> Platform {
        req.platform_override
            .unwrap_or_else(|| Platform::detect(&req.target_hint))
    }

    /// Run one enhancement end to end.
    ///
    /// Never fails on upstream errors: any backend failure degrades to the
    /// offline fallback. A ledger failure during commit is logged and the
    /// already-produced text is served with the pre-commit snapshot.
    pub async fn enhance(&self, req: EnhanceRequest) -> Result<Enhancement> {
        let platform = Self::resolve_platform(&req);

        self.ledger.ensure_user(&req.user_email, None).await?;
        let check = self.ledger.check_quota(&req.user_email).await?;

        if !check.allowed {
            info!(
                email = %req.user_email,
                daily_count = check.snapshot.daily_count,
                "Enhancement rejected, daily limit reached"
            );
            return Ok(Enhancement {
                text: String::new(),
                path: EnhancementPath::Fallback,
                platform,
                snapshot: check.snapshot,
            });
        }

        let system = system_instruction(platform);
        let (text, path) = match self.backend.generate_with_system(system, &req.prompt).await {
            Ok(text) => (text, EnhancementPath::Model),
            Err(e) => {
                warn!(
                    platform = %platform,
                    error = %e,
                    "Upstream generation failed, using offline fallback"
                );
                (enhance_offline(&req.prompt, platform), EnhancementPath::Fallback)
            }
        };

        let snapshot = match self
            .ledger
            .commit_usage(&req.idempotency_key, &req.user_email, platform)
            .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                // Degraded accounting: the text was produced and is served
                // regardless.
                warn!(
                    email = %req.user_email,
                    error = %e,
                    "Usage commit failed, serving enhancement with stale snapshot"
                );
                check.snapshot
            }
        };

        debug!(
            platform = %platform,
            path = ?path,
            text_len = text.len(),
            "Enhancement complete"
        );

        Ok(Enhancement {
            text,
            path,
            platform,
            snapshot,
        })
    }

    /// Run one enhancement as an event stream.
    ///
    /// Token chunks are forwarded as they arrive from the upstream model;
    /// usage is committed exactly once after the text stops flowing, with
    /// the same idempotency key as a retried non-streaming request would
    /// use. Upstream failure at any point degrades to the offline fallback
    /// delivered as a single final chunk.
    pub async fn enhance_stream(&self, req: EnhanceRequest) -> Result<EventStream> {
        let service = self.clone();
        let (tx, rx) = tokio::sync::mpsc::channel::<StreamEvent>(32);

        tokio::spawn(async move {
            service.run_stream(req, tx).await;
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn run_stream(&self, req: EnhanceRequest, tx: tokio::sync::mpsc::Sender<StreamEvent>) {
        let platform = Self::resolve_platform(&req);

        if let Err(e) = self.ledger.ensure_user(&req.user_email, None).await {
            warn!(email = %req.user_email, error = %e, "ensure_user failed in stream");
        }

        let check = match self.ledger.check_quota(&req.user_email).await {
            Ok(check) => check,
            Err(e) => {
                warn!(email = %req.user_email, error = %e, "Quota check failed in stream");
                return;
            }
        };

        if !check.allowed {
            info!(
                email = %req.user_email,
                daily_count = check.snapshot.daily_count,
                "Stream rejected, daily limit reached"
            );
            let _ = tx
                .send(StreamEvent::LimitReached {
                    snapshot: check.snapshot,
                })
                .await;
            return;
        }

        let system = system_instruction(platform);
        let mut model_used = self.backend.model_name().to_string();
        let mut upstream_failed = false;
        let mut produced_any = false;

        match self
            .backend
            .generate_with_system_stream(system, &req.prompt)
            .await
        {
            Ok(mut stream) => {
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(token) => {
                            produced_any = true;
                            if tx.send(StreamEvent::Chunk(token)).await.is_err() {
                                // Client went away; still commit below, the
                                // text was produced.
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "Upstream stream failed mid-flight");
                            upstream_failed = true;
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Upstream stream failed to start");
                upstream_failed = true;
            }
        }

        // A stream that closes without a single content token (role-only
        // deltas, then done) is an empty completion, same as the
        // non-streaming path rejects.
        if !upstream_failed && !produced_any {
            warn!("Upstream stream produced no content tokens");
            upstream_failed = true;
        }

        if upstream_failed {
            let fallback = enhance_offline(&req.prompt, platform);
            model_used = OFFLINE_MODEL_NAME.to_string();
            let _ = tx.send(StreamEvent::Chunk(fallback)).await;
        }

        let snapshot = match self
            .ledger
            .commit_usage(&req.idempotency_key, &req.user_email, platform)
            .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(
                    email = %req.user_email,
                    error = %e,
                    "Usage commit failed after stream, serving stale snapshot"
                );
                check.snapshot
            }
        };

        let _ = tx
            .send(StreamEvent::Complete {
                model_used,
                platform,
                snapshot,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use promptlift_core::defaults::FREE_DAILY_LIMIT;
    use promptlift_core::{Error, QuotaCheck, Tier};
    use promptlift_inference::MockGenerationBackend;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    // In-memory ledger honoring the QuotaLedger contract, with a
    // controllable clock for rollover tests.
    struct MemoryLedger {
        inner: Mutex<LedgerState>,
    }

    struct LedgerState {
        today: NaiveDate,
        users: HashMap<String, UserState>,
        events: HashSet<String>,
    }

    #[derive(Clone)]
    struct UserState {
        tier: Tier,
        lifetime: i64,
        daily: i64,
        last_reset: NaiveDate,
    }

    impl MemoryLedger {
        fn new() -> Self {
            Self {
                inner: Mutex::new(LedgerState {
                    today: NaiveDate::from_ymd_opt(2026, 3, 15).unwrap(),
                    users: HashMap::new(),
                    events: HashSet::new(),
                }),
            }
        }

        fn advance_day(&self) {
            let mut state = self.inner.lock().unwrap();
            state.today = state.today.succ_opt().unwrap();
        }

        fn seed(&self, email: &str, tier: Tier, daily: i64) {
            let mut state = self.inner.lock().unwrap();
            let today = state.today;
            state.users.insert(
                email.to_string(),
                UserState {
                    tier,
                    lifetime: daily,
                    daily,
                    last_reset: today,
                },
            );
        }

        fn snapshot_of(user: &UserState, today: NaiveDate) -> QuotaSnapshot {
            let daily = if user.last_reset < today { 0 } else { user.daily };
            QuotaSnapshot::new(user.lifetime, daily, user.tier, FREE_DAILY_LIMIT)
        }
    }

    #[async_trait::async_trait]
    impl QuotaLedger for MemoryLedger {
        async fn ensure_user(&self, email: &str, _display_name: Option<&str>) -> Result<()> {
            let mut state = self.inner.lock().unwrap();
            let today = state.today;
            state
                .users
                .entry(email.to_string())
                .or_insert_with(|| UserState {
                    tier: Tier::Free,
                    lifetime: 0,
                    daily: 0,
                    last_reset: today,
                });
            Ok(())
        }

        async fn check_quota(&self, email: &str) -> Result<QuotaCheck> {
            let mut state = self.inner.lock().unwrap();
            let today = state.today;
            let user = state
                .users
                .get_mut(email)
                .ok_or_else(|| Error::UserNotFound(email.to_string()))?;
            if user.last_reset < today {
                user.daily = 0;
                user.last_reset = today;
            }
            let snapshot = Self::snapshot_of(user, today);
            Ok(QuotaCheck {
                allowed: !snapshot.limit_reached,
                snapshot,
            })
        }

        async fn commit_usage(
            &self,
            event_id: &str,
            email: &str,
            _platform: Platform,
        ) -> Result<QuotaSnapshot> {
            let mut state = self.inner.lock().unwrap();
            let today = state.today;
            if state.events.contains(event_id) {
                let user = state
                    .users
                    .get(email)
                    .ok_or_else(|| Error::UserNotFound(email.to_string()))?;
                return Ok(Self::snapshot_of(user, today));
            }
            let user = state
                .users
                .get_mut(email)
                .ok_or_else(|| Error::UserNotFound(email.to_string()))?;
            if user.last_reset < today {
                user.daily = 0;
                user.last_reset = today;
            }
            if user.tier == Tier::Free && user.daily >= FREE_DAILY_LIMIT {
                return Ok(Self::snapshot_of(user, today));
            }
            user.lifetime += 1;
            if user.tier == Tier::Free {
                user.daily += 1;
            }
            let snapshot = Self::snapshot_of(user, today);
            state.events.insert(event_id.to_string());
            Ok(snapshot)
        }

        async fn record_usage(&self, email: &str, platform: Platform) -> Result<QuotaCheck> {
            self.ensure_user(email, None).await?;
            let before = self.check_quota(email).await?;
            if !before.allowed {
                return Ok(QuotaCheck {
                    allowed: false,
                    snapshot: before.snapshot,
                });
            }
            let snapshot = self
                .commit_usage(&uuid::Uuid::new_v4().to_string(), email, platform)
                .await?;
            Ok(QuotaCheck {
                allowed: true,
                snapshot,
            })
        }

        async fn get_user(&self, email: &str) -> Result<Option<QuotaSnapshot>> {
            let state = self.inner.lock().unwrap();
            Ok(state
                .users
                .get(email)
                .map(|u| Self::snapshot_of(u, state.today)))
        }
    }

    fn request(email: &str, key: &str) -> EnhanceRequest {
        EnhanceRequest {
            prompt: "write a poem".to_string(),
            target_hint: "claude-sonnet".to_string(),
            platform_override: None,
            user_email: email.to_string(),
            idempotency_key: key.to_string(),
        }
    }

    fn service(
        backend: MockGenerationBackend,
    ) -> (
        EnhancementService<MockGenerationBackend, MemoryLedger>,
        Arc<MemoryLedger>,
    ) {
        let ledger = Arc::new(MemoryLedger::new());
        let service = EnhancementService::new(Arc::new(backend), ledger.clone());
        (service, ledger)
    }

    #[tokio::test]
    async fn test_enhance_happy_path() {
        let backend = MockGenerationBackend::new().with_fixed_response("Better prompt");
        let (service, _) = service(backend);

        let result = service.enhance(request("u@example.com", "k1")).await.unwrap();

        assert_eq!(result.text, "Better prompt");
        assert_eq!(result.path, EnhancementPath::Model);
        assert_eq!(result.platform, Platform::Claude);
        assert_eq!(result.snapshot.daily_count, 1);
        assert_eq!(result.snapshot.lifetime_count, 1);
        assert!(!result.snapshot.limit_reached);
    }

    #[tokio::test]
    async fn test_enhance_platform_override_wins() {
        let backend = MockGenerationBackend::new();
        let (service, _) = service(backend);

        let mut req = request("u@example.com", "k1");
        req.platform_override = Some(Platform::Gemini);

        let result = service.enhance(req).await.unwrap();
        assert_eq!(result.platform, Platform::Gemini);
    }

    #[tokio::test]
    async fn test_enhance_falls_back_on_backend_failure() {
        let backend = MockGenerationBackend::always_failing();
        let (service, _) = service(backend);

        let result = service.enhance(request("u@example.com", "k1")).await.unwrap();

        assert_eq!(result.path, EnhancementPath::Fallback);
        assert!(!result.text.is_empty());
        assert!(result.text.contains("write a poem"));
        // The fallback still consumed quota: text was served.
        assert_eq!(result.snapshot.daily_count, 1);
    }

    #[tokio::test]
    async fn test_enhance_rejects_at_limit_without_backend_call() {
        let backend = MockGenerationBackend::new();
        let (service, ledger) = service(backend.clone());
        ledger.seed("full@example.com", Tier::Free, FREE_DAILY_LIMIT);

        let result = service
            .enhance(request("full@example.com", "k1"))
            .await
            .unwrap();

        assert!(result.text.is_empty());
        assert!(result.snapshot.limit_reached);
        assert_eq!(result.snapshot.daily_count, FREE_DAILY_LIMIT);
        assert_eq!(backend.generate_call_count(), 0);
    }

    #[tokio::test]
    async fn test_enhance_pro_tier_not_limited() {
        let backend = MockGenerationBackend::new();
        let (service, ledger) = service(backend);
        ledger.seed("pro@example.com", Tier::Pro, 500);

        let result = service
            .enhance(request("pro@example.com", "k1"))
            .await
            .unwrap();

        assert_eq!(result.path, EnhancementPath::Model);
        // Pro usage counts toward the lifetime total only.
        assert_eq!(result.snapshot.lifetime_count, 501);
        assert_eq!(result.snapshot.daily_count, 500);
        assert!(!result.snapshot.limit_reached);
    }

    #[tokio::test]
    async fn test_enhance_replay_same_key_identical_snapshot() {
        let backend = MockGenerationBackend::new();
        let (service, _) = service(backend);

        let first = service.enhance(request("u@example.com", "same-key")).await.unwrap();
        let replay = service.enhance(request("u@example.com", "same-key")).await.unwrap();

        assert_eq!(first.snapshot, replay.snapshot);
        assert_eq!(replay.snapshot.lifetime_count, 1);
    }

    #[tokio::test]
    async fn test_enhance_day_rollover_resets_daily() {
        let backend = MockGenerationBackend::new();
        let (service, ledger) = service(backend);
        ledger.seed("stale@example.com", Tier::Free, FREE_DAILY_LIMIT);

        ledger.advance_day();

        let result = service
            .enhance(request("stale@example.com", "k-next-day"))
            .await
            .unwrap();

        assert_eq!(result.path, EnhancementPath::Model);
        assert_eq!(result.snapshot.daily_count, 1);
        assert_eq!(result.snapshot.lifetime_count, FREE_DAILY_LIMIT + 1);
    }

    // The boundary case: a free user at 9/10 gets their tenth enhancement
    // served, and the response reports the limit as now reached.
    #[tokio::test]
    async fn test_enhance_boundary_tenth_request_succeeds_and_reaches_limit() {
        let backend = MockGenerationBackend::new().with_fixed_response("tenth");
        let (service, ledger) = service(backend);
        ledger.seed("a@x.com", Tier::Free, FREE_DAILY_LIMIT - 1);

        let result = service.enhance(request("a@x.com", "k10")).await.unwrap();

        assert_eq!(result.text, "tenth");
        assert_eq!(result.snapshot.daily_count, FREE_DAILY_LIMIT);
        assert!(result.snapshot.limit_reached);

        // The eleventh is rejected outright.
        let next = service.enhance(request("a@x.com", "k11")).await.unwrap();
        assert!(next.text.is_empty());
        assert_eq!(next.snapshot.daily_count, FREE_DAILY_LIMIT);
    }

    #[tokio::test]
    async fn test_stream_chunks_then_complete() {
        let backend =
            MockGenerationBackend::new().with_fixed_response("alpha beta gamma");
        let (service, _) = service(backend);

        let stream = service
            .enhance_stream(request("u@example.com", "k1"))
            .await
            .unwrap();
        let events: Vec<StreamEvent> = stream.collect().await;

        let chunks: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Chunk(c) => Some(c.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(chunks, "alpha beta gamma");

        match events.last().unwrap() {
            StreamEvent::Complete {
                model_used,
                platform,
                snapshot,
            } => {
                assert_eq!(model_used, "mock-model");
                assert_eq!(*platform, Platform::Claude);
                assert_eq!(snapshot.daily_count, 1);
            }
            other => panic!("expected Complete, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stream_limit_reached_is_sole_event() {
        let backend = MockGenerationBackend::new();
        let (service, ledger) = service(backend.clone());
        ledger.seed("full@example.com", Tier::Free, FREE_DAILY_LIMIT);

        let stream = service
            .enhance_stream(request("full@example.com", "k1"))
            .await
            .unwrap();
        let events: Vec<StreamEvent> = stream.collect().await;

        assert_eq!(events.len(), 1);
        match &events[0] {
            StreamEvent::LimitReached { snapshot } => {
                assert!(snapshot.limit_reached);
                assert_eq!(snapshot.daily_count, FREE_DAILY_LIMIT);
            }
            other => panic!("expected LimitReached, got {:?}", other),
        }
        assert_eq!(backend.stream_call_count(), 0);
    }

    #[tokio::test]
    async fn test_stream_upstream_failure_falls_back_and_commits_once() {
        let backend = MockGenerationBackend::always_failing();
        let (service, ledger) = service(backend);

        let stream = service
            .enhance_stream(request("u@example.com", "k1"))
            .await
            .unwrap();
        let events: Vec<StreamEvent> = stream.collect().await;

        let chunks: Vec<&String> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Chunk(c) => Some(c),
                _ => None,
            })
            .collect();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("write a poem"));

        match events.last().unwrap() {
            StreamEvent::Complete {
                model_used,
                snapshot,
                ..
            } => {
                assert_eq!(model_used, OFFLINE_MODEL_NAME);
                assert_eq!(snapshot.daily_count, 1);
            }
            other => panic!("expected Complete, got {:?}", other),
        }

        let snapshot = ledger.get_user("u@example.com").await.unwrap().unwrap();
        assert_eq!(snapshot.lifetime_count, 1);
    }

    // An upstream stream that opens fine but closes without a single
    // content token must not charge the user for nothing: the offline
    // fallback text is delivered instead, and only then is usage committed.
    #[tokio::test]
    async fn test_stream_empty_completion_falls_back_before_committing() {
        let backend = MockGenerationBackend::new().with_fixed_response("");
        let (service, ledger) = service(backend);

        let stream = service
            .enhance_stream(request("u@example.com", "k1"))
            .await
            .unwrap();
        let events: Vec<StreamEvent> = stream.collect().await;

        let chunks: Vec<&String> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Chunk(c) => Some(c),
                _ => None,
            })
            .collect();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("write a poem"));

        match events.last().unwrap() {
            StreamEvent::Complete {
                model_used,
                snapshot,
                ..
            } => {
                assert_eq!(model_used, OFFLINE_MODEL_NAME);
                assert_eq!(snapshot.daily_count, 1);
            }
            other => panic!("expected Complete, got {:?}", other),
        }

        let snapshot = ledger.get_user("u@example.com").await.unwrap().unwrap();
        assert_eq!(snapshot.lifetime_count, 1);
    }

    #[tokio::test]
    async fn test_stream_replay_does_not_double_count() {
        let backend = MockGenerationBackend::new();
        let (service, ledger) = service(backend);

        let stream = service
            .enhance_stream(request("u@example.com", "same"))
            .await
            .unwrap();
        let _: Vec<StreamEvent> = stream.collect().await;

        let stream = service
            .enhance_stream(request("u@example.com", "same"))
            .await
            .unwrap();
        let _: Vec<StreamEvent> = stream.collect().await;

        let snapshot = ledger.get_user("u@example.com").await.unwrap().unwrap();
        assert_eq!(snapshot.lifetime_count, 1);
    }
}
