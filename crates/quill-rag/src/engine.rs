//! Retrieval-generation orchestrator

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Instrument, debug, debug_span};
use uuid::Uuid;

use quill_core::{
    ChunkStore, CompletionGateway, CompletionRequest, Error, Message, Outcome, QueryEngine, RagAnswer, RagQuery,
    Result, RetrievedEvidence, SessionStore,
};

use crate::citations::{CitationParser, classify_outcome};
use crate::history::{FullHistory, HistoryPolicy};
use crate::prompts::{REFUSAL_SENTENCE, assemble_prompt};

/// Upper bound on evidence items per query
pub const MAX_TOP_K: usize = 50;

/// Default request-scoped generation timeout
pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Steps of one query, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ReceiveQuery,
    Retrieve,
    AssemblePrompt,
    Generate,
    Record,
    Respond,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ReceiveQuery => "receive_query",
            Stage::Retrieve => "retrieve",
            Stage::AssemblePrompt => "assemble_prompt",
            Stage::Generate => "generate",
            Stage::Record => "record",
            Stage::Respond => "respond",
        }
    }
}

/// What to do when retrieval yields no evidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyEvidencePolicy {
    /// Answer with the refusal sentence without calling the model
    #[default]
    Refuse,
    /// Send the no-context prompt to the model and let it refuse
    Delegate,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub empty_evidence: EmptyEvidencePolicy,
    /// Evidence farther than this distance is dropped before prompting
    pub max_distance: Option<f32>,
    /// Deadline for the model calls of one request, history compaction
    /// included
    pub generation_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            empty_evidence: EmptyEvidencePolicy::default(),
            max_distance: None,
            generation_timeout: DEFAULT_GENERATION_TIMEOUT,
        }
    }
}

/// Cancels the request its signals were handed to
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal { rx: self.tx.subscribe() }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the request is cancelled
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Aborts a model-call task when the request goes away
struct ModelTask<T>(JoinHandle<Result<T>>);

impl<T> Drop for ModelTask<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Answers queries strictly from retrieved evidence, remembering each
/// exchange in session memory.
pub struct RagEngine {
    store: Arc<dyn ChunkStore>,
    sessions: Arc<dyn SessionStore>,
    gateway: Arc<dyn CompletionGateway>,
    history: Arc<dyn HistoryPolicy>,
    citations: CitationParser,
    config: EngineConfig,
}

impl RagEngine {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        sessions: Arc<dyn SessionStore>,
        gateway: Arc<dyn CompletionGateway>,
    ) -> Result<Self> {
        Ok(Self {
            store,
            sessions,
            gateway,
            history: Arc::new(FullHistory),
            citations: CitationParser::new()?,
            config: EngineConfig::default(),
        })
    }

    pub fn with_history_policy(mut self, policy: Arc<dyn HistoryPolicy>) -> Self {
        self.history = policy;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    /// Answer a query; `cancel` aborts the request at any point before the
    /// exchange is recorded.
    pub async fn answer_with_cancel(&self, query: RagQuery, cancel: CancelSignal) -> Result<RagAnswer> {
        let span = debug_span!(
            "rag_query",
            request_id = %Uuid::new_v4(),
            session = query.session_id.as_deref().unwrap_or("-")
        );
        self.run(query, cancel).instrument(span).await
    }

    async fn run(&self, query: RagQuery, mut cancel: CancelSignal) -> Result<RagAnswer> {
        enter(Stage::ReceiveQuery);
        let text = query.query.trim().to_string();
        if text.is_empty() {
            return Err(Error::InvalidInput("query must not be empty".to_string()));
        }
        let k = query.k.clamp(1, MAX_TOP_K);
        check_cancelled(&cancel)?;

        enter(Stage::Retrieve);
        let evidence = self.retrieve(&text, k).await?;
        debug!(requested = k, retrieved = evidence.len(), "retrieval finished");
        check_cancelled(&cancel)?;

        enter(Stage::AssemblePrompt);
        let deadline = Instant::now() + self.config.generation_timeout;
        let stored = match &query.session_id {
            Some(id) => self.sessions.history(id).await?,
            None => Vec::new(),
        };
        let policy = self.history.clone();
        let compaction_query = query.clone();
        let history = self
            .guarded("history compaction", deadline, &mut cancel, async move {
                policy.prepare(stored, &compaction_query).await
            })
            .await?;
        let messages = assemble_prompt(history, &evidence, &text);
        check_cancelled(&cancel)?;

        enter(Stage::Generate);
        let answer = if evidence.is_empty() {
            if self.config.empty_evidence == EmptyEvidencePolicy::Delegate {
                let reply = self.generate(&query, messages, deadline, &mut cancel).await?;
                debug!(reply = %reply, "no evidence retrieved, replacing model reply with the refusal");
            } else {
                debug!("no evidence retrieved, refusing without generation");
            }
            REFUSAL_SENTENCE.to_string()
        } else {
            self.generate(&query, messages, deadline, &mut cancel).await?
        };

        if let Some(session_id) = &query.session_id {
            enter(Stage::Record);
            self.sessions.append(session_id, &text, &answer).await?;
        }

        enter(Stage::Respond);
        let outcome = if evidence.is_empty() {
            Outcome::Refused
        } else {
            classify_outcome(&answer)
        };
        let citations = match outcome {
            Outcome::Answered => self.citations.parse(&answer, evidence.len()),
            Outcome::Refused => Vec::new(),
        };

        Ok(RagAnswer {
            answer,
            outcome,
            sources: evidence,
            citations,
        })
    }

    async fn retrieve(&self, text: &str, k: usize) -> Result<Vec<RetrievedEvidence>> {
        let mut evidence = self.store.query(text, k).await?;
        if let Some(max) = self.config.max_distance {
            evidence.retain(|e| e.score <= max);
        }
        Ok(evidence)
    }

    async fn generate(
        &self,
        query: &RagQuery,
        messages: Vec<Message>,
        deadline: Instant,
        cancel: &mut CancelSignal,
    ) -> Result<String> {
        let gateway = self.gateway.clone();
        let request = CompletionRequest {
            messages,
            model: query.model.clone(),
            provider: query.provider,
            api_key: query.api_key.clone(),
        };
        self.guarded("generation", deadline, cancel, async move { gateway.complete(request).await })
            .await
    }

    /// Run a model call on its own task, bounded by the request deadline and
    /// the cancellation signal.
    async fn guarded<T, F>(&self, what: &str, deadline: Instant, cancel: &mut CancelSignal, call: F) -> Result<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let mut task = ModelTask(tokio::spawn(call));
        let limit = self.config.generation_timeout;

        tokio::select! {
            joined = tokio::time::timeout_at(deadline, &mut task.0) => match joined {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => Err(Error::Provider(format!("{} task failed: {}", what, e))),
                Err(_) => Err(Error::Timeout(format!("{} did not finish within {:?}", what, limit))),
            },
            _ = cancel.cancelled() => Err(Error::Cancelled(format!("request cancelled during {}", what))),
        }
    }
}

fn enter(stage: Stage) {
    debug!(stage = stage.as_str(), "orchestrator stage");
}

fn check_cancelled(cancel: &CancelSignal) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled("request cancelled".to_string()));
    }
    Ok(())
}

#[async_trait]
impl QueryEngine for RagEngine {
    async fn answer(&self, query: RagQuery) -> Result<RagAnswer> {
        self.answer_with_cancel(query, CancelSignal::never()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashEmbedder;
    use crate::history::SummarizingHistory;
    use crate::memory::InMemorySessionStore;
    use crate::prompts::NO_CONTEXT_MARKER;
    use crate::vector_store::LocalChunkStore;
    use quill_core::{Chunk, Embedder};
    use std::sync::Mutex;

    struct ScriptedGateway {
        reply: Result<String>,
        delay: Duration,
        calls: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedGateway {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                delay: Duration::ZERO,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok("late".to_string()),
                delay,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: Err(Error::Provider("model not found".to_string())),
                delay: Duration::ZERO,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CompletionGateway for ScriptedGateway {
        async fn complete(&self, request: CompletionRequest) -> Result<String> {
            self.calls.lock().unwrap().push(request);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(Error::Provider(e.to_string())),
            }
        }
    }

    async fn seeded_store() -> Arc<LocalChunkStore> {
        let embedder = HashEmbedder::default();
        let store = Arc::new(LocalChunkStore::in_memory(Arc::new(embedder.clone()) as Arc<dyn Embedder>));
        let texts = [
            "Osmosis is the diffusion of water across a membrane.",
            "Mitosis produces two identical daughter cells.",
            "Enzymes speed up chemical reactions.",
        ];
        let chunks = texts
            .iter()
            .enumerate()
            .map(|(i, t)| Chunk::new("bio", "biology.pdf", i, *t, embedder.embed_text(t)))
            .collect();
        store.add(chunks).await.unwrap();
        store
    }

    fn engine(store: Arc<LocalChunkStore>, gateway: Arc<ScriptedGateway>) -> (RagEngine, Arc<InMemorySessionStore>) {
        let sessions = Arc::new(InMemorySessionStore::new());
        (RagEngine::new(store, sessions.clone(), gateway).unwrap(), sessions)
    }

    #[tokio::test]
    async fn test_empty_query_is_invalid_input() {
        let (engine, _) = engine(seeded_store().await, ScriptedGateway::replying("x"));
        let err = engine.answer(RagQuery::new("   ")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_empty_store_refuses_without_generation() {
        let gateway = ScriptedGateway::replying("should not be used");
        let store = Arc::new(LocalChunkStore::in_memory(Arc::new(HashEmbedder::default())));
        let (engine, sessions) = engine(store, gateway.clone());

        let answer = engine.answer(RagQuery::new("What is osmosis?").with_session("s")).await.unwrap();
        assert_eq!(answer.answer, REFUSAL_SENTENCE);
        assert_eq!(answer.outcome, Outcome::Refused);
        assert!(answer.sources.is_empty());
        assert!(answer.citations.is_empty());
        assert_eq!(gateway.call_count(), 0);
        assert_eq!(sessions.history("s").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delegate_policy_sends_no_context_marker() {
        let gateway = ScriptedGateway::replying(REFUSAL_SENTENCE);
        let store = Arc::new(LocalChunkStore::in_memory(Arc::new(HashEmbedder::default())));
        let (engine, _) = engine(store, gateway.clone());
        let engine = engine.with_config(EngineConfig {
            empty_evidence: EmptyEvidencePolicy::Delegate,
            ..EngineConfig::default()
        });

        let answer = engine.answer(RagQuery::new("What is osmosis?")).await.unwrap();
        assert!(answer.is_refusal());
        let calls = gateway.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].messages.last().unwrap().content.contains(NO_CONTEXT_MARKER));
    }

    #[tokio::test]
    async fn test_delegate_reply_is_replaced_by_refusal() {
        let gateway = ScriptedGateway::replying("Hamlet was written by Shakespeare (Source 1).");
        let store = Arc::new(LocalChunkStore::in_memory(Arc::new(HashEmbedder::default())));
        let (engine, sessions) = engine(store, gateway.clone());
        let engine = engine.with_config(EngineConfig {
            empty_evidence: EmptyEvidencePolicy::Delegate,
            ..EngineConfig::default()
        });

        let answer = engine.answer(RagQuery::new("Who wrote Hamlet?").with_session("s")).await.unwrap();
        assert_eq!(gateway.call_count(), 1);
        assert_eq!(answer.answer, REFUSAL_SENTENCE);
        assert_eq!(answer.outcome, Outcome::Refused);
        assert!(answer.citations.is_empty());

        let history = sessions.history("s").await.unwrap();
        assert_eq!(history[1].content, REFUSAL_SENTENCE);
    }

    async fn engine_with_slow_compaction(
        timeout: Duration,
    ) -> (RagEngine, Arc<InMemorySessionStore>, Arc<ScriptedGateway>) {
        let gateway = ScriptedGateway::slow(Duration::from_secs(5));
        let (engine, sessions) = engine(seeded_store().await, gateway.clone());
        for i in 0..4 {
            sessions
                .append("s", &format!("earlier question {}", i), &format!("earlier answer {}", i))
                .await
                .unwrap();
        }
        let engine = engine
            .with_history_policy(Arc::new(SummarizingHistory::new(gateway.clone(), 1)))
            .with_config(EngineConfig {
                generation_timeout: timeout,
                ..EngineConfig::default()
            });
        (engine, sessions, gateway)
    }

    #[tokio::test]
    async fn test_history_compaction_honours_timeout() {
        let (engine, sessions, gateway) = engine_with_slow_compaction(Duration::from_millis(50)).await;

        let started = Instant::now();
        let err = engine.answer(RagQuery::new("osmosis").with_session("s")).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(gateway.call_count(), 1);
        assert_eq!(sessions.history("s").await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_cancel_during_history_compaction() {
        let (engine, sessions, gateway) = engine_with_slow_compaction(Duration::from_secs(60)).await;
        let handle = CancelHandle::new();
        let signal = handle.signal();
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel();
        });

        let started = Instant::now();
        let err = engine
            .answer_with_cancel(RagQuery::new("osmosis").with_session("s"), signal)
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, Error::Cancelled(_)));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(gateway.call_count(), 1);
        assert_eq!(sessions.history("s").await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_k_is_clamped() {
        let (engine, _) = engine(seeded_store().await, ScriptedGateway::replying("ok (Source 1)"));
        let one = engine.answer(RagQuery::new("osmosis").with_k(0)).await.unwrap();
        assert_eq!(one.sources.len(), 1);
        let all = engine.answer(RagQuery::new("osmosis").with_k(500)).await.unwrap();
        assert_eq!(all.sources.len(), 3);
    }

    #[tokio::test]
    async fn test_max_distance_gate_can_empty_evidence() {
        let gateway = ScriptedGateway::replying("unused");
        let (engine, _) = engine(seeded_store().await, gateway.clone());
        let engine = engine.with_config(EngineConfig {
            max_distance: Some(-1.0),
            ..EngineConfig::default()
        });

        let answer = engine.answer(RagQuery::new("osmosis")).await.unwrap();
        assert!(answer.is_refusal());
        assert_eq!(gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn test_provider_error_propagates_and_records_nothing() {
        let (engine, sessions) = engine(seeded_store().await, ScriptedGateway::failing());
        let err = engine.answer(RagQuery::new("osmosis").with_session("s")).await.unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
        assert!(sessions.history("s").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_records_nothing() {
        let (engine, sessions) = engine(seeded_store().await, ScriptedGateway::slow(Duration::from_secs(5)));
        let engine = engine.with_config(EngineConfig {
            generation_timeout: Duration::from_millis(20),
            ..EngineConfig::default()
        });

        let err = engine.answer(RagQuery::new("osmosis").with_session("s")).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(sessions.history("s").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_generation() {
        let (engine, sessions) = engine(seeded_store().await, ScriptedGateway::slow(Duration::from_secs(5)));
        let handle = CancelHandle::new();
        let signal = handle.signal();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel();
        });

        let err = engine
            .answer_with_cancel(RagQuery::new("osmosis").with_session("s"), signal)
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, Error::Cancelled(_)));
        assert!(sessions.history("s").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let gateway = ScriptedGateway::replying("x");
        let (engine, _) = engine(seeded_store().await, gateway.clone());
        let handle = CancelHandle::new();
        handle.cancel();

        let err = engine.answer_with_cancel(RagQuery::new("osmosis"), handle.signal()).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
        assert_eq!(gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn test_no_session_means_no_recording() {
        let (engine, sessions) = engine(seeded_store().await, ScriptedGateway::replying("Water moves (Source 1)."));
        let answer = engine.answer(RagQuery::new("What is osmosis?")).await.unwrap();
        assert_eq!(answer.outcome, Outcome::Answered);
        assert_eq!(answer.citations, vec![1]);
        assert!(sessions.list_sessions().await.unwrap().is_empty());
    }
}
