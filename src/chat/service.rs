use std::sync::Arc;

use async_trait::async_trait;

use super::dispatcher::{ChatJob, MessageHandler};
use super::reply::ReplySink;
use crate::history::{HistoryStore, TurnRole};
use crate::rag::{Answer, RagPipeline};

/// Runs one message end to end: history, pipeline, history, reply.
pub struct ChatService {
    pipeline: Arc<RagPipeline>,
    history: HistoryStore,
}

impl ChatService {
    pub fn new(pipeline: Arc<RagPipeline>, history: HistoryStore) -> Self {
        Self { pipeline, history }
    }

    /// Returns the answer when one was produced, whether or not it could be
    /// delivered. `None` means the sink closed or expired first; the user turn
    /// is recorded either way.
    pub async fn process(
        &self,
        identity: &str,
        text: &str,
        reply: &dyn ReplySink,
    ) -> Option<Answer> {
        let history = match self.history.recent(identity, self.pipeline.history_limit()).await {
            Ok(turns) => turns,
            Err(e) => {
                tracing::warn!("Failed to load history for '{}': {}", identity, e);
                Vec::new()
            }
        };
        if let Err(e) = self.history.append(identity, TurnRole::User, text).await {
            tracing::error!("Failed to record user message for '{}': {}", identity, e);
        }

        if !reply.is_open() {
            tracing::warn!(
                "Reply channel for '{}' closed while queued; answer generation skipped",
                identity
            );
            return None;
        }

        let answer = tokio::select! {
            answer = self.pipeline.answer(text, &history) => answer,
            _ = reply.expired() => {
                tracing::warn!("Reply for '{}' expired; answer generation cancelled", identity);
                return None;
            }
        };

        if let Err(e) = self
            .history
            .append(identity, TurnRole::Assistant, &answer.text)
            .await
        {
            tracing::error!("Failed to record answer for '{}': {}", identity, e);
        }

        if reply.is_open() {
            if let Err(e) = reply.deliver(&answer).await {
                tracing::error!("Failed to deliver answer to '{}': {}", identity, e);
            }
        } else {
            tracing::info!("Answer for '{}' recorded but no longer deliverable", identity);
        }
        Some(answer)
    }
}

#[async_trait]
impl MessageHandler for ChatService {
    async fn handle(&self, job: ChatJob) {
        self.process(&job.identity, &job.text, job.reply.as_ref()).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::chat::reply::DeliveryError;
    use crate::llm::{LanguageModel, ModelResponse, ProviderError};
    use crate::rag::pipeline::test_support::{memory_index, pipeline};
    use crate::rag::retriever::test_support::KeywordEmbedder;
    use crate::rag::synthesizer::test_support::ScriptedModel;
    use crate::rag::{AnswerOutcome, SynthesisInput};

    /// Stays open for `open_checks` calls to `is_open`, then reports closed.
    struct TestReply {
        open_checks: AtomicUsize,
        expires_after: Option<Duration>,
        delivered: Mutex<Vec<String>>,
    }

    impl TestReply {
        fn open() -> Self {
            Self {
                open_checks: AtomicUsize::new(usize::MAX),
                expires_after: None,
                delivered: Mutex::new(Vec::new()),
            }
        }

        fn closing_after(checks: usize) -> Self {
            Self {
                open_checks: AtomicUsize::new(checks),
                ..Self::open()
            }
        }

        fn expiring(after: Duration) -> Self {
            Self {
                expires_after: Some(after),
                ..Self::open()
            }
        }
    }

    #[async_trait]
    impl ReplySink for TestReply {
        fn is_open(&self) -> bool {
            self.open_checks
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }

        async fn expired(&self) {
            match self.expires_after {
                Some(after) => tokio::time::sleep(after).await,
                None => std::future::pending().await,
            }
        }

        async fn deliver(&self, answer: &Answer) -> Result<(), DeliveryError> {
            self.delivered.lock().unwrap().push(answer.text.clone());
            Ok(())
        }
    }

    struct SlowModel {
        dropped: Arc<AtomicBool>,
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl LanguageModel for SlowModel {
        fn name(&self) -> &str {
            "slow"
        }

        async fn complete(&self, _input: &SynthesisInput) -> Result<ModelResponse, ProviderError> {
            let _flag = DropFlag(self.dropped.clone());
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ModelResponse::Text("too late".to_string()))
        }
    }

    async fn service(model: Arc<dyn LanguageModel>) -> (ChatService, HistoryStore) {
        let index = memory_index(3, vec![(1, vec![1.0, 0.0, 0.0], "The ferry leaves at 9.")]).await;
        let embedder = Arc::new(KeywordEmbedder::new(3, vec![("ferry", 0)]));
        let history = HistoryStore::in_memory().await.expect("history");
        let pipeline = Arc::new(pipeline(embedder, index, model, 5));
        (ChatService::new(pipeline, history.clone()), history)
    }

    #[tokio::test]
    async fn answer_is_recorded_then_delivered() {
        let (service, history) = service(Arc::new(ScriptedModel::answering("At 9."))).await;
        let reply = TestReply::open();

        let answer = service.process("u1", "when does the ferry leave?", &reply).await;
        assert_eq!(answer.map(|a| a.outcome), Some(AnswerOutcome::Synthesized));
        assert_eq!(*reply.delivered.lock().unwrap(), vec!["At 9.".to_string()]);

        let turns = history.recent("u1", 10).await.expect("recent");
        let contents: Vec<&str> = turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["when does the ferry leave?", "At 9."]);
        assert_eq!(turns[1].role, TurnRole::Assistant);
    }

    #[tokio::test]
    async fn earlier_turns_are_passed_as_history() {
        let model = Arc::new(ScriptedModel::answering("ok"));
        let (service, _history) = service(model.clone()).await;

        service.process("u1", "ferry?", &TestReply::open()).await;
        service.process("u1", "ferry again?", &TestReply::open()).await;

        let seen = model.seen.lock().unwrap();
        let second: Vec<&str> = seen[1].history.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(second, vec!["ferry?", "ok"]);
    }

    #[tokio::test]
    async fn expired_sink_cancels_synthesis_and_records_no_answer() {
        let dropped = Arc::new(AtomicBool::new(false));
        let (service, history) = service(Arc::new(SlowModel {
            dropped: dropped.clone(),
        }))
        .await;
        let reply = TestReply::expiring(Duration::from_millis(30));

        let answer = service.process("u1", "ferry?", &reply).await;
        assert!(answer.is_none());
        assert!(dropped.load(Ordering::SeqCst), "synthesis future was dropped");
        assert!(reply.delivered.lock().unwrap().is_empty());

        let turns = history.recent("u1", 10).await.expect("recent");
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, TurnRole::User);
    }

    #[tokio::test]
    async fn undeliverable_answer_is_still_recorded() {
        let (service, history) = service(Arc::new(ScriptedModel::answering("At 9."))).await;
        // Open for the check before synthesis only.
        let reply = TestReply::closing_after(1);

        let answer = service.process("u1", "ferry?", &reply).await;
        assert!(answer.is_some());
        assert!(reply.delivered.lock().unwrap().is_empty());

        let turns = history.recent("u1", 10).await.expect("recent");
        assert_eq!(turns.last().map(|t| t.content.as_str()), Some("At 9."));
    }

    #[tokio::test]
    async fn closed_sink_still_records_user_turn() {
        let model = Arc::new(ScriptedModel::answering("unused"));
        let (service, history) = service(model.clone()).await;

        let answer = service.process("u1", "ferry?", &TestReply::closing_after(0)).await;
        assert!(answer.is_none());
        assert_eq!(model.calls(), 0);

        let turns = history.recent("u1", 10).await.expect("recent");
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, TurnRole::User);
        assert_eq!(turns[0].content, "ferry?");
    }

    #[tokio::test]
    async fn lapsed_webhook_token_keeps_transcript() {
        let model = Arc::new(ScriptedModel::answering("unused"));
        let (service, history) = service(model.clone()).await;
        let reply = crate::chat::WebhookReply::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9/reply",
            None,
            "rt-lapsed".to_string(),
            Duration::ZERO,
        );

        let answer = service.process("u1", "when does the ferry leave?", &reply).await;
        assert!(answer.is_none());
        assert_eq!(model.calls(), 0);

        let turns = history.recent("u1", 10).await.expect("recent");
        let contents: Vec<&str> = turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["when does the ferry leave?"]);
    }
}
