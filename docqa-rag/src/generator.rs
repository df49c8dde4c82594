//! Grounded answer generation over retrieved chunks.

use std::sync::Arc;
use std::time::Duration;

use docqa_model::{CancelHandle, GenerationRequest, Llm, ModelError, TokenStream};
use futures::StreamExt;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument};

use crate::config::RagConfig;
use crate::document::{Answer, RetrievalResult, SearchResult};
use crate::error::{QueryFailure, RagError};

/// Instructions sent as the system prompt with every grounded question.
pub const SYSTEM_PROMPT: &str = "You answer questions about the user's documents. \
Use only the numbered context passages to answer the question at the end. \
If the passages do not contain the answer, say that you don't know instead of making one up. \
Cite passages by their number, e.g. [1].";

/// The answer given when retrieval found nothing; the model is not called.
pub const NO_CONTEXT_ANSWER: &str = "I could not find any grounding context for this question \
in the indexed documents, so I cannot answer it from your documents.";

fn context_block(number: usize, result: &SearchResult) -> String {
    format!("[{number}] (source: {})\n{}\n\n", result.chunk.document_id, result.chunk.text.trim())
}

/// Keep the highest-scored chunks whose context blocks fit in `budget`
/// characters, dropping the lowest-scored first. A top chunk that alone
/// exceeds the budget is truncated at a character boundary.
///
/// Kept chunks stay in retrieval order.
pub fn fit_to_budget(retrieval: &[SearchResult], budget: usize) -> Vec<SearchResult> {
    // Blocks are costed with the widest number they could be given.
    let cost = |result: &SearchResult| context_block(retrieval.len(), result).chars().count();
    let mut by_score: Vec<usize> = (0..retrieval.len()).collect();
    by_score.sort_by(|a, b| retrieval[*b].score.total_cmp(&retrieval[*a].score));

    let mut keep = vec![false; retrieval.len()];
    let mut used = 0;
    for i in by_score {
        let len = cost(&retrieval[i]);
        if used + len > budget {
            break;
        }
        used += len;
        keep[i] = true;
    }

    if !keep.contains(&true) {
        let Some(top) = retrieval.iter().max_by(|a, b| a.score.total_cmp(&b.score)) else {
            return Vec::new();
        };
        let text = top.chunk.text.trim();
        let overhead = cost(top) - text.chars().count();
        let room = budget.saturating_sub(overhead);
        if room == 0 {
            return Vec::new();
        }
        let mut truncated = top.clone();
        truncated.chunk.text = text.chars().take(room).collect();
        return vec![truncated];
    }

    retrieval.iter().zip(keep).filter(|(_, kept)| *kept).map(|(r, _)| r.clone()).collect()
}

/// The prompt for `question` grounded on `chunks`, numbered in order.
pub fn build_prompt(question: &str, chunks: &[SearchResult]) -> String {
    let mut prompt = String::from("Context:\n\n");
    for (i, result) in chunks.iter().enumerate() {
        prompt.push_str(&context_block(i + 1, result));
    }
    prompt.push_str(&format!("Question: {}\nAnswer:", question.trim()));
    prompt
}

/// Prompt characters spent before any context: the system prompt, the
/// framing and the question.
pub fn fixed_prompt_len(question: &str) -> usize {
    SYSTEM_PROMPT.chars().count() + build_prompt(question, &[]).chars().count()
}

/// Produces streamed answers from a language model.
#[derive(Clone)]
pub struct AnswerGenerator {
    llm: Arc<dyn Llm>,
    context_budget: usize,
    generation_timeout: Duration,
}

impl AnswerGenerator {
    /// Create a generator for `llm` with the budget and deadline from `config`.
    pub fn new(llm: Arc<dyn Llm>, config: &RagConfig) -> Self {
        Self {
            llm,
            context_budget: config.context_budget,
            generation_timeout: config.generation_timeout,
        }
    }

    /// The underlying model.
    pub fn llm(&self) -> &Arc<dyn Llm> {
        &self.llm
    }

    /// Check that `question` leaves room in the prompt budget.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidQuery`] if the system prompt, framing and
    /// question alone exceed the context budget.
    pub fn check_question(&self, question: &str) -> crate::error::Result<()> {
        let fixed = fixed_prompt_len(question);
        if fixed > self.context_budget {
            return Err(RagError::InvalidQuery(format!(
                "question is too long: the prompt would need {fixed} characters, the budget is {}",
                self.context_budget
            )));
        }
        Ok(())
    }

    /// Start answering `question` from `retrieval`.
    ///
    /// With an empty retrieval the model is not called and the stream yields
    /// [`NO_CONTEXT_ANSWER`]. The prompt, system prompt included, never
    /// exceeds the context budget. The whole generation, including the
    /// request itself, is bounded by the configured generation deadline.
    ///
    /// # Errors
    ///
    /// Returns a [`QueryFailure`] carrying `retrieval` if the question does
    /// not fit the budget ([`RagError::InvalidQuery`]) or the model cannot
    /// start generating.
    #[instrument(skip_all, fields(model = %self.llm.name(), chunks = retrieval.len()))]
    pub async fn generate(
        &self,
        question: &str,
        retrieval: RetrievalResult,
    ) -> std::result::Result<AnswerStream, QueryFailure> {
        if let Err(e) = self.check_question(question) {
            return Err(QueryFailure::new(e, Some(retrieval)));
        }
        if retrieval.is_empty() {
            debug!("no context retrieved; answering without the model");
            return Ok(AnswerStream::new(
                TokenStream::from_tokens([NO_CONTEXT_ANSWER]),
                retrieval,
                Vec::new(),
                self.generation_timeout,
            ));
        }

        let room = self.context_budget - fixed_prompt_len(question);
        let prompt_chunks = fit_to_budget(&retrieval, room);
        let prompt = build_prompt(question, &prompt_chunks);
        debug!(prompt_chunks = prompt_chunks.len(), prompt_len = prompt.len(), "prompt built");

        let deadline = Instant::now() + self.generation_timeout;
        let request = GenerationRequest::new(prompt).with_system(SYSTEM_PROMPT);
        let started = tokio::time::timeout_at(deadline, self.llm.generate(request)).await;

        let tokens = match started {
            Ok(Ok(tokens)) => tokens.with_deadline(deadline),
            Ok(Err(e)) => {
                error!(error = %e, "model failed to start generating");
                return Err(QueryFailure::new(e.into(), Some(retrieval)));
            }
            Err(_) => {
                error!(timeout = ?self.generation_timeout, "model did not respond before the deadline");
                return Err(QueryFailure::new(
                    RagError::GenerationTimeout(self.generation_timeout),
                    Some(retrieval),
                ));
            }
        };

        Ok(AnswerStream::new(tokens, retrieval, prompt_chunks, self.generation_timeout))
    }
}

impl std::fmt::Debug for AnswerGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnswerGenerator")
            .field("model", &self.llm.name())
            .field("context_budget", &self.context_budget)
            .field("generation_timeout", &self.generation_timeout)
            .finish()
    }
}

/// An answer being streamed token by token.
///
/// Read tokens with [`next_token`](AnswerStream::next_token) until it
/// returns `None`, then call [`finish`](AnswerStream::finish) for the
/// complete [`Answer`] or the failure that ended the stream.
#[derive(Debug)]
pub struct AnswerStream {
    tokens: TokenStream,
    retrieval: RetrievalResult,
    prompt_chunks: Vec<SearchResult>,
    text: String,
    error: Option<RagError>,
    timeout: Duration,
}

impl AnswerStream {
    fn new(
        tokens: TokenStream,
        retrieval: RetrievalResult,
        prompt_chunks: Vec<SearchResult>,
        timeout: Duration,
    ) -> Self {
        Self { tokens, retrieval, prompt_chunks, text: String::new(), error: None, timeout }
    }

    /// The next token, or `None` once the answer is complete, cancelled, or
    /// failed.
    pub async fn next_token(&mut self) -> Option<String> {
        if self.error.is_some() {
            return None;
        }
        match self.tokens.next().await? {
            Ok(token) => {
                self.text.push_str(&token);
                Some(token)
            }
            Err(ModelError::Timeout(_)) => {
                self.error = Some(RagError::GenerationTimeout(self.timeout));
                None
            }
            Err(e) => {
                self.error = Some(e.into());
                None
            }
        }
    }

    /// A handle that stops the stream from any task.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.tokens.cancel_handle()
    }

    /// The retrieval the answer is grounded on.
    pub fn retrieval(&self) -> &RetrievalResult {
        &self.retrieval
    }

    /// The chunks that fit in the prompt, possibly truncated.
    pub fn prompt_chunks(&self) -> &[SearchResult] {
        &self.prompt_chunks
    }

    pub(crate) fn has_failed(&self) -> bool {
        self.error.is_some()
    }

    /// Text received so far.
    pub fn partial_text(&self) -> &str {
        &self.text
    }

    /// Drain the remaining tokens and return the answer.
    ///
    /// # Errors
    ///
    /// Returns a [`QueryFailure`] with the retrieval if the stream was
    /// cancelled ([`RagError::Cancelled`]), ran past its deadline
    /// ([`RagError::GenerationTimeout`]), or the model failed.
    pub async fn finish(mut self) -> std::result::Result<Answer, QueryFailure> {
        while self.next_token().await.is_some() {}

        if let Some(error) = self.error.take() {
            info!(error = %error, partial_len = self.text.len(), "answer failed");
            return Err(QueryFailure::new(error, Some(self.retrieval)));
        }

        let grounded = !self.retrieval.is_empty();
        info!(answer_len = self.text.len(), sources = self.retrieval.len(), "answer complete");
        Ok(Answer { text: self.text, retrieval: self.retrieval, grounded })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use docqa_model::MockLlm;

    use super::*;
    use crate::document::Chunk;

    fn result(id: &str, text: &str, score: f32) -> SearchResult {
        SearchResult {
            chunk: Chunk {
                id: id.to_string(),
                text: text.to_string(),
                embedding: vec![],
                metadata: HashMap::new(),
                document_id: format!("{id}.txt"),
                offset: 0,
                chunk_index: 0,
            },
            score,
        }
    }

    fn generator(llm: MockLlm, budget: usize) -> (Arc<MockLlm>, AnswerGenerator) {
        let llm = Arc::new(llm);
        let config = RagConfig::builder().context_budget(budget).build().unwrap();
        (Arc::clone(&llm), AnswerGenerator::new(llm, &config))
    }

    #[test]
    fn prompt_numbers_chunks_with_sources() {
        let prompt = build_prompt("Where?", &[result("a", "Paris.", 0.9), result("b", "Lyon.", 0.5)]);
        assert!(prompt.contains("[1] (source: a.txt)\nParis."));
        assert!(prompt.contains("[2] (source: b.txt)\nLyon."));
        assert!(prompt.ends_with("Question: Where?\nAnswer:"));
    }

    #[test]
    fn budget_drops_lowest_scored_chunks_first() {
        // Each block is "[3] (source: x.txt)\nxxxxx\n\n", 27 characters.
        let retrieval = vec![result("a", "aaaaa", 0.9), result("b", "bbbbb", 0.8), result("c", "ccccc", 0.1)];
        let kept = fit_to_budget(&retrieval, 60);
        let ids: Vec<&str> = kept.iter().map(|r| r.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn oversized_top_chunk_is_truncated_on_char_boundary() {
        let kept = fit_to_budget(&[result("a", "ééééé", 0.9), result("b", "x", 0.1)], 25);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].chunk.text, "ééé");
    }

    #[test]
    fn no_room_for_block_headers_keeps_nothing() {
        assert!(fit_to_budget(&[result("a", "text", 0.9)], 5).is_empty());
    }

    #[tokio::test]
    async fn prompts_stay_within_the_budget() {
        let (llm, generator) = generator(MockLlm::fixed("ok"), 600);
        let long = "word ".repeat(40);
        let retrieval = vec![result("a", &long, 0.9), result("b", &long, 0.8), result("c", &long, 0.7)];
        let stream = generator.generate("What does the text say?", retrieval).await.unwrap();
        assert_eq!(stream.prompt_chunks().len(), 1);
        stream.finish().await.unwrap();

        let request = &llm.requests()[0];
        let total = request.prompt.chars().count() + request.system.as_deref().map_or(0, |s| s.chars().count());
        assert!(total <= 600, "prompt of {total} characters");
        assert!(request.prompt.contains("[1] (source: a.txt)"));
        assert!(request.prompt.ends_with("Question: What does the text say?\nAnswer:"));
    }

    #[tokio::test]
    async fn questions_longer_than_the_budget_are_rejected() {
        let (llm, generator) = generator(MockLlm::fixed("ok"), 600);
        let question = "why ".repeat(500);
        assert!(matches!(generator.check_question(&question), Err(RagError::InvalidQuery(_))));

        let failure = generator.generate(&question, vec![result("a", "text", 0.9)]).await.unwrap_err();
        assert!(matches!(failure.error, RagError::InvalidQuery(_)));
        assert_eq!(failure.retrieval.map(|r| r.len()), Some(1));
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn empty_retrieval_answers_without_calling_the_model() {
        let (llm, generator) = generator(MockLlm::fixed("should not be used"), 1000);
        let answer = generator.generate("q", Vec::new()).await.unwrap().finish().await.unwrap();
        assert_eq!(answer.text, NO_CONTEXT_ANSWER);
        assert!(!answer.grounded);
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn streams_tokens_and_returns_retrieval() {
        let (llm, generator) = generator(MockLlm::fixed("It is Paris."), 1000);
        let retrieval = vec![result("a", "The capital of France is Paris.", 0.9)];
        let mut stream = generator.generate("Capital?", retrieval.clone()).await.unwrap();

        assert_eq!(stream.next_token().await.as_deref(), Some("It "));
        assert_eq!(stream.partial_text(), "It ");
        let answer = stream.finish().await.unwrap();
        assert_eq!(answer.text, "It is Paris.");
        assert_eq!(answer.retrieval, retrieval);
        assert!(answer.grounded);

        let request = &llm.requests()[0];
        assert_eq!(request.system.as_deref(), Some(SYSTEM_PROMPT));
        assert!(request.prompt.contains("The capital of France is Paris."));
    }

    #[tokio::test]
    async fn model_failures_keep_the_retrieval() {
        let (_, generator) = generator(
            MockLlm::failing(ModelError::Unavailable { provider: "mock".into(), message: "down".into() }),
            1000,
        );
        let retrieval = vec![result("a", "text", 0.9)];
        let failure = generator.generate("q", retrieval.clone()).await.unwrap_err();
        assert!(matches!(failure.error, RagError::GenerationService(_)));
        assert_eq!(failure.retrieval, Some(retrieval));
    }

    #[tokio::test]
    async fn cancelling_ends_the_stream_with_cancelled() {
        let (_, generator) = generator(
            MockLlm::fixed("one two three four").with_token_delay(Duration::from_millis(10)),
            1000,
        );
        let mut stream = generator.generate("q", vec![result("a", "text", 0.9)]).await.unwrap();
        assert!(stream.next_token().await.is_some());
        stream.cancel_handle().cancel();
        assert!(stream.next_token().await.is_none());

        let failure = stream.finish().await.unwrap_err();
        assert!(matches!(failure.error, RagError::Cancelled));
        assert_eq!(failure.retrieval.map(|r| r.len()), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_models_hit_the_generation_deadline() {
        let llm = Arc::new(MockLlm::fixed("too slow").with_token_delay(Duration::from_secs(30)));
        let config = RagConfig::builder().generation_timeout(Duration::from_secs(5)).build().unwrap();
        let generator = AnswerGenerator::new(llm, &config);

        let stream = generator.generate("q", vec![result("a", "text", 0.9)]).await.unwrap();
        let failure = stream.finish().await.unwrap_err();
        assert!(matches!(failure.error, RagError::GenerationTimeout(t) if t == Duration::from_secs(5)));
    }
}
