//! Turn pipeline: one user message in, one assistant message out.
//!
//! The pipeline never raises. Service failures and empty replies are turned
//! into fixed assistant texts and appended like any other reply; the typed
//! outcome is kept for logging and tests.

use tracing::{debug, warn};

use super::session::{ConversationId, Message, Sender, SessionState};
use crate::providers::CompletionClient;
use crate::providers::gemini::{
    Content, GenerateContentRequest, GenerationConfig, Role, SafetySetting,
};
use crate::providers::shared::ProviderError;

/// Assistant text appended when the service returns no usable text.
pub const NO_RESPONSE_TEXT: &str = "No response.";

/// Assistant text appended when the service call fails.
pub const ERROR_TEXT: &str = "Error occurred.";

/// Default upper bound of the question counter.
pub const DEFAULT_MAX_QUESTIONS: u8 = 6;

/// Inputs that stay constant across turns.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnSettings {
    pub system_instruction: String,
    pub generation: GenerationConfig,
    pub safety_settings: Vec<SafetySetting>,
    pub max_questions: u8,
}

/// Result of a completed service call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The service returned text.
    Replied(String),
    /// The call succeeded but carried no usable text.
    Empty,
    /// Transport, timeout, status or decoding failure.
    Failed(ProviderError),
}

impl TurnOutcome {
    /// The assistant text this outcome appends.
    pub fn reply_text(&self) -> &str {
        match self {
            TurnOutcome::Replied(text) => text,
            TurnOutcome::Empty => NO_RESPONSE_TEXT,
            TurnOutcome::Failed(_) => ERROR_TEXT,
        }
    }

    /// Whether the question counter advances for this outcome.
    pub fn counts_as_question(&self) -> bool {
        !matches!(self, TurnOutcome::Failed(_))
    }
}

/// Why a send did not happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The text was empty or whitespace only.
    EmptyInput,
    /// No conversation with the requested id exists.
    UnknownConversation,
    /// A send for the same conversation is still in flight.
    Busy,
}

/// Result of a send request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent(TurnOutcome),
    Skipped(SkipReason),
}

impl SendOutcome {
    /// Returns the turn outcome if the send happened.
    pub fn turn(&self) -> Option<&TurnOutcome> {
        match self {
            SendOutcome::Sent(outcome) => Some(outcome),
            SendOutcome::Skipped(_) => None,
        }
    }
}

/// Counts successful turns, saturating at a maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuestionCounter {
    count: u8,
    max: u8,
}

impl QuestionCounter {
    pub fn new(max: u8) -> Self {
        Self { count: 0, max }
    }

    pub fn count(&self) -> u8 {
        self.count
    }

    pub fn max(&self) -> u8 {
        self.max
    }

    pub fn is_exhausted(&self) -> bool {
        self.count >= self.max
    }

    /// Advances the counter if the outcome counts as a question.
    pub fn record(&mut self, outcome: &TurnOutcome) {
        if outcome.counts_as_question() && self.count < self.max {
            self.count += 1;
        }
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}

impl Default for QuestionCounter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_QUESTIONS)
    }
}

/// Builds the request for a conversation history.
///
/// The system instruction goes first as a `user` entry, followed by every
/// message in order.
pub fn build_request(settings: &TurnSettings, messages: &[Message]) -> GenerateContentRequest {
    let mut contents = Vec::with_capacity(messages.len() + 1);
    contents.push(Content::text(Role::User, settings.system_instruction.as_str()));
    contents.extend(messages.iter().map(|m| {
        let role = match m.sender() {
            Sender::User => Role::User,
            Sender::Assistant => Role::Model,
        };
        Content::text(role, m.text())
    }));

    GenerateContentRequest {
        contents,
        generation_config: settings.generation,
        safety_settings: settings.safety_settings.clone(),
    }
}

/// Calls the client and classifies the result. Never fails.
pub async fn request_reply(
    client: &impl CompletionClient,
    request: &GenerateContentRequest,
) -> TurnOutcome {
    match client.complete(request).await {
        Ok(response) => match response.first_text() {
            Some(text) => TurnOutcome::Replied(text.to_string()),
            None => {
                debug!("response carried no text");
                TurnOutcome::Empty
            }
        },
        Err(e) => {
            warn!(
                kind = %e.kind,
                error = %e,
                details = e.details.as_deref().unwrap_or(""),
                "completion request failed"
            );
            TurnOutcome::Failed(e)
        }
    }
}

/// Checks whether a send may start, without touching the state.
pub fn check_send(state: &SessionState, id: ConversationId, text: &str) -> Option<SkipReason> {
    if text.trim().is_empty() {
        Some(SkipReason::EmptyInput)
    } else if !state.contains(id) {
        Some(SkipReason::UnknownConversation)
    } else {
        None
    }
}

/// Runs a full turn on an exclusively borrowed state.
///
/// Appends the user message (untrimmed), calls the client with the whole
/// history and appends the reply or its fallback text. The caller persists.
pub async fn send_turn(
    state: &mut SessionState,
    client: &impl CompletionClient,
    settings: &TurnSettings,
    id: ConversationId,
    text: &str,
) -> SendOutcome {
    if let Some(reason) = check_send(state, id, text) {
        debug!(conversation = %id, ?reason, "send skipped");
        return SendOutcome::Skipped(reason);
    }

    let appended = state.append_message(id, Message::user(text)).ok();
    let Some(conversation) = appended.and(state.conversation(id)) else {
        return SendOutcome::Skipped(SkipReason::UnknownConversation);
    };
    let request = build_request(settings, conversation.messages());

    let outcome = request_reply(client, &request).await;
    if let Err(e) = state.append_message(id, Message::assistant(outcome.reply_text())) {
        warn!(conversation = %id, error = %e, "dropping reply");
    }
    SendOutcome::Sent(outcome)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use serde_json::{Value, json};

    use crate::providers::gemini::{GenerateContentRequest, GenerateContentResponse};
    use crate::providers::{CompletionClient, ProviderResult};

    /// Client that replays scripted results and records every request.
    #[derive(Default)]
    pub struct ScriptedClient {
        results: Mutex<VecDeque<ProviderResult<Value>>>,
        pub requests: Mutex<Vec<GenerateContentRequest>>,
        pub delay: Option<Duration>,
    }

    impl ScriptedClient {
        pub fn new(results: Vec<ProviderResult<Value>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                ..Self::default()
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn recorded(&self) -> Vec<GenerateContentRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    pub fn text_body(text: &str) -> Value {
        json!({"candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]})
    }

    impl CompletionClient for ScriptedClient {
        async fn complete(
            &self,
            request: &GenerateContentRequest,
        ) -> ProviderResult<GenerateContentResponse> {
            self.requests.lock().unwrap().push(request.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = self
                .results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(text_body("default reply")));
            next.map(GenerateContentResponse::from_value)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::test_support::{ScriptedClient, text_body};
    use super::*;
    use crate::config::Config;
    use crate::core::title::PLACEHOLDER_TITLE;
    use crate::providers::shared::ProviderErrorKind;

    fn settings() -> TurnSettings {
        Config::default().turn_settings().unwrap()
    }

    fn texts(state: &SessionState, id: ConversationId) -> Vec<(Sender, String)> {
        state
            .conversation(id)
            .unwrap()
            .messages()
            .iter()
            .map(|m| (m.sender(), m.text().to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_successful_turn_appends_reply_and_sets_title() {
        let mut state = SessionState::initial();
        let client = ScriptedClient::new(vec![Ok(text_body(
            "How long have you had the pain?",
        ))]);
        let id = ConversationId::FIRST;

        let outcome = send_turn(&mut state, &client, &settings(), id, "I have chest pain").await;

        assert_eq!(
            outcome,
            SendOutcome::Sent(TurnOutcome::Replied(
                "How long have you had the pain?".to_string()
            ))
        );
        assert_eq!(
            texts(&state, id),
            vec![
                (Sender::User, "I have chest pain".to_string()),
                (Sender::Assistant, "How long have you had the pain?".to_string()),
            ]
        );
        assert_eq!(state.conversation(id).unwrap().title(), "I have chest pain");
    }

    #[tokio::test]
    async fn test_failed_turn_appends_error_text() {
        let mut state = SessionState::initial();
        let client = ScriptedClient::new(vec![Err(ProviderError::timeout("timed out"))]);
        let id = ConversationId::FIRST;

        let outcome = send_turn(&mut state, &client, &settings(), id, "I have chest pain").await;

        let Some(TurnOutcome::Failed(err)) = outcome.turn() else {
            panic!("expected failure, got {outcome:?}");
        };
        assert_eq!(err.kind, ProviderErrorKind::Timeout);
        assert_eq!(
            texts(&state, id),
            vec![
                (Sender::User, "I have chest pain".to_string()),
                (Sender::Assistant, ERROR_TEXT.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_malformed_success_yields_no_response() {
        for body in [
            json!({}),
            json!({"candidates": []}),
            json!({"candidates": [{"content": {"parts": [{"text": 42}]}}]}),
            json!({"candidates": [{"content": {"parts": [{"text": ""}]}}]}),
        ] {
            let mut state = SessionState::initial();
            let client = ScriptedClient::new(vec![Ok(body)]);
            let outcome =
                send_turn(&mut state, &client, &settings(), ConversationId::FIRST, "hi").await;
            assert_eq!(outcome, SendOutcome::Sent(TurnOutcome::Empty));
            let messages = state.active_conversation().unwrap().messages();
            assert_eq!(messages.last().unwrap().text(), NO_RESPONSE_TEXT);
        }
    }

    #[tokio::test]
    async fn test_empty_input_is_skipped_without_request() {
        let mut state = SessionState::initial();
        let client = ScriptedClient::new(vec![]);

        for text in ["", "   ", "\n\t"] {
            let outcome =
                send_turn(&mut state, &client, &settings(), ConversationId::FIRST, text).await;
            assert_eq!(outcome, SendOutcome::Skipped(SkipReason::EmptyInput));
        }
        assert!(client.recorded().is_empty());
        assert_eq!(state, SessionState::initial());
    }

    #[tokio::test]
    async fn test_unknown_conversation_is_skipped() {
        let mut state = SessionState::initial();
        let client = ScriptedClient::new(vec![]);

        let outcome =
            send_turn(&mut state, &client, &settings(), ConversationId::new(8), "hello").await;

        assert_eq!(outcome, SendOutcome::Skipped(SkipReason::UnknownConversation));
        assert!(client.recorded().is_empty());
        assert_eq!(state, SessionState::initial());
    }

    #[tokio::test]
    async fn test_user_text_is_kept_untrimmed() {
        let mut state = SessionState::initial();
        let client = ScriptedClient::new(vec![Ok(text_body("ok"))]);
        send_turn(&mut state, &client, &settings(), ConversationId::FIRST, "  padded  ").await;

        let first = &state.active_conversation().unwrap().messages()[0];
        assert_eq!(first.text(), "  padded  ");
        assert_eq!(client.recorded()[0].contents[1].parts[0].text, "  padded  ");
    }

    #[tokio::test]
    async fn test_request_carries_system_instruction_and_full_history() {
        let mut state = SessionState::initial();
        let client = ScriptedClient::new(vec![
            Ok(text_body("first")),
            Err(ProviderError::timeout("x")),
        ]);
        let settings = settings();
        let id = ConversationId::FIRST;

        send_turn(&mut state, &client, &settings, id, "one").await;
        send_turn(&mut state, &client, &settings, id, "two").await;

        let requests = client.recorded();
        assert_eq!(requests.len(), 2);
        let second = &requests[1];
        let roles: Vec<_> = second.contents.iter().map(|c| c.role).collect();
        assert_eq!(roles, vec![Role::User, Role::User, Role::Model, Role::User]);
        assert_eq!(second.contents[0].parts[0].text, settings.system_instruction);
        assert_eq!(second.contents[2].parts[0].text, "first");
        assert_eq!(second.contents[3].parts[0].text, "two");
        assert_eq!(second.generation_config, settings.generation);
        assert_eq!(second.safety_settings, settings.safety_settings);
    }

    #[test]
    fn test_build_request_for_empty_history() {
        let request = build_request(&settings(), &[]);
        assert_eq!(request.contents.len(), 1);
        assert_eq!(request.contents[0].role, Role::User);
    }

    #[test]
    fn test_counter_counts_replies_and_empties_but_not_failures() {
        let mut counter = QuestionCounter::new(6);
        counter.record(&TurnOutcome::Replied("a".to_string()));
        counter.record(&TurnOutcome::Empty);
        counter.record(&TurnOutcome::Failed(ProviderError::timeout("t")));
        assert_eq!(counter.count(), 2);
    }

    #[test]
    fn test_counter_saturates_and_resets() {
        let mut counter = QuestionCounter::default();
        for _ in 0..10 {
            counter.record(&TurnOutcome::Empty);
        }
        assert_eq!(counter.count(), DEFAULT_MAX_QUESTIONS);
        assert!(counter.is_exhausted());

        counter.reset();
        assert_eq!(counter.count(), 0);
        assert!(!counter.is_exhausted());
    }

    #[test]
    fn test_reply_texts() {
        assert_eq!(TurnOutcome::Replied("x".into()).reply_text(), "x");
        assert_eq!(TurnOutcome::Empty.reply_text(), "No response.");
        assert_eq!(
            TurnOutcome::Failed(ProviderError::timeout("t")).reply_text(),
            "Error occurred."
        );
    }

    #[tokio::test]
    async fn test_title_is_set_even_when_turn_fails() {
        let mut state = SessionState::initial();
        assert_eq!(state.active_conversation().unwrap().title(), PLACEHOLDER_TITLE);
        let client = ScriptedClient::new(vec![Err(ProviderError::timeout("t"))]);
        send_turn(&mut state, &client, &settings(), ConversationId::FIRST, "Short of breath").await;
        assert_eq!(state.active_conversation().unwrap().title(), "Short of breath");
    }
}
