//! The onboarding conversation: scripted questions, then a model-written
//! summary, then free-form follow-up questions answered by the model.

use std::sync::Arc;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, error, info, warn};

use crate::constants::{DEFAULT_QUESTIONS, FALLBACK_MESSAGE};
use crate::error::{ConfigError, ModelError};
use crate::llm_interaction::ModelClient;
use crate::markup::{self, DisplaySegment};

/// Coarse conversation state. Progresses Questions → Summary → Followup and
/// never goes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationPhase {
    /// Asking the scripted onboarding questions.
    #[default]
    Questions,
    /// All questions answered; waiting for the model's summary.
    Summary,
    /// Free-form questions answered with the profile as context.
    Followup,
}

impl ConversationPhase {
    pub fn next(&self) -> Option<ConversationPhase> {
        match self {
            Self::Questions => Some(Self::Summary),
            Self::Summary => Some(Self::Followup),
            Self::Followup => None,
        }
    }

    pub fn can_transition_to(&self, target: ConversationPhase) -> bool {
        self.next() == Some(target)
    }
}

impl std::fmt::Display for ConversationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Questions => "questions",
            Self::Summary => "summary",
            Self::Followup => "followup",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Bot,
}

/// One transcript entry. Timestamps are produced by whoever renders it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
    pub sender: Sender,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender: Sender::User,
        }
    }

    pub fn bot(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender: Sender::Bot,
        }
    }

    /// Bot text goes through the markup renderer; user text is shown as typed.
    pub fn segments(&self) -> Vec<DisplaySegment> {
        match self.sender {
            Sender::Bot => markup::render(&self.text),
            Sender::User => vec![DisplaySegment::plain(self.text.clone())],
        }
    }
}

/// Answers to the onboarding questions, in question order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserProfile {
    entries: Vec<(String, String)>,
}

impl UserProfile {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, question: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(q, _)| q == question)
            .map(|(_, answer)| answer.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(q, a)| (q.as_str(), a.as_str()))
    }

    /// Records an answer. An existing answer is never replaced; returns
    /// whether the entry was added.
    fn record(&mut self, question: impl Into<String>, answer: impl Into<String>) -> bool {
        let question = question.into();
        if self.get(&question).is_some() {
            warn!(%question, "Question already answered, keeping the first answer");
            return false;
        }
        self.entries.push((question, answer.into()));
        true
    }

    /// `"{question} {answer}"` per line, used for the summary request.
    pub fn summary_lines(&self) -> String {
        self.iter()
            .map(|(question, answer)| format!("{} {}", question, answer))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// `"{question}: {answer}"` pairs joined by `"; "`, with the question's
    /// trailing question mark dropped. Sent along with follow-up questions.
    pub fn context(&self) -> String {
        self.iter()
            .map(|(question, answer)| {
                let question = question.strip_suffix('?').unwrap_or(question);
                format!("{}: {}", question, answer)
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl Serialize for UserProfile {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (question, answer) in &self.entries {
            map.serialize_entry(question, answer)?;
        }
        map.end()
    }
}

/// Builds the request for the post-onboarding summary.
pub fn summary_prompt(profile: &UserProfile) -> String {
    format!(
        "Based on the following user information, provide a personalized health summary and recommendations:\n{}\n\
         Include: 1) A brief summary of their health goals, 2) 2-3 personalized recommendations, and 3) A motivational message. \
         End by asking if they have any specific health questions.",
        profile.summary_lines()
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Summary,
    Followup,
}

/// A model call the conversation is waiting on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRequest {
    pub kind: RequestKind,
    pub prompt: String,
    pub context: Option<String>,
}

impl ModelRequest {
    pub async fn send(&self, client: &dyn ModelClient) -> Result<String, ModelError> {
        client.generate(&self.prompt, self.context.as_deref()).await
    }
}

/// What [`Conversation::begin_submit`] did with the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Nothing was recorded: blank input, or input while a summary is pending.
    Ignored,
    /// The answer was stored and the next scripted question asked.
    NextQuestion,
    /// The reply must come from the model; pass the outcome to
    /// [`Conversation::complete`].
    AwaitingModel(ModelRequest),
}

/// Conversation state for one session.
pub struct Conversation {
    client: Arc<dyn ModelClient>,
    questions: Vec<String>,
    transcript: Vec<Message>,
    question_index: usize,
    profile: UserProfile,
    phase: ConversationPhase,
    is_loading: bool,
    input_buffer: String,
}

impl Conversation {
    pub fn new(client: Arc<dyn ModelClient>, questions: Vec<String>) -> Result<Self, ConfigError> {
        if questions.is_empty() {
            return Err(ConfigError::EmptyQuestionnaire);
        }
        for (i, question) in questions.iter().enumerate() {
            if questions[..i].contains(question) {
                return Err(ConfigError::DuplicateQuestion(question.clone()));
            }
        }

        Ok(Self::from_questions(client, questions))
    }

    pub fn with_default_questions(client: Arc<dyn ModelClient>) -> Self {
        let questions = DEFAULT_QUESTIONS.iter().map(|q| q.to_string()).collect();
        Self::from_questions(client, questions)
    }

    fn from_questions(client: Arc<dyn ModelClient>, questions: Vec<String>) -> Self {
        Self {
            client,
            questions,
            transcript: Vec::new(),
            question_index: 0,
            profile: UserProfile::default(),
            phase: ConversationPhase::default(),
            is_loading: false,
            input_buffer: String::new(),
        }
    }

    /// Asks the first question. Does nothing once the transcript has content.
    pub fn initialize(&mut self) {
        if !self.transcript.is_empty() {
            return;
        }
        if let Some(question) = self.current_question() {
            let question = question.to_string();
            self.transcript.push(Message::bot(question));
        }
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    pub fn phase(&self) -> ConversationPhase {
        self.phase
    }

    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    pub fn questions(&self) -> &[String] {
        &self.questions
    }

    /// Number of questions answered so far; equals the question count once
    /// onboarding is done.
    pub fn question_index(&self) -> usize {
        self.question_index
    }

    pub fn current_question(&self) -> Option<&str> {
        self.questions.get(self.question_index).map(String::as_str)
    }

    /// True while a model call is outstanding. Presentations use it to
    /// block further submissions.
    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn client(&self) -> Arc<dyn ModelClient> {
        self.client.clone()
    }

    pub fn input(&self) -> &str {
        &self.input_buffer
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input_buffer = text.into();
    }

    /// Each transcript message with its display segments.
    pub fn rendered_transcript(&self) -> Vec<(&Message, Vec<DisplaySegment>)> {
        self.transcript
            .iter()
            .map(|message| (message, message.segments()))
            .collect()
    }

    /// Handles one user message, calling the model when the phase needs it.
    pub async fn submit(&mut self, user_text: &str) {
        if let Submission::AwaitingModel(request) = self.begin_submit(user_text) {
            let outcome = request.send(self.client.as_ref()).await;
            self.complete(&request, outcome);
        }
    }

    /// Submits the input buffer and clears it.
    pub async fn submit_input(&mut self) {
        if let Submission::AwaitingModel(request) = self.begin_submit_input() {
            let outcome = request.send(self.client.as_ref()).await;
            self.complete(&request, outcome);
        }
    }

    /// [`Conversation::begin_submit`] on the input buffer, which is cleared.
    pub fn begin_submit_input(&mut self) -> Submission {
        let text = std::mem::take(&mut self.input_buffer);
        self.begin_submit(&text)
    }

    /// Records the user's message and decides what happens next, without
    /// awaiting anything. A returned [`Submission::AwaitingModel`] leaves the
    /// conversation loading until [`Conversation::complete`] is called.
    pub fn begin_submit(&mut self, user_text: &str) -> Submission {
        if user_text.trim().is_empty() {
            debug!("Ignoring blank submission");
            return Submission::Ignored;
        }

        match self.phase {
            ConversationPhase::Questions => self.answer_question(user_text),
            ConversationPhase::Summary => {
                warn!("Submission received while the summary is pending; ignoring it");
                Submission::Ignored
            }
            ConversationPhase::Followup => {
                self.transcript.push(Message::user(user_text));
                self.is_loading = true;
                Submission::AwaitingModel(ModelRequest {
                    kind: RequestKind::Followup,
                    prompt: user_text.to_string(),
                    context: Some(self.profile.context()),
                })
            }
        }
    }

    /// Appends the model's reply, or the fallback message if the call failed,
    /// and clears the loading flag.
    pub fn complete(&mut self, request: &ModelRequest, outcome: Result<String, ModelError>) {
        let reply = match outcome {
            Ok(text) => text,
            Err(e) => {
                error!("Error generating response: {}", e);
                FALLBACK_MESSAGE.to_string()
            }
        };
        self.transcript.push(Message::bot(reply));

        if request.kind == RequestKind::Summary && self.phase == ConversationPhase::Summary {
            self.advance_phase(ConversationPhase::Followup);
        }
        self.is_loading = false;
    }

    fn answer_question(&mut self, answer: &str) -> Submission {
        let Some(question) = self.current_question().map(str::to_string) else {
            // Unreachable: the index only leaves range together with the phase.
            warn!("No question left to answer");
            return Submission::Ignored;
        };

        self.transcript.push(Message::user(answer));
        self.profile.record(question, answer);
        self.question_index += 1;

        if let Some(next) = self.current_question() {
            let next = next.to_string();
            debug!(index = self.question_index, "Asking next question");
            self.transcript.push(Message::bot(next));
            return Submission::NextQuestion;
        }

        self.advance_phase(ConversationPhase::Summary);
        self.is_loading = true;
        Submission::AwaitingModel(ModelRequest {
            kind: RequestKind::Summary,
            prompt: summary_prompt(&self.profile),
            context: None,
        })
    }

    fn advance_phase(&mut self, target: ConversationPhase) {
        debug_assert!(self.phase.can_transition_to(target));
        info!("Conversation phase {} -> {}", self.phase, target);
        self.phase = target;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct EchoClient;

    #[async_trait]
    impl ModelClient for EchoClient {
        fn name(&self) -> &str {
            "echo"
        }

        async fn generate(&self, prompt: &str, _context: Option<&str>) -> Result<String, ModelError> {
            Ok(format!("echo: {}", prompt))
        }
    }

    fn conversation(questions: &[&str]) -> Conversation {
        Conversation::new(
            Arc::new(EchoClient),
            questions.iter().map(|q| q.to_string()).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_phase_transitions_are_forward_only() {
        use ConversationPhase::*;
        assert!(Questions.can_transition_to(Summary));
        assert!(Summary.can_transition_to(Followup));
        assert!(!Questions.can_transition_to(Followup));
        assert!(!Followup.can_transition_to(Questions));
        assert!(!Summary.can_transition_to(Summary));
        assert!(Followup.next().is_none());
    }

    #[test]
    fn test_phase_display_matches_serde() {
        for phase in [
            ConversationPhase::Questions,
            ConversationPhase::Summary,
            ConversationPhase::Followup,
        ] {
            let json = serde_json::to_value(phase).unwrap();
            assert_eq!(json, serde_json::Value::String(phase.to_string()));
        }
    }

    #[test]
    fn test_empty_questionnaire_is_rejected() {
        let result = Conversation::new(Arc::new(EchoClient), Vec::new());
        assert!(matches!(result, Err(ConfigError::EmptyQuestionnaire)));
    }

    #[test]
    fn test_duplicate_question_is_rejected() {
        let result = Conversation::new(
            Arc::new(EchoClient),
            vec!["Age?".to_string(), "Age?".to_string()],
        );
        assert!(matches!(result, Err(ConfigError::DuplicateQuestion(q)) if q == "Age?"));
    }

    #[test]
    fn test_initialize_seeds_first_question_once() {
        let mut conv = conversation(&["Name?", "Goal?"]);
        conv.initialize();
        conv.initialize();
        assert_eq!(conv.transcript(), &[Message::bot("Name?")]);
    }

    #[test]
    fn test_profile_context_drops_trailing_question_mark() {
        let mut profile = UserProfile::default();
        profile.record("What's your name?", "Ana");
        profile.record("Goal? Really?", "Run");
        assert_eq!(profile.context(), "What's your name: Ana; Goal? Really: Run");
        assert_eq!(profile.summary_lines(), "What's your name? Ana\nGoal? Really? Run");
    }

    #[test]
    fn test_profile_never_overwrites() {
        let mut profile = UserProfile::default();
        assert!(profile.record("Name?", "Ana"));
        assert!(!profile.record("Name?", "Bob"));
        assert_eq!(profile.get("Name?"), Some("Ana"));
        assert_eq!(profile.len(), 1);
    }

    #[test]
    fn test_profile_serializes_as_ordered_map() {
        let mut profile = UserProfile::default();
        profile.record("B?", "2");
        profile.record("A?", "1");
        let json = serde_json::to_string(&profile).unwrap();
        assert_eq!(json, r#"{"B?":"2","A?":"1"}"#);
    }

    #[test]
    fn test_summary_prompt_embeds_profile() {
        let mut profile = UserProfile::default();
        profile.record("What's your name?", "Ana");
        let prompt = summary_prompt(&profile);
        assert!(prompt.starts_with("Based on the following user information"));
        assert!(prompt.contains("\nWhat's your name? Ana\nInclude: 1) A brief summary"));
        assert!(prompt.ends_with("End by asking if they have any specific health questions."));
    }

    #[test]
    fn test_begin_submit_answers_question_without_model() {
        let mut conv = conversation(&["Name?", "Goal?"]);
        conv.initialize();
        assert_eq!(conv.begin_submit("Ana"), Submission::NextQuestion);
        assert_eq!(conv.question_index(), 1);
        assert!(!conv.is_loading());
        assert_eq!(conv.transcript().last(), Some(&Message::bot("Goal?")));
    }

    #[test]
    fn test_last_answer_requests_summary() {
        let mut conv = conversation(&["Name?"]);
        conv.initialize();
        let Submission::AwaitingModel(request) = conv.begin_submit("Ana") else {
            panic!("expected a model request");
        };
        assert_eq!(request.kind, RequestKind::Summary);
        assert!(request.context.is_none());
        assert!(request.prompt.contains("Name? Ana"));
        assert_eq!(conv.phase(), ConversationPhase::Summary);
        assert!(conv.is_loading());

        // Input that slips past the loading flag is dropped.
        assert_eq!(conv.begin_submit("hello?"), Submission::Ignored);
        assert_eq!(conv.transcript().len(), 2);

        conv.complete(&request, Ok("Summary".to_string()));
        assert_eq!(conv.phase(), ConversationPhase::Followup);
        assert!(!conv.is_loading());
    }

    #[test]
    fn test_user_message_segments_are_not_parsed() {
        let message = Message::user("**not bold**");
        assert_eq!(message.segments(), vec![DisplaySegment::plain("**not bold**")]);
        let message = Message::bot("**bold**");
        assert_eq!(message.segments(), vec![DisplaySegment::bold("bold")]);
    }

    #[tokio::test]
    async fn test_submit_input_clears_buffer() {
        let mut conv = conversation(&["Name?", "Goal?"]);
        conv.initialize();
        conv.set_input("Ana");
        conv.submit_input().await;
        assert_eq!(conv.input(), "");
        assert_eq!(conv.profile().get("Name?"), Some("Ana"));
    }
}
