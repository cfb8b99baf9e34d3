pub mod chat;
pub mod config;
pub mod constants;
pub mod conversation;
pub mod error;
pub mod llm_interaction;
pub mod markup;
pub mod web_server;

pub use conversation::{Conversation, ConversationPhase, Message, Sender, Submission, UserProfile};
pub use error::{ConfigError, ModelError};
pub use llm_interaction::ModelClient;
pub use markup::{render, DisplaySegment};
