// Defaults for the assistant, overridable from the environment.

use std::env;

/// Onboarding questions asked, in order, before the first model call.
pub const DEFAULT_QUESTIONS: [&str; 5] = [
    "What's your name?",
    "What are your current health goals?",
    "Do you have any specific fitness routines you follow?",
    "How would you describe your current eating habits?",
    "Are there any specific health metrics you're trying to improve (weight, blood pressure, etc.)?",
];

/// Bot reply substituted whenever the model call fails.
pub const FALLBACK_MESSAGE: &str =
    "I'm having trouble connecting to my health database right now. Could you try again in a moment?";

/// Instruction sent ahead of every prompt. Scopes the topic and fixes the
/// markup the renderer understands.
pub const SYSTEM_PROMPT: &str = concat!(
    "You are a helpful health assistant named HealthMate that helps users track their health goals. ",
    "Your responses should be focused ONLY on health topics including weight management, fitness routines, ",
    "nutritional intake, and general wellness advice. If asked about non-health topics, gently redirect ",
    "the conversation back to health. Be supportive, motivational, and provide science-backed information. ",
    "Format your responses with clear sections using '**Section Title:**' formatting for headings. ",
    "Use bullet points with '• ' for listing items (always start with this bullet format followed by a space). ",
    "When providing numbered recommendations, use numerical format like '1. ', '2. ' (with the period and space). ",
    "Use emoji appropriately for health topics (🏃‍♂️, 🥗, 💪, ❤️, etc.) to make responses engaging. ",
    "Structure your responses with clear sections, each having a title and content. ",
    "Keep responses conversational, well-organized, and personalized to the user's information."
);

lazy_static::lazy_static! {
    pub static ref GEMINI_URL: String = env::var("GEMINI_URL").unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta".to_string());
    pub static ref GEMINI_MODEL: String = env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".to_string());
    pub static ref OLLAMA_URL: String = env::var("OLLAMA_URL").unwrap_or_else(|_| "http://127.0.0.1:11434".to_string());
    pub static ref OLLAMA_MODEL: String = env::var("OLLAMA_MODEL").unwrap_or_else(|_| "llama3.2".to_string());
}
