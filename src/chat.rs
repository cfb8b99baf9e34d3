// Terminal front end for the conversation.

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::info;

use crate::conversation::{Conversation, Sender, Submission};
use crate::markup::DisplaySegment;

const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Formats rendered segments for an ANSI terminal.
pub fn format_segments(segments: &[DisplaySegment]) -> String {
    let mut out = String::new();
    for segment in segments {
        let text = segment.text();
        match segment {
            DisplaySegment::PlainText { .. } => out.push_str(text),
            DisplaySegment::BoldText { .. } => {
                out.push_str(BOLD);
                out.push_str(text);
                out.push_str(RESET);
            }
            DisplaySegment::BulletItem { .. } => {
                start_line(&mut out);
                out.push_str(&format!("  ● {}\n", text));
            }
            DisplaySegment::NumberedItem { ordinal, .. } => {
                start_line(&mut out);
                out.push_str(&format!("  {}. {}\n", ordinal, text));
            }
        }
    }
    out.trim_end().to_string()
}

fn start_line(out: &mut String) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

async fn print_new_messages<W: AsyncWrite + Unpin>(
    out: &mut W,
    conversation: &Conversation,
    printed: &mut usize,
) -> Result<()> {
    for message in &conversation.transcript()[*printed..] {
        if message.sender == Sender::Bot {
            let body = format_segments(&message.segments());
            out.write_all(format!("\nHealthMate: {}\n", body).as_bytes())
                .await?;
        }
    }
    *printed = conversation.transcript().len();
    out.flush().await?;
    Ok(())
}

async fn handle_line<W: AsyncWrite + Unpin>(
    out: &mut W,
    conversation: &mut Conversation,
    line: String,
    printed: &mut usize,
) -> Result<()> {
    conversation.set_input(line);
    if let Submission::AwaitingModel(request) = conversation.begin_submit_input() {
        out.write_all(b"(thinking...)\n").await?;
        out.flush().await?;
        let outcome = request.send(conversation.client().as_ref()).await;
        conversation.complete(&request, outcome);
    }
    print_new_messages(out, conversation, printed).await
}

/// Runs the conversation over stdin/stdout until EOF, `exit` or `quit`.
pub async fn run_terminal_chat(mut conversation: Conversation) -> Result<()> {
    info!("Starting terminal chat session...");
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut printed = 0;

    conversation.initialize();
    print_new_messages(&mut stdout, &conversation, &mut printed).await?;

    loop {
        stdout.write_all(b"\nYou: ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await.context("Failed to read from stdin")? else {
            break;
        };
        if matches!(line.trim(), "exit" | "quit") {
            break;
        }

        handle_line(&mut stdout, &mut conversation, line, &mut printed).await?;
    }

    info!("Chat session finished.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::llm_interaction::ModelClient;
    use async_trait::async_trait;
    use std::sync::Arc;

    #[test]
    fn test_format_plain_and_bold() {
        let segments = vec![
            DisplaySegment::bold("Diet:"),
            DisplaySegment::plain(" eat more greens"),
        ];
        assert_eq!(
            format_segments(&segments),
            "\x1b[1mDiet:\x1b[0m eat more greens"
        );
    }

    #[test]
    fn test_list_items_start_on_their_own_line() {
        let segments = vec![
            DisplaySegment::plain("Try:"),
            DisplaySegment::bullet("walking"),
            DisplaySegment::numbered(2, "yoga"),
        ];
        assert_eq!(format_segments(&segments), "Try:\n  ● walking\n  2. yoga");
    }

    #[test]
    fn test_empty_segments() {
        assert_eq!(format_segments(&[]), "");
    }

    struct CannedClient;

    #[async_trait]
    impl ModelClient for CannedClient {
        fn name(&self) -> &str {
            "canned"
        }

        async fn generate(&self, _prompt: &str, _context: Option<&str>) -> Result<String, ModelError> {
            Ok("**Summary:** rest".to_string())
        }
    }

    async fn run_lines(lines: &[&str]) -> String {
        let questions = vec!["Name?".to_string(), "Goal?".to_string()];
        let mut conversation = Conversation::new(Arc::new(CannedClient), questions).unwrap();
        conversation.initialize();
        let mut printed = conversation.transcript().len();
        let mut out = Vec::new();
        for line in lines {
            handle_line(&mut out, &mut conversation, line.to_string(), &mut printed)
                .await
                .unwrap();
        }
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_thinking_only_shown_for_model_calls() {
        let output = run_lines(&["Ana", "   "]).await;
        assert_eq!(output, "\nHealthMate: Goal?\n");

        let output = run_lines(&["Ana", "Sleep", "Tips?"]).await;
        assert_eq!(output.matches("(thinking...)").count(), 2);
        assert!(output.starts_with("\nHealthMate: Goal?\n(thinking...)\n"));
        assert!(output.contains("HealthMate: \x1b[1mSummary:\x1b[0m rest"));
    }
}
