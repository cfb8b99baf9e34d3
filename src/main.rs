use anyhow::{Context, Result};
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::{error, info};

use healthmate::chat;
use healthmate::config::{self, ModelBackend, ModelSettings};
use healthmate::conversation::Conversation;
use healthmate::web_server::{self, WebConfig};

// Define the command-line interface structure using clap
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    model: ModelArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Options selecting the text-generation service.
#[derive(clap::Args, Debug)]
struct ModelArgs {
    #[arg(long, global = true, value_enum, env = "HEALTHMATE_BACKEND", default_value_t = ModelBackend::Gemini, help = "Text-generation backend.")]
    backend: ModelBackend,
    #[arg(long, global = true, env = "HEALTHMATE_MODEL", help = "Model name (defaults depend on the backend).")]
    model: Option<String>,
    #[arg(long, global = true, env = "HEALTHMATE_BASE_URL", help = "Override the backend's API base URL.")]
    base_url: Option<String>,
    #[arg(long, global = true, env = "GEMINI_API_KEY", hide_env_values = true, help = "API key for the Gemini backend.")]
    api_key: Option<String>,
}

impl From<ModelArgs> for ModelSettings {
    fn from(args: ModelArgs) -> Self {
        Self {
            backend: args.backend,
            model: args.model,
            base_url: args.base_url,
            api_key: args.api_key,
        }
    }
}

// Define the available subcommands
#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the HealthMate web server.
    Start {
        #[arg(long, default_value_t = 9900, help = "Port for the web server.")]
        port: u16,
        #[arg(long, default_value = "0.0.0.0", help = "Address to bind.")]
        host: IpAddr,
        #[arg(long, default_value = "templates", help = "Directory holding index.html.")]
        templates: PathBuf,
        #[arg(long, default_value = "static", help = "Directory served under /static.")]
        static_dir: PathBuf,
    },
    /// Chat with HealthMate in the terminal.
    Chat,
}

// The main entry point of the application, using tokio's async runtime
#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for environment variables like API keys)
    dotenvy::dotenv().ok();

    // Reads log level from RUST_LOG environment variable (e.g., RUST_LOG=info,healthmate=debug)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    info!("HealthMate starting with command: {:?}", cli.command);

    let settings = ModelSettings::from(cli.model);
    let client = config::create_client(&settings).context("Failed to configure the model client")?;
    let conversation = Conversation::with_default_questions(client);

    match cli.command {
        Commands::Start {
            port,
            host,
            templates,
            static_dir,
        } => {
            info!("Starting HealthMate web server on port {}...", port);
            let web_config = WebConfig {
                host,
                port,
                templates_dir: templates,
                static_dir,
            };

            let mut web_server_handle = tokio::spawn(async move {
                if let Err(e) = web_server::start_web_server(web_config, conversation).await {
                    error!("Web server failed: {:?}", e);
                }
            });

            let ctrl_c = tokio::signal::ctrl_c();
            // Pin the ctrl_c future to the stack so its address is stable
            tokio::pin!(ctrl_c);

            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("Ctrl-C received, initiating shutdown...");
                }
                res = &mut web_server_handle => {
                    match res {
                        Ok(_) => info!("Web server task completed unexpectedly."),
                        Err(e) if e.is_panic() => error!("Web server task panicked: {:?}", e),
                        Err(e) => error!("Web server task failed: {:?}", e),
                    }
                }
            }

            if !web_server_handle.is_finished() {
                info!("Aborting web server task...");
                web_server_handle.abort();
            }
            info!("Shutdown complete.");
        }
        Commands::Chat => {
            chat::run_terminal_chat(conversation)
                .await
                .context("Chat session failed")?;
        }
    }

    Ok(())
}
