//! card-reader: generate the message for one drawn card
//!
//! Loads canon from a directory of per-card documents, talks to an
//! OpenAI-compatible endpoint, and prints the generation result as JSON.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use canon::FileCanonSource;
use card_agent::{CardMessageService, GenerationRequest, LlmBackend, OpenAiBackend};
use config::Config;

#[derive(Parser)]
#[command(name = "card-reader")]
#[command(about = "Generate the reflective message for one card in a spread")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "card-reader.yaml")]
    config: PathBuf,

    /// Directory of canon documents (<card-id>.yaml)
    #[arg(long, env = "CARD_READER_CANON_DIR", default_value = "canon")]
    canon_dir: PathBuf,

    /// Spread identifier
    #[arg(long)]
    spread: String,

    /// Position identifier (e.g. past-1, present, future-2)
    #[arg(long)]
    position: String,

    /// Intention identifier
    #[arg(long)]
    intention_id: String,

    /// Intention text, verbatim
    #[arg(long)]
    intention: String,

    /// Card identifier used for canon lookup
    #[arg(long)]
    card: String,

    /// Card display name
    #[arg(long)]
    card_name: String,

    /// Card was drawn reversed
    #[arg(long)]
    reversed: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("card_agent=info".parse()?)
                .add_directive("card_reader=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    info!(
        model = %config.backend.model,
        base_url = %config.backend.base_url,
        canon_dir = %cli.canon_dir.display(),
        "Starting card-reader"
    );

    let backend: Arc<dyn LlmBackend> = Arc::new(OpenAiBackend::with_timeout(
        config.backend.base_url.clone(),
        config.backend.model.clone(),
        config.backend.api_key(),
        Duration::from_secs(config.backend.timeout_secs),
    )?);
    let canon = Arc::new(FileCanonSource::new(&cli.canon_dir));
    let service = CardMessageService::new(vec![backend], canon).with_config(config.generation)?;

    let request = GenerationRequest::new(
        cli.spread,
        cli.position,
        cli.intention_id,
        cli.intention,
        cli.card,
        cli.card_name,
    )
    .with_reversed(cli.reversed);

    match service.generate_card_message(request).await {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Generation failed");
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
