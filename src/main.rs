mod cli;

use std::io::Read;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::Cli;
use weave_core::{AgentLoop, ContextManager, ContextManagerConfig, JournalRecord, SessionJournal};
use weave_model::{catalog, ModelProvider};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = weave_config::load(cli.config.as_deref())?;
    if let Some(mode) = cli.mode {
        config.agent.default_mode = mode;
    }

    if cli.show_config {
        println!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    let prompt = match cli.prompt {
        Some(p) => p,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).context("reading prompt from stdin")?;
            buf
        }
    };

    let model: Arc<dyn ModelProvider> = Arc::from(weave_model::from_config(&config.model)?);
    let summary_cfg = config.summary_model.clone().unwrap_or_else(|| config.model.clone());
    let summarizer: Arc<dyn ModelProvider> = Arc::from(weave_model::from_config(&summary_cfg)?);

    let max_context_tokens = catalog::context_window(&config.model.provider, &config.model.name, 128_000) as usize;
    let max_output_tokens = config
        .model
        .max_tokens
        .unwrap_or_else(|| catalog::max_output_tokens(&config.model.provider, &config.model.name, 4096));

    let context_manager = ContextManager::new(
        ContextManagerConfig {
            max_context_tokens,
            reserved_output_tokens: config.agent.reserved_output_tokens,
            compaction_threshold: config.agent.compaction_threshold,
            recent_message_count: config.agent.recent_message_count,
            max_summary_messages: config.agent.max_summary_messages,
            summary_model: summary_cfg.name.clone(),
        },
        summarizer,
        Arc::new(weave_model::HeuristicTokenCounter),
    );

    // No concrete tools are wired here — that is an external-collaborator
    // concern (§1). Without a router, any tool call the model makes comes
    // back as a synthesized error result and the loop continues.
    let agent = AgentLoop::new(
        model,
        None,
        context_manager,
        config.model.name.clone(),
        None,
        vec![],
        config.agent.max_turns,
        max_output_tokens,
    );

    let response = agent.process_user_input(prompt.clone(), None).await?;
    println!("{response}");

    if let Some(session_path) = cli.session {
        let journal = SessionJournal::new(session_path);
        let created_at = journal.get("cli-session")?.map(|r| r.created_at).unwrap_or_else(Utc::now);
        journal.append(&JournalRecord {
            id: "cli-session".to_string(),
            created_at,
            updated_at: Utc::now(),
            messages: agent.messages().await,
        })?;
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(if verbose { "weave=debug,warn" } else { "warn" }));
    tracing_subscriber::registry().with(filter).with(fmt::layer().with_writer(std::io::stderr)).init();
}
