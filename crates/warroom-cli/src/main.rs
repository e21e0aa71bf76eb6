//! Stream a WarRoom chat response to the terminal.

mod config;
mod output;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use tracing::info;
use warroom_stream::observability::init_observability;
use warroom_stream::prelude::*;
use warroom_stream::NoAuth;

use crate::output::{DualProgress, TerminalPrinter};

#[derive(Debug, Parser)]
#[command(name = "warroom", version, about = "Stream a WarRoom chat response")]
struct Cli {
    /// Message to send.
    prompt: String,
    /// Ask both models and merge their answers; falls back to a single
    /// stream when the dual stream fails.
    #[arg(long)]
    dual: bool,
    /// System prompt prepended to the conversation.
    #[arg(long)]
    system: Option<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    temperature: Option<f32>,
    #[arg(long)]
    agent_id: Option<String>,
    /// Backend URL; defaults to WARROOM_API_URL.
    #[arg(long)]
    base_url: Option<String>,
    #[arg(long, env = "WARROOM_API_TOKEN", hide_env_values = true)]
    token: Option<String>,
    /// Per-request timeout; defaults to WARROOM_TIMEOUT_SECS or 120.
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::init();
    init_observability();
    let cli = Cli::parse();

    let client = build_client(&cli)?;
    let turn = build_turn(&cli)?;

    let failure = if cli.dual {
        let handle = client
            .stream_with_fallback(&turn, DualProgress, TerminalPrinter)
            .await?;
        let outcome = finish_on_ctrl_c(handle).await?;
        if let TurnOutcome::Fallback { dual_failure, .. } = &outcome {
            info!(error = %dual_failure, "answered from single stream after dual failure");
        }
        match outcome {
            TurnOutcome::Dual(DualOutcome::Cancelled { .. })
            | TurnOutcome::Fallback {
                single: SingleOutcome::Cancelled { .. },
                ..
            } => return cancelled(),
            other => other.failure().cloned(),
        }
    } else {
        let handle = client.stream_single(&turn, TerminalPrinter).await?;
        match finish_on_ctrl_c(handle).await? {
            SingleOutcome::Cancelled { .. } => return cancelled(),
            other => other.failure().cloned(),
        }
    };

    match failure {
        Some(failure) => Err(anyhow::anyhow!(failure)),
        None => Ok(()),
    }
}

fn build_client(cli: &Cli) -> anyhow::Result<StreamClient> {
    let mut config = match cli.base_url.as_deref() {
        Some(url) => ClientConfig::new(url),
        None => ClientConfig::from_env()
            .context("no backend URL: pass --base-url or set WARROOM_API_URL")?,
    };
    if let Some(secs) = cli.timeout_secs {
        config = config.timeout(Duration::from_secs(secs));
    }

    let tokens: Arc<dyn TokenProvider> = match cli.token.as_deref() {
        Some(token) => Arc::new(StaticToken::new(token)?),
        None => Arc::new(NoAuth),
    };
    Ok(StreamClient::builder(config).token_provider(tokens).build()?)
}

fn build_turn(cli: &Cli) -> anyhow::Result<ChatTurn> {
    let mut messages = Vec::new();
    if let Some(system) = cli.system.as_deref().filter(|s| !s.trim().is_empty()) {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(cli.prompt.as_str()));

    let mut options = TurnOptions::default();
    if let Some(model) = &cli.model {
        options = options.model(model.as_str());
    }
    if let Some(temperature) = cli.temperature {
        options = options.temperature(temperature);
    }
    if let Some(agent_id) = &cli.agent_id {
        options = options.agent_id(agent_id.as_str());
    }
    Ok(ChatTurn::new(messages, options)?)
}

/// Waits for the session, aborting it on Ctrl-C.
async fn finish_on_ctrl_c<O>(handle: SessionHandle<O>) -> anyhow::Result<O> {
    let abort = handle.abort_handle();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            abort.abort();
        }
    });
    let outcome = handle.finish().await;
    watcher.abort();
    Ok(outcome?)
}

fn cancelled() -> anyhow::Result<()> {
    eprintln!("\ncancelled");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_includes_system_prompt_and_options() {
        let cli = Cli::parse_from([
            "warroom",
            "hello",
            "--system",
            "be brief",
            "--model",
            "gpt-4o-mini",
            "--temperature",
            "0.2",
        ]);
        let turn = build_turn(&cli).expect("turn");
        assert_eq!(turn.messages().len(), 2);
        assert_eq!(turn.user_query(), "hello");
        assert_eq!(turn.options().model, "gpt-4o-mini");
        assert_eq!(turn.options().temperature, 0.2);
    }

    #[test]
    fn invalid_temperature_is_rejected() {
        let cli = Cli::parse_from(["warroom", "hello", "--temperature", "5"]);
        assert!(build_turn(&cli).is_err());
    }

    #[test]
    fn explicit_base_url_builds_a_client() {
        let cli = Cli::parse_from([
            "warroom",
            "hello",
            "--base-url",
            "http://localhost:3000",
            "--timeout-secs",
            "5",
        ]);
        let client = build_client(&cli).expect("client");
        assert_eq!(client.config().base_url, "http://localhost:3000");
        assert_eq!(client.config().timeout, Duration::from_secs(5));
    }
}
