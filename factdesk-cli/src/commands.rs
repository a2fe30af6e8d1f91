//! Subcommand handlers.

use crate::{Commands, ConfigAction, RunsAction};
use anyhow::Context;
use factdesk_core::config::{FactdeskConfig, load_config};
use factdesk_core::evidence::CofactsClient;
use factdesk_core::persistence::list_snapshots;
use factdesk_core::pipeline::{Orchestrator, PipelineRun, RunOutcome};
use factdesk_core::{Claim, RunState};
use std::fmt::Write as _;
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    model: Option<String>,
) -> anyhow::Result<()> {
    match command {
        Commands::Check {
            text,
            language,
            article_id,
            submit,
            json,
        } => {
            let config = load(workspace, model)?;
            let mut claim = Claim::new(text);
            if let Some(language) = language {
                claim = claim.with_language(language);
            }
            if let Some(article_id) = article_id {
                claim = claim.with_article(article_id);
            }
            run_claim(config, claim, submit, json).await
        }
        Commands::Article { id, submit, json } => {
            let config = load(workspace, model)?;
            let cofacts = CofactsClient::new(&config.sources.cofacts)?;
            let article = cofacts
                .article(&id)
                .await
                .with_context(|| format!("Failed to fetch article {id}"))?;
            let text = article
                .text
                .filter(|t| !t.trim().is_empty())
                .with_context(|| format!("Article {id} has no text"))?;
            let claim = Claim::new(text)
                .with_language(config.research.default_language.clone())
                .with_article(id);
            run_claim(config, claim, submit, json).await
        }
        Commands::Trending {
            days,
            max_replies,
            limit,
            json,
        } => {
            let config = load(workspace, model)?;
            let cofacts = CofactsClient::new(&config.sources.cofacts)?;
            let articles = cofacts.trending(days, max_replies, limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&articles)?);
                return Ok(());
            }
            if articles.is_empty() {
                println!("No articles need replies in the last {days} days.");
            }
            for article in &articles {
                let text = article.text.as_deref().unwrap_or_default();
                let preview: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
                let preview: String = preview.chars().take(80).collect();
                println!(
                    "{}  requests={} replies={}  {}",
                    article.id, article.reply_request_count, article.reply_count, preview
                );
            }
            Ok(())
        }
        Commands::Runs { action } => handle_runs(action, workspace),
        Commands::Config { action } => handle_config(action, workspace),
    }
}

fn load(workspace: &Path, model: Option<String>) -> anyhow::Result<FactdeskConfig> {
    let mut config = load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    if let Some(model) = model {
        config.llm.model = model;
    }
    for warning in config.validate() {
        warn!("{warning}");
    }
    Ok(config)
}

async fn run_claim(
    config: FactdeskConfig,
    claim: Claim,
    submit: bool,
    json: bool,
) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::from_config(config)?;
    let outcome = orchestrator.run(claim).await;

    if json {
        let value = serde_json::json!({
            "run": &outcome.run,
            "reply": &outcome.reply,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        print!("{}", format_outcome(&outcome));
    }

    if submit {
        let reply_id = orchestrator
            .publish(&outcome, None)
            .await
            .context("Reply was not published")?;
        info!(reply_id = %reply_id, "Published reply");
        if !json {
            println!("\nPublished reply {reply_id}");
        }
    }
    Ok(())
}

/// Human-readable summary of a finished run.
fn format_outcome(outcome: &RunOutcome) -> String {
    let run = &outcome.run;
    let mut out = String::new();
    let _ = writeln!(out, "Run {} {}", run.id(), run.state());
    if let Some(draft) = run.latest_draft() {
        let _ = writeln!(
            out,
            "Classification: {} (revision {})",
            draft.classification, draft.revision_number
        );
    }
    match (&outcome.reply, run.terminal()) {
        (Some(reply), _) => {
            let _ = writeln!(out, "\n{reply}");
        }
        (None, Some(reason)) if run.state() == RunState::Aborted => {
            let _ = writeln!(out, "Aborted: {reason}");
        }
        _ => {}
    }
    if !run.warnings().is_empty() {
        let _ = writeln!(out, "\nWarnings:");
        for warning in run.warnings() {
            let _ = writeln!(out, "  - {warning}");
        }
    }
    if let Some(path) = &outcome.saved_to {
        let _ = writeln!(out, "\nSaved to {}", path.display());
    }
    out
}

fn handle_runs(action: RunsAction, workspace: &Path) -> anyhow::Result<()> {
    let config = load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
    let dir = config.storage.resolved_runs_dir();
    match action {
        RunsAction::List => {
            let ids = list_snapshots(&dir)
                .with_context(|| format!("Failed to list runs in {}", dir.display()))?;
            if ids.is_empty() {
                println!("No saved runs in {}", dir.display());
            }
            for id in ids {
                println!("{id}");
            }
            Ok(())
        }
        RunsAction::Show { id } => {
            let id = Uuid::parse_str(&id).with_context(|| format!("Invalid run id: {id}"))?;
            let run = PipelineRun::load(&dir, id)?
                .with_context(|| format!("No saved run {id} in {}", dir.display()))?;
            println!("{}", serde_json::to_string_pretty(&run)?);
            Ok(())
        }
    }
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".factdesk");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = FactdeskConfig::default().to_toml_string()?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_config(Some(workspace), None)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            println!("{}", config.to_toml_string()?);
            Ok(())
        }
        ConfigAction::Validate => {
            let config = load_config(Some(workspace), None)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration OK");
            }
            for warning in warnings {
                println!("warning: {warning}");
            }
            Ok(())
        }
    }
}
