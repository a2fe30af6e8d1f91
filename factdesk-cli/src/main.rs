//! Factdesk CLI: run the fact-check pipeline from the terminal.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Factdesk: multi-agent research, verification, and review of fact-check replies
#[derive(Parser, Debug)]
#[command(name = "factdesk", version, about, long_about = None)]
struct Cli {
    /// LLM model to use for every agent
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Workspace directory (reads .factdesk/config.toml)
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Fact-check a piece of text
    Check {
        /// The message to check
        text: String,

        /// Language of the message (BCP-47, e.g. zh-TW)
        #[arg(short, long)]
        language: Option<String>,

        /// Cofacts article the message was reported as
        #[arg(long)]
        article_id: Option<String>,

        /// Submit the reply to Cofacts if the run finalizes
        #[arg(long)]
        submit: bool,

        /// Print the run as JSON
        #[arg(long)]
        json: bool,
    },
    /// Fact-check a reported Cofacts article
    Article {
        /// Cofacts article id
        id: String,

        /// Submit the reply to Cofacts if the run finalizes
        #[arg(long)]
        submit: bool,

        /// Print the run as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recent Cofacts articles that still need replies
    Trending {
        /// How many days back to look
        #[arg(long, default_value_t = 7)]
        days: u32,

        /// Only articles with fewer replies than this
        #[arg(long, default_value_t = 1)]
        max_replies: u32,

        /// Maximum articles to list
        #[arg(long, default_value_t = 10)]
        limit: usize,

        /// Print articles as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect saved pipeline runs
    Runs {
        #[command(subcommand)]
        action: RunsAction,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub enum RunsAction {
    /// List saved run ids
    List,
    /// Show one saved run
    Show {
        /// Run id
        id: String,
    },
}

#[derive(clap::Subcommand, Debug)]
pub enum ConfigAction {
    /// Write a default .factdesk/config.toml in the workspace
    Init,
    /// Print the effective configuration
    Show,
    /// Report configuration problems
    Validate,
}

fn log_filter(verbose: u8, quiet: bool) -> &'static str {
    match verbose {
        0 if quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Human-readable layer for stderr
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(log_filter(cli.verbose, cli.quiet)));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("org", "factdesk", "factdesk")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "factdesk.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace, cli.model).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter_levels() {
        assert_eq!(log_filter(0, true), "error");
        assert_eq!(log_filter(0, false), "info");
        assert_eq!(log_filter(1, true), "debug");
        assert_eq!(log_filter(3, false), "trace");
    }

    #[test]
    fn test_parse_check_command() {
        let cli = Cli::try_parse_from([
            "factdesk",
            "check",
            "5G towers spread viruses",
            "--language",
            "en",
            "--article-id",
            "abc123",
            "--submit",
            "-v",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Commands::Check {
                text,
                language,
                article_id,
                submit,
                json,
            } => {
                assert_eq!(text, "5G towers spread viruses");
                assert_eq!(language.as_deref(), Some("en"));
                assert_eq!(article_id.as_deref(), Some("abc123"));
                assert!(submit);
                assert!(!json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_trending_defaults() {
        let cli = Cli::try_parse_from(["factdesk", "trending"]).unwrap();
        match cli.command {
            Commands::Trending {
                days,
                max_replies,
                limit,
                json,
            } => {
                assert_eq!((days, max_replies, limit, json), (7, 1, 10, false));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["factdesk"]).is_err());
    }
}
