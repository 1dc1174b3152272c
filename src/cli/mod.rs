//! Command-line entry: argument parsing, settings resolution, and runtime
//! bootstrap for the chat UI.

use std::env;
use std::error::Error;
use std::fs::OpenOptions;
use std::process;
use std::sync::Mutex;

use clap::{Parser, Subcommand};
use tokio::runtime::Runtime;

use crate::core::app::SessionContext;
use crate::core::config::Config;
use crate::ui::chat_loop::run_chat;
use crate::utils::logging::LoggingState;

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Parser, Debug)]
#[command(
    name = "causerie",
    version,
    about = "Chat with OpenAI-compatible APIs from your terminal",
    long_about = "A minimal terminal chat client for OpenAI-compatible APIs.\n\
Replies stream in as they are generated; Esc interrupts a reply in flight\n\
and keeps what already arrived."
)]
pub struct Args {
    /// Model to chat with
    #[arg(short, long)]
    pub model: Option<String>,

    /// Base URL of the OpenAI-compatible API
    #[arg(long)]
    pub base_url: Option<String>,

    /// Append the transcript to this file
    #[arg(short, long)]
    pub log: Option<String>,

    /// Skip the config file; resolve everything from flags and environment
    #[arg(long)]
    pub env_only: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Store a model name in the config file as the default
    SetDefaultModel { model: String },
}

pub fn main() {
    let args = Args::parse();

    if let Some(command) = args.command {
        let result = match command {
            Commands::SetDefaultModel { model } => set_default_model(&model),
        };
        if let Err(e) = result {
            eprintln!("Error: {e}");
            process::exit(1);
        }
        return;
    }

    init_debug_logging();

    let runtime = match Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start async runtime: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run_interactive(args)) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run_interactive(args: Args) -> Result<(), Box<dyn Error>> {
    let config = if args.env_only {
        Config::default()
    } else {
        Config::load()?
    };

    let api_key = match resolve_api_key(env_var("OPENAI_API_KEY"), config.api_key.clone()) {
        Some(key) => key,
        None => {
            eprintln!("No API key configured.");
            eprintln!(
                "Set the OPENAI_API_KEY environment variable, or add `api_key = \"...\"` \
to the causerie config.toml."
            );
            process::exit(1);
        }
    };

    let model = resolve_model(args.model, config.default_model);
    let base_url = resolve_base_url(args.base_url, env_var("OPENAI_BASE_URL"), config.base_url);
    let logging = LoggingState::new(args.log)?;

    let session = SessionContext::new(
        reqwest::Client::new(),
        model,
        api_key,
        base_url,
        logging,
    );
    run_chat(session).await
}

fn set_default_model(model: &str) -> Result<(), Box<dyn Error>> {
    let mut config = Config::load()?;
    config.default_model = Some(model.to_string());
    config.save()?;
    println!("Default model set to {model}");
    Ok(())
}

/// An environment variable, with "set but empty" treated as unset.
fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

fn resolve_api_key(env_value: Option<String>, config_value: Option<String>) -> Option<String> {
    env_value.or(config_value)
}

fn resolve_model(flag: Option<String>, config_value: Option<String>) -> String {
    flag.or(config_value)
        .unwrap_or_else(|| DEFAULT_MODEL.to_string())
}

fn resolve_base_url(
    flag: Option<String>,
    env_value: Option<String>,
    config_value: Option<String>,
) -> String {
    flag.or(env_value)
        .or(config_value)
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
}

/// Debug traces are opt-in: set CAUSERIE_DEBUG to a file path. Nothing may
/// write to the terminal itself once the UI owns it.
fn init_debug_logging() {
    let Some(path) = env_var("CAUSERIE_DEBUG") else {
        return;
    };
    let Ok(file) = OpenOptions::new().create(true).append(true).open(&path) else {
        eprintln!("Warning: cannot open debug log {path}; continuing without it");
        return;
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse() {
        let args = Args::try_parse_from([
            "causerie",
            "-m",
            "gpt-4o",
            "--base-url",
            "https://api.example.com/v1",
            "-l",
            "chat.log",
            "--env-only",
        ])
        .expect("parse");
        assert_eq!(args.model.as_deref(), Some("gpt-4o"));
        assert_eq!(args.base_url.as_deref(), Some("https://api.example.com/v1"));
        assert_eq!(args.log.as_deref(), Some("chat.log"));
        assert!(args.env_only);
        assert!(args.command.is_none());
    }

    #[test]
    fn subcommand_parses() {
        let args =
            Args::try_parse_from(["causerie", "set-default-model", "gpt-4o"]).expect("parse");
        match args.command {
            Some(Commands::SetDefaultModel { model }) => assert_eq!(model, "gpt-4o"),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn model_resolution_prefers_the_flag() {
        assert_eq!(
            resolve_model(Some("flag".into()), Some("config".into())),
            "flag"
        );
        assert_eq!(resolve_model(None, Some("config".into())), "config");
        assert_eq!(resolve_model(None, None), DEFAULT_MODEL);
    }

    #[test]
    fn base_url_resolution_orders_flag_env_config() {
        assert_eq!(
            resolve_base_url(Some("flag".into()), Some("env".into()), Some("cfg".into())),
            "flag"
        );
        assert_eq!(
            resolve_base_url(None, Some("env".into()), Some("cfg".into())),
            "env"
        );
        assert_eq!(resolve_base_url(None, None, Some("cfg".into())), "cfg");
        assert_eq!(resolve_base_url(None, None, None), DEFAULT_BASE_URL);
    }

    #[test]
    fn api_key_comes_from_env_before_config() {
        assert_eq!(
            resolve_api_key(Some("env".into()), Some("cfg".into())).as_deref(),
            Some("env")
        );
        assert_eq!(
            resolve_api_key(None, Some("cfg".into())).as_deref(),
            Some("cfg")
        );
        assert_eq!(resolve_api_key(None, None), None);
    }
}
