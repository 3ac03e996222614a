//! mkt-server: Marketer chat service binary
//!
//! Usage:
//!   mkt-server                   - Start the HTTP server
//!   mkt-server --config <path>   - Start with a TOML config file
//!   mkt-server --help            - Show help

use std::path::PathBuf;
use std::sync::Arc;

use mkt_api::AppState;
use mkt_core::{Config, GroqClient, SessionManager};
use tracing_subscriber::EnvFilter;

/// Run mode
#[derive(Debug, PartialEq, Eq)]
enum RunMode {
    /// Start the HTTP server, optionally from a config file
    Server { config_path: Option<PathBuf> },
    /// Show help
    Help,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config_path = match parse_args(&args)? {
        RunMode::Help => {
            print_help();
            return Ok(());
        }
        RunMode::Version => {
            println!("mkt-server {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        RunMode::Server { config_path } => config_path,
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // Load .env file
    dotenvy::dotenv().ok();

    // 設定の読み込み (API キーが無ければここで終了)
    let config = Config::load(config_path.as_deref())
        .map_err(|e| anyhow::anyhow!("Config error: {}", e))?;

    tracing::info!("Starting mkt-server...");
    tracing::info!(
        "Model: {} ({:?} prompt, stream={})",
        config.llm.model,
        config.llm.prompt_mode,
        config.llm.stream
    );

    let client = GroqClient::new(&config)
        .map_err(|e| anyhow::anyhow!("Failed to create LLM client: {}", e))?;

    let state = AppState::new(config, Arc::new(client), Arc::new(SessionManager::new()));

    tracing::info!("Press Ctrl+C to exit");
    mkt_api::start_server(state, shutdown_signal()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Parse command line arguments
fn parse_args(args: &[String]) -> anyhow::Result<RunMode> {
    let mut config_path = None;
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(RunMode::Help),
            "--version" | "-v" => return Ok(RunMode::Version),
            "--config" | "-c" => {
                let path = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--config requires a path"))?;
                config_path = Some(PathBuf::from(path));
            }
            other => anyhow::bail!("Unknown argument: {} (see --help)", other),
        }
    }

    Ok(RunMode::Server { config_path })
}

/// Resolves on Ctrl+C
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down...");
}

/// Print help message
fn print_help() {
    println!("mkt-server - Digital marketing chat assistant");
    println!();
    println!("Usage:");
    println!("  mkt-server                   Start the HTTP server");
    println!("  mkt-server --config <path>   Load settings from a TOML file (default: marketer.toml if present)");
    println!("  mkt-server --help            Show this help message");
    println!("  mkt-server --version         Show version");
    println!();
    println!("Environment Variables:");
    println!("  GROQ_API_KEY         Groq API key (required, API_KEY also accepted)");
    println!("  LLM_MODEL            Model name (default: llama-3.3-70b-versatile)");
    println!("  LLM_BASE_URL         API endpoint (default: https://api.groq.com/openai/v1)");
    println!("  LLM_MAX_TOKENS       Reply token limit (default: 500)");
    println!("  LLM_TEMPERATURE      Sampling temperature (default: 0.7)");
    println!("  LLM_STREAM           Stream replies from the upstream (default: false)");
    println!("  LLM_PROMPT_MODE      template or native (default: template)");
    println!("  LLM_TIMEOUT_SECS     Upstream request timeout (default: 120)");
    println!("  PORT                 HTTP port (default: 8000, API_PORT also accepted)");
    println!("  API_ALLOWED_ORIGINS  Comma-separated CORS origins (default: any)");
    println!("  STATIC_DIR           Frontend directory (default: static)");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        assert_eq!(
            parse_args(&[]).unwrap(),
            RunMode::Server { config_path: None }
        );
        assert_eq!(parse_args(&args(&["-h"])).unwrap(), RunMode::Help);
        assert_eq!(parse_args(&args(&["--version"])).unwrap(), RunMode::Version);
        assert_eq!(
            parse_args(&args(&["--config", "prod.toml"])).unwrap(),
            RunMode::Server {
                config_path: Some(PathBuf::from("prod.toml"))
            }
        );
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(parse_args(&args(&["--config"])).is_err());
        assert!(parse_args(&args(&["--bogus"])).is_err());
    }
}
