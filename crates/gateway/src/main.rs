use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ah_gateway::api;
use ah_gateway::bootstrap;
use ah_gateway::config::GatewayConfig;

/// Exit codes per the CLI contract: 0 normal, 2 configuration error,
/// 3 auth failure, 4 tool execution fatal.
const EXIT_CONFIG: u8 = 2;
const EXIT_AUTH: u8 = 3;

#[derive(Parser)]
#[command(name = "activityhub", version, about = "Activity stream orchestration gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway (default).
    Serve {
        #[arg(long, default_value = "activityhub.toml")]
        config: PathBuf,
    },
    /// List known session ids on a running gateway.
    ListSessions {
        #[arg(long, default_value = "http://127.0.0.1:8787")]
        url: String,
    },
    /// Cancel a running session on a gateway.
    Cancel {
        session_id: String,
        #[arg(long, default_value = "http://127.0.0.1:8787")]
        url: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        None => serve(PathBuf::from("activityhub.toml")).await,
        Some(Command::Serve { config }) => serve(config).await,
        Some(Command::ListSessions { url }) => list_sessions(&url).await,
        Some(Command::Cancel { session_id, url }) => cancel(&url, &session_id).await,
    }
}

async fn serve(config_path: PathBuf) -> ExitCode {
    let config = match GatewayConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let listen = config.listen.clone();
    let state = match bootstrap::build_state(config) {
        Ok(state) => state,
        Err(e) => {
            eprintln!("bootstrap error: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let listener = match tokio::net::TcpListener::bind(&listen).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("cannot bind {listen}: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    tracing::info!(listen = %listen, "activityhub gateway up");

    let app = api::router(state);
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        eprintln!("server error: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received, draining");
}

async fn list_sessions(url: &str) -> ExitCode {
    match reqwest::get(format!("{url}/v1/sessions")).await {
        Ok(resp) if resp.status() == reqwest::StatusCode::UNAUTHORIZED => {
            eprintln!("auth failure");
            ExitCode::from(EXIT_AUTH)
        }
        Ok(resp) => match resp.json::<serde_json::Value>().await {
            Ok(body) => {
                for id in body["sessions"].as_array().into_iter().flatten() {
                    if let Some(id) = id.as_str() {
                        println!("{id}");
                    }
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("bad response: {e}");
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("cannot reach gateway at {url}: {e}");
            ExitCode::from(EXIT_CONFIG)
        }
    }
}

async fn cancel(url: &str, session_id: &str) -> ExitCode {
    let client = reqwest::Client::new();
    match client
        .post(format!("{url}/v1/sessions/{session_id}/cancel"))
        .send()
        .await
    {
        Ok(resp) if resp.status().is_success() => {
            println!("cancelled {session_id}");
            ExitCode::SUCCESS
        }
        Ok(resp) if resp.status() == reqwest::StatusCode::UNAUTHORIZED => {
            eprintln!("auth failure");
            ExitCode::from(EXIT_AUTH)
        }
        Ok(resp) => {
            eprintln!("cancel failed: HTTP {}", resp.status().as_u16());
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("cannot reach gateway at {url}: {e}");
            ExitCode::from(EXIT_CONFIG)
        }
    }
}
