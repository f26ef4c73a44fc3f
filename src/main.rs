//! agentrelay -- streaming chat relay.
//!
//! `serve` runs the HTTP relay; `chat` is a terminal Stream Consumer that
//! talks to a running relay.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use agentrelay::AppState;
use agentrelay::api;
use agentrelay::auth::StaticSessionVerifier;
use agentrelay::client::{ChatOptions, ChatSession, RelayClient, load_attachment};
use agentrelay::config::Config;
use agentrelay::providers::SdkProviderFactory;
use agentrelay::providers::types::ProviderKind;

// ---------------------------------------------------------------------------
// CLI argument parsing (minimal, no clap dependency)
// ---------------------------------------------------------------------------

enum Command {
    Serve { config_path: PathBuf },
    Chat(ChatArgs),
}

struct ChatArgs {
    url: String,
    token: Option<String>,
    options: ChatOptions,
    attachments: Vec<PathBuf>,
}

fn fail(message: &str) -> ! {
    eprintln!("Error: {message}");
    eprintln!("Run with --help for usage information.");
    std::process::exit(1);
}

fn next_value(args: &mut impl Iterator<Item = String>, flag: &str) -> String {
    args.next()
        .unwrap_or_else(|| fail(&format!("{flag} requires a value")))
}

fn parse_args() -> Command {
    let mut args = std::env::args().skip(1).peekable();

    let chat = match args.peek().map(String::as_str) {
        Some("chat") => {
            args.next();
            true
        }
        Some("serve") => {
            args.next();
            false
        }
        _ => false,
    };

    let mut config_path = PathBuf::from("agentrelay.toml");
    let mut chat_args = ChatArgs {
        url: "http://127.0.0.1:8400".to_string(),
        token: None,
        options: ChatOptions::default(),
        attachments: Vec::new(),
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" if !chat => {
                config_path = PathBuf::from(next_value(&mut args, &arg));
            }
            "--url" if chat => chat_args.url = next_value(&mut args, &arg),
            "--token" if chat => chat_args.token = Some(next_value(&mut args, &arg)),
            "--provider" if chat => {
                let value = next_value(&mut args, &arg);
                let provider = value
                    .parse::<ProviderKind>()
                    .unwrap_or_else(|e| fail(&e.to_string()));
                chat_args.options.provider = Some(provider);
            }
            "--model" if chat => chat_args.options.model = Some(next_value(&mut args, &arg)),
            "--agent" if chat => chat_args.options.agent_id = Some(next_value(&mut args, &arg)),
            "--reasoning" if chat => chat_args.options.reasoning = true,
            "--attach" if chat => chat_args.attachments.push(PathBuf::from(next_value(&mut args, &arg))),
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("agentrelay {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            other => fail(&format!("Unknown argument: {other}")),
        }
    }

    if chat {
        Command::Chat(chat_args)
    } else {
        Command::Serve { config_path }
    }
}

fn print_usage() {
    println!(
        "\
agentrelay {version} -- Streaming chat relay

USAGE:
    agentrelay [serve] [OPTIONS]
    agentrelay chat [CHAT OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file [default: agentrelay.toml]
    -h, --help             Print this help message
    -V, --version          Print version information

CHAT OPTIONS:
    --url <URL>            Relay base URL [default: http://127.0.0.1:8400]
    --token <TOKEN>        Session token sent as a Bearer credential
    --provider <NAME>      openai | bedrock
    --model <ID>           Model identifier
    --agent <ID>           Talk to an agent via /api/agents/chat
    --reasoning            Request reasoning mode
    --attach <PATH>        Attach a file to the first message (repeatable)

ENVIRONMENT:
    RUST_LOG               Override log level (e.g. RUST_LOG=debug)
    AGENTRELAY_CONFIG      Alternative to --config flag
",
        version = env!("CARGO_PKG_VERSION")
    );
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    let command = parse_args();
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build Tokio runtime")
        .block_on(async move {
            match command {
                Command::Serve { config_path } => serve(config_path).await,
                Command::Chat(args) => chat(args).await,
            }
        })
}

async fn serve(cli_config_path: PathBuf) -> anyhow::Result<()> {
    // Allow AGENTRELAY_CONFIG env var as alternative to --config flag
    let config_path = std::env::var("AGENTRELAY_CONFIG")
        .map(PathBuf::from)
        .unwrap_or(cli_config_path);

    let config = Config::load(&config_path)?;
    init_tracing(&config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        default_provider = %config.providers.default,
        on_upstream_error = %config.relay.on_upstream_error,
        "Starting agentrelay"
    );

    for (key, var) in config.env_overrides.all() {
        tracing::debug!(key = %key, env = %var, "Config value overridden from environment");
    }

    let sessions = StaticSessionVerifier::from_config(&config.auth);
    if !config.auth.enabled {
        tracing::warn!("Authentication is DISABLED -- all requests treated as signed in");
    } else if sessions.is_empty() {
        tracing::warn!("Authentication is enabled but no sessions are configured; chat routes will reject every request");
    } else {
        tracing::info!(sessions = sessions.len(), "Session tokens loaded");
    }

    let factory = Arc::new(SdkProviderFactory::from_config(&config.providers));

    let listen_addr = config.listen_addr();
    let state = AppState::with_sessions(Arc::new(config), factory, Arc::new(sessions));
    let app = api::build_app(state);

    let listener = TcpListener::bind(&listen_addr).await?;
    tracing::info!(addr = %listen_addr, "Listening");

    println!();
    println!("  agentrelay v{} is running", env!("CARGO_PKG_VERSION"));
    println!("  Chat:    http://{listen_addr}/api/chat");
    println!("  Agents:  http://{listen_addr}/api/agents/chat");
    println!("  Health:  http://{listen_addr}/health");
    println!();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down gracefully");
    Ok(())
}

// ---------------------------------------------------------------------------
// Terminal chat
// ---------------------------------------------------------------------------

async fn chat(args: ChatArgs) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut client = RelayClient::new(&args.url)?;
    if let Some(token) = args.token {
        client = client.with_session_token(token);
    }

    let mut pending_attachments = Vec::with_capacity(args.attachments.len());
    for path in &args.attachments {
        pending_attachments.push(load_attachment(path).await?);
    }

    let mut session = ChatSession::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprintln!("Connected to {}. Type a message, Ctrl+D to quit.", args.url);

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() && pending_attachments.is_empty() {
            continue;
        }

        let cancel = CancellationToken::new();
        let interrupt = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            }
        });

        let mut printed = 0;
        let result = client
            .chat(
                &mut session,
                &line,
                std::mem::take(&mut pending_attachments),
                &args.options,
                &cancel,
                |s| {
                    let reply = s.last_reply().unwrap_or_default();
                    if let Some(delta) = reply.get(printed..) {
                        print!("{delta}");
                        let _ = std::io::stdout().flush();
                    }
                    printed = reply.len();
                },
            )
            .await;
        interrupt.abort();
        println!();

        if let Some(reasoning) = session.reasoning() {
            eprintln!("[reasoning] {reasoning}");
        }
        if let Err(err) = result {
            eprintln!("error: {err}");
            session.dismiss_error();
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tracing initialization
// ---------------------------------------------------------------------------

/// Set up the tracing subscriber based on configuration.
fn init_tracing(config: &Config) {
    // RUST_LOG env var takes precedence over config file
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.logging.level;
        EnvFilter::new(format!("agentrelay={level},tower_http={level},warn"))
    });

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

/// Wait for a shutdown signal (SIGTERM or SIGINT / Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C)");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_print_usage_does_not_panic() {
        print_usage();
    }
}
