use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use courier_auth::JwtVerifier;
use courier_client::{InboundMessage, ReconnectController, ReconnectOptions, TungsteniteConnector};
use courier_config::load as load_config;
use courier_gateway::create_router;
use courier_protocol::{ChatMessage, Envelope, Identity};
use courier_runtime::{telemetry, CourierServices};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "Courier real-time messaging hub (serves by default)")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP and websocket server
    Serve,
    /// Mint a bearer token for a user with the configured secret
    IssueToken {
        #[arg(long)]
        user: String,
    },
    /// Connect to a hub and chat from the terminal
    Connect {
        /// Identity to connect as; a token is minted locally when --token is absent
        #[arg(long)]
        user: String,
        #[arg(long)]
        token: Option<String>,
        /// Overrides client.url from the configuration
        #[arg(long)]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_server().await,
        Commands::IssueToken { user } => issue_token(&user),
        Commands::Connect { user, token, url } => run_client(user, token, url).await,
    }
}

async fn run_server() -> anyhow::Result<()> {
    telemetry::init_tracing().context("failed to initialise tracing")?;

    info!("starting Courier hub");

    let config = load_config().context("failed to load configuration")?;

    let services = CourierServices::initialise(&config)
        .await
        .context("failed to initialise courier services")?;

    let app = create_router(services.gateway_state());

    let address = format!("{}:{}", config.http.address, config.http.port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind http listener on {address}"))?;

    info!(%address, "http server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(courier_runtime::shutdown_signal())
        .await
        .context("http server error")?;

    services.hub.shutdown().await;
    info!("hub shut down");
    Ok(())
}

fn issue_token(user: &str) -> anyhow::Result<()> {
    let config = load_config().context("failed to load configuration")?;
    let verifier = JwtVerifier::new(&config.auth);
    let token = verifier
        .issue(&Identity::from(user))
        .context("failed to mint token")?;
    println!("{token}");
    Ok(())
}

async fn run_client(user: String, token: Option<String>, url: Option<String>) -> anyhow::Result<()> {
    telemetry::init_tracing().context("failed to initialise tracing")?;

    let config = load_config().context("failed to load configuration")?;
    let identity = Identity::from(user.as_str());
    let token = match token {
        Some(token) => token,
        None => JwtVerifier::new(&config.auth)
            .issue(&identity)
            .context("failed to mint token")?,
    };
    let url = url.unwrap_or_else(|| config.client.url.clone());

    let connector = Arc::new(TungsteniteConnector::new(url.clone()));
    let controller = ReconnectController::new(connector, token, ReconnectOptions::from(&config.client));

    let mut statuses = controller.status_events();
    tokio::spawn(async move {
        while let Ok(status) = statuses.recv().await {
            println!("* {status}");
        }
    });

    let mut messages = controller.messages();
    tokio::spawn(async move {
        while let Ok(message) = messages.recv().await {
            print_inbound(message);
        }
    });

    controller.connect().await?;

    println!("Courier client for {identity} on {url}");
    println!("Type '/to <user> <text>', '/group <id> <text>', '/status', '/reset' or '/quit'");
    println!("---");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let result = match parse_line(line, &identity) {
            Ok(LineCommand::Quit) => break,
            Ok(LineCommand::Status) => {
                println!("* {} (attempts: {})", controller.status(), controller.attempts());
                Ok(())
            }
            Ok(LineCommand::Reset) => controller.reset_connection().await,
            Ok(LineCommand::Send(message)) => controller.send_message(message).await,
            Err(error) => {
                println!("! {error}");
                continue;
            }
        };

        if let Err(error) = result {
            println!("! {error}");
        }
    }

    controller.dispose().await?;
    Ok(())
}

enum LineCommand {
    Send(ChatMessage),
    Status,
    Reset,
    Quit,
}

fn parse_line(line: &str, identity: &Identity) -> anyhow::Result<LineCommand> {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    match command {
        "/quit" | "/q" => Ok(LineCommand::Quit),
        "/status" => Ok(LineCommand::Status),
        "/reset" => Ok(LineCommand::Reset),
        "/to" | "/group" => {
            let Some((target, text)) = rest.trim().split_once(' ') else {
                bail!("usage: {command} <target> <text>");
            };
            let message = if command == "/to" {
                ChatMessage::direct(identity.clone(), target, text)
            } else {
                ChatMessage::group(identity.clone(), target, text)
            };
            Ok(LineCommand::Send(message))
        }
        other => bail!("unknown command {other}"),
    }
}

fn print_inbound(message: InboundMessage) {
    match message {
        InboundMessage::Typed(Envelope::Message(chat)) => {
            let origin = chat
                .group_id
                .as_deref()
                .map(|group| format!("{} in {group}", chat.sender_id))
                .unwrap_or_else(|| chat.sender_id.to_string());
            println!("[{}] {origin}: {}", chat.status, chat.content);
        }
        InboundMessage::Typed(Envelope::Notification(payload)) => println!("(notification) {payload}"),
        InboundMessage::Typed(Envelope::System(notice)) => println!("(system) {}", notice.message),
        InboundMessage::Typed(_) => {}
        InboundMessage::Json(value) => println!("(json) {value}"),
        InboundMessage::Raw(text) => println!("(raw) {text}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_direct_and_group_lines() {
        let me = Identity::from("alice");

        match parse_line("/to bob hello there", &me).unwrap() {
            LineCommand::Send(message) => {
                assert_eq!(message.receiver_id, Some(Identity::from("bob")));
                assert_eq!(message.content, "hello there");
            }
            _ => panic!("expected a direct message"),
        }

        match parse_line("/group g-1 hi all", &me).unwrap() {
            LineCommand::Send(message) => assert_eq!(message.group_id.as_deref(), Some("g-1")),
            _ => panic!("expected a group message"),
        }
    }

    #[test]
    fn rejects_incomplete_send() {
        let me = Identity::from("alice");
        assert!(parse_line("/to bob", &me).is_err());
        assert!(parse_line("/dance", &me).is_err());
    }
}
