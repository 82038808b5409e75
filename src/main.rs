use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use std::env;
use std::path::PathBuf;

mod credentials;
mod ui;
mod utils;

use crate::credentials::{clear_session, load_session, save_session, set_session_path_override, StoredSession};
use crate::ui::{ChatUI, UiAction};
use planit_chat::{ApiClient, ChatClient, ClientConfig, Inquiry, LocalIdentity, SenderRole};

/// Command line arguments for planit-chat
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "planit-chat: terminal chat for event inquiries",
    long_about = "Chat with your planner (or client) about an event inquiry.\n\n\
    Connection settings are read from PLANIT_API_URL, PLANIT_WS_URL and PLANIT_RECONNECT_MS;\n\
    the flags below override them."
)]
struct Args {
    /// Inquiry to open; defaults to the first one in the inbox
    inquiry: Option<i64>,

    /// REST API base URL (e.g. http://localhost:8080/api/v1)
    #[arg(long)]
    api_url: Option<String>,

    /// Broker WebSocket URL; derived from the API URL when omitted
    #[arg(long)]
    ws_url: Option<String>,

    /// Log file
    #[arg(long, value_name = "PATH", default_value = utils::DEFAULT_LOG_FILE)]
    log_file: PathBuf,

    /// Where the login session is remembered
    #[arg(long, value_name = "PATH")]
    session_file: Option<PathBuf>,

    /// Print the inbox and exit
    #[arg(long)]
    list: bool,

    /// Forget the stored login and exit
    #[arg(long)]
    logout: bool,
}

/// Bearer token plus who it belongs to
struct Session {
    token: String,
    identity: LocalIdentity,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    utils::setup_logging(Some(&args.log_file), LevelFilter::Debug)?;
    info!("planit-chat starting up");
    info!("System information: {} {}", env::consts::OS, env::consts::ARCH);

    if let Some(path) = &args.session_file {
        set_session_path_override(path.clone());
        info!("Session file overridden to: {}", path.display());
    }
    if args.logout {
        clear_session()?;
        println!("Logged out.");
        return Ok(());
    }

    let config = build_config(&args)?;
    info!("API: {} | broker: {}", config.api_url, config.ws_url);

    let session = resolve_session(&config).await?;
    let api = ApiClient::new(&config.api_url)?.with_token(session.token.clone());

    let inquiries = match api.inbox(session.identity.role).await {
        Ok(inquiries) => inquiries,
        Err(e) => {
            warn!("Failed to load inbox: {}", e);
            Vec::new()
        }
    };

    if args.list {
        print_inbox(&inquiries, session.identity.role);
        return Ok(());
    }

    let inquiry_id = match args.inquiry.or_else(|| inquiries.first().map(|i| i.id)) {
        Some(id) => id,
        None => {
            println!("No conversations yet.");
            return Ok(());
        }
    };

    let mut terminal = ui::setup_terminal()?;
    let result = run_chat(&mut terminal, &config, &api, &session, inquiries, inquiry_id).await;
    ui::restore_terminal(terminal)?;

    if let Err(e) = &result {
        error!("Chat loop failed: {:#}", e);
    }
    info!("planit-chat shutting down");
    result
}

fn build_config(args: &Args) -> Result<ClientConfig> {
    let mut config = ClientConfig::from_env()?;
    if let Some(api_url) = &args.api_url {
        // Re-derive the broker URL for the new API, unless one is given explicitly
        let reconnect_delay = config.reconnect_delay;
        config = ClientConfig::new(api_url)?.with_reconnect_delay(reconnect_delay);
        if let Ok(ws_url) = env::var("PLANIT_WS_URL") {
            config = config.with_ws_url(&ws_url)?;
        }
    }
    if let Some(ws_url) = &args.ws_url {
        config = config.with_ws_url(ws_url)?;
    }
    Ok(config)
}

/// Token from PLANIT_TOKEN, then the stored session, then an interactive login
async fn resolve_session(config: &ClientConfig) -> Result<Session> {
    if let Ok(token) = env::var("PLANIT_TOKEN") {
        if !token.trim().is_empty() {
            let user_id = env::var("PLANIT_USER_ID")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let role = match env::var("PLANIT_ROLE").as_deref() {
                Ok("PLANNER") => SenderRole::Planner,
                Ok("ADMIN") => SenderRole::Admin,
                _ => SenderRole::Client,
            };
            info!("Using token from PLANIT_TOKEN for user {}", user_id);
            return Ok(Session {
                token,
                identity: LocalIdentity::new(user_id, role),
            });
        }
    }

    match load_session(&config.api_url) {
        Ok(Some(stored)) => {
            if let Some(token) = stored.get_token() {
                println!("Welcome back, {}.", stored.first_name);
                return Ok(Session {
                    token,
                    identity: stored.identity(),
                });
            }
            warn!("Stored session has no usable token");
        }
        Ok(None) => {}
        Err(e) => warn!("Failed to read stored session: {}", e),
    }

    login(config).await
}

async fn login(config: &ClientConfig) -> Result<Session> {
    let email = match env::var("PLANIT_EMAIL") {
        Ok(email) => email,
        Err(_) => utils::prompt("Email: ")?,
    };
    let password = match env::var("PLANIT_PASSWORD") {
        Ok(password) => password,
        Err(_) => utils::prompt("Password: ")?,
    };
    if email.is_empty() || password.is_empty() {
        return Err(anyhow!("Email and password are required"));
    }

    let api = ApiClient::new(&config.api_url)?;
    let auth = api
        .login(&email, &password)
        .await
        .with_context(|| format!("Login failed for {}", email))?;
    info!("Logged in as {} (user {}, {})", auth.email, auth.user_id, auth.role);

    let stored = StoredSession::from_auth(&config.api_url, &auth);
    if let Err(e) = save_session(&stored) {
        warn!("Failed to save session: {}", e);
    }
    Ok(Session {
        identity: auth.identity(),
        token: auth.token,
    })
}

fn print_inbox(inquiries: &[Inquiry], role: SenderRole) {
    if inquiries.is_empty() {
        println!("No conversations yet.");
        return;
    }
    for inquiry in inquiries {
        println!(
            "#{:<6} {:<8} {} with {} ({})",
            inquiry.id,
            inquiry.status,
            inquiry.listing.title,
            inquiry.counterpart_name(role),
            inquiry.event_date
        );
    }
}

async fn open_conversation(config: &ClientConfig, api: &ApiClient, session: &Session, inquiry_id: i64) -> ChatClient {
    let mut chat = ChatClient::open(config, inquiry_id, session.identity.clone(), Some(&session.token));
    chat.load_history(api).await;
    chat
}

async fn run_chat(
    terminal: &mut ui::Terminal<ui::CrosstermBackend<std::io::Stdout>>,
    config: &ClientConfig,
    api: &ApiClient,
    session: &Session,
    inquiries: Vec<Inquiry>,
    inquiry_id: i64,
) -> Result<()> {
    let mut chat_ui = ChatUI::new(&session.identity, inquiries, inquiry_id);
    let mut chat = open_conversation(config, api, session, inquiry_id).await;

    loop {
        chat.apply_pending_events();
        chat_ui.set_connection_status(chat.connected());
        terminal.draw(|f| chat_ui.draw(f, chat.messages()))?;

        let action = match chat_ui.handle_input() {
            Ok(action) => action,
            Err(e) => {
                // Leave the conversation cleanly before bailing out
                chat.close().await;
                return Err(e);
            }
        };
        match action {
            Some(UiAction::Quit) => break,
            Some(UiAction::Send(content)) => {
                if chat.send_message(&content).is_none() {
                    warn!("Message not sent (disconnected or empty)");
                }
            }
            Some(UiAction::Open(next_id)) => {
                chat.close().await;
                chat_ui.set_active_inquiry(next_id);
                chat = open_conversation(config, api, session, next_id).await;
            }
            None => {}
        }
    }

    chat.close().await;
    Ok(())
}
