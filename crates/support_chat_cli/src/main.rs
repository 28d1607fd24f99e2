use clap::Parser;
use colored::Colorize;
use std::collections::HashSet;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use support_chat::config::DEFAULT_CONFIG_FILE;
use support_chat::{
    HttpTransport, InMemoryTransport, Message, SessionEvent, SessionManager, SessionStatus,
    SupportChatConfig, TransportAdapter,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEMO_CUSTOMER_ID: &str = "demo-customer";

#[derive(Parser)]
#[command(name = "support-chat")]
#[command(about = "Terminal client for the storefront support chat")]
#[command(version)]
struct Cli {
    /// TOML config file; missing files fall back to defaults
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[arg(long)]
    api_base: Option<String>,

    #[arg(long)]
    customer_id: Option<String>,

    /// Talk to a simulated support desk instead of a backend
    #[arg(long, default_value = "false")]
    demo: bool,

    /// Enable debug logging
    #[arg(long, short, default_value = "false")]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let mut config = SupportChatConfig::load(&cli.config)?;
    if let Some(api_base) = cli.api_base {
        config.api_base = api_base;
    }
    if let Some(customer_id) = cli.customer_id {
        config.customer_id = customer_id;
    }

    let desk = if cli.demo {
        config.customer_id = DEMO_CUSTOMER_ID.to_string();
        Some(Arc::new(InMemoryTransport::new(DEMO_CUSTOMER_ID)))
    } else {
        None
    };
    config.validate()?;

    let transport: Arc<dyn TransportAdapter> = match &desk {
        Some(desk) => desk.clone() as Arc<dyn TransportAdapter>,
        None => Arc::new(HttpTransport::new(&config)?),
    };
    tracing::info!(api_base = %config.api_base, demo = cli.demo, "starting support chat");

    let customer_id = config.customer_id.clone();
    let manager = Arc::new(SessionManager::new(transport, config));
    let printer = tokio::spawn(print_events(
        manager.clone(),
        customer_id,
        manager.subscribe(),
    ));
    let staff = desk
        .clone()
        .map(|desk| tokio::spawn(simulate_staff(desk, manager.subscribe())));

    run_interactive(&manager, desk.as_deref()).await?;

    manager.close();
    printer.abort();
    if let Some(staff) = staff {
        staff.abort();
    }
    Ok(())
}

async fn run_interactive(
    manager: &SessionManager,
    desk: Option<&InMemoryTransport>,
) -> anyhow::Result<()> {
    println!("{}", "Support Chat".cyan().bold());
    println!(
        "{}",
        "/staff talk to a person, /ai back to the assistant, /refresh, /close, /quit".dimmed()
    );
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt(manager)?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "/quit" | "/exit" => {
                println!("{}", "Goodbye!".cyan());
                break;
            }
            "/staff" => match manager.select_staff().await {
                Ok(binding) => println!(
                    "{}",
                    format!("Session {} ({})", binding.session_id, binding.status).dimmed()
                ),
                Err(e) => println!("{}", format!("Could not reach support: {}", e).red()),
            },
            "/ai" => {
                manager.select_ai();
                println!("{}", "Back with the assistant.".dimmed());
            }
            "/refresh" => {
                if let Err(e) = manager.refresh().await {
                    println!("{}", format!("Refresh failed: {}", e).red());
                }
            }
            "/close" => {
                manager.close();
                println!("{}", "Chat closed.".dimmed());
            }
            content if manager.binding().is_some() => match manager.send(content).await {
                Ok(_) => {
                    if let Some(desk) = desk {
                        demo_reply(desk, manager, content);
                    }
                }
                Err(e) => println!("{}", format!("Not sent: {}", e).red()),
            },
            _ => {
                println!(
                    "{} {}",
                    "Assistant:".green().bold(),
                    "I can only help with common questions. Type /staff to talk to a person."
                );
            }
        }
    }

    Ok(())
}

fn prompt(manager: &SessionManager) -> io::Result<()> {
    let label = manager.state().as_str().to_lowercase();
    print!("{} ", format!("[{}] You:", label).cyan().bold());
    io::stdout().flush()
}

/// Print confirmed messages and state changes as they arrive. The customer's
/// own messages are only printed when a history is loaded.
async fn print_events(
    manager: Arc<SessionManager>,
    customer_id: String,
    mut rx: broadcast::Receiver<SessionEvent>,
) {
    let mut shown: HashSet<String> = HashSet::new();
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "event printer lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event {
            SessionEvent::Bound { .. } => {
                for message in manager.messages() {
                    shown.insert(message.id.clone());
                    print_message(&message, &customer_id);
                }
            }
            SessionEvent::MessagesUpdated { .. } => {
                for message in manager.messages() {
                    if message.is_pending() || !shown.insert(message.id.clone()) {
                        continue;
                    }
                    if message.sender_id != customer_id {
                        print_message(&message, &customer_id);
                    }
                }
            }
            SessionEvent::Rebound { to, .. } => {
                println!("\n{}", format!("Conversation continued in session {}.", to).dimmed())
            }
            SessionEvent::Unbound { .. } => shown.clear(),
            SessionEvent::StatusChanged { to, .. } => match to {
                SessionStatus::StaffConnected => {
                    println!("\n{}", "A support agent joined the chat.".green())
                }
                SessionStatus::WaitingStaff => {
                    println!("\n{}", "Waiting for a support agent...".yellow())
                }
                _ => {}
            },
            SessionEvent::ClosedByServer { .. } => {
                println!("\n{}", "Support closed this conversation. /staff starts a new one.".yellow())
            }
            SessionEvent::PollDegraded { reason, .. } => {
                println!("\n{}", format!("Connection problems: {}", reason).yellow())
            }
            SessionEvent::PollRecovered => println!("\n{}", "Connection restored.".green()),
            SessionEvent::AuthenticationRequired { reason } => {
                println!("\n{}", format!("Please sign in again: {}", reason).red())
            }
            SessionEvent::ConnectFailed { .. } | SessionEvent::SendRejected { .. } => {}
        }
    }
}

fn print_message(message: &Message, customer_id: &str) {
    let name = if message.sender_id == customer_id {
        "You"
    } else {
        message.sender_name.as_deref().unwrap_or(&message.sender_id)
    };
    println!(
        "\n{} {} {}",
        message.created_at.format("%H:%M").to_string().dimmed(),
        format!("{}:", name).green().bold(),
        message.content
    );
}

/// Staff side of the demo desk: picks up queued conversations after a pause.
async fn simulate_staff(desk: Arc<InMemoryTransport>, mut rx: broadcast::Receiver<SessionEvent>) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if let SessionEvent::Bound {
            session_id,
            status: SessionStatus::WaitingStaff,
            ..
        } = event
        {
            let desk = desk.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(2)).await;
                if desk.accept(&session_id).is_ok() {
                    desk.post_staff_message(&session_id, "Hi, this is Support. How can I help?");
                }
            });
        }
    }
}

fn demo_reply(desk: &InMemoryTransport, manager: &SessionManager, content: &str) {
    let Some(binding) = manager.binding() else {
        return;
    };
    let reply = format!("Thanks, I'm looking into \"{}\".", content);
    // Staff answers on the desk; the reply shows up with the next poll.
    desk.post_staff_message(&binding.session_id, &reply);
}
