use std::io::Write;

use clap::Parser;
use spice_chat::clipboard::{Clipboard, ClipboardError};
use spice_chat::{
    ConfigError, InboundEvent, LiveState, OutboundMessage, RealtimeConfig, RealtimeSession, SessionUpdate,
    StreamingText,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to read stdin: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "spice-chat", about = "Terminal client for the realtime persona chat")]
struct Cli {
    /// Websocket base URL; overrides the value from the environment config.
    #[arg(long, env = "SPICE_WS_URL")]
    base_url: Option<String>,

    #[arg(long, env = "SPICE_TOKEN")]
    token: String,

    conversation_id: String,
}

/// One line of user input.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Message(String),
    /// 1-based index of a code block in the latest response.
    Copy(usize),
    Disconnect,
    Reconnect,
    Quit,
    Blank,
    Unknown(String),
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Blank;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Message(line.to_owned());
    };

    let mut parts = command.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("quit" | "exit"), None) => Input::Quit,
        (Some("disconnect"), None) => Input::Disconnect,
        (Some("reconnect"), None) => Input::Reconnect,
        (Some("copy"), None) => Input::Copy(1),
        (Some("copy"), Some(n)) => match n.parse::<usize>() {
            Ok(n) if n > 0 => Input::Copy(n),
            _ => Input::Unknown(line.to_owned()),
        },
        _ => Input::Unknown(line.to_owned()),
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();
    if let Err(e) = dotenvy::dotenv() {
        debug!(error = %e, "no .env loaded");
    }

    let cli = Cli::parse();
    let mut config = RealtimeConfig::from_env()?;
    if let Some(url) = cli.base_url.as_deref() {
        config = config.with_base_url(url)?;
    }

    info!(conversation_id = %cli.conversation_id, base_url = %config.base_url, "starting chat");
    let mut session = RealtimeSession::new(config);
    session.configure(&cli.conversation_id, &cli.token, true);

    run_chat(&mut session, &cli).await
}

async fn run_chat(session: &mut RealtimeSession, cli: &Cli) -> Result<(), CliError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut clipboard = system_clipboard();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_input(&line) {
                    Input::Message(content) => {
                        if !session.send_message(&OutboundMessage::user(content)) {
                            eprintln!("[not connected; message dropped]");
                        }
                    }
                    Input::Copy(n) => match copy_block(session.state(), n, clipboard.as_mut()) {
                        Ok(()) => eprintln!("[copied block {n}]"),
                        Err(e) => eprintln!("[copy failed: {e}]"),
                    },
                    Input::Disconnect => session.disconnect(),
                    Input::Reconnect => session.configure(&cli.conversation_id, &cli.token, true),
                    Input::Quit => break,
                    Input::Blank => {}
                    Input::Unknown(raw) => eprintln!("[unknown command: {raw}]"),
                }
            }
            Some(update) = session.next_update(), if !session.is_idle() => {
                render_update(session.state(), &update);
            }
        }
    }

    session.disconnect();
    Ok(())
}

/// Copy from the in-progress response, or the last finished one once a new
/// message has reset the stream.
fn copy_block(state: &LiveState, n: usize, clipboard: &mut dyn Clipboard) -> Result<(), ClipboardError> {
    if state.stream.is_empty() {
        let last = state.responses.last().map_or("", String::as_str);
        StreamingText::from_text(last, true).copy_code_block(n - 1, clipboard)
    } else {
        state.stream.copy_code_block(n - 1, clipboard)
    }
}

fn render_update(state: &LiveState, update: &SessionUpdate) {
    let SessionUpdate::Event(event) = update else {
        return;
    };
    match event {
        InboundEvent::ResponseChunk { chunk } => {
            print!("{chunk}");
            if let Err(e) = std::io::stdout().flush() {
                debug!(error = %e, "stdout flush failed");
            }
        }
        InboundEvent::Complete => println!(),
        InboundEvent::Thinking { message } => eprintln!("[thinking] {message}"),
        InboundEvent::MoodUpdate { mood } => eprintln!("[mood] {} ({})", mood.label, mood.name),
        InboundEvent::TokenUpdate { .. } => eprintln!("[tokens] {}", state.tokens_remaining),
        InboundEvent::Error { message } => eprintln!("[error] {message}"),
        InboundEvent::Connection { status } => eprintln!("[{status}]"),
    }
}

#[cfg(feature = "system-clipboard")]
fn system_clipboard() -> Box<dyn Clipboard> {
    Box::new(spice_chat::clipboard::SystemClipboard)
}

#[cfg(not(feature = "system-clipboard"))]
fn system_clipboard() -> Box<dyn Clipboard> {
    Box::new(spice_chat::clipboard::MemoryClipboard::default())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
