#![forbid(unsafe_code)]

use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use wisp_client::{Session, SessionConfig, WebSocketConnector};
use wisp_core::events::{CLOSE, CONNECT_SUCCESS, ERROR, LOGIN, LOGIN_FAILED, LOGIN_SUCCESS};
use wisp_core::{Framing, Message, ProtocolLevel};
use wisp_crypto::PreSharedSecret;

const CHAT_ID: u16 = 0x0300;

/// Line-oriented chat client: stdin lines go out, echoes come back.
#[derive(Parser, Debug)]
#[command(name = "wisp-client")]
struct Args {
    /// Base WebSocket URI, e.g. ws://127.0.0.1:9000/ws
    #[arg(long, env = "WISP_URL")]
    url: String,

    /// Protocol level: 0/plain, 1/v1, 2/v2
    #[arg(long, env = "WISP_LEVEL", default_value = "v2")]
    level: ProtocolLevel,

    #[arg(long, env = "WISP_PSK_KEY")]
    psk_key: Option<String>,

    #[arg(long, env = "WISP_PSK_IV")]
    psk_iv: Option<String>,

    #[arg(long, env = "WISP_RETRY_MS", default_value_t = 5000)]
    retry_ms: u64,

    #[arg(long, env = "WISP_FRAMING", default_value = "length")]
    framing: Framing,

    /// Log in with this user name once connected
    #[arg(long)]
    user: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    wisp_common::init_tracing();
    let args = Args::parse();

    let mut config = SessionConfig::new(args.url, args.level.as_u8())
        .with_retry_interval(Duration::from_millis(args.retry_ms))
        .with_framing(args.framing);
    match (args.psk_key, args.psk_iv) {
        (Some(key), Some(iv)) => config = config.with_psk(PreSharedSecret::new(key, iv)?),
        (None, None) => {}
        _ => bail!("--psk-key and --psk-iv must be given together"),
    }

    let (mut session, handle) = Session::new(config, WebSocketConnector)?;

    let level = args.level;
    let login = handle.downgrade();
    let user = args.user;
    session.on(CONNECT_SUCCESS, move |m| {
        // At level 2 traffic can flow only after the bootstrap.
        if level == ProtocolLevel::HandshakeV2 && m.get_str("data").is_none() {
            return;
        }
        info!("session ready");
        if let Some(user) = &user {
            if let Ok(message) = Message::new(LOGIN, "login") {
                login.emit(message.with_field("user", user.as_str()));
            }
        }
    });
    session.on(LOGIN_SUCCESS, |m| info!("logged in as {}", m.get_str("user").unwrap_or("?")));
    session.on(LOGIN_FAILED, |m| warn!("login failed: {}", m.get_str("reason").unwrap_or("?")));
    session.on(CHAT_ID, |m| println!("{}", m.get_str("text").unwrap_or_default()));
    session.on(CLOSE, |_| info!("connection closed"));
    session.on(ERROR, |m| warn!("connection error: {}", m.get_str("reason").unwrap_or("?")));

    let task = tokio::spawn(session.run());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let message = Message::new(CHAT_ID, "chat")?.with_field("text", line);
                if !handle.emit(message) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.shutdown();
    task.await?;
    Ok(())
}
