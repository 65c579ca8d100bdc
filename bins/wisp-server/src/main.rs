#![forbid(unsafe_code)]

use std::net::SocketAddr;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use wisp_core::Framing;
use wisp_crypto::PreSharedSecret;
use wisp_server::ServerConfig;

#[derive(Parser, Debug)]
#[command(name = "wisp-server")]
struct Args {
    #[arg(long, env = "WISP_LISTEN", default_value = "0.0.0.0:9000")]
    listen: SocketAddr,

    #[arg(long, env = "WISP_PSK_KEY")]
    psk_key: String,

    #[arg(long, env = "WISP_PSK_IV")]
    psk_iv: String,

    #[arg(long, env = "WISP_FRAMING", default_value = "length")]
    framing: Framing,
}

#[tokio::main]
async fn main() -> Result<()> {
    wisp_common::init_tracing();
    let args = Args::parse();

    let config = ServerConfig {
        listen: args.listen,
        psk: PreSharedSecret::new(args.psk_key, args.psk_iv)?,
        framing: args.framing,
    };

    tokio::select! {
        result = wisp_server::serve(config) => result?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}
