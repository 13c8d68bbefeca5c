use anyhow::{Context, Result};
use clap::Args;
use log::info;

use tunnel_core::{AuthAuthority, Listener};

use super::helpers::{init_logging, resolve_addr, wait_for_shutdown, LogLevel};

#[derive(Debug, Args)]
pub struct ListenArgs {
    /// Port to accept connections on.
    #[arg(long, default_value_t = 3000)]
    pub port: u16,

    /// Host/interface to bind.
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Log level.
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    pub log: LogLevel,

    /// Run in UIMA mode: mint a fresh RSA keypair and require every CREATE
    /// to present a token this listener has minted, instead of the default
    /// dummy token.
    #[arg(long)]
    pub uima: bool,
}

pub async fn run(args: ListenArgs) -> Result<()> {
    init_logging(args.log);

    let addr = resolve_addr(&format!("{}:{}", args.host, args.port))?;
    let auth = if args.uima {
        AuthAuthority::new_uima().context("generating UIMA keypair")?
    } else {
        AuthAuthority::new_default()
    };

    let mut listener = Listener::new(addr, auth);
    listener.setup().await.context("binding listener")?;
    info!("listening: addr={}", addr);

    if let Some(pem) = listener.public_key_pem() {
        info!("UIMA public key:\n{}", pem);
    }

    tokio::select! {
        result = listener.listen() => {
            result.context("listener loop failed")?;
            Ok(())
        }
        _ = wait_for_shutdown() => {
            info!("shutdown signal received");
            listener.stop().await;
            Err(tunnel_core::TunnelError::Shutdown.into())
        }
    }
}
