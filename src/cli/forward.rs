use anyhow::{Context, Result};
use clap::Args;
use log::info;

use tunnel_core::{Forwarder, TunnelError};

use super::helpers::{init_logging, resolve_addr, wait_for_shutdown, LogLevel};

#[derive(Debug, Args)]
pub struct ForwardArgs {
    /// Local origin port to forward requests to.
    #[arg(long)]
    pub port: u16,

    /// Local origin host.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Auth token (43 characters) identifying this tunnel to the listener.
    #[arg(long)]
    pub key: String,

    /// Listener address, `host:port`.
    #[arg(long)]
    pub proxy: String,

    /// Log level.
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    pub log: LogLevel,
}

pub async fn run(args: ForwardArgs) -> Result<()> {
    init_logging(args.log);

    let origin_addr = resolve_addr(&format!("{}:{}", args.host, args.port))?;
    let forwarder = Forwarder::new(args.proxy.clone(), origin_addr, args.key.clone());

    forwarder.connect().await.context("connecting to listener")?;
    info!("forwarder connected: proxy={}, origin={}", args.proxy, origin_addr);

    let on_shutdown = forwarder.clone();
    let shutdown_task = tokio::spawn(async move {
        wait_for_shutdown().await;
        on_shutdown.disconnect().await;
    });

    let result = forwarder.listen().await;
    shutdown_task.abort();

    match result {
        Ok(()) => Ok(()),
        Err(TunnelError::Shutdown) => Err(TunnelError::Shutdown.into()),
        Err(e) => Err(e).context("forwarder loop failed"),
    }
}
