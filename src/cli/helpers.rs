use std::env;
use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::ValueEnum;

const DEFAULT_PUBLIC_KEY_FILE: &str = "key.pub";
const PROXY_PUBLIC_KEY_FILE_ENV: &str = "PROXY_PUBLIC_KEY_FILE";

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn into_level(self) -> log::Level {
        match self {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}

pub fn init_logging(level: LogLevel) {
    simple_logger::init_with_level(level.into_level()).expect("logger already initialized");
}

/// Resolves the public-key path: `--key` if given, else `$PROXY_PUBLIC_KEY_FILE`,
/// else the compiled-in default `key.pub`.
pub fn public_key_path(key: &Option<PathBuf>) -> PathBuf {
    key.clone().unwrap_or_else(|| {
        env::var(PROXY_PUBLIC_KEY_FILE_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_PUBLIC_KEY_FILE))
    })
}

pub fn load_public_key_pem(key: &Option<PathBuf>) -> Result<String> {
    let path = public_key_path(key);
    fs::read_to_string(&path).with_context(|| format!("reading public key file: {}", path.display()))
}

pub fn resolve_addr(addr: &str) -> Result<SocketAddr> {
    addr.to_socket_addrs()
        .with_context(|| format!("resolving address: {addr}"))?
        .next()
        .with_context(|| format!("no addresses found for: {addr}"))
}

/// Resolves once SIGINT or SIGTERM arrives.
pub async fn wait_for_shutdown() {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("installing SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
