use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use tunnel_core::auth::encrypt_with_public_key_pem;
use tunnel_core::client::generate_key;

use super::helpers::load_public_key_pem;

#[derive(Debug, Args)]
pub struct GenerateKeyArgs {
    /// Path to the listener's public key PEM file. Falls back to
    /// `$PROXY_PUBLIC_KEY_FILE`, then `key.pub`.
    #[arg(long)]
    pub key: Option<PathBuf>,

    /// Listener address, `host:port`.
    #[arg(long)]
    pub proxy: String,
}

pub async fn run(args: GenerateKeyArgs) -> Result<()> {
    let pem = load_public_key_pem(&args.key)?;
    let cipher = encrypt_with_public_key_pem(&pem, b"3").context("encrypting generate-key request")?;

    let (token, id) = generate_key(&args.proxy, &cipher)
        .await
        .context("generate-key request failed")?;

    println!("minted token #{id}: {token}");
    Ok(())
}
