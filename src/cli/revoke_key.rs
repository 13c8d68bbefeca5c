use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use tunnel_core::auth::encrypt_with_public_key_pem;
use tunnel_core::client::revoke_key;

use super::helpers::load_public_key_pem;

#[derive(Debug, Args)]
pub struct RevokeKeyArgs {
    /// Id of the token to revoke, as printed by `generate-key`.
    #[arg(long)]
    pub id: u8,

    /// Path to the listener's public key PEM file.
    #[arg(long)]
    pub key: Option<PathBuf>,

    /// Listener address, `host:port`.
    #[arg(long)]
    pub proxy: String,
}

pub async fn run(args: RevokeKeyArgs) -> Result<()> {
    let pem = load_public_key_pem(&args.key)?;
    let cipher =
        encrypt_with_public_key_pem(&pem, &[args.id]).context("encrypting revoke-key request")?;

    match revoke_key(&args.proxy, &cipher)
        .await
        .context("revoke-key request failed")?
    {
        Some(token) => println!("revoked token: {token}"),
        None => println!("no token found for id {}", args.id),
    }

    Ok(())
}
