//! `tunnel`: an HTTP-level reverse tunnel, run either as a public `listen`er
//! or as a `forward`er sitting next to a local origin. `generate-key` and
//! `revoke-key` manage UIMA auth tokens against a running listener.

use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod cli;

#[derive(Debug, Parser)]
#[command(name = "tunnel", version, about = "An HTTP-level reverse tunnel.")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the public listener.
    Listen(cli::listen::ListenArgs),
    /// Run the forwarder next to a local origin.
    Forward(cli::forward::ForwardArgs),
    /// Mint a new UIMA auth token.
    GenerateKey(cli::generate_key::GenerateKeyArgs),
    /// Revoke a previously minted UIMA auth token.
    RevokeKey(cli::revoke_key::RevokeKeyArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Listen(args) => cli::listen::run(args).await,
        Command::Forward(args) => cli::forward::run(args).await,
        Command::GenerateKey(args) => cli::generate_key::run(args).await,
        Command::RevokeKey(args) => cli::revoke_key::run(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => match e.downcast_ref::<tunnel_core::TunnelError>() {
            Some(tunnel_core::TunnelError::Shutdown) => ExitCode::SUCCESS,
            _ => {
                log::error!("{e:?}");
                ExitCode::FAILURE
            }
        },
    }
}
