//! Remote Copy CLI - Main Entry Point
//!
//! ```text
//! rcp --server [--tls [--cert cert.pem --key key.pem]]   run the service
//! rcp <src> <dest>                                       copy, one side host:path
//! rcp --kill                                             stop a running server
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use remote_copy::client::Client;
use remote_copy::config::{ClientOptions, LogLevel, ServerOptions, DEFAULT_HOST, DEFAULT_PORT};
use remote_copy::logging;
use remote_copy::server::Server;

/// Copy files to and from a remote rcp server.
#[derive(Parser, Debug)]
#[command(name = "rcp")]
#[command(version)]
#[command(about = "Remote file copy over a size-verified streaming protocol", long_about = None)]
#[command(disable_help_flag = true)]
struct Cli {
    /// Host name (server: listen address)
    #[arg(short = 'h', long, default_value = DEFAULT_HOST)]
    host: String,

    /// Port number
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Run as server
    #[arg(short, long)]
    server: bool,

    /// Quiet mode: warnings only, no progress bars
    #[arg(short, long)]
    quiet: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Ask the server to shut down
    #[arg(short, long)]
    kill: bool,

    /// Use TLS (server generates a self-signed certificate unless --cert/--key are given)
    #[arg(long)]
    tls: bool,

    /// Server certificate chain (PEM)
    #[arg(long, requires = "key")]
    cert: Option<PathBuf>,

    /// Server private key (PEM)
    #[arg(long, requires = "cert")]
    key: Option<PathBuf>,

    /// CA certificate used by the client to verify the server (PEM)
    #[arg(long)]
    ca: Option<PathBuf>,

    /// Skip server certificate verification (needed for self-signed servers; INSECURE)
    #[arg(long)]
    insecure: bool,

    /// Print help
    #[arg(long, action = clap::ArgAction::Help)]
    help: Option<bool>,

    /// Source file path (host:path for a remote file)
    src: Option<String>,

    /// Destination file path (host:path for a remote file)
    dest: Option<String>,
}

impl Cli {
    fn log_level(&self) -> LogLevel {
        LogLevel::from_flags(self.quiet, self.debug)
    }

    fn server_options(&self) -> ServerOptions {
        ServerOptions {
            listen: self.host.clone(),
            port: self.port,
            tls: self.tls,
            cert_file: self.cert.clone(),
            key_file: self.key.clone(),
            ..Default::default()
        }
    }

    fn client_options(&self) -> ClientOptions {
        ClientOptions {
            host: self.host.clone(),
            port: self.port,
            tls: self.tls,
            ca_file: self.ca.clone(),
            insecure: self.insecure,
            quiet: self.quiet,
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_level())?;

    if cli.server {
        Server::new(cli.server_options())
            .run()
            .await
            .context("server failed")?;
    } else if cli.kill {
        Client::new(cli.client_options())?
            .shutdown()
            .await
            .context("failed to shut down server")?;
    } else if let (Some(src), Some(dest)) = (&cli.src, &cli.dest) {
        Client::new(cli.client_options())?
            .copy(src, dest)
            .await
            .with_context(|| format!("failed to copy {src} to {dest}"))?;
    } else {
        anyhow::bail!("expected: rcp <src> <dest> or rcp --server");
    }

    Ok(())
}
