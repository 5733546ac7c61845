//! rally - session bootstrap from the command line.
//!
//! Usage:
//!   # Show the stored provider choice and where state lives
//!   rally status
//!
//!   # Log in with a fresh (or stored) Ed25519 identity
//!   rally login keypair
//!
//!   # Use a delegation written by an external signer
//!   rally login delegation
//!
//!   # Re-run the pipeline with the provider from the last login
//!   rally resume
//!
//!   rally logout
//!
//! Logs go to stderr; tune with RUST_LOG (e.g. `RUST_LOG=rally_client=debug`).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rally_client::constants::AUTH_PROVIDER_KEY;
use rally_client::{
    FileStorage, LocalStorage, SessionConfig, SessionHandle, spawn_session_with_config,
};
use rally_types::{ProviderState, ProviderType, Session};
use tracing_subscriber::{EnvFilter, fmt};

/// Rally session client.
#[derive(Parser, Debug)]
#[command(name = "rally")]
#[command(about = "Log in to rally backends and inspect the session")]
struct Args {
    /// Session config (RON). Defaults to the user config dir.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print the session as JSON.
    #[arg(long, global = true)]
    json: bool,

    /// Seconds to wait for the pipeline to settle.
    #[arg(long, global = true, default_value_t = 30)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the stored provider choice and state paths.
    Status,
    /// Log in with a provider (keypair, delegation).
    Login { provider: ProviderType },
    /// Resume with the provider from the last successful login.
    Resume,
    /// Log out and forget the stored provider choice.
    Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;
    let timeout = Duration::from_secs(args.timeout);

    match args.command {
        Command::Status => status(&config),
        Command::Login { provider } => {
            let session = open_session(&config)?;
            session
                .login(provider)
                .await
                .with_context(|| format!("{provider} login failed"))?;
            let settled = settle(&session, timeout).await?;
            report(&settled, args.json)
        }
        Command::Resume => {
            let session = open_session(&config)?;
            if !session.resume().context("cannot resume")? {
                bail!("no stored provider; run `rally login <provider>` first");
            }
            let settled = settle(&session, timeout).await?;
            report(&settled, args.json)
        }
        Command::Logout => {
            let session = open_session(&config)?;
            // Attach the stored provider so its own logout runs too.
            if let Err(e) = session.resume() {
                tracing::warn!("ignoring stored provider: {e}");
            }
            session.logout().await;
            println!("logged out");
            Ok(())
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<SessionConfig> {
    let config = match path {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => SessionConfig::load_default().context("failed to load session config")?,
    };
    tracing::debug!(?config, "loaded config");
    Ok(config)
}

fn open_session(config: &SessionConfig) -> Result<SessionHandle> {
    spawn_session_with_config(config).context("failed to open local storage")
}

async fn settle(session: &SessionHandle, timeout: Duration) -> Result<Session> {
    tokio::time::timeout(timeout, session.settled())
        .await
        .with_context(|| format!("session did not settle within {}s", timeout.as_secs()))
}

fn status(config: &SessionConfig) -> Result<()> {
    let storage = FileStorage::open(config.storage_path()).context("failed to open local storage")?;
    let stored = storage.get(AUTH_PROVIDER_KEY);
    let provider = stored
        .as_deref()
        .and_then(|raw| raw.parse::<u32>().ok())
        .and_then(|d| ProviderType::try_from(d).ok());

    match (&stored, provider) {
        (None, _) => println!("provider:   (none)"),
        (Some(_), Some(kind)) => println!("provider:   {kind}"),
        (Some(raw), None) => println!("provider:   unrecognized ({raw})"),
    }
    println!("backend:    {}", config.backend_host);
    println!("storage:    {}", storage.path().display());
    println!("key:        {}", config.key_path().display());
    println!("delegation: {}", config.delegation_path().display());
    Ok(())
}

fn report(session: &Session, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&session.view())?);
        return Ok(());
    }

    println!("state:     {}", session.provider_state);
    if let Some(kind) = session.provider_type {
        println!("provider:  {kind}");
    }
    match session.principal() {
        Some(principal) => println!("principal: {principal}"),
        None => println!("principal: (anonymous)"),
    }
    if let Some(account) = session.account_id() {
        println!("account:   {}", account.to_hex());
    }
    if let Some(user) = session.user() {
        println!("user:      {} <{}>", user.name, user.email);
    }

    if session.provider_state == ProviderState::Disconnected {
        bail!("provider disconnected");
    }
    Ok(())
}
