//! Command-line companion for the atmosphere client.
//!
//! Resolves actors, fetches records through the routed transport, and
//! manages app-password sessions in a file-backed session store.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use atmosphere_client::{
    CachedResolver, Client, CredentialSession, Credentials, HttpResolver, RoutedHandler,
    ServiceTransport,
};
use atmosphere_oauth::{FileSessionStore, Session, SessionStore};

#[derive(Parser, Debug)]
#[command(name = "atmosphere")]
#[command(about = "AT Protocol client: resolve actors, fetch records, manage sessions")]
struct Cli {
    /// Path to the session file
    #[arg(long, env = "ATMOSPHERE_SESSIONS")]
    sessions: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve an identifier to its DID and PDS
    Resolve {
        /// Handle or DID
        identifier: String,
    },
    /// Fetch a record from a repo
    GetRecord {
        #[arg(long)]
        repo: String,
        #[arg(long)]
        collection: String,
        #[arg(long)]
        rkey: String,
        /// Act as this stored session's DID (routes own-repo reads to it)
        #[arg(long)]
        r#as: Option<String>,
    },
    /// Fetch an actor's profile
    GetProfile {
        /// Handle or DID
        actor: String,
    },
    /// Log in with an app password and store the session
    Login {
        /// Handle or DID
        identifier: String,
        #[arg(long, env = "ATMOSPHERE_PASSWORD")]
        password: String,
        /// Entryway/PDS to log in against
        #[arg(long)]
        service: Option<Url>,
    },
    /// Remove a stored session
    Logout {
        did: String,
    },
}

fn session_path(cli: &Cli) -> Result<PathBuf> {
    if let Some(path) = &cli.sessions {
        return Ok(path.clone());
    }
    let config = dirs::config_dir().context("no config directory on this platform")?;
    Ok(config.join("atmosphere/sessions.json"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "atmosphere_client=info,atmosphere_oauth=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let store = FileSessionStore::new(session_path(&cli)?)?;

    match &cli.command {
        Command::Resolve { identifier } => {
            let resolver = CachedResolver::new(HttpResolver::new());
            let actor = resolver.resolve_str(identifier).await?;
            println!("did:    {}", actor.did);
            println!("handle: {}", actor.handle);
            println!("pds:    {}", actor.pds);
        }
        Command::GetRecord {
            repo,
            collection,
            rkey,
            r#as,
        } => {
            let client = match r#as {
                Some(did) => routed_client(&store, did).await?,
                None => public_client(repo).await?,
            };
            let record = client.get_record(repo, collection, rkey).await?;
            println!("{}", serde_json::to_string_pretty(&record.value)?);
        }
        Command::GetProfile { actor } => {
            // The profile view lives on the AppView, not the PDS.
            let appview = ServiceTransport::new("https://public.api.bsky.app".parse()?);
            let client = Client::new(Arc::new(appview));
            let profile = client.get_profile(actor).await?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }
        Command::Login {
            identifier,
            password,
            service,
        } => {
            let session = CredentialSession::login(&Credentials {
                identifier: identifier.clone(),
                password: password.clone(),
                service: service.clone(),
            })
            .await?;

            let resolver = CachedResolver::new(HttpResolver::new());
            let actor = resolver.resolve_str(session.did.as_str()).await?;
            store
                .set(
                    &session.did,
                    Session {
                        did: session.did.clone(),
                        handle: Some(session.handle.clone()),
                        pds: actor.pds,
                        data: serde_json::json!({
                            "kind": "app-password",
                            "refresh_jwt": session.refresh_jwt,
                        }),
                    },
                )
                .await?;
            println!("Logged in as {} ({})", session.handle, session.did);
        }
        Command::Logout { did } => {
            let did = did.parse::<atmosphere_client::Did>()?;
            store.delete(&did).await?;
            println!("Removed session for {did}");
        }
    }

    Ok(())
}

/// Client routed through a stored session's PDS for own-repo calls.
async fn routed_client(store: &FileSessionStore, did: &str) -> Result<Client> {
    let did = did.parse::<atmosphere_client::Did>()?;
    let Some(session) = store.get(&did).await? else {
        bail!("no stored session for {did}; run `atmosphere login` first");
    };

    let default = Arc::new(ServiceTransport::new(session.pds.clone()));
    let handler = RoutedHandler::new(session.did, default, HttpResolver::new());
    Ok(Client::new(Arc::new(handler)))
}

/// Unauthenticated client pointed at the repo owner's PDS.
async fn public_client(repo: &str) -> Result<Client> {
    let resolver = CachedResolver::new(HttpResolver::new());
    let actor = resolver.resolve_str(repo).await?;
    Ok(Client::new(Arc::new(ServiceTransport::new(actor.pds))))
}
