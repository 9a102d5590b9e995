mod admin;
mod config;
mod routes;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use janus_api::AppStateInner;
use janus_auth::{Argon2Hasher, Authenticator, ConnectionSessionRegistry, TokenStore};
use janus_db::Database;
use janus_gateway::{Dispatcher, RealtimeFlow};

use crate::config::{Config, DEFAULT_PEPPER};

#[derive(Parser)]
#[command(name = "janus")]
#[command(about = "LiveJanus live clicker counter", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP and realtime server (default)
    Serve,
    /// Upgrade an event to premium
    Premium { event_key: String },
    /// Reset an owner's password
    Password { username: String, password: String },
    /// List owners, least recently seen first
    Users,
    /// List every event with its owner and tier
    Events,
    /// Issue a one-time premium claim token for an owner
    Claim { username: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "janus=debug,janus_gateway=debug,tower_http=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let db = Arc::new(Database::open(&config.db_path)?);
    let hasher = Arc::new(Argon2Hasher::new(config.hash_pepper.clone()));

    let mut out = std::io::stdout().lock();
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            drop(out);
            serve(config, db, hasher).await
        }
        Command::Premium { event_key } => admin::set_premium(&db, &event_key, &mut out),
        Command::Password { username, password } => {
            admin::set_password(&db, hasher.as_ref(), &username, &password, &mut out)
        }
        Command::Users => admin::list_users(&db, &mut out),
        Command::Events => admin::list_events(&db, &mut out),
        Command::Claim { username } => admin::create_claim(&db, &username, &mut out),
    }
}

async fn serve(config: Config, db: Arc<Database>, hasher: Arc<Argon2Hasher>) -> anyhow::Result<()> {
    if config.hash_pepper == DEFAULT_PEPPER {
        warn!("JANUS_HASH_PEPPER is the built-in default; set a private pepper");
    }
    if config.debug {
        warn!("Debug mode is on");
    }

    // Shared state
    let tokens = TokenStore::new(config.token_store());
    let auth = Arc::new(Authenticator::new(db.clone(), tokens, hasher, config.auth()));
    let flow = RealtimeFlow::new(
        auth.clone(),
        db.clone(),
        ConnectionSessionRegistry::new(config.session_ttl),
        Dispatcher::new(),
        config.flow(),
    );
    let state = Arc::new(AppStateInner {
        db,
        auth,
        flow,
        limits: config.limits.clone(),
    });

    let app = routes::app(state);

    let addr = config.addr()?;
    info!("Janus server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Janus server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
