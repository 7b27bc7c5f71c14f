//! Demo server binary wiring the security core over in-memory stores.

use std::net::SocketAddr;
use std::sync::Arc;

use shelfguard::directory::{MemoryDirectory, NewUser, UserStore};
use shelfguard::{pipeline, SecurityConfig, SecurityCore};
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    info!("Starting shelfguard");

    // Load configuration; a missing JWT secret is fatal here, not at
    // request time.
    let config = SecurityConfig::load()?;

    // Pick the expiring store backend once.
    let store = shelfguard::store::connect(&config.cache).await;

    // In-memory directory seeded with the system roles.
    let directory = Arc::new(MemoryDirectory::seeded());

    let host = config.server.host.clone();
    let port = config.server.port;
    let production = config.production;

    let core = Arc::new(SecurityCore::new(
        config,
        store,
        directory.clone(),
        directory.clone(),
    )?);

    if !production {
        seed_demo_admin(&core, &directory).await;
    }

    let app = pipeline::router(core);

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    info!(%addr, "shelfguard listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Create a development admin account so the admin routes are reachable out
/// of the box. Never runs in production.
async fn seed_demo_admin(core: &SecurityCore, directory: &Arc<MemoryDirectory>) {
    let password_hash = match core.passwords.hash("ChangeMe1!") {
        Ok(hash) => hash,
        Err(error) => {
            warn!(%error, "could not hash demo admin password");
            return;
        }
    };
    let created = directory
        .create(NewUser {
            email: "admin@shelfguard.dev".to_string(),
            username: "admin".to_string(),
            password_hash,
        })
        .await;
    match created {
        Ok(user) => {
            if let Err(error) = core.authz.assign_role(&user.id, 1, None).await {
                warn!(%error, "could not grant USER to demo admin");
            }
            if let Err(error) = core.authz.make_admin(&user.id, None).await {
                warn!(%error, "could not grant ADMIN to demo admin");
            }
            warn!("demo admin seeded: admin@shelfguard.dev / ChangeMe1!");
        }
        Err(error) => warn!(%error, "could not seed demo admin"),
    }
}
