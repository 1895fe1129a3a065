use gatepass_sdk::SystemClock;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod clock_guard;
mod config;
mod error;
mod identity;
mod issuance;
mod journal;
mod seal;
mod secret_store;
mod server;
mod store;
mod verifier;

use config::GateConfig;
use identity::StaticIdentities;
use seal::Sealer;
use server::GateState;
use store::LocalStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gate_server=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting gate verification service");

    dotenvy::dotenv().ok();
    let config = GateConfig::from_env()?;

    info!(
        "Proof window: {}s, {} bytes, verify timeout {:?}",
        config.proof.window_secs, config.proof.proof_bytes, config.verify_timeout
    );

    let store = Arc::new(match &config.data_dir {
        Some(dir) => {
            let store = LocalStore::open(dir)?;
            info!(
                "Ledger at {}: {} tickets, {} attempts",
                dir.display(),
                store.ticket_count().await,
                store.attempt_count().await
            );
            store
        }
        None => LocalStore::in_memory(),
    });

    let sealer = Arc::new(Sealer::new_or_load(config.seal_key_path.as_deref())?);

    let identities = match &config.identity_file {
        Some(path) => StaticIdentities::load(path)?,
        None => {
            warn!("IDENTITY_FILE not set! Every authenticated request will be refused.");
            StaticIdentities::default()
        }
    };
    if identities.is_empty() {
        warn!("No identities loaded");
    } else {
        info!("{} identities registered", identities.len());
    }

    let state = Arc::new(GateState::new(
        config,
        store.clone(),
        store,
        sealer,
        Arc::new(identities),
        Arc::new(SystemClock),
    ));

    server::run(state).await?;
    Ok(())
}
