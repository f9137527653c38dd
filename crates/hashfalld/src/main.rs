//! hashfalld: one node of the hashfall cracking cluster.
//!
//! Usage: `hashfalld [master|worker]`; the argument overrides the configured
//! role.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::oneshot;

use hashfall_core::config::{HashfallConfig, Role};
use hashfall_core::PayloadCodec;
use hashfall_services::{ActorSystem, ProxySettings, TcpTransport};

use hashfalld::crack::{self, Master, Worker};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = HashfallConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = HashfallConfig::load().context("failed to load config")?;

    match std::env::args().nth(1).as_deref() {
        None => {}
        Some("master") => config.node.role = Role::Master,
        Some("worker") => config.node.role = Role::Worker,
        Some(other) => bail!("unknown role {other:?}, expected master or worker"),
    }
    tracing::info!(role = ?config.node.role, node = %config.node.address(), "hashfalld starting");

    let (transport, inbound) = TcpTransport::bind(
        &config.node.system,
        &config.node.host,
        config.node.port,
        config.transport.max_frame_bytes,
        config.transport.connect_timeout(),
    )
    .await
    .with_context(|| format!("failed to listen on {}:{}", config.node.host, config.node.port))?;

    let codec = PayloadCodec::new();
    crack::register_all(&codec);
    let system = ActorSystem::start(codec, Arc::new(transport), inbound);
    let proxy = ProxySettings::from(&config.large_message);

    // ── Actors ───────────────────────────────────────────────────────────────

    let (done_tx, done_rx) = oneshot::channel();
    let master_path = match config.node.role {
        Role::Master => {
            let persons = crack::load_persons(&config.cluster.input_path)
                .with_context(|| format!("failed to load {}", config.cluster.input_path.display()))?;
            tracing::info!(persons = persons.len(), "password file loaded");
            let master = Master::new(persons, proxy.clone()).on_finished(done_tx);
            system.spawn("master", master).context("failed to spawn master")?
        }
        Role::Worker => {
            drop(done_tx);
            config
                .cluster
                .master
                .clone()
                .context("worker nodes need cluster.master")?
        }
    };

    for i in 0..config.cluster.local_workers {
        let name = format!("worker-{i}");
        system
            .spawn(&name, Worker::new(master_path.clone(), proxy.clone()))
            .with_context(|| format!("failed to spawn {name}"))?;
    }
    tracing::info!(workers = config.cluster.local_workers, master = %master_path, "actors started");

    // ── Wait for exit ────────────────────────────────────────────────────────

    let finished = async {
        match done_rx.await {
            Ok(results) => results,
            // Worker nodes never finish on their own.
            Err(_) => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("shutdown signal received"),
        results = finished => {
            for r in &results {
                match &r.password {
                    Some(password) => println!("{};{};{}", r.person_id, r.name, password),
                    None => println!("{};{};", r.person_id, r.name),
                }
            }
        }
    }

    system.shutdown();
    Ok(())
}
