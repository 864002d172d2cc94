//! Process supervisor: starts every long-running task in dependency order
//! and tears them down in reverse on shutdown.
//!
//! Startup order:
//! 1. Config store — every other task reads from it.
//! 2. GeoIP database — the aggregator enriches with it.
//! 3. Rule matcher — compiled from the config's rule list.
//! 4. XDP attach — brings up the kernel program and the two ring buffers.
//! 5. Blacklist synchronizer — consumes `ConfigStore`'s mutation channel.
//! 6. Client registry — holds no state from anything else, so it is built
//!    before the aggregator and handed in directly as its `Broadcaster`.
//!    No set-once cell is needed: the registry is already `Arc`-shared and
//!    fully usable before the aggregator or the HTTP listener exist.
//! 7. Aggregator — depends on the matcher, GeoIP db, and the registry.
//! 8. Broadcast server — depends on the aggregator's read view and the same
//!    registry, so RPC dispatch and the aggregator's pushes reach the same
//!    client set.
//! 9. Ring-buffer ingest tasks — the only tasks that touch the kernel rings
//!    directly, started last so nothing is dropped before a consumer exists.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::aggregate::geoip::GeoDb;
use crate::aggregate::Aggregator;
use crate::blacklist::Synchronizer;
use crate::broadcast::client::ClientRegistry;
use crate::broadcast::BroadcastServer;
use crate::config::{Config, ConfigStore};
use crate::ingest;
use crate::kernel::KernelHandle;
use crate::rules::RuleMatcher;

/// Packet/drop channel depth between ingest and the aggregator. Bounded so a
/// stalled aggregator applies backpressure to ingest rather than growing
/// memory without limit.
const EVENT_CHANNEL_DEPTH: usize = 4096;

/// How long shutdown waits for in-flight tasks to notice the signal before
/// the process exits anyway.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct Supervisor {
    config_path: PathBuf,
    program_bytes: &'static [u8],
}

impl Supervisor {
    pub fn new(config_path: PathBuf, program_bytes: &'static [u8]) -> Supervisor {
        Supervisor {
            config_path,
            program_bytes,
        }
    }

    /// Runs until a shutdown signal (Ctrl-C) arrives, then gives every task
    /// `SHUTDOWN_GRACE` to exit before returning. Returns the process exit
    /// code: 0 on a clean shutdown, 1 if startup failed.
    pub async fn run(self) -> i32 {
        let config = match Config::load(&self.config_path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("failed to load configuration: {e}");
                return 1;
            }
        };

        let geo = GeoDb::open(&config.geoip_path);
        let matcher = Arc::new(RuleMatcher::new(&config.rules));
        let max_packet_count = config.max_packet_count;
        let interface = config.interface.clone();
        let port = config.port;
        let summary_interval = Duration::from_secs(config.summary_time.max(1));

        let (config_store, black_rx) = ConfigStore::new(self.config_path.clone(), config);
        let config_store = Arc::new(config_store);

        let kernel = match KernelHandle::attach(&interface, self.program_bytes) {
            Ok(kernel) => Arc::new(kernel),
            Err(e) => {
                tracing::error!("failed to attach XDP program to {interface}: {e}");
                return 1;
            }
        };
        tracing::info!(mode = kernel.link_type().as_str(), "XDP attach succeeded");

        let synchronizer = Synchronizer::new(kernel.clone(), black_rx);
        let sync_handle = tokio::spawn(synchronizer.run());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (packet_tx, packet_rx) = mpsc::channel(EVENT_CHANNEL_DEPTH);
        let (drop_tx, drop_rx) = mpsc::channel(EVENT_CHANNEL_DEPTH);

        let clients = Arc::new(ClientRegistry::new());
        let (aggregator, view) =
            Aggregator::new(geo, matcher.clone(), max_packet_count, clients.clone());
        let broadcast_server = BroadcastServer::new(
            config_store.clone(),
            matcher,
            view,
            clients,
            kernel.link_type(),
        );

        let aggregator_handle = tokio::spawn(aggregator.run(packet_rx, drop_rx, summary_interval));
        let housekeeping_handle = tokio::spawn(broadcast_server.clone().run_housekeeping());

        let listener = match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!("failed to bind websocket listener on port {port}: {e}");
                return 1;
            }
        };
        let router = broadcast_server.router();
        let http_handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!("websocket server stopped: {e}");
            }
        });

        let mut packet_ingest_handle = tokio::spawn(ingest::run_packet_ingest(
            kernel.clone(),
            packet_tx,
            shutdown_rx.clone(),
        ));
        let drop_ingest_handle = tokio::spawn(ingest::run_drop_ingest(kernel, drop_tx, shutdown_rx));

        // `run_packet_ingest` only ever returns `Err` if the ring buffer map
        // could not be taken, which happens immediately at startup, not as a
        // live "ring closed" event discovered mid-run (see DESIGN.md). There
        // is nothing to re-attach to in that case, so treat it the same way
        // the original treats a failed restart after a closed ring: fatal,
        // rather than leaving the aggregator silently starved of packets.
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::warn!("failed to listen for shutdown signal: {e}");
                }
                tracing::info!("shutdown requested, stopping tasks");
            }
            joined = &mut packet_ingest_handle => {
                match joined {
                    Ok(Err(e)) => tracing::error!("packet ring unavailable, shutting down: {e}"),
                    Ok(Ok(())) => tracing::warn!("packet ingest stopped unexpectedly, shutting down"),
                    Err(e) => tracing::error!("packet ingest task panicked: {e}"),
                }
            }
        }
        let _ = shutdown_tx.send(true);

        let shutdown = async {
            if !packet_ingest_handle.is_finished() {
                let _ = packet_ingest_handle.await;
            }
            drop_ingest_handle.abort();
            aggregator_handle.abort();
            housekeeping_handle.abort();
            http_handle.abort();
            sync_handle.abort();
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, shutdown).await.is_err() {
            tracing::warn!("shutdown grace period elapsed, exiting anyway");
        }

        0
    }
}
