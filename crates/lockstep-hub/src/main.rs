// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Headless lockstep ordering hub.
//!
//! A thin composition root: load hub preferences from disk, spin up a
//! handful of in-process peers sharing a [`mesh::LoopbackMesh`], and drive
//! each one's [`NodeRuntime`] until interrupted. It carries no protocol
//! logic of its own — everything interesting lives in `lockstep-core`.

mod demo_rule;
mod mesh;

use anyhow::Context;
use demo_rule::TallyRule;
use lockstep_config::ConfigService;
use lockstep_config_fs::FsConfigStore;
use lockstep_core::{MemoryActionLog, NodeEvent, NodeRuntime, RoomConfig};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Duration;

/// Preferences persisted between hub runs: which peers to seed the demo
/// mesh with, and the room's shared timing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HubPrefs {
    peer_ids: Vec<String>,
    room: RoomConfig,
    tick_interval_ms: u64,
}

impl Default for HubPrefs {
    fn default() -> Self {
        Self {
            peer_ids: vec!["alice".into(), "bob".into(), "carol".into()],
            room: RoomConfig {
                t0_ms: 0,
                tick_ms: 100,
                input_delay_ticks: 2,
                room_id: "demo-room".into(),
            },
            tick_interval_ms: 16,
        }
    }
}

const PREFS_KEY: &str = "hub-prefs";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config_service = ConfigService::new(FsConfigStore::new().context("opening hub config store")?);
    let prefs = config_service
        .load::<HubPrefs>(PREFS_KEY)
        .context("loading hub preferences")?
        .unwrap_or_default();
    config_service.save(PREFS_KEY, &prefs).context("persisting hub preferences")?;
    prefs.room.validate().context("validating room config")?;

    tracing::info!(room_id = %prefs.room.room_id, peers = ?prefs.peer_ids, "starting lockstep hub");

    let mesh = mesh::LoopbackMesh::new();
    let mut shutdown_txs = Vec::new();
    let mut join_handles = Vec::new();

    for peer_id in &prefs.peer_ids {
        let (transport, raw_rx, peer_event_rx) = mesh.join(peer_id.clone()).await;
        let (decoded_tx, decoded_rx) = mpsc::channel(256);
        tokio::spawn(mesh::run_decode_loop(raw_rx, decoded_tx));

        let log = MemoryActionLog::new();
        let mut node = NodeRuntime::new(
            peer_id.clone(),
            prefs.room.clone(),
            TallyRule,
            Vec::new(),
            Vec::new(),
            log,
            transport,
            decoded_rx,
            peer_event_rx,
        );
        node.start();

        let mut events = node.subscribe();
        let peer_label = peer_id.clone();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                match event {
                    NodeEvent::Optimistic(state) => {
                        tracing::debug!(peer = %peer_label, total = state.total, "optimistic update");
                    }
                    NodeEvent::Committed { commit, authoritative } => {
                        tracing::info!(
                            peer = %peer_label,
                            height = commit.height,
                            tick = commit.ordering_tick,
                            total = authoritative.total,
                            "commit applied"
                        );
                    }
                }
            }
        });

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        shutdown_txs.push(shutdown_tx);
        let tick_interval_ms = prefs.tick_interval_ms;
        let handle = tokio::spawn(async move {
            node.run(tick_interval_ms, shutdown_rx).await;
        });
        join_handles.push(handle);
    }

    tokio::time::sleep(Duration::from_millis(500)).await;
    tracing::info!("demo mesh is up, waiting for ctrl-c (or running the fixed demo duration)");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
        }
        _ = tokio::time::sleep(Duration::from_secs(5)) => {
            tracing::info!("demo duration elapsed, shutting down");
        }
    }

    for tx in shutdown_txs {
        let _ = tx.send(());
    }
    for handle in join_handles {
        let _ = handle.await;
    }
    for peer_id in &prefs.peer_ids {
        mesh.leave(peer_id, Some("hub shutdown".to_string())).await;
    }

    Ok(())
}
