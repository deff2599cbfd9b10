//! Headless inspectors running beside the simulation thread
//!
//! The agent inspector logs the published telemetry; the edge editor applies
//! scheduled road edits by submitting commands. Each holds its open flag in
//! the shared state for as long as it runs, so at most one of each kind is
//! active, and both stop once the simulation stops running.

use anyhow::{anyhow, bail, Context};
use log::{info, warn};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::simulation::{Command, InspectorKind, SharedHandle};

/// A road edit applied once the published version reaches `at_tick`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledEdit {
    pub from: String,
    pub to: String,
    pub open: bool,
    pub at_tick: u64,
}

impl ScheduledEdit {
    /// Parses `FROM-TO@TICK`, e.g. `(0,0)-(0,1)@10`. The tick defaults to 0.
    pub fn parse(text: &str, open: bool) -> anyhow::Result<Self> {
        let (road, at_tick) = match text.rsplit_once('@') {
            Some((road, tick)) => {
                let tick = tick
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid tick in road edit '{text}'"))?;
                (road, tick)
            }
            None => (text, 0),
        };

        let (from, to) = road
            .split_once('-')
            .ok_or_else(|| anyhow!("Road edit '{text}' is not of the form FROM-TO@TICK"))?;
        let (from, to) = (from.trim(), to.trim());
        if from.is_empty() || to.is_empty() {
            bail!("Road edit '{text}' is missing a node label");
        }

        Ok(Self {
            from: from.to_string(),
            to: to.to_string(),
            open,
            at_tick,
        })
    }
}

/// Claims the open flag for `kind` and runs `body` on a named thread,
/// releasing the flag when it returns. `None` if one is already open.
fn spawn_guarded<F>(
    shared: &SharedHandle,
    kind: InspectorKind,
    name: &str,
    body: F,
) -> anyhow::Result<Option<JoinHandle<()>>>
where
    F: FnOnce(&SharedHandle) + Send + 'static,
{
    if !shared.try_open(kind) {
        warn!("{name} is already open");
        return Ok(None);
    }

    let thread_shared = shared.clone();
    let spawned = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            body(&thread_shared);
            thread_shared.release(kind);
        });

    match spawned {
        Ok(handle) => Ok(Some(handle)),
        Err(err) => {
            shared.release(kind);
            Err(err).with_context(|| format!("Failed to start {name}"))
        }
    }
}

/// Logs every agent's telemetry each time a new snapshot is published,
/// checking at most once per `interval`
pub fn spawn_agent_inspector(
    shared: &SharedHandle,
    interval: Duration,
) -> anyhow::Result<Option<JoinHandle<()>>> {
    spawn_guarded(shared, InspectorKind::AgentDetail, "agent-inspector", move |shared| {
        let mut last_seen = 0;
        while shared.is_running() {
            let snapshot = shared.snapshot();
            if snapshot.version != last_seen {
                last_seen = snapshot.version;
                info!(
                    "[inspector] version {}: {} agents, {} closed roads{}",
                    snapshot.version,
                    snapshot.agents.len(),
                    snapshot.closed_edges.len() / 2,
                    if snapshot.paused { " (paused)" } else { "" }
                );
                for (id, agent) in &snapshot.agents {
                    let edge = agent
                        .current_edge
                        .map(|lane| format!("{} -> {}", lane.from, lane.to))
                        .unwrap_or_else(|| "-".to_string());
                    info!(
                        "[inspector] agent {}: direction {:.1} deg, speed {:.1}, edge {}, step {}/{}, at ({:.1}, {:.1})",
                        id.0,
                        agent.direction,
                        agent.speed,
                        edge,
                        agent.path_index,
                        agent.path.len(),
                        agent.coords.x,
                        agent.coords.y
                    );
                }
                if let Some(fault) = &snapshot.fault {
                    warn!("[inspector] fault: {fault}");
                }
            }
            std::thread::sleep(interval);
        }
    })
}

/// Submits each edit once its tick is reached, pinned to the topology its
/// node labels were resolved against. Exits when every edit is submitted.
pub fn spawn_edge_editor(
    shared: &SharedHandle,
    mut edits: Vec<ScheduledEdit>,
    poll: Duration,
) -> anyhow::Result<Option<JoinHandle<()>>> {
    edits.sort_by_key(|edit| edit.at_tick);

    spawn_guarded(shared, InspectorKind::EdgeState, "edge-editor", move |shared| {
        let mut pending = edits.into_iter().peekable();
        while shared.is_running() {
            let version = shared.version();
            if version == 0 {
                // nothing published yet
                std::thread::sleep(poll);
                continue;
            }
            while let Some(edit) = pending.next_if(|edit| edit.at_tick <= version) {
                submit_edit(shared, &edit);
            }
            if pending.peek().is_none() {
                break;
            }
            std::thread::sleep(poll);
        }
    })
}

fn submit_edit(shared: &SharedHandle, edit: &ScheduledEdit) {
    let Some((map_version, network)) = shared.topology() else {
        warn!("No network published, dropping road edit {:?}", edit);
        return;
    };

    let (Some(from), Some(to)) = (
        network.node_by_label(&edit.from),
        network.node_by_label(&edit.to),
    ) else {
        warn!("Unknown node in road edit {} - {}", edit.from, edit.to);
        return;
    };

    if !network.has_road(from, to) {
        warn!("There is no road {} - {}", edit.from, edit.to);
        return;
    }

    info!(
        "[editor] {} road {} - {}",
        if edit.open { "opening" } else { "closing" },
        edit.from,
        edit.to
    );
    shared.submit(Command::SetEdgeOpen {
        from,
        to,
        open: edit.open,
        map_version: Some(map_version),
    });
}
