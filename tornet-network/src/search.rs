//! Chunk search
//!
//! Wraps the DHT lookup to answer two questions about a target digest: which
//! reachable peers are *near* it in id space, and which of those confirm they
//! *host* it. Runs as a cooperative task; `start()` then `wait()`.
//!
//! Termination: a lookup round that finds no closer peer, or twice the
//! desired host count confirmed.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use tornet_core::digest::Digest;
use tornet_core::error::{Result, TornetError};

use crate::blacklist::Blacklist;
use crate::client::ChunkClient;
use crate::routing::Routing;
use crate::transport::Transport;

#[derive(Default)]
struct SearchState {
    /// distance → peer id, closest first.
    results: BTreeMap<Digest, Digest>,
    /// subset of `results` that confirmed possession.
    hosting: BTreeMap<Digest, Digest>,
    queried: HashSet<Digest>,
}

pub struct ChunkSearch {
    routing: Arc<dyn Routing>,
    transport: Arc<dyn Transport>,
    blacklist: Arc<Blacklist>,
    target: Digest,
    desired_count: usize,
    parallelism: usize,
    want_hosting: bool,
    cancel: Arc<AtomicBool>,
    state: Arc<Mutex<SearchState>>,
    task: Option<JoinHandle<Result<()>>>,
}

impl ChunkSearch {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        routing: Arc<dyn Routing>,
        transport: Arc<dyn Transport>,
        blacklist: Arc<Blacklist>,
        target: Digest,
        desired_count: usize,
        parallelism: usize,
        want_hosting: bool,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            routing,
            transport,
            blacklist,
            target,
            desired_count,
            parallelism: parallelism.max(1),
            want_hosting,
            cancel,
            state: Arc::new(Mutex::new(SearchState::default())),
            task: None,
        }
    }

    /// Spawn the search task.
    pub fn start(&mut self) {
        let routing = Arc::clone(&self.routing);
        let transport = Arc::clone(&self.transport);
        let blacklist = Arc::clone(&self.blacklist);
        let state = Arc::clone(&self.state);
        let cancel = Arc::clone(&self.cancel);
        let target = self.target;
        let desired = self.desired_count;
        let parallelism = self.parallelism;
        let want_hosting = self.want_hosting;

        self.task = Some(tokio::spawn(run(
            routing,
            transport,
            blacklist,
            state,
            cancel,
            target,
            desired,
            parallelism,
            want_hosting,
        )));
    }

    /// Wait for the search to finish.
    pub async fn wait(&mut self) -> Result<()> {
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| TornetError::Io(std::io::Error::other(e)))?,
            None => Ok(()),
        }
    }

    /// Near nodes: distance → peer id, closest first.
    pub fn current_results(&self) -> BTreeMap<Digest, Digest> {
        self.state.lock().results.clone()
    }

    /// Confirmed hosting nodes, closest first.
    pub fn hosting_nodes(&self) -> BTreeMap<Digest, Digest> {
        self.state.lock().hosting.clone()
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    routing: Arc<dyn Routing>,
    transport: Arc<dyn Transport>,
    blacklist: Arc<Blacklist>,
    state: Arc<Mutex<SearchState>>,
    cancel: Arc<AtomicBool>,
    target: Digest,
    desired: usize,
    parallelism: usize,
    want_hosting: bool,
) -> Result<()> {
    loop {
        if cancel.load(Ordering::Relaxed) {
            return Err(TornetError::Cancelled);
        }

        let best_before = state.lock().results.keys().next().copied();
        let candidates = routing
            .lookup(&target, (desired * 2).max(parallelism), parallelism)
            .await;
        trace!(target = %target, candidates = candidates.len(), "lookup round");

        let mut improved = merge_peers(&state, &blacklist, &target, best_before, &candidates);

        if want_hosting {
            loop {
                if cancel.load(Ordering::Relaxed) {
                    return Err(TornetError::Cancelled);
                }
                if state.lock().hosting.len() >= desired * 2 {
                    break;
                }
                let next = next_unqueried(&state);
                let peer = match next {
                    Some(peer) => peer,
                    None => break,
                };
                state.lock().queried.insert(peer);

                let session = match transport.connect(&peer).await {
                    Ok(session) => session,
                    Err(_) => continue,
                };
                let client = ChunkClient::new(session);
                let resp = match client.query(&target).await {
                    Ok(resp) => resp,
                    Err(_) => continue,
                };

                if resp.present != 0 {
                    let mut s = state.lock();
                    s.hosting.insert(peer.distance(&target), peer);
                }
                improved |= merge_peers(
                    &state,
                    &blacklist,
                    &target,
                    best_before,
                    &resp.closer_peers,
                );
            }
        }

        let hosting = state.lock().hosting.len();
        if hosting >= desired * 2 {
            debug!(target = %target, hosting, "search saturated");
            return Ok(());
        }
        if !improved {
            debug!(target = %target, hosting, "search converged");
            return Ok(());
        }
    }
}

/// Merge candidate peers into the result set; true when one of them is
/// strictly closer than the best peer known before this round.
fn merge_peers(
    state: &Mutex<SearchState>,
    blacklist: &Blacklist,
    target: &Digest,
    best_before: Option<Digest>,
    peers: &[Digest],
) -> bool {
    let mut improved = false;
    let mut s = state.lock();
    for peer in peers {
        if blacklist.contains(peer) {
            continue;
        }
        let dist = peer.distance(target);
        if s.results.insert(dist, *peer).is_none() {
            improved |= match best_before {
                Some(best) => dist < best,
                None => true,
            };
        }
    }
    improved
}

fn next_unqueried(state: &Mutex<SearchState>) -> Option<Digest> {
    let s = state.lock();
    s.results
        .values()
        .find(|peer| !s.queried.contains(peer))
        .copied()
}
