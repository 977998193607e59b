//! Publish loop
//!
//! A cooperative background task that drains the publish store in due-time
//! order and maintains replication: search for hosts, upload to the closest
//! non-hosting peer when short, reschedule. The enable flag is the only
//! cancellation signal and is observed at every suspension point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tornet_core::digest::Digest;
use tornet_core::error::{Result, TornetError};
use tornet_core::now_us;
use tornet_network::protocol::StoreResult;
use tornet_network::{Blacklist, ChunkClient, ChunkSearch, Routing, Transport};

use crate::config::PublishSettings;
use crate::engine::ChunkEngine;

pub struct PublishLoop {
    engine: Arc<ChunkEngine>,
    routing: Arc<dyn Routing>,
    transport: Arc<dyn Transport>,
    blacklist: Arc<Blacklist>,
    settings: PublishSettings,
    enabled: Arc<AtomicBool>,
    /// Inverse of `enabled`, handed to searches as their cancel flag.
    cancel: Arc<AtomicBool>,
}

impl PublishLoop {
    pub fn new(
        engine: Arc<ChunkEngine>,
        routing: Arc<dyn Routing>,
        transport: Arc<dyn Transport>,
        blacklist: Arc<Blacklist>,
        settings: PublishSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            engine,
            routing,
            transport,
            blacklist,
            settings,
            enabled: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Enable publishing and spawn the loop task.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        self.enabled.store(true, Ordering::Relaxed);
        self.cancel.store(false, Ordering::Relaxed);
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run().await })
    }

    /// Flip the enable flag; the task exits at its next suspension point.
    pub fn stop(&self) {
        self.enabled.store(false, Ordering::Relaxed);
        self.cancel.store(true, Ordering::Relaxed);
    }

    async fn run(self: Arc<Self>) {
        info!("publish loop started");
        while self.is_enabled() {
            match self.iteration().await {
                Ok(()) => {}
                Err(TornetError::Cancelled) => break,
                Err(e) => {
                    warn!(error = %e, "publish iteration failed");
                    if self.sleep_checked(self.settings.idle_sleep()).await.is_err() {
                        break;
                    }
                }
            }
        }
        info!("publish loop stopped");
    }

    /// One pass: pick the next due record, search, repair, reschedule.
    async fn iteration(&self) -> Result<()> {
        let (chunk_id, mut rec) = match self.engine.publish_store().fetch_next()? {
            Some(next) => next,
            None => {
                debug!("nothing to publish");
                self.sleep_checked(self.settings.idle_sleep()).await?;
                return Ok(());
            }
        };

        // wait out the schedule, a second at a time so the flag stays live
        loop {
            let now = now_us();
            if now >= rec.next_check_us {
                break;
            }
            let wait = Duration::from_micros((rec.next_check_us - now).min(1_000_000));
            self.sleep_checked(wait).await?;
        }

        let mut search = ChunkSearch::new(
            Arc::clone(&self.routing),
            Arc::clone(&self.transport),
            Arc::clone(&self.blacklist),
            chunk_id,
            rec.desired_replicas as usize,
            self.settings.search_parallelism,
            true,
            Arc::clone(&self.cancel),
        );
        search.start();
        search.wait().await?;

        let hosting = search.hosting_nodes();
        let near = search.current_results();
        let mut observed = hosting.len() as u16;

        if observed < rec.desired_replicas {
            debug!(
                chunk_id = %chunk_id,
                hosting = observed,
                desired = rec.desired_replicas,
                near = near.len(),
                "replication short, uploading"
            );
            let self_id = self.routing.self_id();
            let candidate = near
                .values()
                .find(|peer| {
                    **peer != self_id
                        && !hosting.values().any(|h| h == *peer)
                        && !self.blacklist.contains(peer)
                })
                .copied();
            match candidate {
                Some(peer) => {
                    if self.store_on(&peer, &chunk_id).await? {
                        observed += 1;
                    }
                }
                None => debug!(chunk_id = %chunk_id, "no candidate hosts"),
            }
        } else {
            debug!(chunk_id = %chunk_id, hosting = observed, "replication satisfied");
        }

        rec.observed_replicas = observed;
        rec.next_check_us = now_us() + self.settings.recheck_interval().as_micros() as u64;
        self.engine.publish_store().store(&chunk_id, &rec)?;
        Ok(())
    }

    /// Upload one chunk to a peer; timeouts retry with exponential backoff.
    /// Returns whether the peer accepted.
    async fn store_on(&self, peer: &Digest, chunk_id: &Digest) -> Result<bool> {
        let bytes = self.engine.fetch_chunk(chunk_id)?;
        let mut backoff = self.settings.retry_backoff();

        for attempt in 0..=self.settings.store_retries {
            if attempt > 0 {
                self.sleep_checked(backoff).await?;
                backoff *= 2;
            }
            let session = self.transport.connect(peer).await?;
            let client = ChunkClient::new(session);
            match client.store(bytes.to_vec()).await {
                Ok(resp) => {
                    let result = StoreResult::from_u8(resp.result)?;
                    debug!(peer = %peer, chunk_id = %chunk_id, ?result, "store response");
                    return Ok(result == StoreResult::Accepted);
                }
                Err(TornetError::Timeout(detail)) => {
                    warn!(peer = %peer, attempt, detail = %detail, "store timed out");
                }
                Err(e) => return Err(e),
            }
        }
        Err(TornetError::Timeout(format!("store of {} on {}", chunk_id, peer)))
    }

    async fn sleep_checked(&self, duration: Duration) -> Result<()> {
        tokio::time::sleep(duration).await;
        if !self.is_enabled() {
            return Err(TornetError::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tornet_network::{ChunkService, SessionConfig, SimOverlay};
    use tornet_storage::ChunkStore;

    fn fast_settings() -> PublishSettings {
        PublishSettings {
            recheck_secs: 1,
            idle_sleep_ms: 10,
            store_retries: 1,
            retry_backoff_ms: 10,
            blacklist_cooldown_secs: 60,
            search_parallelism: 1,
        }
    }

    fn import_file(engine: &ChunkEngine, dir: &TempDir, contents: &[u8]) -> (Digest, Digest) {
        let path: PathBuf = dir.path().join("input.bin");
        std::fs::write(&path, contents).unwrap();
        engine.import(&path, None).unwrap()
    }

    fn spawn_loop(
        overlay: &Arc<SimOverlay>,
        engine: Arc<ChunkEngine>,
        self_id: Digest,
    ) -> (Arc<PublishLoop>, JoinHandle<()>) {
        let publisher = PublishLoop::new(
            engine,
            overlay.routing(self_id),
            overlay.transport(self_id),
            Arc::new(Blacklist::new(Duration::from_secs(60))),
            fast_settings(),
        );
        let handle = publisher.start();
        (publisher, handle)
    }

    #[tokio::test]
    async fn test_empty_overlay_reschedules_without_error() {
        let dir = TempDir::new().unwrap();
        let overlay = SimOverlay::new();
        let engine = Arc::new(ChunkEngine::open_temporary(0).unwrap());
        let (tornet_id, checksum) = import_file(&engine, &dir, &[0x41]);
        engine.publish(&tornet_id, &checksum, 2).unwrap();

        let (publisher, handle) = spawn_loop(&overlay, Arc::clone(&engine), Digest::compute(b"me"));

        // wait until the loop has processed every record once
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let rec = engine.publish_record(&tornet_id).unwrap().unwrap();
            if rec.next_check_us > 0 {
                break;
            }
        }

        let rec = engine.publish_record(&tornet_id).unwrap().unwrap();
        assert_eq!(rec.observed_replicas, 0);
        assert!(rec.next_check_us > now_us());

        publisher.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_uploads_until_replicated() {
        let dir = TempDir::new().unwrap();
        let overlay = SimOverlay::new();

        let mut peer_caches = Vec::new();
        for n in 0u8..4 {
            let id = Digest::compute(&[n]);
            let cache = Arc::new(ChunkStore::open_temporary(0).unwrap());
            overlay.add_node(ChunkService::new(
                id,
                Arc::clone(&cache),
                overlay.routing(id),
                SessionConfig::default(),
            ));
            peer_caches.push(cache);
        }

        let engine = Arc::new(ChunkEngine::open_temporary(0).unwrap());
        let (tornet_id, checksum) = import_file(&engine, &dir, &vec![7u8; 1000]);
        engine.publish(&tornet_id, &checksum, 2).unwrap();
        let descriptor = engine.fetch_descriptor(&tornet_id, &checksum).unwrap();
        let chunk_id = descriptor.chunks[0].id;

        let (publisher, handle) = spawn_loop(&overlay, Arc::clone(&engine), Digest::compute(b"me"));

        let hosted = |id: &Digest| {
            peer_caches
                .iter()
                .filter(|c| c.exists(id).unwrap())
                .count()
        };
        for _ in 0..500 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if hosted(&chunk_id) >= 2 && hosted(&tornet_id) >= 2 {
                break;
            }
        }
        assert!(hosted(&chunk_id) >= 2, "chunk never reached 2 replicas");
        assert!(hosted(&tornet_id) >= 2, "descriptor never reached 2 replicas");

        publisher.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_flag_ends_loop() {
        let overlay = SimOverlay::new();
        let engine = Arc::new(ChunkEngine::open_temporary(0).unwrap());
        let (publisher, handle) = spawn_loop(&overlay, engine, Digest::compute(b"me"));

        assert!(publisher.is_enabled());
        publisher.stop();
        handle.await.unwrap();
        assert!(!publisher.is_enabled());
    }
}
