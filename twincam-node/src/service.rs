//! Pair node core logic.
//!
//! Runs one side of a pair session over TCP, pairs again whenever the
//! link drops, and stands in for the camera: the Secondary answers
//! preview and capture requests with synthetic frames, the Primary
//! pulls previews and can trigger one synced capture.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use twincam_core::{
    PairError, PairHandle, PairRole, PairSession, SessionEvent, SessionEventReceiver,
    TcpTransport,
};

use crate::config::NodeConfig;

/// Preview pump never ticks faster than this.
const MIN_PREVIEW_TICK: Duration = Duration::from_millis(10);

/// Log a preview summary every this many frames.
const PREVIEW_LOG_EVERY: u64 = 100;

// ── PairNode ─────────────────────────────────────────────────────

/// The top-level node service.
pub struct PairNode {
    config: NodeConfig,
    running: Arc<AtomicBool>,
}

impl PairNode {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Obtain a handle that can be used to stop the node from another
    /// task.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run until stopped.
    ///
    /// `capture_after` (Primary only) requests one synced capture that
    /// long after the first clock sync of each connection.
    pub async fn run(&self, capture_after: Option<Duration>) -> Result<(), PairError> {
        self.config.validate()?;
        self.running.store(true, Ordering::SeqCst);

        let role = self.config.network.role;
        let addr = self.config.socket_addr()?;
        let transport = match role {
            PairRole::Primary => TcpTransport::connect(addr),
            PairRole::Secondary => TcpTransport::listen(addr),
        };
        let (handle, mut events) = PairSession::new(role, Arc::new(transport))
            .with_config(self.config.pair.clone())
            .spawn()?;
        let retry_delay = Duration::from_millis(self.config.network.retry_delay_ms);

        while self.is_running() {
            info!(%role, %addr, "pairing");
            let paired = tokio::select! {
                result = begin_pairing(&handle) => result,
                _ = Self::wait_for_stop(&self.running) => break,
            };
            if let Err(e) = paired {
                warn!("pairing failed: {e}; retrying in {retry_delay:?}");
                tokio::select! {
                    _ = tokio::time::sleep(retry_delay) => continue,
                    _ = Self::wait_for_stop(&self.running) => break,
                }
            }
            self.drive(&handle, &mut events, capture_after).await;
        }

        handle.disconnect().await?;
        self.running.store(false, Ordering::SeqCst);
        info!("pair node stopped");
        Ok(())
    }

    /// Handle one connection until it drops or the node is stopped.
    async fn drive(
        &self,
        handle: &PairHandle,
        events: &mut SessionEventReceiver,
        capture_after: Option<Duration>,
    ) {
        let role = handle.role();
        let pump = role == PairRole::Primary && self.config.camera.preview_pump;
        let mut preview_tick =
            tokio::time::interval(self.config.pair.preview_interval().max(MIN_PREVIEW_TICK));
        let mut capture_at: Option<Instant> = None;
        let mut capture_requested = false;
        let mut previews: u64 = 0;
        let mut sequence: u32 = 0;

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { return };
                    match event {
                        SessionEvent::Connected => info!(%role, "paired"),
                        SessionEvent::Disconnected => {
                            info!(%role, "link lost");
                            return;
                        }
                        SessionEvent::ErrorOccurred(fault) => warn!("{fault}"),
                        SessionEvent::PeerAnnounced => info!("secondary announced itself"),
                        SessionEvent::Synchronized(estimate) => {
                            info!(
                                offset_us = estimate.offset_ticks,
                                round_trip_us = estimate.round_trip_ticks,
                                "clocks synchronized"
                            );
                            if role == PairRole::Primary && !capture_requested {
                                capture_at = capture_after.map(|d| Instant::now() + d);
                            }
                        }
                        SessionEvent::CountdownTick(remaining) => info!("capture in {remaining}…"),
                        SessionEvent::CaptureRequested => {
                            info!(%role, "CAPTURE");
                            if role == PairRole::Secondary {
                                sequence = sequence.wrapping_add(1);
                                let image = test_pattern(self.config.camera.captured_image_bytes, sequence);
                                if let Err(e) = handle.send_captured_image(image).await {
                                    warn!("sending captured image failed: {e}");
                                }
                            }
                        }
                        SessionEvent::PreviewFrameRequested => {
                            sequence = sequence.wrapping_add(1);
                            let frame = test_pattern(self.config.camera.preview_frame_bytes, sequence);
                            if let Err(e) = handle.send_preview_frame(frame).await {
                                warn!("sending preview frame failed: {e}");
                            }
                        }
                        SessionEvent::PreviewFrameReceived(frame) => {
                            previews += 1;
                            if previews % PREVIEW_LOG_EVERY == 0 {
                                info!(previews, bytes = frame.len(), "preview frames received");
                            }
                        }
                        SessionEvent::CapturedImageReceived(image) => {
                            info!(bytes = image.len(), "partner image received");
                        }
                        SessionEvent::TransmissionComplete => info!("partner image complete"),
                    }
                }
                _ = preview_tick.tick(), if pump => {
                    match handle.request_preview_frame().await {
                        Ok(decision) => debug!(%decision, "preview tick"),
                        Err(e) => warn!("preview request failed: {e}"),
                    }
                }
                _ = tokio::time::sleep_until(capture_at.unwrap_or_else(Instant::now)), if capture_at.is_some() => {
                    capture_at = None;
                    capture_requested = true;
                    info!("requesting synced capture");
                    if let Err(e) = handle.request_synced_capture().await {
                        warn!("synced capture request failed: {e}");
                    }
                }
                _ = Self::wait_for_stop(&self.running) => return,
            }
        }
    }

    async fn wait_for_stop(running: &Arc<AtomicBool>) {
        loop {
            if !running.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

async fn begin_pairing(handle: &PairHandle) -> Result<(), PairError> {
    match handle.role() {
        PairRole::Primary => handle.begin_pairing_as_primary().await,
        PairRole::Secondary => handle.begin_pairing_as_secondary().await,
    }
}

/// A synthetic frame: a 4-byte sequence number followed by a repeating
/// ramp.
fn test_pattern(len: usize, sequence: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(len.max(4));
    buf.put_u32(sequence);
    buf.extend((0..len.saturating_sub(4)).map(|i| (i as u32).wrapping_add(sequence) as u8));
    buf.freeze()
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use twincam_core::PairConfig;

    #[test]
    fn test_pattern_carries_sequence() {
        let frame = test_pattern(16, 7);
        assert_eq!(frame.len(), 16);
        assert_eq!(&frame[..4], &7u32.to_be_bytes());
        assert_eq!(frame[4], 7);
        assert_eq!(test_pattern(0, 1).len(), 4);
    }

    #[test]
    fn stop_handle_stops_the_node() {
        let node = PairNode::new(NodeConfig::default());
        node.running.store(true, Ordering::SeqCst);
        assert!(node.is_running());

        node.stop_handle().store(false, Ordering::SeqCst);
        assert!(!node.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_stop_returns_once_stopped() {
        let node = PairNode::new(NodeConfig::default());
        node.running.store(true, Ordering::SeqCst);
        let stop = node.stop_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            stop.store(false, Ordering::SeqCst);
        });
        tokio::time::timeout(Duration::from_secs(1), PairNode::wait_for_stop(&node.running))
            .await
            .expect("stop not observed");
    }

    #[tokio::test]
    async fn invalid_config_fails_fast() {
        let mut config = NodeConfig::default();
        config.pair = PairConfig {
            sync_sample_count: 0,
            ..PairConfig::default()
        };
        let node = PairNode::new(config);
        assert!(matches!(node.run(None).await, Err(PairError::Config(_))));
    }

    #[tokio::test]
    async fn nodes_pair_and_capture_over_tcp() {
        let reserved = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = reserved.local_addr().unwrap().to_string();
        drop(reserved);

        let mut secondary_cfg = NodeConfig::default();
        secondary_cfg.network.address = address.clone();
        secondary_cfg.camera.captured_image_bytes = 1024;
        let mut primary_cfg = secondary_cfg.clone();
        primary_cfg.network.role = PairRole::Primary;
        primary_cfg.network.retry_delay_ms = 50;

        let secondary = Arc::new(PairNode::new(secondary_cfg));
        let primary = Arc::new(PairNode::new(primary_cfg));
        let s_task = tokio::spawn({
            let node = Arc::clone(&secondary);
            async move { node.run(None).await }
        });
        let p_task = tokio::spawn({
            let node = Arc::clone(&primary);
            async move { node.run(Some(Duration::from_millis(50))).await }
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        primary.stop_handle().store(false, Ordering::SeqCst);
        secondary.stop_handle().store(false, Ordering::SeqCst);

        p_task.await.unwrap().unwrap();
        s_task.await.unwrap().unwrap();
    }
}
