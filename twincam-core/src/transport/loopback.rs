//! In-memory transport connecting two sessions in one process.
//!
//! Both ends share a hub. The link comes up once both ends have called
//! `connect_as_role`, and either end's `disconnect` tears it down for
//! both. An optional one-way latency delays every buffer while keeping
//! per-direction order.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tracing::debug;

use crate::error::PairError;
use crate::state::PairRole;
use crate::transport::{Transport, TransportEvent, TransportEventSender};

#[derive(Debug, Default)]
struct Hub {
    endpoints: [Option<TransportEventSender>; 2],
    linked: bool,
}

impl Hub {
    fn deliver(&self, to: usize, frame: Bytes) {
        if !self.linked {
            debug!(bytes = frame.len(), "loopback link down; dropping frame");
            return;
        }
        if let Some(events) = &self.endpoints[to] {
            let _ = events.send(TransportEvent::PayloadReceived(frame));
        }
    }
}

/// One end of an in-memory link.
#[derive(Debug)]
pub struct LoopbackTransport {
    side: usize,
    hub: Arc<Mutex<Hub>>,
    /// Delayed delivery queue towards the other end.
    wire: Option<mpsc::UnboundedSender<(Instant, Bytes)>>,
    latency: Duration,
}

impl LoopbackTransport {
    /// Two connected ends with instant delivery.
    pub fn pair() -> (Self, Self) {
        let hub = Arc::new(Mutex::new(Hub::default()));
        (
            Self::end(0, Arc::clone(&hub), None, Duration::ZERO),
            Self::end(1, hub, None, Duration::ZERO),
        )
    }

    /// Two connected ends with a fixed one-way `latency`.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn pair_with_latency(latency: Duration) -> (Self, Self) {
        let hub = Arc::new(Mutex::new(Hub::default()));
        let a = Self::end(0, Arc::clone(&hub), Some(Self::spawn_wire(&hub, 1)), latency);
        let b = Self::end(1, Arc::clone(&hub), Some(Self::spawn_wire(&hub, 0)), latency);
        (a, b)
    }

    fn end(
        side: usize,
        hub: Arc<Mutex<Hub>>,
        wire: Option<mpsc::UnboundedSender<(Instant, Bytes)>>,
        latency: Duration,
    ) -> Self {
        Self {
            side,
            hub,
            wire,
            latency,
        }
    }

    fn spawn_wire(hub: &Arc<Mutex<Hub>>, to: usize) -> mpsc::UnboundedSender<(Instant, Bytes)> {
        let (tx, mut rx) = mpsc::unbounded_channel::<(Instant, Bytes)>();
        let hub = Arc::clone(hub);
        tokio::spawn(async move {
            while let Some((due, frame)) = rx.recv().await {
                tokio::time::sleep_until(due).await;
                hub.lock().await.deliver(to, frame);
            }
        });
        tx
    }

    fn peer(&self) -> usize {
        1 - self.side
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect_as_role(
        &self,
        role: PairRole,
        events: TransportEventSender,
    ) -> Result<(), PairError> {
        let mut hub = self.hub.lock().await;
        if hub.linked {
            return Err(PairError::DiscoveryFailed(
                "loopback link already in use".into(),
            ));
        }
        debug!(side = self.side, %role, "loopback end waiting for peer");
        hub.endpoints[self.side] = Some(events);

        if hub.endpoints.iter().all(Option::is_some) {
            hub.linked = true;
            for events in hub.endpoints.iter().flatten() {
                let _ = events.send(TransportEvent::Connected);
            }
        }
        Ok(())
    }

    async fn send(&self, frame: Bytes) -> Result<(), PairError> {
        if !self.hub.lock().await.linked {
            return Err(PairError::NotConnected);
        }
        match &self.wire {
            Some(wire) => wire
                .send((Instant::now() + self.latency, frame))
                .map_err(PairError::from),
            None => {
                self.hub.lock().await.deliver(self.peer(), frame);
                Ok(())
            }
        }
    }

    async fn disconnect(&self) {
        let mut hub = self.hub.lock().await;
        if hub.linked {
            for events in hub.endpoints.iter().flatten() {
                let _ = events.send(TransportEvent::Disconnected);
            }
        }
        hub.linked = false;
        hub.endpoints = [None, None];
    }
}
