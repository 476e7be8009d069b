//! TCP transport for running a pair session between two desktop hosts.
//!
//! One side listens and accepts exactly one peer, the other dials and
//! retries until the listener appears. Frames travel through
//! [`FrameCodec`], so message boundaries survive TCP segmentation.
//!
//! `send` only queues. The link task polls a writer that owns the
//! socket's write half alongside a reader that owns the read half, so a
//! slow socket never stalls the session and a pending write never stops
//! incoming frames from being read.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, info};

use crate::codec::FrameCodec;
use crate::error::PairError;
use crate::state::PairRole;
use crate::transport::{Transport, TransportEvent, TransportEventSender};

/// Pause between dial attempts while the listener is not up yet.
const REDIAL_INTERVAL: Duration = Duration::from_millis(500);

/// How this host reaches its peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpEndpoint {
    /// Bind here and accept one peer.
    Listen(SocketAddr),
    /// Dial this address.
    Connect(SocketAddr),
}

#[derive(Debug)]
struct TcpLink {
    outbound: mpsc::UnboundedSender<Bytes>,
    connected: Arc<AtomicBool>,
    events: TransportEventSender,
    local_addr: Option<SocketAddr>,
    task: JoinHandle<()>,
}

/// A [`Transport`] over a single TCP stream.
#[derive(Debug)]
pub struct TcpTransport {
    endpoint: TcpEndpoint,
    link: Mutex<Option<TcpLink>>,
}

impl TcpTransport {
    pub fn new(endpoint: TcpEndpoint) -> Self {
        Self {
            endpoint,
            link: Mutex::new(None),
        }
    }

    /// Accept one peer on `addr`.
    pub fn listen(addr: SocketAddr) -> Self {
        Self::new(TcpEndpoint::Listen(addr))
    }

    /// Dial the peer at `addr`.
    pub fn connect(addr: SocketAddr) -> Self {
        Self::new(TcpEndpoint::Connect(addr))
    }

    pub fn endpoint(&self) -> TcpEndpoint {
        self.endpoint
    }

    /// The bound listening address, once `connect_as_role` has run.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.link.lock().await.as_ref().and_then(|l| l.local_addr)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect_as_role(
        &self,
        role: PairRole,
        events: TransportEventSender,
    ) -> Result<(), PairError> {
        let mut link = self.link.lock().await;
        // A link whose task has ended (peer hung up) may be replaced.
        if link.as_ref().is_some_and(|l| !l.task.is_finished()) {
            return Err(PairError::DiscoveryFailed("tcp link already started".into()));
        }

        let listener = match self.endpoint {
            TcpEndpoint::Listen(addr) => Some(
                TcpListener::bind(addr)
                    .await
                    .map_err(|e| PairError::DiscoveryFailed(format!("bind {addr}: {e}")))?,
            ),
            TcpEndpoint::Connect(_) => None,
        };
        let local_addr = match &listener {
            Some(l) => Some(l.local_addr()?),
            None => None,
        };
        info!(%role, endpoint = ?self.endpoint, "tcp transport starting");

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(run_link(
            self.endpoint,
            listener,
            outbound_rx,
            events.clone(),
            Arc::clone(&connected),
        ));

        *link = Some(TcpLink {
            outbound,
            connected,
            events,
            local_addr,
            task,
        });
        Ok(())
    }

    async fn send(&self, frame: Bytes) -> Result<(), PairError> {
        match self.link.lock().await.as_ref() {
            Some(link) if link.connected.load(Ordering::Acquire) => {
                link.outbound.send(frame).map_err(PairError::from)
            }
            _ => Err(PairError::NotConnected),
        }
    }

    async fn disconnect(&self) {
        if let Some(link) = self.link.lock().await.take() {
            link.task.abort();
            if link.connected.swap(false, Ordering::AcqRel) {
                let _ = link.events.send(TransportEvent::Disconnected);
            }
        }
    }
}

async fn establish(
    endpoint: TcpEndpoint,
    listener: Option<TcpListener>,
) -> Result<TcpStream, PairError> {
    match (endpoint, listener) {
        (TcpEndpoint::Listen(_), Some(listener)) => {
            let (stream, peer) = listener.accept().await?;
            info!(%peer, "accepted pair peer");
            Ok(stream)
        }
        (TcpEndpoint::Connect(addr), _) => loop {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    info!(peer = %addr, "connected to pair peer");
                    return Ok(stream);
                }
                Err(e) => {
                    debug!(peer = %addr, error = %e, "dial failed; retrying");
                    tokio::time::sleep(REDIAL_INTERVAL).await;
                }
            }
        },
        (TcpEndpoint::Listen(addr), None) => Err(PairError::DiscoveryFailed(format!(
            "no listener bound for {addr}"
        ))),
    }
}

type FrameSink = SplitSink<Framed<TcpStream, FrameCodec>, Bytes>;

/// Drain queued frames into the socket until the queue closes.
async fn write_frames(
    mut sink: FrameSink,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
) -> Result<(), PairError> {
    while let Some(frame) = outbound.recv().await {
        sink.send(frame).await?;
    }
    sink.close().await
}

async fn run_link(
    endpoint: TcpEndpoint,
    listener: Option<TcpListener>,
    outbound: mpsc::UnboundedReceiver<Bytes>,
    events: TransportEventSender,
    connected: Arc<AtomicBool>,
) {
    let stream = match establish(endpoint, listener).await {
        Ok(stream) => stream,
        Err(error) => {
            let _ = events.send(TransportEvent::ErrorOccurred {
                step: "tcp connect".into(),
                error,
            });
            return;
        }
    };
    let _ = stream.set_nodelay(true);
    connected.store(true, Ordering::Release);
    let _ = events.send(TransportEvent::Connected);

    let (sink, mut frames) = Framed::new(stream, FrameCodec).split();
    let writer = write_frames(sink, outbound);
    tokio::pin!(writer);

    let outcome: Result<(), PairError> = loop {
        tokio::select! {
            written = &mut writer => break written,
            incoming = frames.next() => match incoming {
                Some(Ok(frame)) => {
                    let _ = events.send(TransportEvent::PayloadReceived(frame));
                }
                Some(Err(e)) => break Err(e),
                None => break Ok(()),
            },
        }
    };

    connected.store(false, Ordering::Release);
    if let Err(error) = outcome {
        let _ = events.send(TransportEvent::ErrorOccurred {
            step: "tcp link".into(),
            error,
        });
    }
    let _ = events.send(TransportEvent::Disconnected);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::message::Command;

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timeout")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn frames_cross_a_real_socket() {
        let listen = TcpTransport::listen("127.0.0.1:0".parse().unwrap());
        let (l_tx, mut l_rx) = mpsc::unbounded_channel();
        listen.connect_as_role(PairRole::Primary, l_tx).await.unwrap();
        let addr = listen.local_addr().await.unwrap();

        let dial = TcpTransport::connect(addr);
        let (d_tx, mut d_rx) = mpsc::unbounded_channel();
        dial.connect_as_role(PairRole::Secondary, d_tx).await.unwrap();

        assert!(matches!(next_event(&mut l_rx).await, TransportEvent::Connected));
        assert!(matches!(next_event(&mut d_rx).await, TransportEvent::Connected));

        let big = vec![0x5Au8; 200 * 1024];
        let frames = [
            codec::encode(Command::Hello, &[]).unwrap(),
            codec::encode(Command::PreviewFrame, &big).unwrap(),
        ];
        for frame in &frames {
            dial.send(frame.clone()).await.unwrap();
        }
        for frame in &frames {
            match next_event(&mut l_rx).await {
                TransportEvent::PayloadReceived(got) => assert_eq!(&got, frame),
                other => panic!("unexpected {other:?}"),
            }
        }

        dial.disconnect().await;
        assert!(matches!(next_event(&mut d_rx).await, TransportEvent::Disconnected));
        assert!(matches!(next_event(&mut l_rx).await, TransportEvent::Disconnected));
    }

    #[tokio::test]
    async fn sends_do_not_wait_for_a_stalled_socket() {
        let peer = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = peer.local_addr().unwrap();
        let dial = TcpTransport::connect(addr);
        let (tx, mut rx) = mpsc::unbounded_channel();
        dial.connect_as_role(PairRole::Primary, tx).await.unwrap();

        // Accept, then never read.
        let (_stalled, _) = peer.accept().await.unwrap();
        assert!(matches!(next_event(&mut rx).await, TransportEvent::Connected));

        let chunk = codec::encode(Command::PreviewFrame, &vec![0u8; 64 * 1024]).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            for _ in 0..512 {
                dial.send(chunk.clone()).await.unwrap();
            }
        })
        .await
        .expect("send blocked on the socket");
        dial.disconnect().await;
    }

    #[tokio::test]
    async fn both_ends_can_flood_each_other() {
        let listen = TcpTransport::listen("127.0.0.1:0".parse().unwrap());
        let (l_tx, mut l_rx) = mpsc::unbounded_channel();
        listen.connect_as_role(PairRole::Secondary, l_tx).await.unwrap();
        let dial = TcpTransport::connect(listen.local_addr().await.unwrap());
        let (d_tx, mut d_rx) = mpsc::unbounded_channel();
        dial.connect_as_role(PairRole::Primary, d_tx).await.unwrap();
        assert!(matches!(next_event(&mut l_rx).await, TransportEvent::Connected));
        assert!(matches!(next_event(&mut d_rx).await, TransportEvent::Connected));

        const FRAMES: usize = 64;
        let chunk = codec::encode(Command::PreviewFrame, &vec![7u8; 256 * 1024]).unwrap();
        for _ in 0..FRAMES {
            listen.send(chunk.clone()).await.unwrap();
            dial.send(chunk.clone()).await.unwrap();
        }
        for rx in [&mut l_rx, &mut d_rx] {
            for _ in 0..FRAMES {
                match next_event(rx).await {
                    TransportEvent::PayloadReceived(got) => assert_eq!(got.len(), chunk.len()),
                    other => panic!("unexpected {other:?}"),
                }
            }
        }
        dial.disconnect().await;
    }

    #[tokio::test]
    async fn send_before_link_is_refused() {
        let dial = TcpTransport::new(TcpEndpoint::Connect("127.0.0.1:9".parse().unwrap()));
        assert!(matches!(
            dial.send(Bytes::from_static(b"x")).await,
            Err(PairError::NotConnected)
        ));
    }
}
