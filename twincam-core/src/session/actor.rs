//! The session task: sole owner of all per-session state.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::capture::{self, CaptureScheduler, TimerEvent};
use crate::clock::{Clock, ClockSynchronizer, SyncEstimate, SyncProgress};
use crate::codec;
use crate::config::PairConfig;
use crate::error::{PairError, SessionFault};
use crate::message::{Command, Message};
use crate::preview::{PreviewDecision, PreviewFlowController};
use crate::session::events::{SessionEvent, SessionEventSender};
use crate::session::handle::{SessionCommand, SessionStatus};
use crate::state::{PairRole, PairStatus};
use crate::transport::{Transport, TransportEvent};

/// Sent to the Primary when a `Sync` could not be honoured.
const SYNC_ABORTED_REASON: &str = "sync aborted";

pub(crate) struct SessionActor {
    role: PairRole,
    config: PairConfig,
    clock: Arc<dyn Clock>,
    transport: Arc<dyn Transport>,

    status: PairStatus,
    sync: ClockSynchronizer,
    scheduler: CaptureScheduler,
    preview: PreviewFlowController,
    /// The running sync run should schedule a capture when it completes.
    capture_on_sync: bool,
    pending_connect: Option<oneshot::Sender<Result<(), PairError>>>,

    commands: mpsc::UnboundedReceiver<SessionCommand>,
    transport_tx: mpsc::UnboundedSender<TransportEvent>,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    timer_rx: mpsc::UnboundedReceiver<TimerEvent>,
    events: SessionEventSender,
}

impl SessionActor {
    pub(crate) fn new(
        role: PairRole,
        config: PairConfig,
        clock: Arc<dyn Clock>,
        transport: Arc<dyn Transport>,
        preview: PreviewFlowController,
        commands: mpsc::UnboundedReceiver<SessionCommand>,
        events: SessionEventSender,
    ) -> Self {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        Self {
            role,
            sync: ClockSynchronizer::new(config.sync_sample_count),
            scheduler: CaptureScheduler::new(timer_tx),
            preview,
            config,
            clock,
            transport,
            status: PairStatus::default(),
            capture_on_sync: false,
            pending_connect: None,
            commands,
            transport_tx,
            transport_rx,
            timer_rx,
            events,
        }
    }

    pub(crate) async fn run(mut self) {
        info!(role = %self.role, "pair session started");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
                Some(event) = self.transport_rx.recv() => self.on_transport_event(event).await,
                Some(event) = self.timer_rx.recv() => self.on_timer(event),
            }
        }

        if !self.status.is_disconnected() {
            self.transport.disconnect().await;
            self.enter_disconnected();
        }
        info!(role = %self.role, "pair session stopped");
    }

    fn emit(&self, event: SessionEvent) {
        debug!(event = event.name(), "session event");
        let _ = self.events.send(event);
    }

    fn fault(&self, step: &str, error: PairError) {
        warn!(step, %error, "session fault");
        self.emit(SessionEvent::ErrorOccurred(SessionFault::new(step, error)));
    }

    async fn send(&self, message: Message) -> Result<(), PairError> {
        if !self.status.is_connected() {
            return Err(PairError::NotConnected);
        }
        let frame = codec::encode(message.command, &message.payload)?;
        debug!(command = %message.command, bytes = message.payload.len(), "send");
        self.transport.send(frame).await
    }

    /// Send a command the peer is allowed to receive.
    async fn send_to_peer(&self, message: Message) -> Result<(), PairError> {
        let peer = self.role.peer();
        if !message.command.accepted_by(peer) {
            return Err(PairError::WrongRole(peer));
        }
        self.send(message).await
    }

    // ── Commands ─────────────────────────────────────────────────

    async fn on_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::BeginPairing { reply } => self.begin_pairing(reply).await,
            SessionCommand::Disconnect { reply } => {
                self.disconnect().await;
                let _ = reply.send(());
            }
            SessionCommand::RequestSyncedCapture { reply } => {
                let _ = reply.send(self.request_synced_capture().await);
            }
            SessionCommand::RequestPreviewFrame { reply } => {
                let _ = reply.send(self.request_preview_frame().await);
            }
            SessionCommand::SendPreviewFrame { frame, reply } => {
                let result = self
                    .send_to_peer(Message::new(Command::PreviewFrame, frame))
                    .await;
                let _ = reply.send(result);
            }
            SessionCommand::SendCapturedImage { image, reply } => {
                let _ = reply.send(self.send_captured_image(image).await);
            }
            SessionCommand::SendError { reason, reply } => {
                let _ = reply.send(self.send(Message::error(&reason)).await);
            }
            SessionCommand::Status { reply } => {
                let _ = reply.send(SessionStatus {
                    role: self.role,
                    status: self.status,
                    capture_pending: self.scheduler.is_pending(),
                    sync_running: self.sync.is_running(),
                });
            }
        }
    }

    async fn begin_pairing(&mut self, reply: oneshot::Sender<Result<(), PairError>>) {
        if let Err(e) = self.status.begin_connect() {
            let _ = reply.send(Err(e));
            return;
        }
        info!(role = %self.role, "begin pairing");
        match self
            .transport
            .connect_as_role(self.role, self.transport_tx.clone())
            .await
        {
            Ok(()) => self.pending_connect = Some(reply),
            Err(e) => {
                self.status.force_disconnect();
                self.fault("begin pairing", e.clone());
                let _ = reply.send(Err(e));
            }
        }
    }

    async fn disconnect(&mut self) {
        if self.status.is_disconnected() {
            return;
        }
        info!(role = %self.role, "disconnect requested");
        self.transport.disconnect().await;
        self.enter_disconnected();
    }

    async fn request_synced_capture(&mut self) -> Result<(), PairError> {
        if !self.status.is_connected() {
            return Err(PairError::NotConnected);
        }
        self.capture_on_sync = true;
        if self.sync.is_running() {
            debug!("sync already running; capture will follow it");
            return Ok(());
        }
        let started = self.start_sync().await;
        if started.is_err() {
            self.capture_on_sync = false;
        }
        started
    }

    async fn request_preview_frame(&mut self) -> Result<PreviewDecision, PairError> {
        if !self.status.is_connected() {
            return Ok(PreviewDecision::NotConnected);
        }
        let decision = self
            .preview
            .try_request(self.scheduler.is_pending(), tokio::time::Instant::now());
        if decision.was_requested() {
            if let Err(e) = self.send(Message::bare(Command::RequestPreviewFrame)).await {
                self.preview.cancel_request();
                return Err(e);
            }
        } else {
            debug!(%decision, "preview tick skipped");
        }
        Ok(decision)
    }

    async fn send_captured_image(&mut self, image: Bytes) -> Result<(), PairError> {
        self.send_to_peer(Message::new(Command::CapturedImage, image))
            .await?;
        self.send(Message::bare(Command::TransmissionComplete))
            .await?;
        if self.scheduler.clear() {
            debug!("pending capture handed over");
        }
        Ok(())
    }

    // ── Transport events ─────────────────────────────────────────

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.on_connected().await,
            TransportEvent::Disconnected => {
                if self.status.is_disconnected() {
                    return;
                }
                info!(role = %self.role, "transport disconnected");
                self.enter_disconnected();
            }
            TransportEvent::PayloadReceived(bytes) => self.on_payload(bytes).await,
            TransportEvent::ErrorOccurred { step, error } => {
                let fatal = error.is_fatal();
                self.fault(&step, error.clone());
                if fatal && !self.status.is_disconnected() {
                    if let Some(reply) = self.pending_connect.take() {
                        let _ = reply.send(Err(error));
                    }
                    self.transport.disconnect().await;
                    self.enter_disconnected();
                }
            }
        }
    }

    async fn on_connected(&mut self) {
        if let Err(e) = self.status.complete_connect() {
            warn!(%e, "ignoring unexpected transport connect");
            return;
        }
        info!(role = %self.role, "paired");
        if let Some(reply) = self.pending_connect.take() {
            let _ = reply.send(Ok(()));
        }
        self.emit(SessionEvent::Connected);

        if self.role == PairRole::Secondary {
            if let Err(e) = self.send(Message::bare(Command::Hello)).await {
                self.fault("hello", e);
            }
        }
    }

    /// Reset every per-connection resource.
    fn enter_disconnected(&mut self) {
        let was_connected = self.status.is_connected();
        self.status.force_disconnect();

        if self.scheduler.clear() {
            info!("pending capture cancelled");
        }
        self.preview.reset();
        let capture_dropped = std::mem::take(&mut self.capture_on_sync);
        if self.sync.abandon() {
            info!("clock sync abandoned");
            if capture_dropped {
                self.fault(
                    "clock sync",
                    PairError::SyncAborted("link lost before the clock sync run completed".into()),
                );
            }
        }
        if let Some(reply) = self.pending_connect.take() {
            let _ = reply.send(Err(PairError::NotConnected));
        }
        // Anything still queued belongs to the link that just went away.
        while self.transport_rx.try_recv().is_ok() {}

        if was_connected {
            self.emit(SessionEvent::Disconnected);
        }
    }

    async fn on_payload(&mut self, bytes: Bytes) {
        if !self.status.is_connected() {
            debug!(bytes = bytes.len(), "payload while not connected; dropped");
            return;
        }
        let message = match codec::decode(&bytes) {
            Ok(message) => message,
            Err(e) => {
                warn!(%e, "undecodable payload dropped");
                return;
            }
        };
        if !message.command.accepted_by(self.role) {
            warn!(command = %message.command, role = %self.role, "command not valid for this role; dropped");
            return;
        }
        debug!(command = %message.command, bytes = message.payload.len(), "recv");
        self.dispatch(message).await;
    }

    async fn dispatch(&mut self, message: Message) {
        match message.command {
            Command::Hello => {
                self.emit(SessionEvent::PeerAnnounced);
                if self.sync.is_running() {
                    debug!("hello during sync run; ignored");
                } else if let Err(e) = self.start_sync().await {
                    self.fault("clock sync", e);
                }
            }
            Command::RequestPreviewFrame => self.emit(SessionEvent::PreviewFrameRequested),
            Command::PreviewFrame => {
                if !self.preview.on_frame() {
                    debug!("preview frame without outstanding request");
                }
                self.emit(SessionEvent::PreviewFrameReceived(message.payload));
            }
            Command::RequestClockReading => {
                let now = self.clock.now();
                if let Err(e) = self
                    .send(Message::with_ticks(Command::ClockReading, now))
                    .await
                {
                    warn!(%e, "clock reading reply failed");
                }
            }
            Command::ClockReading => match message.ticks() {
                Ok(t1t2) => self.on_clock_reading(t1t2).await,
                Err(e) => warn!(%e, "bad clock reading dropped"),
            },
            Command::Sync => match message.ticks() {
                Ok(target) => self.on_sync(target).await,
                Err(e) => warn!(%e, "bad sync dropped"),
            },
            Command::CapturedImage => {
                self.emit(SessionEvent::CapturedImageReceived(message.payload));
                if self.scheduler.clear() {
                    debug!("pending capture completed by peer image");
                }
            }
            Command::TransmissionComplete => self.emit(SessionEvent::TransmissionComplete),
            Command::Error => {
                let reason = message.reason();
                self.fault("peer", PairError::PeerReportedError(reason.clone()));
                // Whether or not it fired, the moment has no partner now.
                let unfired = self.scheduler.pending().map(|m| !m.has_fired());
                self.scheduler.clear();
                if unfired == Some(true) {
                    info!("pending capture cancelled by peer error");
                    self.fault(
                        "capture scheduling",
                        PairError::SyncAborted(format!("peer failed before the capture: {reason}")),
                    );
                }
            }
        }
    }

    // ── Clock sync and capture ───────────────────────────────────

    async fn start_sync(&mut self) -> Result<(), PairError> {
        if !self.sync.begin(self.clock.now()) {
            return Ok(());
        }
        info!(samples = self.sync.sample_count(), "clock sync started");
        if let Err(e) = self.send(Message::bare(Command::RequestClockReading)).await {
            self.sync.abandon();
            return Err(e);
        }
        Ok(())
    }

    async fn on_clock_reading(&mut self, t1t2: i64) {
        match self.sync.on_reading(t1t2, self.clock.now()) {
            SyncProgress::Ignored => debug!("clock reading outside a sync run; dropped"),
            SyncProgress::NextSample { index } => {
                debug!(index, "next clock sample");
                if let Err(e) = self.send(Message::bare(Command::RequestClockReading)).await {
                    self.sync.abandon();
                    self.capture_on_sync = false;
                    self.fault(
                        "clock sync",
                        PairError::SyncAborted(format!("sample {index} could not be requested: {e}")),
                    );
                }
            }
            SyncProgress::Complete(estimate) => {
                info!(
                    offset_us = estimate.offset_ticks,
                    round_trip_us = estimate.round_trip_ticks,
                    "clock sync complete"
                );
                self.emit(SessionEvent::Synchronized(estimate));
                if std::mem::take(&mut self.capture_on_sync) {
                    if let Err(e) = self.schedule_capture(&estimate).await {
                        self.fault("capture scheduling", e);
                    }
                }
            }
        }
    }

    /// Primary side: tell the peer when to capture and arm locally.
    async fn schedule_capture(&mut self, estimate: &SyncEstimate) -> Result<(), PairError> {
        let countdown = self.config.countdown();
        let plan = capture::plan_primary(estimate, countdown, self.clock.now())?;
        self.send(Message::with_ticks(Command::Sync, plan.partner_target))
            .await?;
        let generation = self
            .scheduler
            .arm(plan.local_target, plan.delay, !countdown.is_zero());
        info!(
            generation,
            target = plan.local_target,
            partner_target = plan.partner_target,
            delay_ms = plan.delay.as_millis() as u64,
            "capture scheduled"
        );
        Ok(())
    }

    /// Secondary side: arm for the instant the Primary picked.
    async fn on_sync(&mut self, target: i64) {
        let delay = match capture::delay_until(target, self.clock.now()) {
            Ok(delay) => delay,
            Err(e) => {
                self.fault("capture scheduling", e);
                if let Err(e) = self.send(Message::error(SYNC_ABORTED_REASON)).await {
                    warn!(%e, "could not report aborted sync");
                }
                return;
            }
        };
        let generation = self
            .scheduler
            .arm(target, delay, delay >= Duration::from_secs(1));
        info!(generation, target, delay_ms = delay.as_millis() as u64, "capture armed by peer");
    }

    // ── Timers ───────────────────────────────────────────────────

    fn on_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::CaptureDue { generation } => {
                if self.scheduler.on_fired(generation) {
                    info!(generation, "capture due");
                    self.emit(SessionEvent::CaptureRequested);
                } else {
                    debug!(generation, "stale capture timer");
                }
            }
            TimerEvent::CountdownTick {
                generation,
                remaining,
            } => {
                if self.scheduler.is_counting_down(generation) {
                    self.emit(SessionEvent::CountdownTick(remaining));
                }
            }
        }
    }
}
