// One streaming transcription connection per audio source.
//
// The channel owns its socket for the life of a capture session: it opens
// the connection, sends the configuration handshake, forwards converted
// audio buffers, parses inbound events and replaces the connection whenever
// the remote expires the session or the transport fails. The audio side of
// the engine never sees any of this; a renewal must be invisible to the
// recording lifecycle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::audio::{rms, AudioFormat, AudioFrame, AudioSource, FrameConverter};
use crate::config::TranscriptionConfig;
use crate::error::CaptureError;
use crate::transcribe::protocol::{
    classify_error, AudioAppend, ErrorClass, ServerEvent, SessionUpdate,
};
use crate::transcribe::transport::{Connector, TransportRx, TransportTx};

/// Connection state of one transcription channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Connecting,
    Configuring,
    Streaming,
    Renewing,
    Closing,
    Closed,
}

/// Tunables for one channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub url: String,
    pub model: String,
    pub language: String,
    pub connect_timeout: Duration,
    pub keepalive_interval: Duration,
    /// Armed at open time; must stay safely under the remote expiry window.
    pub renewal_after: Duration,
    pub retry_delay: Duration,
    pub max_retries: u32,
}

impl From<&TranscriptionConfig> for ChannelConfig {
    fn from(cfg: &TranscriptionConfig) -> Self {
        Self {
            url: cfg.url.clone(),
            model: cfg.model.clone(),
            language: cfg.language.clone(),
            connect_timeout: Duration::from_secs(cfg.connect_timeout_secs),
            keepalive_interval: Duration::from_secs(cfg.keepalive_interval_secs),
            renewal_after: Duration::from_secs(cfg.session_renewal_secs),
            retry_delay: Duration::from_millis(cfg.retry_delay_ms),
            max_retries: cfg.max_retries,
        }
    }
}

/// Epoch-tagged message from a channel task to the engine coordinator.
#[derive(Debug)]
pub struct ChannelUpdate {
    pub epoch: u64,
    pub source: AudioSource,
    pub kind: ChannelUpdateKind,
}

#[derive(Debug)]
pub enum ChannelUpdateKind {
    /// Partial transcript text to append to the source's accumulator.
    Delta(String),
    /// Final transcript for the current utterance.
    Completed(String),
    /// One utterance failed to transcribe.
    UtteranceFailed(Option<String>),
    /// RMS of one converted buffer, for level metering.
    Level(f32),
    /// The channel replaced its session after the remote expired it.
    Renewed,
    /// Unrecoverable failure; the capture session must stop.
    Fatal(CaptureError),
}

enum EventOutcome {
    Continue,
    /// The connection was replaced; the renewal timer must re-arm.
    Renewed,
    Stop,
}

/// Streaming connection to the transcription service for one source.
pub struct TranscriptionChannel {
    source: AudioSource,
    config: ChannelConfig,
    wire: AudioFormat,
    connector: Arc<dyn Connector>,
    api_key: String,
    epoch: Arc<AtomicU64>,
    opened_epoch: u64,
    updates: mpsc::UnboundedSender<ChannelUpdate>,
}

impl TranscriptionChannel {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: AudioSource,
        config: ChannelConfig,
        wire: AudioFormat,
        connector: Arc<dyn Connector>,
        api_key: String,
        epoch: Arc<AtomicU64>,
        opened_epoch: u64,
        updates: mpsc::UnboundedSender<ChannelUpdate>,
    ) -> Self {
        Self {
            source,
            config,
            wire,
            connector,
            api_key,
            epoch,
            opened_epoch,
            updates,
        }
    }

    /// The loop captured its epoch at spawn time; a bump means the session
    /// it belongs to is gone and it must fall silent.
    fn stale(&self) -> bool {
        self.epoch.load(Ordering::SeqCst) != self.opened_epoch
    }

    fn push(&self, kind: ChannelUpdateKind) {
        let _ = self.updates.send(ChannelUpdate {
            epoch: self.opened_epoch,
            source: self.source,
            kind,
        });
    }

    /// Drive the channel until the session ends or a fatal error occurs.
    /// Frames arrive on `frames` in whatever format the tap delivered.
    pub async fn run(self, mut frames: mpsc::Receiver<AudioFrame>) {
        let converter = FrameConverter::new(self.wire);

        let (mut tx, mut rx) = match self.open_with_retries().await {
            Ok(pair) => pair,
            Err(err) => {
                if !self.stale() {
                    self.push(ChannelUpdateKind::Fatal(err));
                }
                return;
            }
        };

        let mut state = ChannelState::Streaming;
        info!("{} channel streaming", self.source.label());

        let mut keepalive = interval(self.config.keepalive_interval);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        keepalive.tick().await; // first tick completes immediately

        let renewal = sleep(self.config.renewal_after);
        tokio::pin!(renewal);

        // observes a stale epoch even when the socket and taps are quiet
        let mut stale_check = interval(Duration::from_millis(250));
        stale_check.tick().await;

        loop {
            if self.stale() {
                break;
            }

            tokio::select! {
                maybe_frame = frames.recv() => match maybe_frame {
                    None => break,
                    Some(frame) => {
                        if state != ChannelState::Streaming {
                            continue;
                        }
                        if !self.forward_frame(&converter, &mut tx, &mut rx, frame).await {
                            break;
                        }
                    }
                },
                inbound = rx.next_text() => match inbound {
                    None => {
                        if !self.reopen(&mut tx, &mut rx, "connection closed").await {
                            break;
                        }
                        renewal.as_mut().reset(Instant::now() + self.config.renewal_after);
                    }
                    Some(Err(err)) => {
                        warn!("{} channel receive failed: {}", self.source.label(), err);
                        if !self.reopen(&mut tx, &mut rx, "receive failure").await {
                            break;
                        }
                        renewal.as_mut().reset(Instant::now() + self.config.renewal_after);
                    }
                    Some(Ok(text)) => match self.handle_event(&text, &mut tx, &mut rx).await {
                        EventOutcome::Continue => {}
                        EventOutcome::Renewed => {
                            renewal.as_mut().reset(Instant::now() + self.config.renewal_after);
                        }
                        EventOutcome::Stop => break,
                    },
                },
                _ = keepalive.tick() => {
                    if let Err(err) = tx.ping().await {
                        // not fatal by itself; a dead socket also surfaces
                        // on the receive side
                        warn!("{} keep-alive ping failed: {}", self.source.label(), err);
                    }
                },
                _ = &mut renewal => {
                    // the remote expires sessions after a fixed wall-clock
                    // duration; replace the connection before it does
                    state = ChannelState::Renewing;
                    info!("{} channel renewing session ahead of expiry", self.source.label());
                    if !self.reopen(&mut tx, &mut rx, "scheduled renewal").await {
                        break;
                    }
                    state = ChannelState::Streaming;
                    renewal.as_mut().reset(Instant::now() + self.config.renewal_after);
                },
                _ = stale_check.tick() => {}
            }
        }

        tx.close().await;
        debug!("{} channel closed", self.source.label());
    }

    /// Establish a connection and dispatch the configuration handshake.
    /// The protocol does not acknowledge the handshake explicitly, so the
    /// session counts as streaming once it is sent.
    async fn open(
        &self,
    ) -> Result<(Box<dyn TransportTx>, Box<dyn TransportRx>), CaptureError> {
        debug!("{} channel connecting", self.source.label());

        let connect = self.connector.connect(&self.config.url, &self.api_key);
        let (mut tx, rx) = match timeout(self.config.connect_timeout, connect).await {
            Ok(result) => result?,
            Err(_) => return Err(CaptureError::ConnectionTimeout),
        };

        let handshake =
            serde_json::to_string(&SessionUpdate::new(&self.config.model, &self.config.language))
                .map_err(|e| CaptureError::NetworkFailure(e.to_string()))?;
        tx.send_text(handshake).await?;

        Ok((tx, rx))
    }

    /// Bounded retry over `open` for transient failures. API-level failures
    /// are returned immediately.
    async fn open_with_retries(
        &self,
    ) -> Result<(Box<dyn TransportTx>, Box<dyn TransportRx>), CaptureError> {
        let mut attempts = 0u32;
        loop {
            match self.open().await {
                Ok(pair) => return Ok(pair),
                Err(err) if err.is_transient() && attempts < self.config.max_retries => {
                    attempts += 1;
                    warn!(
                        "{} channel open failed ({}), retry {}/{}",
                        self.source.label(),
                        err,
                        attempts,
                        self.config.max_retries
                    );
                    sleep(self.config.retry_delay).await;
                    if self.stale() {
                        return Err(CaptureError::ConnectionTimeout);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Replace the connection in place. Returns false when the channel must
    /// stop (retries exhausted or a non-transient failure).
    async fn reopen(
        &self,
        tx: &mut Box<dyn TransportTx>,
        rx: &mut Box<dyn TransportRx>,
        why: &str,
    ) -> bool {
        info!("{} channel reopening ({})", self.source.label(), why);
        tx.close().await;

        match self.open_with_retries().await {
            Ok((new_tx, new_rx)) => {
                *tx = new_tx;
                *rx = new_rx;
                true
            }
            Err(err) => {
                if !self.stale() {
                    self.push(ChannelUpdateKind::Fatal(err));
                }
                false
            }
        }
    }

    /// Convert one buffer and send it. Conversion rejections drop the
    /// buffer; send failures trigger a reconnect.
    async fn forward_frame(
        &self,
        converter: &FrameConverter,
        tx: &mut Box<dyn TransportTx>,
        rx: &mut Box<dyn TransportRx>,
        frame: AudioFrame,
    ) -> bool {
        let converted = match converter.convert(&frame) {
            Ok(converted) => converted,
            Err(err) => {
                warn!("{} buffer rejected: {}", self.source.label(), err);
                return true;
            }
        };

        self.push(ChannelUpdateKind::Level(rms(&converted.samples)));

        let append = AudioAppend::new(&converted.pcm_bytes());
        let payload = match serde_json::to_string(&append) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("{} failed to encode buffer: {}", self.source.label(), err);
                return true;
            }
        };

        if let Err(err) = tx.send_text(payload).await {
            warn!("{} channel send failed: {}", self.source.label(), err);
            return self.reopen(tx, rx, "send failure").await;
        }

        true
    }

    async fn handle_event(
        &self,
        text: &str,
        tx: &mut Box<dyn TransportTx>,
        rx: &mut Box<dyn TransportRx>,
    ) -> EventOutcome {
        let event = match serde_json::from_str::<ServerEvent>(text) {
            Ok(event) => event,
            Err(err) => {
                debug!("{} unparseable event: {}", self.source.label(), err);
                return EventOutcome::Continue;
            }
        };

        match event {
            ServerEvent::Delta { delta } => {
                self.push(ChannelUpdateKind::Delta(delta));
                EventOutcome::Continue
            }
            ServerEvent::Completed { transcript } => {
                self.push(ChannelUpdateKind::Completed(transcript));
                EventOutcome::Continue
            }
            ServerEvent::Failed { item_id } => {
                self.push(ChannelUpdateKind::UtteranceFailed(item_id));
                EventOutcome::Continue
            }
            ServerEvent::Error { code, message } => {
                match classify_error(code.as_deref(), message.as_deref()) {
                    ErrorClass::Expired => {
                        info!("{} session expired, renewing silently", self.source.label());
                        if self.reopen(tx, rx, "session expired").await {
                            self.push(ChannelUpdateKind::Renewed);
                            EventOutcome::Renewed
                        } else {
                            EventOutcome::Stop
                        }
                    }
                    ErrorClass::Fatal(err) => {
                        self.push(ChannelUpdateKind::Fatal(err));
                        EventOutcome::Stop
                    }
                    ErrorClass::Ignorable => {
                        warn!(
                            "{} service error: code={:?} message={:?}",
                            self.source.label(),
                            code,
                            message
                        );
                        EventOutcome::Continue
                    }
                }
            }
            ServerEvent::SessionCreated | ServerEvent::SessionUpdated => {
                debug!("{} session acknowledged", self.source.label());
                EventOutcome::Continue
            }
            ServerEvent::ResponseCreated | ServerEvent::ResponseDone => EventOutcome::Continue,
            ServerEvent::RateLimitsUpdated { rate_limits } => {
                for limit in rate_limits {
                    debug!(
                        "{} rate limit {}: {}/{}",
                        self.source.label(),
                        limit.name,
                        limit.remaining,
                        limit.limit
                    );
                }
                EventOutcome::Continue
            }
            ServerEvent::Unknown => {
                debug!("{} ignoring unknown event", self.source.label());
                EventOutcome::Continue
            }
        }
    }
}
