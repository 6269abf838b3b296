// The capture orchestrator.
//
// Owns zero-or-two device taps, the per-source transcription channels and
// the canonical transcript. All session state mutation funnels through one
// coordination context: the engine mutex plus a single coordinator task
// consuming epoch-tagged channel updates. Tap callbacks and network loops
// never touch the session directly.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audio::{
    AudioFormat, AudioFrame, AudioSource, DeviceTap, FrameSink, InvalidationNotice, TapFactory,
    TapTarget,
};
use crate::capture::chunk::TranscriptChunk;
use crate::capture::events::EngineEvent;
use crate::config::Config;
use crate::credentials::CredentialProvider;
use crate::error::CaptureError;
use crate::persist::TranscriptSink;
use crate::transcribe::channel::{
    ChannelConfig, ChannelUpdate, ChannelUpdateKind, TranscriptionChannel,
};
use crate::transcribe::transport::Connector;

/// Collaborators the engine depends on, injected once at construction.
#[derive(Clone)]
pub struct EngineServices {
    pub taps: Arc<dyn TapFactory>,
    pub connector: Arc<dyn Connector>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub sink: Arc<dyn TranscriptSink>,
}

struct Tunables {
    channel: ChannelConfig,
    wire: AudioFormat,
    frame_queue_depth: usize,
    tap_reactivate_limit: u32,
    level_threshold: f32,
    mix_processes: Vec<u32>,
}

struct PendingPartial {
    id: Uuid,
    text: String,
}

#[derive(Default)]
struct SessionState {
    active: bool,
    sources: Vec<AudioSource>,
    taps: HashMap<AudioSource, DeviceTap>,
    frame_txs: HashMap<AudioSource, mpsc::Sender<AudioFrame>>,
    channels: HashMap<AudioSource, JoinHandle<()>>,
    coordinator: Option<JoinHandle<()>>,
    lost_tx: Option<InvalidationNotice>,
    pending: HashMap<AudioSource, PendingPartial>,
    chunks: Vec<TranscriptChunk>,
    tap_retries: HashMap<AudioSource, u32>,
}

struct Inner {
    tunables: Tunables,
    services: EngineServices,
    /// Bumped on every stop; loops and callbacks carrying an older value
    /// are stale and fall silent. The only cancellation primitive.
    epoch: Arc<AtomicU64>,
    started: Instant,
    last_activity_ms: AtomicU64,
    events: broadcast::Sender<EngineEvent>,
    state: Mutex<SessionState>,
}

/// Top-level coordinator for dual-channel capture and live transcription.
/// Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct CaptureEngine {
    inner: Arc<Inner>,
}

impl CaptureEngine {
    pub fn new(config: &Config, services: EngineServices) -> Self {
        let tunables = Tunables {
            channel: ChannelConfig::from(&config.transcription),
            wire: AudioFormat {
                sample_rate: config.audio.sample_rate,
                channels: 1,
            },
            frame_queue_depth: config.audio.frame_queue_depth,
            tap_reactivate_limit: config.audio.tap_reactivate_limit,
            level_threshold: config.audio.level_threshold,
            mix_processes: config.audio.mix_processes.clone(),
        };

        Self {
            inner: Arc::new(Inner {
                tunables,
                services,
                epoch: Arc::new(AtomicU64::new(0)),
                started: Instant::now(),
                last_activity_ms: AtomicU64::new(0),
                events: broadcast::channel(256).0,
                state: Mutex::new(SessionState::default()),
            }),
        }
    }

    /// Begin capturing the given sources.
    ///
    /// Starting while already active with the same source set is a no-op;
    /// a different set is rejected. Exactly one session may be active at a
    /// time, process-wide.
    pub async fn start(&self, sources: &[AudioSource]) -> Result<(), CaptureError> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;

        let requested: Vec<AudioSource> = {
            let mut seen = HashSet::new();
            sources
                .iter()
                .copied()
                .filter(|s| seen.insert(*s))
                .collect()
        };

        if state.active {
            let current: HashSet<_> = state.sources.iter().copied().collect();
            let wanted: HashSet<_> = requested.iter().copied().collect();
            if current == wanted {
                info!("capture already active");
                return Ok(());
            }
            return Err(CaptureError::SessionActive);
        }

        // fail fast before any hardware or network work
        let api_key = inner
            .services
            .credentials
            .api_key()
            .ok_or(CaptureError::NoCredential)?;

        let epoch = inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        state.chunks.clear();
        state.pending.clear();
        state.tap_retries.clear();

        let (updates_tx, updates_rx) = mpsc::unbounded_channel::<ChannelUpdate>();
        let (lost_tx, lost_rx) = mpsc::unbounded_channel::<AudioSource>();

        for &source in &requested {
            let (frame_tx, frame_rx) =
                mpsc::channel::<AudioFrame>(inner.tunables.frame_queue_depth);

            let channel = TranscriptionChannel::new(
                source,
                inner.tunables.channel.clone(),
                inner.tunables.wire,
                inner.services.connector.clone(),
                api_key.clone(),
                inner.epoch.clone(),
                epoch,
                updates_tx.clone(),
            );
            let handle = tokio::spawn(channel.run(frame_rx));
            state.channels.insert(source, handle);

            match inner.build_tap(source, FrameSink::new(frame_tx.clone()), lost_tx.clone()) {
                Ok(tap) => {
                    state.taps.insert(source, tap);
                    state.frame_txs.insert(source, frame_tx);
                }
                Err(err) => {
                    error!("failed to acquire {} tap: {}", source.label(), err);
                    // orphan the spawned channel tasks and release whatever
                    // was acquired so far
                    inner.epoch.fetch_add(1, Ordering::SeqCst);
                    for tap in state.taps.values_mut() {
                        tap.invalidate();
                    }
                    state.taps.clear();
                    state.frame_txs.clear();
                    state.channels.clear();
                    return Err(err);
                }
            }
        }

        state.lost_tx = Some(lost_tx);
        state.active = true;
        state.sources = requested.clone();
        state.coordinator = Some(tokio::spawn(coordinator_loop(
            inner.clone(),
            epoch,
            updates_rx,
            lost_rx,
        )));

        inner.touch_activity();
        let _ = inner.events.send(EngineEvent::RecordingActive(true));
        info!(
            "capture session started (epoch {}, sources: {:?})",
            epoch,
            requested.iter().map(|s| s.label()).collect::<Vec<_>>()
        );

        Ok(())
    }

    /// Stop capturing. Always succeeds and is safe to call when idle.
    ///
    /// The transcript survives until the next `start`.
    pub async fn stop(&self) {
        // bump first so in-flight callbacks and loops go stale immediately
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        let mut state = self.inner.state.lock().await;
        teardown_locked(&self.inner, &mut state);
    }

    /// Stable snapshot of the transcript, append-ordered by arrival.
    pub async fn transcript(&self) -> Vec<TranscriptChunk> {
        self.inner.state.lock().await.chunks.clone()
    }

    pub async fn is_active(&self) -> bool {
        self.inner.state.lock().await.active
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    /// Time since the last above-threshold audio level or transcript event.
    pub fn last_activity_elapsed(&self) -> Duration {
        let total = self.inner.started.elapsed().as_millis() as u64;
        let last = self.inner.last_activity_ms.load(Ordering::SeqCst);
        Duration::from_millis(total.saturating_sub(last))
    }

    /// Release one source's tap while keeping its channel open. Used by the
    /// silence probe so the local tap cannot pollute the external
    /// mic-usage signal.
    pub async fn pause_source(&self, source: AudioSource) {
        let mut state = self.inner.state.lock().await;
        if !state.active {
            return;
        }
        if let Some(mut tap) = state.taps.remove(&source) {
            tap.invalidate();
            info!("{} tap released", source.label());
        }
    }

    /// Reacquire a tap released by `pause_source`.
    pub async fn resume_source(&self, source: AudioSource) -> Result<(), CaptureError> {
        let mut state = self.inner.state.lock().await;
        if !state.active || state.taps.contains_key(&source) {
            return Ok(());
        }

        let frame_tx = state
            .frame_txs
            .get(&source)
            .cloned()
            .ok_or(CaptureError::DeviceUnavailable)?;
        let lost_tx = state
            .lost_tx
            .clone()
            .ok_or(CaptureError::DeviceUnavailable)?;

        let tap = self
            .inner
            .build_tap(source, FrameSink::new(frame_tx), lost_tx)?;
        state.taps.insert(source, tap);
        info!("{} tap reacquired", source.label());

        Ok(())
    }
}

impl Inner {
    fn tap_target(&self, source: AudioSource) -> TapTarget {
        match source {
            AudioSource::Microphone => TapTarget::DefaultInput,
            AudioSource::SystemOutput => {
                TapTarget::SystemMix(self.tunables.mix_processes.clone())
            }
        }
    }

    fn build_tap(
        &self,
        source: AudioSource,
        sink: FrameSink,
        lost: InvalidationNotice,
    ) -> Result<DeviceTap, CaptureError> {
        let target = self.tap_target(source);
        let backend = self.services.taps.create(source, &target)?;
        let mut tap = DeviceTap::new(source, target, backend);
        tap.activate()?;
        tap.run(sink, lost)?;
        Ok(tap)
    }

    fn touch_activity(&self) {
        self.last_activity_ms
            .store(self.started.elapsed().as_millis() as u64, Ordering::SeqCst);
    }
}

/// Release every resource the session holds. Channel and coordinator tasks
/// are not awaited: the epoch bump already made them stale, and each loop
/// observes that within one tick.
fn teardown_locked(inner: &Inner, state: &mut SessionState) {
    for tap in state.taps.values_mut() {
        tap.invalidate();
    }
    state.taps.clear();
    state.frame_txs.clear();
    state.lost_tx = None;
    state.channels.clear();
    state.coordinator.take();
    state.pending.clear();
    state.tap_retries.clear();
    state.sources.clear();

    if state.active {
        state.active = false;
        let _ = inner.events.send(EngineEvent::RecordingActive(false));
        info!("capture session stopped");
    }
}

/// Context (a): the single place transcript state is mutated.
async fn coordinator_loop(
    inner: Arc<Inner>,
    epoch: u64,
    mut updates: mpsc::UnboundedReceiver<ChannelUpdate>,
    mut lost: mpsc::UnboundedReceiver<AudioSource>,
) {
    loop {
        if inner.epoch.load(Ordering::SeqCst) != epoch {
            break;
        }

        tokio::select! {
            update = updates.recv() => match update {
                None => break,
                Some(update) => {
                    if update.epoch != inner.epoch.load(Ordering::SeqCst) {
                        debug!("dropping stale channel update");
                        continue;
                    }
                    if !handle_update(&inner, update).await {
                        break;
                    }
                }
            },
            source = lost.recv() => match source {
                None => break,
                Some(source) => {
                    if inner.epoch.load(Ordering::SeqCst) != epoch {
                        continue;
                    }
                    if !handle_tap_loss(&inner, source).await {
                        break;
                    }
                }
            },
        }
    }

    debug!("coordinator for epoch {} exited", epoch);
}

/// Apply one channel update. Returns false when the session was stopped.
async fn handle_update(inner: &Arc<Inner>, update: ChannelUpdate) -> bool {
    let source = update.source;

    match update.kind {
        ChannelUpdateKind::Delta(text) => {
            let chunk = {
                let mut state = inner.state.lock().await;
                if !state.active {
                    return true;
                }
                let partial = state.pending.entry(source).or_insert_with(|| PendingPartial {
                    id: Uuid::new_v4(),
                    text: String::new(),
                });
                partial.text.push_str(&text);
                let chunk = TranscriptChunk {
                    id: partial.id,
                    timestamp: Utc::now(),
                    source,
                    text: partial.text.clone(),
                    is_final: false,
                };
                upsert_partial(&mut state.chunks, chunk.clone());
                chunk
            };

            inner.touch_activity();
            let _ = inner.events.send(EngineEvent::ChunkUpdated(chunk));
            true
        }
        ChannelUpdateKind::Completed(transcript) => {
            let chunk = {
                let mut state = inner.state.lock().await;
                if !state.active {
                    return true;
                }
                let id = state
                    .pending
                    .remove(&source)
                    .map(|p| p.id)
                    .unwrap_or_else(Uuid::new_v4);
                state
                    .chunks
                    .retain(|c| !(c.source == source && !c.is_final));
                let chunk = TranscriptChunk {
                    id,
                    timestamp: Utc::now(),
                    source,
                    text: transcript,
                    is_final: true,
                };
                state.chunks.push(chunk.clone());
                chunk
            };

            inner.touch_activity();
            inner.services.sink.chunk_finalized(&chunk).await;
            let _ = inner.events.send(EngineEvent::ChunkUpdated(chunk));
            true
        }
        ChannelUpdateKind::Level(rms) => {
            if rms >= inner.tunables.level_threshold {
                inner.touch_activity();
            }
            let _ = inner.events.send(EngineEvent::AudioLevel { source, rms });
            true
        }
        ChannelUpdateKind::Renewed => {
            let _ = inner.events.send(EngineEvent::SessionRenewed { source });
            true
        }
        ChannelUpdateKind::UtteranceFailed(item_id) => {
            // logged distinctly from connection errors so funding and
            // account problems stay diagnosable
            warn!(
                "{} utterance failed (item: {})",
                source.label(),
                item_id.as_deref().unwrap_or("unknown")
            );
            fatal_stop(
                inner,
                CaptureError::TranscriptionFailed(format!(
                    "utterance failed on {}",
                    source.label()
                )),
            )
            .await;
            false
        }
        ChannelUpdateKind::Fatal(err) => {
            fatal_stop(inner, err).await;
            false
        }
    }
}

/// A tap died without `invalidate`. Attempt a bounded number of
/// re-activations of that tap only; give up by stopping the session.
async fn handle_tap_loss(inner: &Arc<Inner>, source: AudioSource) -> bool {
    let mut state = inner.state.lock().await;
    if !state.active || !state.taps.contains_key(&source) {
        // paused by the probe, or already torn down
        return true;
    }

    warn!("{} tap invalidated unexpectedly", source.label());
    if let Some(mut tap) = state.taps.remove(&source) {
        tap.invalidate();
    }

    let (frame_tx, lost_tx) = match (state.frame_txs.get(&source).cloned(), state.lost_tx.clone())
    {
        (Some(frame_tx), Some(lost_tx)) => (frame_tx, lost_tx),
        _ => return true,
    };

    let limit = inner.tunables.tap_reactivate_limit;
    loop {
        let attempts = state.tap_retries.entry(source).or_insert(0);
        if *attempts >= limit {
            drop(state);
            fatal_stop(inner, CaptureError::DeviceUnavailable).await;
            return false;
        }
        *attempts += 1;
        let attempt = *attempts;

        match inner.build_tap(source, FrameSink::new(frame_tx.clone()), lost_tx.clone()) {
            Ok(tap) => {
                info!("{} tap reacquired (attempt {})", source.label(), attempt);
                state.taps.insert(source, tap);
                return true;
            }
            Err(err) => {
                warn!(
                    "{} tap reacquisition failed (attempt {}/{}): {}",
                    source.label(),
                    attempt,
                    limit,
                    err
                );
            }
        }
    }
}

async fn fatal_stop(inner: &Arc<Inner>, err: CaptureError) {
    error!("stopping capture: {}", err);
    let _ = inner.events.send(EngineEvent::Error {
        error: err,
        fatal: true,
    });

    inner.epoch.fetch_add(1, Ordering::SeqCst);
    let mut state = inner.state.lock().await;
    teardown_locked(inner, &mut state);
}

/// Replace the source's current partial by value, or append when none
/// exists yet.
fn upsert_partial(chunks: &mut Vec<TranscriptChunk>, chunk: TranscriptChunk) {
    if let Some(existing) = chunks
        .iter_mut()
        .find(|c| c.source == chunk.source && !c.is_final)
    {
        *existing = chunk;
    } else {
        chunks.push(chunk);
    }
}
