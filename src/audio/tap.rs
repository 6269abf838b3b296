// Device tap handles.
//
// A tap is one acquired hardware audio stream: the default input device, a
// single process's output, or a virtual mix of system output. The platform
// primitive lives behind the `TapBackend` trait; `DeviceTap` wraps a backend
// and enforces the activate/run/invalidate lifecycle so owners cannot leak
// OS-level device objects.

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::audio::types::{AudioFrame, AudioSource, TapTarget};
use crate::error::TapError;

/// Non-blocking frame handoff out of the audio-delivery context.
///
/// `push` is callable from a time-critical callback: it never blocks and
/// takes no locks. When the bounded queue is full the buffer is dropped.
#[derive(Clone)]
pub struct FrameSink {
    tx: mpsc::Sender<AudioFrame>,
}

impl FrameSink {
    pub fn new(tx: mpsc::Sender<AudioFrame>) -> Self {
        Self { tx }
    }

    pub fn push(&self, frame: AudioFrame) {
        match self.tx.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("frame queue full, dropping buffer");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

/// Notice fired when a tap dies without `invalidate` being called (device
/// unplugged, tapped process exited). Deliberate teardown does not fire it.
pub type InvalidationNotice = mpsc::UnboundedSender<AudioSource>;

/// The platform device-tap primitive.
///
/// Implementations perform all OS-level setup in `activate` (device
/// enumeration, tap creation, aggregate-device composition for
/// `TapTarget::SystemMix`) and deliver buffers on whatever execution context
/// the platform provides for audio I/O.
pub trait TapBackend: Send {
    /// Acquire the hardware resources for this tap. Idempotent.
    fn activate(&mut self) -> Result<(), TapError>;

    /// Begin delivering buffers into the sink. Errors if the backend was
    /// never activated or is already running. Hardware loss after this
    /// point is reported through the notice, never as a panic or error on
    /// the delivery context.
    fn run(&mut self, sink: FrameSink, lost: InvalidationNotice) -> Result<(), TapError>;

    /// Synchronously release all hardware resources. Safe to call multiple
    /// times and from any execution context.
    fn invalidate(&mut self);

    fn is_active(&self) -> bool;

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// Constructs tap backends for a source/target pair. Injected into the
/// engine so tests can supply synthetic buffer sources.
pub trait TapFactory: Send + Sync {
    fn create(
        &self,
        source: AudioSource,
        target: &TapTarget,
    ) -> Result<Box<dyn TapBackend>, TapError>;
}

/// Factory for the OS process-tap capability.
///
/// Returns `Unavailable` on platforms where no tap primitive is present;
/// embedding applications wire their platform bridge through `TapFactory`.
pub struct SystemTapFactory;

impl TapFactory for SystemTapFactory {
    fn create(
        &self,
        source: AudioSource,
        _target: &TapTarget,
    ) -> Result<Box<dyn TapBackend>, TapError> {
        warn!("no device tap capability available for {}", source.label());
        Err(TapError::Unavailable)
    }
}

/// Owns one tap backend and enforces its lifecycle.
pub struct DeviceTap {
    source: AudioSource,
    target: TapTarget,
    backend: Box<dyn TapBackend>,
    running: bool,
}

impl DeviceTap {
    pub fn new(source: AudioSource, target: TapTarget, backend: Box<dyn TapBackend>) -> Self {
        Self {
            source,
            target,
            backend,
            running: false,
        }
    }

    pub fn source(&self) -> AudioSource {
        self.source
    }

    pub fn target(&self) -> &TapTarget {
        &self.target
    }

    /// Acquire hardware resources. A second call on an active tap is a
    /// no-op.
    pub fn activate(&mut self) -> Result<(), TapError> {
        if self.backend.is_active() {
            return Ok(());
        }
        self.backend.activate()
    }

    /// Start buffer delivery. Must follow `activate`; a second call errors.
    pub fn run(&mut self, sink: FrameSink, lost: InvalidationNotice) -> Result<(), TapError> {
        if !self.backend.is_active() {
            return Err(TapError::NotActivated);
        }
        if self.running {
            return Err(TapError::AlreadyRunning);
        }

        self.backend.run(sink, lost)?;
        self.running = true;

        info!(
            "tap running: {} ({})",
            self.source.label(),
            self.backend.name()
        );

        Ok(())
    }

    /// Tear down all acquired hardware resources. Multiply-callable.
    pub fn invalidate(&mut self) {
        if self.running || self.backend.is_active() {
            info!("invalidating {} tap", self.source.label());
        }
        self.backend.invalidate();
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

impl Drop for DeviceTap {
    fn drop(&mut self) {
        self.backend.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::synthetic::SyntheticTapFactory;

    fn mic_tap(factory: &SyntheticTapFactory) -> DeviceTap {
        let backend = factory
            .create(AudioSource::Microphone, &TapTarget::DefaultInput)
            .unwrap();
        DeviceTap::new(AudioSource::Microphone, TapTarget::DefaultInput, backend)
    }

    #[tokio::test]
    async fn test_run_before_activate_errors() {
        let factory = SyntheticTapFactory::new();
        let mut tap = mic_tap(&factory);

        let (tx, _rx) = mpsc::channel(4);
        let (lost, _lost_rx) = mpsc::unbounded_channel();

        assert_eq!(
            tap.run(FrameSink::new(tx), lost).unwrap_err(),
            TapError::NotActivated
        );
    }

    #[tokio::test]
    async fn test_activate_is_idempotent() {
        let factory = SyntheticTapFactory::new();
        let mut tap = mic_tap(&factory);

        tap.activate().unwrap();
        tap.activate().unwrap();
        assert_eq!(factory.active_taps(), 1);
    }

    #[tokio::test]
    async fn test_double_run_errors() {
        let factory = SyntheticTapFactory::new();
        let mut tap = mic_tap(&factory);
        tap.activate().unwrap();

        let (tx, _rx) = mpsc::channel(4);
        let (lost, _lost_rx) = mpsc::unbounded_channel();

        tap.run(FrameSink::new(tx.clone()), lost.clone()).unwrap();
        assert_eq!(
            tap.run(FrameSink::new(tx), lost).unwrap_err(),
            TapError::AlreadyRunning
        );
    }

    #[tokio::test]
    async fn test_invalidate_is_multiply_callable() {
        let factory = SyntheticTapFactory::new();
        let mut tap = mic_tap(&factory);
        tap.activate().unwrap();

        tap.invalidate();
        tap.invalidate();
        assert_eq!(factory.active_taps(), 0);
    }

    #[tokio::test]
    async fn test_system_factory_reports_unavailable() {
        let result = SystemTapFactory.create(AudioSource::SystemOutput, &TapTarget::SystemMix(vec![]));
        assert_eq!(result.err(), Some(TapError::Unavailable));
    }
}
