// Synthetic tap backends.
//
// A synthetic tap delivers frames pushed through a `SyntheticFeed` instead
// of hardware buffers. Tests drive the whole capture pipeline with them,
// and they back the demo path on machines without a tap capability. Feeds
// are per-source and owned by the factory, so a tap recreated after loss or
// a probe pause picks the stream back up.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, watch};

use crate::audio::tap::{FrameSink, InvalidationNotice, TapBackend, TapFactory};
use crate::audio::types::{AudioFrame, AudioSource, TapTarget};
use crate::error::TapError;

#[derive(Debug, Clone)]
enum FeedItem {
    Frame(AudioFrame),
    /// Simulated hardware loss: the tap fires its invalidation notice.
    Fail,
}

/// Hand-driven frame source for one `AudioSource`.
#[derive(Clone)]
pub struct SyntheticFeed {
    source: AudioSource,
    tx: broadcast::Sender<FeedItem>,
}

impl SyntheticFeed {
    /// Push one buffer into whatever tap is currently running.
    pub fn frame(&self, samples: Vec<i16>, sample_rate: u32, channels: u16, timestamp_ms: u64) {
        let _ = self.tx.send(FeedItem::Frame(AudioFrame {
            samples,
            sample_rate,
            channels,
            timestamp_ms,
            source: self.source,
        }));
    }

    /// Simulate unexpected hardware loss on the running tap.
    pub fn fail(&self) {
        let _ = self.tx.send(FeedItem::Fail);
    }
}

struct FactoryState {
    feeds: HashMap<AudioSource, broadcast::Sender<FeedItem>>,
    fail_create: HashSet<AudioSource>,
    active: Vec<Arc<AtomicBool>>,
}

/// Factory producing synthetic taps, one feed per source.
#[derive(Clone)]
pub struct SyntheticTapFactory {
    state: Arc<Mutex<FactoryState>>,
}

impl SyntheticTapFactory {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FactoryState {
                feeds: HashMap::new(),
                fail_create: HashSet::new(),
                active: Vec::new(),
            })),
        }
    }

    /// Feed handle for a source; taps created later subscribe to it.
    pub fn feed(&self, source: AudioSource) -> SyntheticFeed {
        let mut state = self.state.lock().unwrap();
        let tx = state
            .feeds
            .entry(source)
            .or_insert_with(|| broadcast::channel(256).0)
            .clone();
        SyntheticFeed { source, tx }
    }

    /// Make subsequent `create` calls for a source fail, to exercise
    /// reacquisition limits.
    pub fn set_fail_create(&self, source: AudioSource, fail: bool) {
        let mut state = self.state.lock().unwrap();
        if fail {
            state.fail_create.insert(source);
        } else {
            state.fail_create.remove(&source);
        }
    }

    /// Number of taps currently holding (synthetic) hardware resources.
    pub fn active_taps(&self) -> usize {
        let state = self.state.lock().unwrap();
        state
            .active
            .iter()
            .filter(|flag| flag.load(Ordering::SeqCst))
            .count()
    }
}

impl Default for SyntheticTapFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TapFactory for SyntheticTapFactory {
    fn create(
        &self,
        source: AudioSource,
        _target: &TapTarget,
    ) -> Result<Box<dyn TapBackend>, TapError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_create.contains(&source) {
            return Err(TapError::Unavailable);
        }

        let feed = state
            .feeds
            .entry(source)
            .or_insert_with(|| broadcast::channel(256).0)
            .clone();

        let active = Arc::new(AtomicBool::new(false));
        state.active.push(active.clone());

        Ok(Box::new(SyntheticTap {
            source,
            feed,
            active,
            stop: None,
        }))
    }
}

/// Tap backend driven by a `SyntheticFeed` instead of hardware.
pub struct SyntheticTap {
    source: AudioSource,
    feed: broadcast::Sender<FeedItem>,
    active: Arc<AtomicBool>,
    stop: Option<watch::Sender<bool>>,
}

impl TapBackend for SyntheticTap {
    fn activate(&mut self) -> Result<(), TapError> {
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn run(&mut self, sink: FrameSink, lost: InvalidationNotice) -> Result<(), TapError> {
        if !self.active.load(Ordering::SeqCst) {
            return Err(TapError::NotActivated);
        }
        if self.stop.is_some() {
            return Err(TapError::AlreadyRunning);
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        self.stop = Some(stop_tx);

        let mut rx = self.feed.subscribe();
        let source = self.source;
        let active = self.active.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    item = rx.recv() => match item {
                        Ok(FeedItem::Frame(frame)) => sink.push(frame),
                        Ok(FeedItem::Fail) => {
                            active.store(false, Ordering::SeqCst);
                            let _ = lost.send(source);
                            break;
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        Ok(())
    }

    fn invalidate(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(true);
        }
        self.active.store(false, Ordering::SeqCst);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_feed_reaches_running_tap() {
        let factory = SyntheticTapFactory::new();
        let feed = factory.feed(AudioSource::Microphone);

        let mut backend = factory
            .create(AudioSource::Microphone, &TapTarget::DefaultInput)
            .unwrap();
        backend.activate().unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let (lost, _lost_rx) = mpsc::unbounded_channel();
        backend.run(FrameSink::new(tx), lost).unwrap();

        feed.frame(vec![1, 2, 3], 16_000, 1, 0);

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.samples, vec![1, 2, 3]);
        assert_eq!(frame.source, AudioSource::Microphone);
    }

    #[tokio::test]
    async fn test_fail_fires_invalidation_notice() {
        let factory = SyntheticTapFactory::new();
        let feed = factory.feed(AudioSource::SystemOutput);

        let mut backend = factory
            .create(AudioSource::SystemOutput, &TapTarget::SystemMix(vec![]))
            .unwrap();
        backend.activate().unwrap();

        let (tx, _rx) = mpsc::channel(4);
        let (lost, mut lost_rx) = mpsc::unbounded_channel();
        backend.run(FrameSink::new(tx), lost).unwrap();

        feed.fail();

        assert_eq!(lost_rx.recv().await, Some(AudioSource::SystemOutput));
        assert!(!backend.is_active());
    }

    #[tokio::test]
    async fn test_fail_create_gate() {
        let factory = SyntheticTapFactory::new();
        factory.set_fail_create(AudioSource::Microphone, true);

        let result = factory.create(AudioSource::Microphone, &TapTarget::DefaultInput);
        assert!(matches!(result, Err(TapError::Unavailable)));

        factory.set_fail_create(AudioSource::Microphone, false);
        assert!(factory
            .create(AudioSource::Microphone, &TapTarget::DefaultInput)
            .is_ok());
    }
}
