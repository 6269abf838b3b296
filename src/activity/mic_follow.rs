// Mic-following controller.
//
// Records mic-only whenever another process is using the microphone. The
// hard part is knowing when to stop: while our own tap is open, the
// external mic-usage signal is ambiguous. So once local activity goes
// silent for long enough, the controller releases its own tap, waits
// briefly, and re-reads the signal; a third party still on the microphone
// means reacquire and keep going, otherwise the session is finalized.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{info, warn};

use crate::activity::finalize_session;
use crate::activity::signal::ActivitySignal;
use crate::audio::AudioSource;
use crate::capture::CaptureEngine;
use crate::config::ActivityConfig;
use crate::persist::TranscriptSink;

struct Tunables {
    start_debounce: Duration,
    silence_threshold: Duration,
    probe_interval: Duration,
    probe_pause: Duration,
}

pub struct MicFollowController {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl MicFollowController {
    /// Spawn the controller against a mic-usage activity signal.
    pub fn spawn(
        engine: CaptureEngine,
        signal: ActivitySignal,
        sink: Arc<dyn TranscriptSink>,
        config: &ActivityConfig,
    ) -> Self {
        let tunables = Tunables {
            start_debounce: Duration::from_millis(config.mic_start_debounce_ms),
            silence_threshold: Duration::from_millis(config.silence_threshold_ms),
            probe_interval: Duration::from_millis(config.probe_interval_ms),
            probe_pause: Duration::from_millis(config.probe_pause_ms),
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(engine, signal, sink, tunables, shutdown_rx));

        Self {
            handle,
            shutdown: shutdown_tx,
        }
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

async fn run(
    engine: CaptureEngine,
    mut signal: ActivitySignal,
    sink: Arc<dyn TranscriptSink>,
    cfg: Tunables,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        // wait for another process to take the microphone
        while !*signal.borrow() {
            tokio::select! {
                res = signal.changed() => {
                    if res.is_err() {
                        return;
                    }
                }
                _ = shutdown.changed() => return,
            }
        }

        // short debounce against spurious flips
        let debounce = sleep(cfg.start_debounce);
        tokio::pin!(debounce);
        let mut aborted = false;
        loop {
            tokio::select! {
                _ = &mut debounce => break,
                res = signal.changed() => {
                    if res.is_err() {
                        return;
                    }
                    if !*signal.borrow() {
                        aborted = true;
                        break;
                    }
                }
                _ = shutdown.changed() => return,
            }
        }
        if aborted {
            continue;
        }

        if let Err(err) = engine.start(&[AudioSource::Microphone]).await {
            warn!("mic-following start failed: {}", err);
            wait_for_clear(&mut signal, &mut shutdown).await;
            continue;
        }
        info!("mic-following recording started");

        let mut probe = interval(cfg.probe_interval);
        probe.set_missed_tick_behavior(MissedTickBehavior::Delay);
        probe.tick().await; // first tick completes immediately

        'recording: loop {
            tokio::select! {
                _ = probe.tick() => {
                    if !engine.is_active().await {
                        // stopped elsewhere (fatal error or manual stop)
                        break 'recording;
                    }
                    if engine.last_activity_elapsed() < cfg.silence_threshold {
                        continue;
                    }

                    // release our own tap so the external signal reflects
                    // only third parties, then re-read it
                    engine.pause_source(AudioSource::Microphone).await;
                    sleep(cfg.probe_pause).await;

                    if *signal.borrow() {
                        if let Err(err) = engine.resume_source(AudioSource::Microphone).await {
                            warn!("failed to reacquire microphone: {}", err);
                            finalize_session(&engine, &sink).await;
                            break 'recording;
                        }
                    } else {
                        info!("microphone idle, finalizing session");
                        finalize_session(&engine, &sink).await;
                        break 'recording;
                    }
                }
                _ = shutdown.changed() => {
                    finalize_session(&engine, &sink).await;
                    return;
                }
            }
        }

        // do not re-arm until the signal clears, so a session ended by an
        // error cannot restart in a tight loop
        wait_for_clear(&mut signal, &mut shutdown).await;
        if *shutdown.borrow() {
            return;
        }
    }
}

async fn wait_for_clear(signal: &mut ActivitySignal, shutdown: &mut watch::Receiver<bool>) {
    while *signal.borrow() {
        tokio::select! {
            res = signal.changed() => {
                if res.is_err() {
                    return;
                }
            }
            _ = shutdown.changed() => return,
        }
    }
}
