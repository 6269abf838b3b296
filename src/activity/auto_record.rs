// Auto-recording controller.
//
// Watches the system-audio activity signal and drives the engine's
// start/stop. Start is delayed by a short window so transient blips never
// trigger capture; stop is delayed by a longer one so brief silences during
// a call do not truncate the session. Re-activation during the stop window
// cancels the pending stop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::activity::finalize_session;
use crate::activity::signal::ActivitySignal;
use crate::audio::AudioSource;
use crate::capture::CaptureEngine;
use crate::config::ActivityConfig;
use crate::persist::TranscriptSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    ArmedStart,
    Recording,
    ArmedStop,
}

pub struct AutoRecordController {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl AutoRecordController {
    /// Spawn the controller against an other-audio activity signal.
    pub fn spawn(
        engine: CaptureEngine,
        signal: ActivitySignal,
        sink: Arc<dyn TranscriptSink>,
        config: &ActivityConfig,
    ) -> Self {
        let start_debounce = Duration::from_millis(config.start_debounce_ms);
        let stop_debounce = Duration::from_millis(config.stop_debounce_ms);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(
            engine,
            signal,
            sink,
            start_debounce,
            stop_debounce,
            shutdown_rx,
        ));

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
    start_debounce: Duration,
    stop_debounce: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut state = State::Idle;

    loop {
        match state {
            State::Idle => {
                if *signal.borrow() {
                    state = State::ArmedStart;
                    continue;
                }
                tokio::select! {
                    res = signal.changed() => {
                        if res.is_err() {
                            break;
                        }
                    }
                    _ = shutdown.changed() => return,
                }
            }
            State::ArmedStart => {
                let debounce = sleep(start_debounce);
                tokio::pin!(debounce);

                loop {
                    tokio::select! {
                        _ = &mut debounce => {
                            match engine
                                .start(&[AudioSource::Microphone, AudioSource::SystemOutput])
                                .await
                            {
                                Ok(()) => {
                                    info!("auto-recording started");
                                    state = State::Recording;
                                }
                                Err(err) => {
                                    warn!("auto-recording start failed: {}", err);
                                    state = State::Idle;
                                }
                            }
                            break;
                        }
                        res = signal.changed() => {
                            if res.is_err() {
                                return;
                            }
                            if !*signal.borrow() {
                                // blip shorter than the window; never started
                                state = State::Idle;
                                break;
                            }
                        }
                        _ = shutdown.changed() => return,
                    }
                }
            }
            State::Recording => {
                if !*signal.borrow() {
                    state = State::ArmedStop;
                    continue;
                }
                tokio::select! {
                    res = signal.changed() => {
                        if res.is_err() {
                            break;
                        }
                    }
                    _ = shutdown.changed() => {
                        finalize_session(&engine, &sink).await;
                        return;
                    }
                }
            }
            State::ArmedStop => {
                let debounce = sleep(stop_debounce);
                tokio::pin!(debounce);

                loop {
                    tokio::select! {
                        _ = &mut debounce => {
                            finalize_session(&engine, &sink).await;
                            info!("auto-recording stopped");
                            state = State::Idle;
                            break;
                        }
                        res = signal.changed() => {
                            if res.is_err() {
                                finalize_session(&engine, &sink).await;
                                return;
                            }
                            if *signal.borrow() {
                                // re-activation cancels the pending stop
                                state = State::Recording;
                                break;
                            }
                        }
                        _ = shutdown.changed() => {
                            finalize_session(&engine, &sink).await;
                            return;
                        }
                    }
                }
            }
        }
    }

    // signal stream ended while a session may still be live
    if state == State::Recording || state == State::ArmedStop {
        finalize_session(&engine, &sink).await;
    }
}
