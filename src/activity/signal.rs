use tokio::sync::watch;

/// Boolean activity stream from a platform monitor: "is any other process
/// using resource X right now". Producers live outside this crate.
pub type ActivitySignal = watch::Receiver<bool>;

/// Hand-driven signal source, for tests and platforms without a monitor.
pub struct SignalSource {
    tx: watch::Sender<bool>,
}

impl SignalSource {
    pub fn new(initial: bool) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn set(&self, active: bool) {
        self.tx.send_replace(active);
    }

    pub fn signal(&self) -> ActivitySignal {
        self.tx.subscribe()
    }
}
