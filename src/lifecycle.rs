//! Shutdown signal plumbing.
//!
//! Background tasks (the pruner, the dedup sweeper, the reconciler ticker)
//! each hold a [`ShutdownSubscription`] and race it against their own
//! timer in a `tokio::select!`. The supervisor owns the single
//! [`ShutdownSignal`] and decides when to fire it.
use tokio::sync::watch;

#[derive(Clone)]
pub struct ShutdownSignal {
    tx: watch::Sender<bool>,
}

pub struct ShutdownSubscription {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn new() -> (Self, ShutdownSubscription) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, ShutdownSubscription { rx })
    }

    pub fn subscribe(&self) -> ShutdownSubscription {
        ShutdownSubscription {
            rx: self.tx.subscribe(),
        }
    }

    /// Broadcast shutdown to every subscriber. Idempotent.
    pub fn fire(&self) {
        self.tx.send_replace(true);
    }

    /// Wait for SIGTERM, SIGINT, or a SIGHUP-equivalent. On platforms
    /// without `tokio::signal::unix` (i.e. not Unix), only Ctrl-C is
    /// honored.
    pub async fn wait_for_termination() {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sig_term = signal(SignalKind::terminate()).expect("listen for SIGTERM");
            let mut sig_hup = signal(SignalKind::hangup()).expect("listen for SIGHUP");
            tokio::select! {
                _ = sig_term.recv() => {}
                _ = sig_hup.recv() => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

impl ShutdownSubscription {
    /// Resolves once shutdown has been fired. Safe to call repeatedly
    /// (e.g. in a loop's `select!`); once fired it resolves immediately
    /// every time after.
    pub async fn shutting_down(&mut self) {
        loop {
            if *self.rx.borrow() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.rx.borrow()
    }
}
