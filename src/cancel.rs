//! Operator interrupt handling.
//!
//! A listener thread waits for SIGINT/SIGTERM and records which signal
//! arrived. Running steps forward that signal to their child process, and
//! the runners stop launching new steps once the token is set. A second
//! signal marks the token forced and the running child is killed outright.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;

/// Shared flag recording the first termination signal received.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    signal: Arc<AtomicI32>,
    forced: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a signal. Only the first one sticks.
    pub fn cancel(&self, signal: i32) {
        let _ = self
            .signal
            .compare_exchange(0, signal, Ordering::SeqCst, Ordering::SeqCst);
    }

    /// Escalate: the running child gets SIGKILL instead of waiting.
    pub fn force(&self) {
        self.forced.store(true, Ordering::SeqCst);
    }

    pub fn is_forced(&self) -> bool {
        self.forced.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal().is_some()
    }

    /// The signal number that cancelled the run, if any.
    pub fn signal(&self) -> Option<i32> {
        match self.signal.load(Ordering::SeqCst) {
            0 => None,
            sig => Some(sig),
        }
    }
}

/// Spawn the background listener that feeds `token`.
pub fn listen_for_signals(token: CancelToken) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()
        .context("Failed to create signal runtime")?;

    thread::Builder::new()
        .name("signal-listener".into())
        .spawn(move || {
            runtime.block_on(async move {
                if let Err(e) = wait_for_signal(&token).await {
                    tracing::warn!("signal listener stopped: {e}");
                }
            })
        })
        .context("Failed to spawn signal listener thread")?;

    Ok(())
}

async fn wait_for_signal(token: &CancelToken) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    loop {
        let received = tokio::select! {
            _ = interrupt.recv() => nix::sys::signal::Signal::SIGINT,
            _ = terminate.recv() => nix::sys::signal::Signal::SIGTERM,
        };

        if !token.is_cancelled() {
            tracing::warn!("received {received}, stopping after the current step");
            eprintln!("\n[INTERRUPT] {received} received - no further steps will be launched");
            eprintln!("[INTERRUPT] send it again to kill the running step");
            token.cancel(received as i32);
        } else {
            tracing::warn!("received {received} again, killing the running step");
            eprintln!("\n[INTERRUPT] {received} received again - killing the running step");
            token.force();
            return Ok(());
        }
    }
}
