use std::{future::Future, time::Duration};

use tokio::{sync::watch, task::JoinHandle};
use tracing::warn;

use crate::error::Result;

pub const DEFAULT_WINDOW: Duration = Duration::from_millis(300);

/// Coalesces a burst of typing toggles into at most one write per window.
///
/// The first toggle opens a window; whatever value is current when the window closes is
/// written, and only if it differs from the last value written. Failed writes are logged
/// and dropped, the flag is best effort.
pub struct TypingDebouncer {
    tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl TypingDebouncer {
    pub fn spawn<F, Fut>(window: Duration, mut write: F) -> Self
    where
        F: FnMut(bool) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let (tx, mut rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut written = false;
            while rx.changed().await.is_ok() {
                tokio::time::sleep(window).await;
                let latest = *rx.borrow_and_update();
                if latest == written {
                    continue;
                }
                match write(latest).await {
                    Ok(()) => written = latest,
                    Err(e) => warn!("typing flag write failed: {e}"),
                }
            }
        });
        Self { tx, task }
    }

    pub fn set(&self, is_typing: bool) {
        self.tx.send_replace(is_typing);
    }
}

impl Drop for TypingDebouncer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
