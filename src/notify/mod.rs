//! Notification sink.
//!
//! Poll loops report through a [`Notifier`] handed to them by whoever
//! started the loop (a chat channel in production). Delivery problems are
//! never fatal to a loop: [`deliver`] logs and moves on, and
//! [`StatusMessage`] falls back to sending a fresh message when an edit is
//! refused.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("notification sink closed")]
    Closed,
    #[error("message {0:?} cannot be edited")]
    NotEditable(MessageHandle),
}

/// Identifies a delivered message so it can be edited later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageHandle(pub u64);

pub trait Notifier: Send + Sync {
    fn send<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<MessageHandle, NotifyError>>;

    fn edit<'a>(
        &'a self,
        handle: MessageHandle,
        text: &'a str,
    ) -> BoxFuture<'a, Result<(), NotifyError>>;
}

/// Send `text`, logging instead of failing. Empty text is skipped.
pub async fn deliver(sink: &dyn Notifier, text: &str) -> Option<MessageHandle> {
    if text.trim().is_empty() {
        return None;
    }
    match sink.send(text).await {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "notification dropped");
            None
        }
    }
}

/// A message that is edited in place on every update.
#[derive(Debug, Default)]
pub struct StatusMessage {
    handle: Option<MessageHandle>,
}

impl StatusMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> Option<MessageHandle> {
        self.handle
    }

    pub async fn update(&mut self, sink: &dyn Notifier, text: &str) {
        if let Some(handle) = self.handle {
            match sink.edit(handle, text).await {
                Ok(()) => return,
                Err(e) => debug!(error = %e, "status edit failed, sending a new message"),
            }
        }
        self.handle = deliver(sink, text).await;
    }
}

/// What a [`ChannelNotifier`] emits.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Sent { handle: MessageHandle, text: String },
    Edited { handle: MessageHandle, text: String },
}

impl Notification {
    pub fn text(&self) -> &str {
        match self {
            Notification::Sent { text, .. } | Notification::Edited { text, .. } => text,
        }
    }
}

/// Pushes every notification into an unbounded channel.
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
    next_id: AtomicU64,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                next_id: AtomicU64::new(1),
            },
            rx,
        )
    }
}

impl Notifier for ChannelNotifier {
    fn send<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<MessageHandle, NotifyError>> {
        async move {
            let handle = MessageHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
            self.tx
                .send(Notification::Sent {
                    handle,
                    text: text.to_string(),
                })
                .map_err(|_| NotifyError::Closed)?;
            Ok(handle)
        }
        .boxed()
    }

    fn edit<'a>(
        &'a self,
        handle: MessageHandle,
        text: &'a str,
    ) -> BoxFuture<'a, Result<(), NotifyError>> {
        async move {
            if handle.0 >= self.next_id.load(Ordering::Relaxed) {
                return Err(NotifyError::NotEditable(handle));
            }
            self.tx
                .send(Notification::Edited {
                    handle,
                    text: text.to_string(),
                })
                .map_err(|_| NotifyError::Closed)
        }
        .boxed()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Drain everything currently queued.
    pub fn drain(rx: &mut mpsc::UnboundedReceiver<Notification>) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = rx.try_recv() {
            out.push(n);
        }
        out
    }

    /// Texts of the drained notifications.
    pub fn texts(rx: &mut mpsc::UnboundedReceiver<Notification>) -> Vec<String> {
        drain(rx).iter().map(|n| n.text().to_string()).collect()
    }

    /// Accepts sends, refuses every edit.
    pub struct NoEditNotifier {
        pub inner: ChannelNotifier,
    }

    impl Notifier for NoEditNotifier {
        fn send<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<MessageHandle, NotifyError>> {
            self.inner.send(text)
        }

        fn edit<'a>(
            &'a self,
            handle: MessageHandle,
            _text: &'a str,
        ) -> BoxFuture<'a, Result<(), NotifyError>> {
            async move { Err(NotifyError::NotEditable(handle)) }.boxed()
        }
    }
}
