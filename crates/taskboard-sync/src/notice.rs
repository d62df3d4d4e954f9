//! User-facing notices and the saved indicator
//!
//! Failures are never silent: validation errors on a field become inline
//! notices, everything else becomes a transient notice.

use crate::error::AuthorityError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskboard_model::{FieldName, Identifier};
use tokio::sync::broadcast;

/// Message for the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Shown next to the rejected field
    Inline {
        target: Identifier,
        field: FieldName,
        message: String,
    },
    /// Shown as a passing notification
    Transient { message: String },
}

impl Notice {
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Inline { message, .. } | Self::Transient { message } => message,
        }
    }
}

/// Broadcast channel of notices
#[derive(Debug, Clone)]
pub struct NoticeBus {
    sender: broadcast::Sender<Notice>,
}

impl NoticeBus {
    /// Bus buffering `capacity` notices per subscriber (at least one)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.sender.subscribe()
    }

    /// Publish; notices without subscribers are dropped
    pub fn publish(&self, notice: Notice) {
        tracing::debug!(message = notice.message(), "notice");
        let _ = self.sender.send(notice);
    }

    /// Route an authority failure to the right notice
    ///
    /// Field validation failures become inline notices when a field is
    /// known, either from the edit or from the authority's error.
    pub fn report(&self, target: Option<&Identifier>, field: Option<&FieldName>, error: &AuthorityError) {
        let inline = match (error, target) {
            (AuthorityError::Validation { field: named, message }, Some(target)) => named
                .as_ref()
                .or(field)
                .map(|field| Notice::Inline {
                    target: target.clone(),
                    field: field.clone(),
                    message: message.clone(),
                }),
            _ => None,
        };
        let notice = inline.unwrap_or_else(|| Notice::Transient {
            message: error.to_string(),
        });
        self.publish(notice);
    }
}

/// Transient "saved" indicator
///
/// Set on each durable field commit and cleared after a fixed duration,
/// independent of later requests.
#[derive(Debug, Clone, Default)]
pub struct SavedFlag {
    inner: Arc<SavedInner>,
}

#[derive(Debug, Default)]
struct SavedInner {
    saved: AtomicBool,
    generation: AtomicU64,
    timer: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SavedFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn is_saved(&self) -> bool {
        self.inner.saved.load(Ordering::Acquire)
    }

    /// Turn the indicator on for `duration`
    ///
    /// A later mark restarts the countdown.
    pub fn mark(&self, duration: Duration) {
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner.saved.store(true, Ordering::Release);

        let inner = Arc::clone(&self.inner);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if inner.generation.load(Ordering::Acquire) == generation {
                inner.saved.store(false, Ordering::Release);
            }
        });
        if let Some(previous) = self.inner.timer.lock().replace(timer) {
            previous.abort();
        }
    }
}
