//! Explicit subscription handles.
//!
//! Collaborators that push events (store change feeds, peer rooms) hand back
//! a [`SubscriptionHandle`]. Cancelling it unregisters the callback before
//! `cancel` returns, so no further events are delivered afterwards. Dropping
//! an uncancelled handle cancels it too.

use std::fmt;

type CancelFn = Box<dyn FnOnce() + Send>;

/// Handle to an active subscription.
pub struct SubscriptionHandle {
    label: String,
    cancel: Option<CancelFn>,
}

impl SubscriptionHandle {
    pub fn new(label: impl Into<String>, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            label: label.into(),
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle with nothing to cancel (for collaborators without push).
    pub fn inert(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            cancel: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    /// Unregister synchronously.
    pub fn cancel(mut self) {
        self.cancel_in_place();
    }

    fn cancel_in_place(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel_in_place();
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("label", &self.label)
            .field("active", &self.is_active())
            .finish()
    }
}
