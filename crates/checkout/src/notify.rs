//! Notification collaborator trait and in-memory implementation.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::CheckoutError;

/// A notification handed to the collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Who the message goes to, usually an email address.
    pub recipient: String,

    /// The message body.
    pub message: String,
}

/// Trait for user-facing notification delivery.
///
/// The order service treats delivery as best-effort: a failure is
/// logged and never fails the operation that triggered it.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends a message to a recipient.
    async fn notify(&self, recipient: &str, message: &str) -> Result<(), CheckoutError>;
}

#[derive(Debug, Default)]
struct InMemoryNotifierState {
    sent: Vec<Notification>,
    fail_on_notify: bool,
}

/// In-memory notifier for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    state: Arc<RwLock<InMemoryNotifierState>>,
}

impl InMemoryNotifier {
    /// Creates a new in-memory notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the notifier to fail on the next notify call.
    pub fn set_fail_on_notify(&self, fail: bool) {
        self.state.write().unwrap().fail_on_notify = fail;
    }

    /// Returns the number of delivered notifications.
    pub fn sent_count(&self) -> usize {
        self.state.read().unwrap().sent.len()
    }

    /// Returns copies of every delivered notification.
    pub fn sent(&self) -> Vec<Notification> {
        self.state.read().unwrap().sent.clone()
    }

    /// Returns the recipient of the most recent notification.
    pub fn last_recipient(&self) -> Option<String> {
        self.state
            .read()
            .unwrap()
            .sent
            .last()
            .map(|n| n.recipient.clone())
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, recipient: &str, message: &str) -> Result<(), CheckoutError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_notify {
            return Err(CheckoutError::Notification(
                "notifier unavailable".to_string(),
            ));
        }

        state.sent.push(Notification {
            recipient: recipient.to_string(),
            message: message.to_string(),
        });

        Ok(())
    }
}
