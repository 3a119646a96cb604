//! Background task handoff trait and in-memory implementation.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::CheckoutError;

/// Task type identifiers for follow-up work enqueued by the service.
pub mod task_types {
    /// A new order was created.
    pub const ORDER_CREATED: &str = "order_created";

    /// An order's payment was confirmed.
    pub const PAYMENT_CONFIRMED: &str = "payment_confirmed";

    /// An order was cancelled and its stock restored.
    pub const ORDER_CANCELLED: &str = "order_cancelled";
}

/// A task handed to the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// One of the `task_types` constants.
    pub task_type: String,

    /// Task-specific data for the worker.
    pub payload: serde_json::Value,
}

/// Trait for handing follow-up work to a background worker.
///
/// The order service treats the handoff as fire-and-forget: a failure
/// is logged and never fails the operation that triggered it.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueues a task for asynchronous processing.
    async fn enqueue(&self, task_type: &str, payload: serde_json::Value)
    -> Result<(), CheckoutError>;
}

#[derive(Debug, Default)]
struct InMemoryTaskQueueState {
    tasks: Vec<Task>,
    fail_on_enqueue: bool,
}

/// In-memory task queue for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskQueue {
    state: Arc<RwLock<InMemoryTaskQueueState>>,
}

impl InMemoryTaskQueue {
    /// Creates a new in-memory task queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the queue to fail on the next enqueue call.
    pub fn set_fail_on_enqueue(&self, fail: bool) {
        self.state.write().unwrap().fail_on_enqueue = fail;
    }

    /// Returns the number of enqueued tasks.
    pub fn task_count(&self) -> usize {
        self.state.read().unwrap().tasks.len()
    }

    /// Returns copies of every enqueued task.
    pub fn tasks(&self) -> Vec<Task> {
        self.state.read().unwrap().tasks.clone()
    }

    /// Returns copies of the enqueued tasks of one type.
    pub fn tasks_of_type(&self, task_type: &str) -> Vec<Task> {
        self.state
            .read()
            .unwrap()
            .tasks
            .iter()
            .filter(|t| t.task_type == task_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(
        &self,
        task_type: &str,
        payload: serde_json::Value,
    ) -> Result<(), CheckoutError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_enqueue {
            return Err(CheckoutError::TaskQueue("queue unavailable".to_string()));
        }

        state.tasks.push(Task {
            task_type: task_type.to_string(),
            payload,
        });

        Ok(())
    }
}
