//! Checkout orchestration for the order engine.
//!
//! [`OrderService`] drives the whole order lifecycle against a storage
//! backend: creation (validation, pricing, atomic stock reservation),
//! payment confirmation, status changes, and cancellation with stock
//! restoration. Creation and confirmation accept idempotency keys so
//! client retries cannot double-charge or double-create.
//!
//! Side effects that are not part of the lifecycle, user notification
//! and background task handoff, go through the [`Notifier`] and
//! [`TaskQueue`] traits and are fire-and-forget.

pub mod commands;
pub mod error;
pub mod notify;
pub mod service;
pub mod tasks;

pub use commands::{CancelOrder, ChangeStatus, ConfirmPayment, CreateOrder, ItemRequest};
pub use error::{CheckoutError, Result};
pub use notify::{InMemoryNotifier, Notification, Notifier};
pub use service::{OrderService, scopes};
pub use tasks::{InMemoryTaskQueue, Task, TaskQueue, task_types};
