//! Checkout error types.

use domain::OrderError;
use store::StoreError;
use thiserror::Error;

/// Errors returned at the order service boundary.
///
/// Validation failures are values, never panics; the caller decides how
/// to render them. Store failures surface after any partial state has
/// been compensated.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// A referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The request was malformed or unsatisfiable.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A product did not have enough stock for the order.
    #[error("insufficient stock for {product_name}: {available} available")]
    InsufficientStock {
        product_name: String,
        available: u32,
    },

    /// The idempotency key was already used for this operation.
    #[error("duplicate {scope} request: key {key:?} already used")]
    DuplicateOperation { scope: String, key: String },

    /// An order aggregate rule was violated.
    #[error("order error: {0}")]
    Order(#[from] OrderError),

    /// The notification collaborator failed.
    #[error("notification error: {0}")]
    Notification(String),

    /// The task queue collaborator failed.
    #[error("task queue error: {0}")]
    TaskQueue(String),

    /// The storage layer failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl CheckoutError {
    /// Creates a NotFound error for an entity and its id.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Convenience type alias for checkout results.
pub type Result<T> = std::result::Result<T, CheckoutError>;
