use diesel_async::pooled_connection::PoolError;
use shared::jobs::JobError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LomsError {
    #[error("insufficient stocks")]
    InsufficientStocks,
    #[error("incorrect order state")]
    IncorrectOrderState,
    #[error("order {0} not found")]
    OrderNotFound(i64),
    #[error("unknown order status code {0}")]
    UnknownStatus(i16),
    #[error("database error while trying to {context}: {source}")]
    Storage {
        context: &'static str,
        #[source]
        source: diesel::result::Error,
    },
    #[error("could not get a database connection: {0}")]
    Pool(#[from] bb8::RunError<PoolError>),
    #[error("could not send notification: {0}")]
    Notification(String),
    #[error("{} notification(s) failed: {}", .0.len(), join_errors(.0))]
    Notifications(Vec<LomsError>),
    #[error("could not start jobs: {}", join_errors(.0))]
    Jobs(Vec<JobError>),
}

impl LomsError {
    /// Errors raised by the business rules rather than by the infrastructure.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InsufficientStocks | Self::IncorrectOrderState)
    }
}

impl From<diesel::result::Error> for LomsError {
    fn from(source: diesel::result::Error) -> Self {
        Self::Storage {
            context: "run transaction",
            source,
        }
    }
}

/// Wraps a diesel error with the operation that produced it.
pub fn storage(context: &'static str) -> impl FnOnce(diesel::result::Error) -> LomsError {
    move |source| LomsError::Storage { context, source }
}

fn join_errors<E: ToString>(errors: &[E]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
