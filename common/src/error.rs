use std::{future::Future, time::Duration};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error taxonomy shared by every layer of the emulator.
///
/// Client-caused kinds surface unchanged through the wire envelope; transient
/// faults are retried by [`retry_with_backoff`] before being surfaced as
/// `Internal`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    AlreadyExists(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("transient fault: {0}")]
    Retryable(anyhow::Error),

    #[error("internal error: {0}")]
    Internal(anyhow::Error),
}

impl Error {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn not_found(kind: &str, name: &str) -> Self {
        Self::NotFound(format!("{kind} {name} not found"))
    }

    pub fn already_exists(kind: &str, name: &str) -> Self {
        Self::AlreadyExists(format!("{kind} {name} already exists"))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    /// The `__type` string used in the wire error envelope.
    pub fn wire_type(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "InvalidParameterException",
            Self::NotFound(_) => "ResourceNotFoundException",
            Self::AlreadyExists(_) => "ResourceAlreadyExistsException",
            Self::PreconditionFailed(_) => "PreconditionFailedException",
            Self::Retryable(_) | Self::Internal(_) => "ServerException",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::Retryable(_) | Self::Internal(_) => 500,
            _ => 400,
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidInput(format!("malformed JSON: {err}"))
    }
}

impl From<tokio_postgres::Error> for Error {
    fn from(err: tokio_postgres::Error) -> Self {
        use tokio_postgres::error::SqlState;

        let classified = err.as_db_error().map(|db| {
            let code = db.code().code().to_string();
            (code, db.message().to_string())
        });
        match classified {
            Some((code, message)) if code == SqlState::UNIQUE_VIOLATION.code() => {
                Self::AlreadyExists(message)
            }
            Some((code, message)) if code == SqlState::FOREIGN_KEY_VIOLATION.code() => {
                Self::NotFound(message)
            }
            // Data exceptions (bad type, length, out of range).
            Some((code, message)) if code.starts_with("22") => Self::InvalidInput(message),
            // Connection exceptions.
            Some((code, _)) if code.starts_with("08") => Self::Retryable(err.into()),
            _ if err.is_closed() => Self::Retryable(err.into()),
            _ => Self::Internal(err.into()),
        }
    }
}

impl From<deadpool_postgres::PoolError> for Error {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Retryable(err.into())
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        let classified = match &err {
            sqlx::Error::RowNotFound => Some(Self::NotFound("row not found".to_string())),
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => None,
            sqlx::Error::Database(db) => {
                let code = db.code().map(|c| c.into_owned());
                let message = db.message().to_string();
                match code.as_deref() {
                    // SQLITE_CONSTRAINT_PRIMARYKEY / SQLITE_CONSTRAINT_UNIQUE
                    Some("1555") | Some("2067") => Some(Self::AlreadyExists(message)),
                    // SQLITE_CONSTRAINT_FOREIGNKEY
                    Some("787") => Some(Self::NotFound(message)),
                    Some("19") if message.contains("UNIQUE constraint failed") => {
                        Some(Self::AlreadyExists(message))
                    }
                    Some("19") if message.contains("FOREIGN KEY constraint failed") => {
                        Some(Self::NotFound(message))
                    }
                    _ => Some(Self::Internal(anyhow::anyhow!("database error: {message}"))),
                }
            }
            _ => Some(Self::Internal(anyhow::anyhow!("sqlx error: {err}"))),
        };
        match classified {
            Some(e) => e,
            None => Self::Retryable(err.into()),
        }
    }
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(resp) if resp.code == 404 => Self::NotFound(resp.message.clone()),
            kube::Error::Api(resp) if resp.code == 409 => Self::AlreadyExists(resp.message.clone()),
            kube::Error::Api(resp) if resp.code >= 500 => Self::Retryable(err.into()),
            _ => Self::Internal(err.into()),
        }
    }
}

const BACKOFF_DELAYS: [Duration; 3] = [
    Duration::from_millis(100),
    Duration::from_millis(500),
    Duration::from_secs(2),
];

/// Run `op`, retrying transient faults with capped backoff.
///
/// Non-retryable errors are returned immediately. A fault that is still
/// transient after the final attempt is surfaced as `Internal`.
pub async fn retry_with_backoff<T, F, Fut>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < BACKOFF_DELAYS.len() => {
                tracing::warn!(attempt, error = %err, "transient fault, backing off");
                tokio::time::sleep(BACKOFF_DELAYS[attempt]).await;
                attempt += 1;
            }
            Err(Error::Retryable(source)) => {
                return Err(Error::Internal(source.context("retries exhausted")));
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn retry_gives_up_after_capped_attempts() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = retry_with_backoff(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Retryable(anyhow::anyhow!("connection reset"))) }
        })
        .await;
        assert!(matches!(result, Err(Error::Internal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn retry_passes_through_client_errors() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = retry_with_backoff(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::invalid_input("bad arn")) }
        })
        .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_recovers_after_transient_fault() {
        let calls = AtomicUsize::new(0);
        let result = retry_with_backoff(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(Error::Retryable(anyhow::anyhow!("timeout")))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn wire_types_are_stable() {
        assert_eq!(
            Error::invalid_input("x").wire_type(),
            "InvalidParameterException"
        );
        assert_eq!(
            Error::not_found("cluster", "prod").wire_type(),
            "ResourceNotFoundException"
        );
        assert_eq!(Error::Internal(anyhow::anyhow!("x")).http_status(), 500);
        assert_eq!(Error::invalid_input("x").http_status(), 400);
    }
}
