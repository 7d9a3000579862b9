//! # Error Types
//!
//! Internally the engine propagates `eyre::Result` with context attached at
//! each I/O step, the same way the storage layer reports failures. Callers of
//! the public API see [`RmsError`] instead: every public operation converts
//! its report with [`RmsError::from_report`] before returning.
//!
//! ## Conversion Rules
//!
//! ```text
//! eyre::Report ──downcast──> RmsError      (raised inside, passed through)
//!              └─otherwise─> RmsError::Generic(report)
//! ```
//!
//! Typed errors survive `wrap_err` because eyre keeps the original error
//! reachable for downcasting. Raw `std::io::Error` values never escape: they
//! end up inside `Generic`.
//!
//! ## Distinguishing Failures
//!
//! `StoreFull` means "retry with less data"; `StoreCorrupt` and `Generic`
//! mean the store is unusable or the device failed.

use std::error::Error as StdError;

pub type Result<T, E = RmsError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum RmsError {
    #[error("record store is not open")]
    NotOpen,

    #[error("invalid record id {0}")]
    InvalidRecordId(i32),

    #[error("record store full: {requested} bytes requested, {available} available")]
    StoreFull { requested: u32, available: u32 },

    #[error("record store corrupt: {0}")]
    StoreCorrupt(String),

    #[error("record store not found: {0}")]
    NotFound(String),

    #[error("security violation: {0}")]
    Security(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("record store error: {0}")]
    Generic(#[source] Box<dyn StdError + Send + Sync + 'static>),
}

impl RmsError {
    /// Recovers a typed error from a report, or wraps it as `Generic`.
    pub fn from_report(report: eyre::Report) -> Self {
        match report.downcast::<RmsError>() {
            Ok(err) => err,
            Err(report) => RmsError::Generic(report.into()),
        }
    }

    pub fn is_store_full(&self) -> bool {
        matches!(self, RmsError::StoreFull { .. })
    }

    pub fn is_invalid_record_id(&self) -> bool {
        matches!(self, RmsError::InvalidRecordId(_))
    }
}

/// Converts an internal result at a public operation boundary.
pub(crate) trait IntoRmsResult<T> {
    fn into_rms(self) -> Result<T>;
}

impl<T> IntoRmsResult<T> for eyre::Result<T> {
    fn into_rms(self) -> Result<T> {
        self.map_err(RmsError::from_report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::WrapErr;

    #[test]
    fn from_report_recovers_typed_error() {
        let report = eyre::Report::new(RmsError::InvalidRecordId(7));

        let err = RmsError::from_report(report);

        assert!(matches!(err, RmsError::InvalidRecordId(7)));
    }

    #[test]
    fn from_report_recovers_typed_error_through_context() {
        let result: eyre::Result<()> = Err(RmsError::StoreFull {
            requested: 64,
            available: 8,
        })
        .wrap_err("failed to add record");

        let err = result.into_rms().unwrap_err();

        assert!(err.is_store_full());
    }

    #[test]
    fn from_report_wraps_io_error_as_generic() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let result: eyre::Result<()> = Err(io).wrap_err("failed to write block");

        let err = result.into_rms().unwrap_err();

        assert!(matches!(err, RmsError::Generic(_)));
        assert!(err.to_string().contains("failed to write block"));
    }
}
