use thiserror::Error;

use crate::common::{SiteId, TransactionId};

/// Errors the simulator can surface. Parse/config/IO errors are fatal
/// and propagate to the top-level entry point; deferred operations
/// (wait-queue entries) and aborts (deadlock victim, touched-failed-site)
/// are normal outcomes surfaced through the log, never an `Err`.
#[derive(Error, Debug)]
pub enum SimError {
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("operation references unknown transaction T{0}")]
    UnknownTransaction(TransactionId),

    #[error("operation references unknown site {0}")]
    UnknownSite(SiteId),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

impl SimError {
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        SimError::Parse { line, message: message.into() }
    }

    /// Parse and unknown-transaction errors are both grammar-level
    /// failures (spec §7 treats "operation on unknown transaction" as
    /// a parse-error class); everything else is not.
    pub fn is_parse_class(&self) -> bool {
        matches!(self, SimError::Parse { .. } | SimError::UnknownTransaction(_) | SimError::UnknownSite(_))
    }
}

pub type SimResult<T> = std::result::Result<T, SimError>;

/// Returns early with `SimError::Invariant` when `$cond` does not
/// hold. For checks the data model guarantees can never fail on valid
/// input — a site that just reported it holds a variable having no
/// committed value for it, a cycle reported by the deadlock detector
/// turning out empty — so a failure here means a bug in the simulator,
/// not a property of the script being run, and callers get a `Result`
/// instead of an aborted process.
#[macro_export]
macro_rules! invariant {
    ($cond:expr, $($msg:tt)*) => {
        if !($cond) {
            return Err($crate::error::SimError::Invariant(format!($($msg)*)));
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_unknown_txn_are_parse_class() {
        assert!(SimError::parse(1, "bad").is_parse_class());
        assert!(SimError::UnknownTransaction(5).is_parse_class());
        assert!(!SimError::Config("x".into()).is_parse_class());
    }

    #[test]
    fn invariant_macro_returns_err_on_false() {
        fn check(cond: bool) -> SimResult<()> {
            invariant!(cond, "expected {cond} to hold");
            Ok(())
        }
        assert!(check(true).is_ok());
        assert!(matches!(check(false), Err(SimError::Invariant(_))));
    }
}
