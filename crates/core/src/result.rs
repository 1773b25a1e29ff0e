//! Result type definition and extension traits.

use std::fmt::Display;

use crate::error::Error;
use crate::runtime::handle_error;

/// The standard Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for results whose failure is reported and then dropped.
///
/// Used at boundaries where there is no caller left to propagate to, such as
/// notification handlers and worker loops.
pub trait ResultExt<T> {
    /// Convert to an `Option`, handing any error to the process-wide reporter.
    fn or_report(self) -> Option<T>;

    /// Like [`ResultExt::or_report`], prefixing the error with `context`.
    fn or_report_with(self, context: &str) -> Option<T>;
}

impl<T, E: Display> ResultExt<T> for std::result::Result<T, E> {
    fn or_report(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                handle_error(&e);
                None
            }
        }
    }

    fn or_report_with(self, context: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                handle_error(&format!("{context}: {e}"));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::reported_errors;

    #[test]
    fn test_or_report_ok() {
        let result: Result<i32> = Ok(42);
        assert_eq!(result.or_report(), Some(42));
    }

    #[test]
    fn test_or_report_err_counts() {
        let before = reported_errors();
        let result: Result<i32> = Err(Error::invalid_key("x/y/z"));
        assert_eq!(result.or_report_with("decoding key"), None);
        assert!(reported_errors() > before);
    }
}
