use core::fmt;
use std::sync::Arc;

use xmldb_core::StoreError;

/// Error codes raised by the query layer.
///
/// W3C codes render as `err:CODE`, database specific codes as `exerr:CODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    FORG0001, // invalid lexical form / casting failure
    FORG0006, // invalid argument type for effective boolean value
    FODC0002, // collection or document not found
    XPTY0004, // type error
    XPDY0002, // context item undefined
    XPST0003, // syntax error
    XPST0008, // undeclared variable
    XPST0017, // unknown function or wrong arity
    EXXQDY0003, // invalid pragma content
    EXXQDY0004, // index required but not used
    ERROR,      // generic database failure
    Unknown,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::FORG0001 => "FORG0001",
            ErrorCode::FORG0006 => "FORG0006",
            ErrorCode::FODC0002 => "FODC0002",
            ErrorCode::XPTY0004 => "XPTY0004",
            ErrorCode::XPDY0002 => "XPDY0002",
            ErrorCode::XPST0003 => "XPST0003",
            ErrorCode::XPST0008 => "XPST0008",
            ErrorCode::XPST0017 => "XPST0017",
            ErrorCode::EXXQDY0003 => "EXXQDY0003",
            ErrorCode::EXXQDY0004 => "EXXQDY0004",
            ErrorCode::ERROR => "ERROR",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }

    pub fn is_database_code(self) -> bool {
        matches!(self, ErrorCode::EXXQDY0003 | ErrorCode::EXXQDY0004 | ErrorCode::ERROR)
    }

    /// Formatted code, `err:XPTY0004` or `exerr:EXXQDY0004`.
    pub fn format(self) -> String {
        if self.is_database_code() {
            format!("exerr:{}", self.as_str())
        } else {
            format!("err:{}", self.as_str())
        }
    }

    pub fn from_code(s: &str) -> Self {
        use ErrorCode::*;
        match s {
            "err:FORG0001" => FORG0001,
            "err:FORG0006" => FORG0006,
            "err:FODC0002" => FODC0002,
            "err:XPTY0004" => XPTY0004,
            "err:XPDY0002" => XPDY0002,
            "err:XPST0003" => XPST0003,
            "err:XPST0008" => XPST0008,
            "err:XPST0017" => XPST0017,
            "exerr:EXXQDY0003" => EXXQDY0003,
            "exerr:EXXQDY0004" => EXXQDY0004,
            "exerr:ERROR" => ERROR,
            _ => Unknown,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    #[source]
    pub source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn from_code(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self { code, message: msg.into(), source: None }
    }

    pub fn with_source(mut self, source: impl Into<Option<Arc<dyn std::error::Error + Send + Sync>>>) -> Self {
        self.source = source.into();
        self
    }

    pub fn format_code(&self) -> String {
        self.code.format()
    }

    /// The store failure behind this error, if any.
    pub fn store_error(&self) -> Option<&StoreError> {
        self.source.as_deref().and_then(|s| s.downcast_ref::<StoreError>())
    }

    pub fn syntax(msg: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::XPST0003, msg)
    }

    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::XPTY0004, msg)
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        let code = match e {
            StoreError::CollectionNotFound(_) | StoreError::DocumentNotFound(_) => ErrorCode::FODC0002,
            _ => ErrorCode::ERROR,
        };
        Error::from_code(code, e.to_string()).with_source(Some(Arc::new(e) as Arc<dyn std::error::Error + Send + Sync>))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ErrorCode::XPTY0004, "err:XPTY0004")]
    #[case(ErrorCode::EXXQDY0003, "exerr:EXXQDY0003")]
    #[case(ErrorCode::EXXQDY0004, "exerr:EXXQDY0004")]
    fn codes_round_trip(#[case] code: ErrorCode, #[case] formatted: &str) {
        assert_eq!(code.format(), formatted);
        assert_eq!(ErrorCode::from_code(formatted), code);
    }

    #[rstest]
    fn store_errors_keep_their_source() {
        let err: Error = StoreError::Interrupted.into();
        assert_eq!(err.code, ErrorCode::ERROR);
        assert!(matches!(err.store_error(), Some(StoreError::Interrupted)));
        assert_eq!(err.to_string(), "exerr:ERROR: index probe interrupted");
    }
}
