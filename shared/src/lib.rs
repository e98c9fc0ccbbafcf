// shared/src/lib.rs

/// Result codes reported alongside errors, numbered the way the record store reports them.
pub mod result_code {
    pub const SERVER_ERROR: i32 = 1;
    pub const KEY_NOT_FOUND: i32 = 2;
    pub const KEY_EXISTS: i32 = 5;
    pub const TIMEOUT: i32 = 9;
    pub const BIN_TYPE_ERROR: i32 = 12;
    pub const NAMESPACE_NOT_FOUND: i32 = 20;
    pub const FAIL_FORBIDDEN: i32 = 22;
    pub const PARAM_ERROR: i32 = -2;
    pub const SERVER_NOT_AVAILABLE: i32 = -8;
    pub const SERIALIZE_ERROR: i32 = -10;
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("not found")]
    NotFound,
    #[error("record already exists")]
    RecordExists,
    #[error("bin type incompatible: {0}")]
    BinIncompatibleType(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("namespace not found: {0}")]
    NamespaceNotFound(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("connection: {0}")]
    Connection(String),
    #[error("serialization: {0}")]
    Serialization(String),
    #[error("configuration: {0}")]
    Config(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    /// Numeric result code for log lines ("Error 22: ...")
    pub fn code(&self) -> i32 {
        match self {
            Error::NotFound => result_code::KEY_NOT_FOUND,
            Error::RecordExists => result_code::KEY_EXISTS,
            Error::BinIncompatibleType(_) => result_code::BIN_TYPE_ERROR,
            Error::Timeout(_) => result_code::TIMEOUT,
            Error::NamespaceNotFound(_) => result_code::NAMESPACE_NOT_FOUND,
            Error::Forbidden(_) => result_code::FAIL_FORBIDDEN,
            Error::Connection(_) => result_code::SERVER_NOT_AVAILABLE,
            Error::Serialization(_) => result_code::SERIALIZE_ERROR,
            Error::Config(_) => result_code::PARAM_ERROR,
            Error::Internal(_) => result_code::SERVER_ERROR,
        }
    }

    /// Faults that come from how the cluster or the adapter is configured.
    /// Retrying these never helps.
    pub fn is_config_fault(&self) -> bool {
        matches!(
            self,
            Error::Forbidden(_) | Error::NamespaceNotFound(_) | Error::Config(_)
        )
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::Connection(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod config;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_match_result_codes() {
        assert_eq!(Error::NotFound.code(), 2);
        assert_eq!(Error::Forbidden("nsup".into()).code(), 22);
        assert_eq!(Error::NamespaceNotFound("cache".into()).code(), 20);
        assert_eq!(Error::Timeout("read".into()).code(), 9);
    }

    #[test]
    fn test_error_classification() {
        assert!(Error::Forbidden("nsup".into()).is_config_fault());
        assert!(!Error::Forbidden("nsup".into()).is_transient());
        assert!(Error::Connection("refused".into()).is_transient());
        assert!(!Error::Connection("refused".into()).is_config_fault());
        assert!(!Error::NotFound.is_config_fault());
        assert!(!Error::NotFound.is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = Error::Forbidden("TTL rejected".into());
        assert_eq!(err.to_string(), "forbidden: TTL rejected");
    }
}
