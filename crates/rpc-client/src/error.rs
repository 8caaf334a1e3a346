//! JSON-RPC client errors and their classification.
pub use reqwest::StatusCode;

/// Starknet JSON-RPC error codes this client cares about.
pub mod code {
    pub const CONTRACT_NOT_FOUND: i64 = 20;
    pub const TXN_HASH_NOT_FOUND: i64 = 29;
    pub const CONTRACT_ERROR: i64 = 40;
    pub const TRANSACTION_EXECUTION_ERROR: i64 = 41;
    pub const INSUFFICIENT_ACCOUNT_BALANCE: i64 = 51;
    pub const INVALID_TRANSACTION_NONCE: i64 = 52;
    pub const INSUFFICIENT_RESOURCES_FOR_VALIDATE: i64 = 53;
    pub const VALIDATION_FAILURE: i64 = 54;
    pub const UNEXPECTED_ERROR: i64 = 55;
    pub const DUPLICATE_TX: i64 = 59;
    pub const INVALID_PARAMS: i64 = -32602;
    /// Used by several providers when throttling.
    pub const LIMIT_EXCEEDED: i64 = -32005;
}

/// The outcome classes the submitter's retry policy dispatches on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    RateLimited,
    NonceConflict,
    ValidationFailed,
    Timeout,
    Unavailable,
    Unknown,
}

impl ErrorKind {
    /// Transient errors are worth retrying unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited | ErrorKind::Timeout | ErrorKind::Unavailable
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::RateLimited => "rate limited",
            ErrorKind::NonceConflict => "nonce conflict",
            ErrorKind::ValidationFailed => "validation failed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The node answered with a JSON-RPC error object.
    #[error("Starknet error {code}: {message}")]
    Starknet {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },
    /// The node answered with a non-success HTTP status and no JSON-RPC error.
    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Failed to deserialize reply: {0}")]
    Decode(#[from] serde_json::Error),
    /// A reply carrying neither `result` nor `error`.
    #[error("Reply contained neither result nor error")]
    EmptyReply,
}

impl RpcError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RpcError::Starknet {
                code,
                message,
                data,
            } => classify_code(*code, message, data.as_ref()),
            RpcError::HttpStatus { status, .. } => classify_status(*status),
            RpcError::Transport(e) => {
                if e.is_timeout() {
                    ErrorKind::Timeout
                } else if let Some(status) = e.status() {
                    classify_status(status)
                } else if e.is_connect() || e.is_request() || e.is_body() || e.is_decode() {
                    ErrorKind::Unavailable
                } else {
                    ErrorKind::Unknown
                }
            }
            // A garbled reply usually means an overloaded proxy in front of the node.
            RpcError::Decode(_) => ErrorKind::Unavailable,
            RpcError::EmptyReply => ErrorKind::Unknown,
        }
    }
}

fn classify_status(status: StatusCode) -> ErrorKind {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ErrorKind::RateLimited,
        StatusCode::REQUEST_TIMEOUT => ErrorKind::Timeout,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            ErrorKind::Unavailable
        }
        _ => ErrorKind::Unknown,
    }
}

fn classify_code(code: i64, message: &str, data: Option<&serde_json::Value>) -> ErrorKind {
    use self::code::*;

    match code {
        INVALID_TRANSACTION_NONCE => ErrorKind::NonceConflict,
        // Katana and Madara report nonce mismatches found during validation as
        // an unexpected error, with the detail only present in the text.
        UNEXPECTED_ERROR if mentions_nonce(message, data) => ErrorKind::NonceConflict,
        UNEXPECTED_ERROR => ErrorKind::ValidationFailed,
        INSUFFICIENT_RESOURCES_FOR_VALIDATE
        | VALIDATION_FAILURE
        | CONTRACT_ERROR
        | TRANSACTION_EXECUTION_ERROR
        | CONTRACT_NOT_FOUND
        | INSUFFICIENT_ACCOUNT_BALANCE
        | INVALID_PARAMS => ErrorKind::ValidationFailed,
        LIMIT_EXCEEDED => ErrorKind::RateLimited,
        _ => ErrorKind::Unknown,
    }
}

fn mentions_nonce(message: &str, data: Option<&serde_json::Value>) -> bool {
    let in_data = match data {
        Some(serde_json::Value::String(s)) => s.to_ascii_lowercase().contains("nonce"),
        Some(other) => other.to_string().to_ascii_lowercase().contains("nonce"),
        None => false,
    };
    in_data || message.to_ascii_lowercase().contains("nonce")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn starknet(code: i64, data: Option<serde_json::Value>) -> RpcError {
        RpcError::Starknet {
            code,
            message: "error".to_owned(),
            data,
        }
    }

    #[rstest::rstest]
    #[case::invalid_nonce(52, None, ErrorKind::NonceConflict)]
    #[case::unexpected_nonce(
        55,
        Some(json!("Invalid transaction nonce of contract at address 0x1. Account nonce: 0x5; got: 0x4.")),
        ErrorKind::NonceConflict
    )]
    #[case::unexpected_other(55, Some(json!("out of gas")), ErrorKind::ValidationFailed)]
    #[case::validation(54, None, ErrorKind::ValidationFailed)]
    #[case::resources(53, None, ErrorKind::ValidationFailed)]
    #[case::balance(51, None, ErrorKind::ValidationFailed)]
    #[case::execution(41, None, ErrorKind::ValidationFailed)]
    #[case::params(-32602, None, ErrorKind::ValidationFailed)]
    #[case::throttled(-32005, None, ErrorKind::RateLimited)]
    #[case::duplicate(59, None, ErrorKind::Unknown)]
    fn starknet_codes(
        #[case] code: i64,
        #[case] data: Option<serde_json::Value>,
        #[case] expected: ErrorKind,
    ) {
        assert_eq!(starknet(code, data).kind(), expected);
    }

    #[rstest::rstest]
    #[case::too_many_requests(StatusCode::TOO_MANY_REQUESTS, ErrorKind::RateLimited)]
    #[case::bad_gateway(StatusCode::BAD_GATEWAY, ErrorKind::Unavailable)]
    #[case::unavailable(StatusCode::SERVICE_UNAVAILABLE, ErrorKind::Unavailable)]
    #[case::gateway_timeout(StatusCode::GATEWAY_TIMEOUT, ErrorKind::Unavailable)]
    #[case::request_timeout(StatusCode::REQUEST_TIMEOUT, ErrorKind::Timeout)]
    #[case::internal(StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::Unknown)]
    #[case::not_found(StatusCode::NOT_FOUND, ErrorKind::Unknown)]
    fn http_statuses(#[case] status: StatusCode, #[case] expected: ErrorKind) {
        let e = RpcError::HttpStatus {
            status,
            body: String::new(),
        };
        assert_eq!(e.kind(), expected);
    }

    #[test]
    fn transient_kinds() {
        assert!(ErrorKind::RateLimited.is_transient());
        assert!(ErrorKind::Timeout.is_transient());
        assert!(ErrorKind::Unavailable.is_transient());
        assert!(!ErrorKind::NonceConflict.is_transient());
        assert!(!ErrorKind::ValidationFailed.is_transient());
        assert!(!ErrorKind::Unknown.is_transient());
    }

    #[test]
    fn decode_errors_are_transient() {
        let e: RpcError = serde_json::from_str::<u64>("not json").unwrap_err().into();
        assert!(e.kind().is_transient());
        assert!(!RpcError::EmptyReply.kind().is_transient());
    }
}
