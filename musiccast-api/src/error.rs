use thiserror::Error;

/// Errors that can occur while talking to a MusicCast device
#[derive(Error, Debug)]
pub enum ApiError {
    /// Network-level failure (connect, timeout, TLS, ...)
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The device answered, but the body was not the JSON we expected
    #[error("failed to decode response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },

    /// The device rejected the request with a non-zero response code
    #[error("device returned response code {code} ({meaning})")]
    Device { code: u32, meaning: &'static str },

    /// A parameter failed client-side validation before any request was sent
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// The configured host does not form a valid URL
    #[error("invalid device host {host:?}: {source}")]
    InvalidHost {
        host: String,
        #[source]
        source: url::ParseError,
    },
}

/// Result type for API operations
pub type Result<T> = std::result::Result<T, ApiError>;

/// Map a YamahaExtendedControl response code to its documented meaning.
///
/// Code 0 is success; everything else is an error condition reported by the
/// device itself (as opposed to a transport failure).
pub fn response_code_meaning(code: u32) -> &'static str {
    match code {
        0 => "successful request",
        1 => "initializing",
        2 => "internal error",
        3 => "invalid request",
        4 => "invalid parameter",
        5 => "guarded (unable to setup in current status)",
        6 => "time out",
        99 => "firmware updating",
        100 => "access error",
        101 => "other error",
        102 => "wrong user name",
        103 => "wrong password",
        104 => "account expired",
        105 => "account disconnected",
        106 => "account number reached the limit",
        107 => "server maintenance",
        108 => "invalid account",
        109 => "license error",
        110 => "read only mode",
        111 => "max stations",
        112 => "access denied",
        _ => "unknown response code",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_code_meaning() {
        assert_eq!(response_code_meaning(0), "successful request");
        assert_eq!(response_code_meaning(3), "invalid request");
        assert_eq!(response_code_meaning(7777), "unknown response code");
    }

    #[test]
    fn test_device_error_display() {
        let err = ApiError::Device {
            code: 5,
            meaning: response_code_meaning(5),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("response code 5"));
        assert!(msg.contains("guarded"));
    }
}
