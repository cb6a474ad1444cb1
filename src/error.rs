use reqwest::StatusCode;
use thiserror::Error;

/// Fatal errors for a single run. Any of these ends the run as `FAILED`;
/// the job layer decides whether the whole run is attempted again.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("request for page {page} failed: {source}")]
    Network {
        page: u32,
        #[source]
        source: reqwest::Error,
    },
    #[error("page {page} returned HTTP {status}")]
    HttpStatus { page: u32, status: StatusCode },
    #[error("page {page} body is not a JSON array of records: {source}")]
    Decode {
        page: u32,
        #[source]
        source: serde_json::Error,
    },
    #[error("database write failed: {0}")]
    Write(#[from] sqlx::Error),
    #[error("{table} row for key {key} not found after insert")]
    MissingRow { table: &'static str, key: String },
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Coarse classification used in logs and run summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Decode,
    Write,
    Config,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Network => "network_error",
            ErrorKind::Decode => "decode_error",
            ErrorKind::Write => "write_error",
            ErrorKind::Config => "config_error",
        }
    }
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::Network { .. } | IngestError::HttpStatus { .. } => ErrorKind::Network,
            IngestError::Decode { .. } => ErrorKind::Decode,
            IngestError::Write(_) | IngestError::MissingRow { .. } => ErrorKind::Write,
            IngestError::Config(_) => ErrorKind::Config,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        IngestError::Config(msg.into())
    }
}

pub type IngestResult<T> = Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_the_failure_taxonomy() {
        let status = IngestError::HttpStatus {
            page: 3,
            status: StatusCode::FORBIDDEN,
        };
        assert_eq!(status.kind(), ErrorKind::Network);

        let decode = IngestError::Decode {
            page: 1,
            source: serde_json::from_str::<Vec<u8>>("{").unwrap_err(),
        };
        assert_eq!(decode.kind(), ErrorKind::Decode);

        let missing = IngestError::MissingRow {
            table: "food",
            key: "12345".into(),
        };
        assert_eq!(missing.kind(), ErrorKind::Write);
        assert_eq!(missing.kind().as_str(), "write_error");
        assert!(missing.to_string().contains("food row for key 12345"));
    }

    #[test]
    fn sqlx_errors_convert_into_write_errors() {
        let err: IngestError = sqlx::Error::Protocol("boom".into()).into();
        assert_eq!(err.kind(), ErrorKind::Write);
    }
}
