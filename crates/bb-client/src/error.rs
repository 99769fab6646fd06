use bb_core::plugin_api::FrameError;
use bb_core::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("unsupported URL scheme: {0}")]
    Scheme(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("login failed: {0}")]
    Login(String),
}

impl From<ClientError> for TransportError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Status { status, body } => TransportError::Status { status, body },
            ClientError::Json(err) => TransportError::Decode(err.to_string()),
            ClientError::Http(err) if err.is_decode() => TransportError::Decode(err.to_string()),
            other => TransportError::Request(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors_keep_code_and_body() {
        let err: TransportError = ClientError::Status {
            status: 403,
            body: "Forbidden".to_string(),
        }
        .into();
        assert_eq!(
            err,
            TransportError::Status {
                status: 403,
                body: "Forbidden".to_string()
            }
        );
    }

    #[test]
    fn json_errors_map_to_decode() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").expect_err("invalid json");
        let err: TransportError = ClientError::Json(json_err).into();
        assert!(matches!(err, TransportError::Decode(_)));

        let err: TransportError = ClientError::Scheme("ftp".to_string()).into();
        assert_eq!(
            err,
            TransportError::Request("unsupported URL scheme: ftp".to_string())
        );
    }
}
