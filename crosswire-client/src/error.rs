//! Client-side RPC error type.

use bytes::Bytes;
use http::HeaderMap;
use serde::Deserialize;

use crosswire_core::{Code, CodecError, EnvelopeError, ErrorDetail};

/// Errors produced by client-side RPC operations.
///
/// The taxonomy: `Status` carries a remote or translated RPC status
/// (application- and protocol-level failures), while the remaining variants
/// classify local failures.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ClientError {
    /// An RPC status with code, optional message, typed details, and
    /// header/trailer metadata captured at failure time.
    #[error("{code:?}: {message:?}")]
    Status {
        code: Code,
        message: Option<String>,
        details: Vec<ErrorDetail>,
        metadata: HeaderMap,
    },

    /// Transport-level error (connection failed, reset, etc.).
    #[error("transport error: {0}")]
    Transport(String),

    /// Message encoding error.
    #[error("encode error: {0}")]
    Encode(String),

    /// Message decoding error.
    #[error("decode error: {0}")]
    Decode(String),

    /// Protocol error (malformed frames, missing status, unexpected data).
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ClientError {
    /// Create a new status error with a code and message.
    pub fn new<S: Into<String>>(code: Code, message: S) -> Self {
        ClientError::Status {
            code,
            message: Some(message.into()),
            details: vec![],
            metadata: HeaderMap::new(),
        }
    }

    /// Create a new status error with just a code.
    pub fn from_code(code: Code) -> Self {
        ClientError::Status {
            code,
            message: None,
            details: vec![],
            metadata: HeaderMap::new(),
        }
    }

    /// Get the error code.
    ///
    /// Non-status variants project onto the closest code:
    /// - Transport: `Unavailable`
    /// - Encode/Decode: `Internal`
    /// - Protocol: `InvalidArgument`
    pub fn code(&self) -> Code {
        match self {
            ClientError::Status { code, .. } => *code,
            ClientError::Transport(_) => Code::Unavailable,
            ClientError::Encode(_) | ClientError::Decode(_) => Code::Internal,
            ClientError::Protocol(_) => Code::InvalidArgument,
        }
    }

    /// Get the error message.
    pub fn message(&self) -> Option<&str> {
        match self {
            ClientError::Status { message, .. } => message.as_deref(),
            ClientError::Transport(msg)
            | ClientError::Encode(msg)
            | ClientError::Decode(msg)
            | ClientError::Protocol(msg) => Some(msg),
        }
    }

    /// Get the error details (only for the Status variant).
    pub fn details(&self) -> &[ErrorDetail] {
        match self {
            ClientError::Status { details, .. } => details,
            _ => &[],
        }
    }

    /// Get the header/trailer metadata captured when the error was built.
    pub fn metadata(&self) -> Option<&HeaderMap> {
        match self {
            ClientError::Status { metadata, .. } => Some(metadata),
            _ => None,
        }
    }

    /// Add an error detail with a type name and encoded bytes.
    pub fn add_detail<S: Into<String>>(mut self, type_name: S, value: Vec<u8>) -> Self {
        if let ClientError::Status { details, .. } = &mut self {
            details.push(ErrorDetail::new(type_name, value));
        }
        self
    }

    /// Add a pre-constructed [`ErrorDetail`].
    pub fn add_error_detail(mut self, detail: ErrorDetail) -> Self {
        if let ClientError::Status { details, .. } = &mut self {
            details.push(detail);
        }
        self
    }

    /// Attach header/trailer metadata (Status variant only).
    pub fn with_metadata(mut self, headers: HeaderMap) -> Self {
        if let ClientError::Status { metadata, .. } = &mut self {
            *metadata = headers;
        }
        self
    }

    /// Build an error from a Connect unary error response body.
    ///
    /// The body is the JSON record `{"code": ..., "message"?, "details"?}`.
    /// A missing or unparseable body falls back to the supplied code with the
    /// raw body as the message. Response headers are captured as metadata.
    pub(crate) fn from_connect_body(
        code: Code,
        headers: &HeaderMap,
        body: Option<&Bytes>,
    ) -> Self {
        let metadata = headers.clone();

        let Some(body) = body.filter(|b| !b.is_empty()) else {
            return ClientError::new(code, "empty error message from source")
                .with_metadata(metadata);
        };

        match serde_json::from_slice::<ConnectErrorBody>(body) {
            Ok(parsed) => ClientError::Status {
                code: parsed.code.parse().unwrap_or(code),
                message: parsed.message,
                details: parsed.details,
                metadata,
            },
            Err(_) => ClientError::Status {
                code,
                message: Some(String::from_utf8_lossy(body).into_owned()),
                details: vec![],
                metadata,
            },
        }
    }
}

/// Wire shape of a Connect unary error body.
#[derive(Deserialize)]
struct ConnectErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

impl From<EnvelopeError> for ClientError {
    fn from(err: EnvelopeError) -> Self {
        match err {
            EnvelopeError::MissingCompressionPool => {
                ClientError::Protocol("missing expected compression pool".into())
            }
            EnvelopeError::Decompression(msg) => {
                ClientError::Decode(format!("decompression failed: {}", msg))
            }
            EnvelopeError::Compression(msg) => {
                ClientError::Encode(format!("compression failed: {}", msg))
            }
        }
    }
}

impl From<CodecError> for ClientError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Serialize(msg) => ClientError::Encode(msg),
            CodecError::Deserialize(msg) => ClientError::Decode(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_new() {
        let err = ClientError::new(Code::NotFound, "resource not found");
        assert_eq!(err.code(), Code::NotFound);
        assert_eq!(err.message(), Some("resource not found"));
        assert!(err.details().is_empty());
    }

    #[test]
    fn test_client_error_from_code() {
        let err = ClientError::from_code(Code::Internal);
        assert_eq!(err.code(), Code::Internal);
        assert!(err.message().is_none());
    }

    #[test]
    fn test_client_error_variants_code() {
        assert_eq!(
            ClientError::new(Code::NotFound, "not found").code(),
            Code::NotFound
        );
        assert_eq!(
            ClientError::Transport("connection refused".into()).code(),
            Code::Unavailable
        );
        assert_eq!(
            ClientError::Encode("serialization failed".into()).code(),
            Code::Internal
        );
        assert_eq!(
            ClientError::Decode("deserialization failed".into()).code(),
            Code::Internal
        );
        assert_eq!(
            ClientError::Protocol("invalid frame".into()).code(),
            Code::InvalidArgument
        );
    }

    #[test]
    fn test_client_error_add_detail() {
        let err = ClientError::new(Code::Internal, "error").add_detail("test.Type", vec![1, 2, 3]);

        assert_eq!(err.details().len(), 1);
        assert_eq!(err.details()[0].type_name(), "test.Type");
        assert_eq!(err.details()[0].value(), &[1, 2, 3]);
    }

    #[test]
    fn test_client_error_metadata() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", "123".parse().unwrap());

        let err = ClientError::new(Code::Internal, "error").with_metadata(headers);
        assert_eq!(err.metadata().unwrap().get("x-request-id").unwrap(), "123");

        assert!(ClientError::Transport("reset".into()).metadata().is_none());
    }

    #[test]
    fn test_from_connect_body_parses_json() {
        let body = Bytes::from_static(
            br#"{"code":"not_found","message":"user missing","details":[{"type":"test.T","value":"AQID"}]}"#,
        );
        let err = ClientError::from_connect_body(Code::Unknown, &HeaderMap::new(), Some(&body));

        assert_eq!(err.code(), Code::NotFound);
        assert_eq!(err.message(), Some("user missing"));
        assert_eq!(err.details().len(), 1);
        assert_eq!(err.details()[0].value(), &[1, 2, 3]);
    }

    #[test]
    fn test_from_connect_body_unparseable_falls_back() {
        let body = Bytes::from_static(b"plain text failure");
        let err = ClientError::from_connect_body(Code::Unavailable, &HeaderMap::new(), Some(&body));

        assert_eq!(err.code(), Code::Unavailable);
        assert_eq!(err.message(), Some("plain text failure"));
    }

    #[test]
    fn test_from_connect_body_empty() {
        let err = ClientError::from_connect_body(Code::Unavailable, &HeaderMap::new(), None);
        assert_eq!(err.code(), Code::Unavailable);
        assert_eq!(err.message(), Some("empty error message from source"));
    }

    #[test]
    fn test_from_envelope_error() {
        let err: ClientError = EnvelopeError::MissingCompressionPool.into();
        assert!(matches!(err, ClientError::Protocol(_)));

        let err: ClientError = EnvelopeError::Decompression("bad stream".into()).into();
        assert!(matches!(err, ClientError::Decode(_)));
    }
}
