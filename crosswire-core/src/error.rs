//! RPC status codes and error types.
//!
//! This module provides:
//! - [`Code`]: the unified status code enum shared by all three protocols
//! - [`ErrorDetail`]: self-describing typed error details
//! - [`EnvelopeError`]: envelope framing and compression errors

use std::str::FromStr;

use base64::Engine;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// RPC status codes, unifying HTTP, gRPC, and Connect error codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Code {
    Ok = 0,
    Canceled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl Code {
    /// Get the string representation of this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::Ok => "ok",
            Code::Canceled => "canceled",
            Code::Unknown => "unknown",
            Code::InvalidArgument => "invalid_argument",
            Code::DeadlineExceeded => "deadline_exceeded",
            Code::NotFound => "not_found",
            Code::AlreadyExists => "already_exists",
            Code::PermissionDenied => "permission_denied",
            Code::ResourceExhausted => "resource_exhausted",
            Code::FailedPrecondition => "failed_precondition",
            Code::Aborted => "aborted",
            Code::OutOfRange => "out_of_range",
            Code::Unimplemented => "unimplemented",
            Code::Internal => "internal",
            Code::Unavailable => "unavailable",
            Code::DataLoss => "data_loss",
            Code::Unauthenticated => "unauthenticated",
        }
    }

    /// Map a numeric gRPC status value to a code.
    ///
    /// Values outside the defined range map to [`Code::Unknown`].
    pub fn from_i32(value: i32) -> Self {
        match value {
            0 => Code::Ok,
            1 => Code::Canceled,
            2 => Code::Unknown,
            3 => Code::InvalidArgument,
            4 => Code::DeadlineExceeded,
            5 => Code::NotFound,
            6 => Code::AlreadyExists,
            7 => Code::PermissionDenied,
            8 => Code::ResourceExhausted,
            9 => Code::FailedPrecondition,
            10 => Code::Aborted,
            11 => Code::OutOfRange,
            12 => Code::Unimplemented,
            13 => Code::Internal,
            14 => Code::Unavailable,
            15 => Code::DataLoss,
            16 => Code::Unauthenticated,
            _ => Code::Unknown,
        }
    }

    /// Map an HTTP status to a code, per the Connect protocol's
    /// HTTP-to-error-code table.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            200 => Code::Ok,
            400 => Code::Internal,
            401 => Code::Unauthenticated,
            403 => Code::PermissionDenied,
            404 => Code::Unimplemented,
            429 | 502 | 503 | 504 => Code::Unavailable,
            _ => Code::Unknown,
        }
    }
}

impl Serialize for Code {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// Error returned when parsing a [`Code`] from a string fails.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseCodeError(());

impl std::fmt::Display for ParseCodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown error code")
    }
}

impl std::error::Error for ParseCodeError {}

impl FromStr for Code {
    type Err = ParseCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(Code::Ok),
            "canceled" | "cancelled" => Ok(Code::Canceled),
            "unknown" => Ok(Code::Unknown),
            "invalid_argument" => Ok(Code::InvalidArgument),
            "deadline_exceeded" => Ok(Code::DeadlineExceeded),
            "not_found" => Ok(Code::NotFound),
            "already_exists" => Ok(Code::AlreadyExists),
            "permission_denied" => Ok(Code::PermissionDenied),
            "resource_exhausted" => Ok(Code::ResourceExhausted),
            "failed_precondition" => Ok(Code::FailedPrecondition),
            "aborted" => Ok(Code::Aborted),
            "out_of_range" => Ok(Code::OutOfRange),
            "unimplemented" => Ok(Code::Unimplemented),
            "internal" => Ok(Code::Internal),
            "unavailable" => Ok(Code::Unavailable),
            "data_loss" => Ok(Code::DataLoss),
            "unauthenticated" => Ok(Code::Unauthenticated),
            _ => Err(ParseCodeError(())),
        }
    }
}

/// A self-describing typed error detail.
///
/// Details are structured payloads attached to errors, letting clients work
/// with strongly-typed error information instead of parsing messages. On the
/// Connect wire they are JSON objects with `type` and `value` fields, where
/// `value` is unpadded standard base64:
///
/// ```json
/// {"type": "google.rpc.RetryInfo", "value": "CgIIPA"}
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorDetail {
    /// Type name (e.g., "google.rpc.RetryInfo").
    type_name: String,
    /// Encoded message bytes.
    value: Vec<u8>,
}

impl ErrorDetail {
    /// Create a new error detail with a type name and encoded bytes.
    pub fn new<S: Into<String>>(type_name: S, value: Vec<u8>) -> Self {
        Self {
            type_name: type_name.into(),
            value,
        }
    }

    /// Get the type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Get the encoded value bytes.
    pub fn value(&self) -> &[u8] {
        &self.value
    }
}

impl Serialize for ErrorDetail {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut s = serializer.serialize_struct("ErrorDetail", 2)?;

        // Short type names only (strip the Any type URL prefix if present).
        let type_name = self
            .type_name
            .strip_prefix("type.googleapis.com/")
            .unwrap_or(&self.type_name);
        s.serialize_field("type", type_name)?;

        let encoded = base64::engine::general_purpose::STANDARD_NO_PAD.encode(&self.value);
        s.serialize_field("value", &encoded)?;

        s.end()
    }
}

impl<'de> Deserialize<'de> for ErrorDetail {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Wire {
            #[serde(rename = "type", default)]
            type_name: String,
            #[serde(default)]
            value: String,
        }

        let wire = Wire::deserialize(deserializer)?;
        let value = decode_base64_lenient(&wire.value)
            .ok_or_else(|| D::Error::custom("invalid base64 in error detail value"))?;
        Ok(ErrorDetail::new(wire.type_name, value))
    }
}

/// Decode standard base64 with or without padding.
pub fn decode_base64_lenient(input: &str) -> Option<Vec<u8>> {
    base64::engine::general_purpose::STANDARD_NO_PAD
        .decode(input)
        .or_else(|_| base64::engine::general_purpose::STANDARD.decode(input))
        .ok()
}

/// Envelope framing errors.
#[derive(Clone, Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// A compressed frame arrived but no compression pool was supplied.
    #[error("missing expected compression pool")]
    MissingCompressionPool,

    /// Decompression failed.
    #[error("decompression failed: {0}")]
    Decompression(String),

    /// Compression failed.
    #[error("compression failed: {0}")]
    Compression(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_as_str() {
        assert_eq!(Code::Ok.as_str(), "ok");
        assert_eq!(Code::InvalidArgument.as_str(), "invalid_argument");
        assert_eq!(Code::Unauthenticated.as_str(), "unauthenticated");
    }

    #[test]
    fn test_code_from_str() {
        assert_eq!("ok".parse(), Ok(Code::Ok));
        assert_eq!("invalid_argument".parse(), Ok(Code::InvalidArgument));
        assert_eq!("canceled".parse(), Ok(Code::Canceled));
        assert_eq!("cancelled".parse(), Ok(Code::Canceled)); // British spelling
        assert_eq!("bogus_code".parse::<Code>(), Err(ParseCodeError(())));
    }

    #[test]
    fn test_code_from_i32() {
        assert_eq!(Code::from_i32(0), Code::Ok);
        assert_eq!(Code::from_i32(4), Code::DeadlineExceeded);
        assert_eq!(Code::from_i32(16), Code::Unauthenticated);
        assert_eq!(Code::from_i32(17), Code::Unknown);
        assert_eq!(Code::from_i32(-1), Code::Unknown);
    }

    #[test]
    fn test_code_from_http_status() {
        assert_eq!(Code::from_http_status(200), Code::Ok);
        assert_eq!(Code::from_http_status(400), Code::Internal);
        assert_eq!(Code::from_http_status(401), Code::Unauthenticated);
        assert_eq!(Code::from_http_status(403), Code::PermissionDenied);
        assert_eq!(Code::from_http_status(404), Code::Unimplemented);
        assert_eq!(Code::from_http_status(429), Code::Unavailable);
        assert_eq!(Code::from_http_status(502), Code::Unavailable);
        assert_eq!(Code::from_http_status(503), Code::Unavailable);
        assert_eq!(Code::from_http_status(504), Code::Unavailable);
        assert_eq!(Code::from_http_status(500), Code::Unknown);
    }

    #[test]
    fn test_error_detail_serialize() {
        let detail = ErrorDetail::new("google.rpc.RetryInfo", vec![1, 2, 3]);
        let json = serde_json::to_string(&detail).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed["type"], "google.rpc.RetryInfo");
        assert_eq!(parsed["value"], "AQID"); // base64 of [1, 2, 3] without padding
    }

    #[test]
    fn test_error_detail_serialize_strips_prefix() {
        let detail = ErrorDetail::new("type.googleapis.com/google.rpc.ErrorInfo", vec![1, 2]);
        let json = serde_json::to_string(&detail).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed["type"], "google.rpc.ErrorInfo");
    }

    #[test]
    fn test_error_detail_deserialize_unpadded() {
        let detail: ErrorDetail =
            serde_json::from_str(r#"{"type":"test.Type","value":"AQID"}"#).unwrap();
        assert_eq!(detail.type_name(), "test.Type");
        assert_eq!(detail.value(), &[1, 2, 3]);
    }

    #[test]
    fn test_error_detail_deserialize_padded() {
        // Padded base64 of [1, 2] is "AQI=".
        let detail: ErrorDetail =
            serde_json::from_str(r#"{"type":"test.Type","value":"AQI="}"#).unwrap();
        assert_eq!(detail.value(), &[1, 2]);
    }

    #[test]
    fn test_envelope_error_display() {
        assert_eq!(
            EnvelopeError::MissingCompressionPool.to_string(),
            "missing expected compression pool"
        );
        assert_eq!(
            EnvelopeError::Decompression("gzip failed".into()).to_string(),
            "decompression failed: gzip failed"
        );
        assert_eq!(
            EnvelopeError::Compression("gzip failed".into()).to_string(),
            "compression failed: gzip failed"
        );
    }
}
