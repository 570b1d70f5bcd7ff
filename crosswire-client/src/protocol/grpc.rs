//! The gRPC protocol as an interceptor stage, plus helpers shared with
//! gRPC-Web.
//!
//! Bodies are always enveloped, unary included. Status and error metadata
//! travel in the `grpc-` header family; trailers-only responses may put
//! `grpc-status` in the headers block, so status resolution checks headers
//! before trailers.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue};
use prost::Message;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::interceptor::{Interceptor, Proceed, TryProceed};
use crate::message::{StreamRequest, StreamResult, UnaryRequest, UnaryResponse};
use crate::protocol::{USER_AGENT, header};
use crosswire_core::{Code, ErrorDetail, decode_base64_lenient, pack_envelope, unpack_envelope};

/// gRPC protocol translator. Created once per call.
pub(crate) struct GrpcTranslator {
    config: Arc<ClientConfig>,
    stream_response_headers: Mutex<Option<HeaderMap>>,
}

impl GrpcTranslator {
    pub(crate) fn new(config: Arc<ClientConfig>) -> Self {
        Self {
            config,
            stream_response_headers: Mutex::new(None),
        }
    }
}

impl Interceptor for GrpcTranslator {
    fn intercept_request(&self, mut request: UnaryRequest, proceed: TryProceed<UnaryRequest>) {
        // gRPC unary payloads are enveloped.
        let body = request.body.take().unwrap_or_default();
        request.body = Some(pack_envelope(
            &body,
            self.config.request_compression.as_ref(),
        ));
        add_grpc_headers(&mut request.headers, &self.config, false);
        proceed(Ok(request));
    }

    fn intercept_response(&self, mut response: UnaryResponse, proceed: Proceed<UnaryResponse>) {
        if response.code != Code::Ok {
            // Invalid gRPC response - expects HTTP 200. Potentially a
            // network error.
            proceed(response);
            return;
        }

        let (code, error) = grpc_code_and_error(Some(&response.headers), Some(&response.trailers));
        let has_body = response.body.as_ref().is_some_and(|b| !b.is_empty());
        if code != Code::Ok || !has_body {
            let prior = response.error.take();
            proceed(UnaryResponse {
                code,
                error: error.or(prior),
                ..response
            });
            return;
        }

        let pool = response
            .headers
            .get(header::GRPC_ENCODING)
            .and_then(|v| v.to_str().ok())
            .and_then(|name| self.config.response_pool(name))
            .cloned();
        let body = response.body.as_deref().unwrap_or_default();
        match unpack_envelope(body, pool.as_ref()) {
            Ok((_, payload)) => proceed(UnaryResponse {
                code,
                body: Some(payload),
                error: None,
                ..response
            }),
            Err(e) => proceed(UnaryResponse {
                code: Code::Unknown,
                error: Some(e.into()),
                ..response
            }),
        }
    }

    fn intercept_stream_start(
        &self,
        mut request: StreamRequest,
        proceed: TryProceed<StreamRequest>,
    ) {
        add_grpc_headers(&mut request.headers, &self.config, false);
        proceed(Ok(request));
    }

    fn intercept_stream_raw_input(&self, frame: Bytes, proceed: Proceed<Bytes>) {
        proceed(pack_envelope(
            &frame,
            self.config.request_compression.as_ref(),
        ));
    }

    fn intercept_stream_raw_result(
        &self,
        result: StreamResult<Bytes>,
        proceed: Proceed<StreamResult<Bytes>>,
    ) {
        match result {
            StreamResult::Headers(headers) => {
                *self.stream_response_headers.lock().unwrap() = Some(headers.clone());
                proceed(StreamResult::Headers(headers));
            }

            StreamResult::Message(frame) => {
                let pool = {
                    let headers = self.stream_response_headers.lock().unwrap();
                    headers
                        .as_ref()
                        .and_then(|h| h.get(header::GRPC_ENCODING))
                        .and_then(|v| v.to_str().ok())
                        .and_then(|name| self.config.response_pool(name))
                        .cloned()
                };
                match unpack_envelope(&frame, pool.as_ref()) {
                    Ok((_, payload)) => proceed(StreamResult::Message(payload)),
                    Err(e) => proceed(StreamResult::Complete {
                        code: Code::Unknown,
                        error: Some(e.into()),
                        trailers: None,
                    }),
                }
            }

            StreamResult::Complete {
                code,
                error,
                trailers,
            } => {
                if code != Code::Ok {
                    // Transport-level failure; pass through untouched.
                    proceed(StreamResult::Complete {
                        code,
                        error,
                        trailers,
                    });
                    return;
                }

                let headers = self.stream_response_headers.lock().unwrap().clone();
                let (grpc_code, grpc_error) =
                    grpc_code_and_error(headers.as_ref(), trailers.as_ref());
                if grpc_code == Code::Ok {
                    proceed(StreamResult::Complete {
                        code: Code::Ok,
                        error: None,
                        trailers,
                    });
                } else {
                    proceed(StreamResult::Complete {
                        code: grpc_code,
                        error: grpc_error.or(error),
                        trailers,
                    });
                }
            }
        }
    }
}

/// Add the `grpc-` header family to a request.
pub(crate) fn add_grpc_headers(headers: &mut HeaderMap, config: &ClientConfig, web: bool) {
    if let Some(accept) = config.accept_encoding_header()
        && let Ok(value) = HeaderValue::from_str(&accept)
    {
        headers.insert(header::GRPC_ACCEPT_ENCODING, value);
    }
    if let Some(compression) = &config.request_compression
        && let Ok(value) = HeaderValue::from_str(compression.pool.name())
    {
        headers.insert(header::GRPC_ENCODING, value);
    }
    if let Some(ms) = config.timeout_ms()
        && let Ok(value) = HeaderValue::from_str(&format!("{}m", ms))
    {
        headers.insert(header::GRPC_TIMEOUT, value);
    }

    let content_type = if web {
        format!("application/grpc-web+{}", config.codec_name)
    } else {
        format!("application/grpc+{}", config.codec_name)
    };
    if let Ok(value) = HeaderValue::from_str(&content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if !web {
        headers.insert(header::TE, HeaderValue::from_static("trailers"));
    }

    headers.insert(header::X_USER_AGENT, HeaderValue::from_static(USER_AGENT));
}

/// Read the `grpc-status` field from a headers or trailers block.
///
/// Returns `None` when the field is absent, unparseable, or outside the
/// defined code range — callers then consult the other block.
pub(crate) fn grpc_status(headers: &HeaderMap) -> Option<Code> {
    headers
        .get(header::GRPC_STATUS)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i32>().ok())
        .filter(|v| (0..=16).contains(v))
        .map(Code::from_i32)
}

/// Resolve the final status and error from headers and trailers.
///
/// Trailers-only responses can carry `grpc-status` in either block; headers
/// win when both are present. A missing status is itself an error.
pub(crate) fn grpc_code_and_error(
    headers: Option<&HeaderMap>,
    trailers: Option<&HeaderMap>,
) -> (Code, Option<ClientError>) {
    if let Some(headers) = headers
        && let Some(code) = grpc_status(headers)
    {
        return (code, error_from_grpc_trailers(headers, code));
    }
    if let Some(trailers) = trailers
        && let Some(code) = grpc_status(trailers)
    {
        return (code, error_from_grpc_trailers(trailers, code));
    }
    (Code::Unknown, None)
}

/// Build an error from a gRPC trailers (or headers) block, or `None` for an
/// ok status.
pub(crate) fn error_from_grpc_trailers(trailers: &HeaderMap, code: Code) -> Option<ClientError> {
    if code == Code::Ok {
        return None;
    }

    let message = trailers
        .get(header::GRPC_MESSAGE)
        .and_then(|v| v.to_str().ok())
        .map(percent_decode);

    let mut error = ClientError::Status {
        code,
        message,
        details: vec![],
        metadata: HeaderMap::new(),
    };
    for detail in status_details(trailers) {
        error = error.add_error_detail(detail);
    }
    Some(error)
}

/// Decode the `grpc-status-details-bin` field: base64-encoded
/// `google.rpc.Status` whose details are protobuf `Any` values.
fn status_details(trailers: &HeaderMap) -> Vec<ErrorDetail> {
    let Some(encoded) = trailers
        .get(header::GRPC_STATUS_DETAILS)
        .and_then(|v| v.to_str().ok())
    else {
        return vec![];
    };
    let Some(bytes) = decode_base64_lenient(encoded) else {
        return vec![];
    };
    let Ok(status) = GrpcStatusProto::decode(bytes.as_slice()) else {
        return vec![];
    };

    status
        .details
        .into_iter()
        .map(|any| {
            // Short type names only (last component of the Any type URL).
            let type_name = any
                .type_url
                .rsplit('/')
                .next()
                .unwrap_or(any.type_url.as_str())
                .to_owned();
            ErrorDetail::new(type_name, any.value)
        })
        .collect()
}

/// Wire shape of `google.rpc.Status`.
#[derive(Clone, PartialEq, Message)]
struct GrpcStatusProto {
    #[prost(int32, tag = "1")]
    code: i32,
    #[prost(string, tag = "2")]
    message: String,
    #[prost(message, repeated, tag = "3")]
    details: Vec<prost_types::Any>,
}

/// Parse a gRPC-Web trailers block: CRLF-separated `name: value` lines with
/// comma-separated multi-values, names lowercased.
pub(crate) fn parse_trailers_block(data: &[u8]) -> Result<HeaderMap, ClientError> {
    let text = std::str::from_utf8(data)
        .map_err(|_| ClientError::Protocol("trailers block is not valid UTF-8".into()))?;

    let mut trailers = HeaderMap::new();
    for line in text.split("\r\n") {
        let Some((name, values)) = line.split_once(':') else {
            continue;
        };
        let Ok(name) = HeaderName::try_from(name.to_ascii_lowercase().as_str()) else {
            continue;
        };
        for value in values.split(',') {
            if let Ok(value) = HeaderValue::try_from(value.trim()) {
                trailers.append(name.clone(), value);
            }
        }
    }
    Ok(trailers)
}

/// Percent-decode a `grpc-message` value.
///
/// A variant of RFC 3986 section 2.1 that is deliberately permissive: any
/// malformed escape (truncated, or non-hex digits) returns the original
/// string unchanged rather than failing. Load-bearing for interop with
/// non-conformant servers.
pub(crate) fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;

    while index < bytes.len() {
        let byte = bytes[index];
        if byte == b'%' {
            let Some(hex) = bytes.get(index + 1..index + 3) else {
                return input.to_owned();
            };
            let Some(value) = std::str::from_utf8(hex)
                .ok()
                .and_then(|h| u8::from_str_radix(h, 16).ok())
            else {
                return input.to_owned();
            };
            decoded.push(value);
            index += 3;
        } else {
            decoded.push(byte);
            index += 1;
        }
    }

    String::from_utf8_lossy(&decoded).into_owned()
}
