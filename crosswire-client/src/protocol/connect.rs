//! The Connect protocol as an interceptor stage.
//!
//! Unary calls use bare (non-enveloped) bodies, compressed above the
//! configured threshold and described by `content-encoding`. Streams
//! envelope every message and signal termination with an end-of-stream JSON
//! record (`{"error"?, "metadata"?}`) in a frame whose end-stream flag bit
//! is set. Unary trailers travel as `trailer-`-prefixed response headers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::interceptor::{Interceptor, Proceed, TryProceed};
use crate::message::{StreamRequest, StreamResult, UnaryRequest, UnaryResponse};
use crate::protocol::{CONNECT_PROTOCOL_VERSION, header};
use crosswire_core::{Code, ErrorDetail, envelope_flags, pack_envelope, unpack_envelope};

/// Connect protocol translator. Created once per call.
pub(crate) struct ConnectTranslator {
    config: Arc<ClientConfig>,
    /// Response headers captured when the stream's Headers result passes
    /// through, consulted later for per-frame decompression.
    stream_response_headers: Mutex<Option<HeaderMap>>,
}

impl ConnectTranslator {
    pub(crate) fn new(config: Arc<ClientConfig>) -> Self {
        Self {
            config,
            stream_response_headers: Mutex::new(None),
        }
    }

    fn insert_timeout(&self, headers: &mut HeaderMap) {
        if let Some(ms) = self.config.timeout_ms()
            && let Ok(value) = HeaderValue::from_str(&ms.to_string())
        {
            headers.insert(header::CONNECT_TIMEOUT_MS, value);
        }
    }

    fn stream_response_pool(&self) -> Option<crosswire_core::BoxedPool> {
        let headers = self.stream_response_headers.lock().unwrap();
        headers
            .as_ref()
            .and_then(|h| h.get(header::CONNECT_CONTENT_ENCODING))
            .and_then(|v| v.to_str().ok())
            .and_then(|name| self.config.response_pool(name))
            .cloned()
    }

    fn captured_stream_headers(&self) -> HeaderMap {
        self.stream_response_headers
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_default()
    }
}

impl Interceptor for ConnectTranslator {
    fn intercept_request(&self, mut request: UnaryRequest, proceed: TryProceed<UnaryRequest>) {
        request.headers.insert(
            header::CONNECT_PROTOCOL_VERSION,
            HeaderValue::from_static(CONNECT_PROTOCOL_VERSION),
        );
        if let Some(accept) = self.config.accept_encoding_header()
            && let Ok(value) = HeaderValue::from_str(&accept)
        {
            request.headers.insert(header::ACCEPT_ENCODING, value);
        }
        self.insert_timeout(&mut request.headers);

        // Unary bodies are compressed directly, without an envelope. A
        // failed compression attempt degrades to the uncompressed body.
        if let Some(body) = request.body.take() {
            let compression = self.config.request_compression.as_ref();
            if !body.is_empty()
                && let Some(compression) = compression
                && compression.should_compress(&body)
                && let Ok(compressed) = compression.pool.compress(&body)
            {
                if let Ok(value) = HeaderValue::from_str(compression.pool.name()) {
                    request.headers.insert(header::CONTENT_ENCODING, value);
                }
                request.body = Some(compressed);
            } else {
                request.body = Some(body);
            }
        }

        proceed(Ok(request));
    }

    fn intercept_response(&self, response: UnaryResponse, proceed: Proceed<UnaryResponse>) {
        const TRAILER_PREFIX: &str = "trailer-";

        // Split the trailer- header-name prefix convention into the trailer
        // multimap and drop the consumed content-encoding header.
        let mut headers = HeaderMap::new();
        let mut trailers = response.trailers;
        for (name, value) in response.headers.iter() {
            let name_str = name.as_str();
            if name_str == header::CONTENT_ENCODING {
                continue;
            }
            if let Some(stripped) = name_str.strip_prefix(TRAILER_PREFIX) {
                if let Ok(trailer_name) = HeaderName::try_from(stripped) {
                    trailers.append(trailer_name, value.clone());
                }
            } else {
                headers.append(name.clone(), value.clone());
            }
        }

        let encoding = response
            .headers
            .get(header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = match (response.body, encoding) {
            (Some(body), Some(encoding)) => {
                match self
                    .config
                    .response_pool(&encoding)
                    .and_then(|pool| pool.decompress(&body).ok())
                {
                    Some(decompressed) => Some(decompressed),
                    // Undecodable body passes through untouched.
                    None => Some(body),
                }
            }
            (body, _) => body,
        };

        proceed(UnaryResponse {
            code: response.code,
            headers,
            body,
            trailers,
            error: response.error,
        });
    }

    fn intercept_stream_start(
        &self,
        mut request: StreamRequest,
        proceed: TryProceed<StreamRequest>,
    ) {
        request.headers.insert(
            header::CONNECT_PROTOCOL_VERSION,
            HeaderValue::from_static(CONNECT_PROTOCOL_VERSION),
        );
        if let Some(compression) = &self.config.request_compression
            && let Ok(value) = HeaderValue::from_str(compression.pool.name())
        {
            request
                .headers
                .insert(header::CONNECT_CONTENT_ENCODING, value);
        }
        if let Some(accept) = self.config.accept_encoding_header()
            && let Ok(value) = HeaderValue::from_str(&accept)
        {
            request
                .headers
                .insert(header::CONNECT_ACCEPT_ENCODING, value);
        }
        self.insert_timeout(&mut request.headers);
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
                let pool = self.stream_response_pool();
                match unpack_envelope(&frame, pool.as_ref()) {
                    Ok((flags, payload)) => {
                        if flags & envelope_flags::END_STREAM != 0 {
                            proceed(parse_end_stream(&payload));
                        } else {
                            proceed(StreamResult::Message(payload));
                        }
                    }
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
                if code != Code::Ok && error.is_none() {
                    // Transport-level failure with no error attached yet:
                    // synthesize one carrying the captured response headers.
                    proceed(StreamResult::Complete {
                        code,
                        error: Some(
                            ClientError::from_code(code)
                                .with_metadata(self.captured_stream_headers()),
                        ),
                        trailers,
                    });
                } else {
                    proceed(StreamResult::Complete {
                        code,
                        error,
                        trailers,
                    });
                }
            }
        }
    }
}

/// Wire shape of the Connect end-of-stream record.
#[derive(Deserialize)]
struct EndStreamRecord {
    #[serde(default)]
    error: Option<EndStreamError>,
    #[serde(default)]
    metadata: Option<HashMap<String, Vec<String>>>,
}

#[derive(Deserialize)]
struct EndStreamError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

/// Parse an end-of-stream record payload into the terminal result.
fn parse_end_stream(payload: &[u8]) -> StreamResult<Bytes> {
    // An empty record is a successful termination.
    if payload.is_empty() {
        return StreamResult::Complete {
            code: Code::Ok,
            error: None,
            trailers: None,
        };
    }

    let record: EndStreamRecord = match serde_json::from_slice(payload) {
        Ok(record) => record,
        Err(e) => {
            return StreamResult::Complete {
                code: Code::Unknown,
                error: Some(ClientError::Protocol(format!(
                    "invalid end-of-stream record: {}",
                    e
                ))),
                trailers: None,
            };
        }
    };

    let trailers = record.metadata.map(|metadata| {
        let mut headers = HeaderMap::new();
        for (name, values) in metadata {
            if let Ok(name) = HeaderName::try_from(name.as_str()) {
                for value in values {
                    if let Ok(value) = HeaderValue::try_from(value.as_str()) {
                        headers.append(name.clone(), value);
                    }
                }
            }
        }
        headers
    });

    match record.error {
        Some(error) => {
            let code = error.code.parse().unwrap_or(Code::Unknown);
            let mut client_error = match error.message {
                Some(message) => ClientError::new(code, message),
                None => ClientError::from_code(code),
            };
            for detail in error.details {
                client_error = client_error.add_error_detail(detail);
            }
            StreamResult::Complete {
                code,
                error: Some(client_error),
                trailers,
            }
        }
        None => StreamResult::Complete {
            code: Code::Ok,
            error: None,
            trailers,
        },
    }
}
