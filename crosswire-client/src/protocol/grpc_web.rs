//! The gRPC-Web protocol as an interceptor stage.
//!
//! Identical to gRPC on the request path (minus the `te` header, plus the
//! `grpc-web` content-type), but trailers arrive in-band: a final envelope
//! frame whose trailers flag bit is set carries a `name: value` text block.
//! A response whose *first* frame carries the trailers flag is a
//! trailers-only response and completes without ever producing a message.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::HeaderMap;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::interceptor::{Interceptor, Proceed, TryProceed};
use crate::message::{StreamRequest, StreamResult, UnaryRequest, UnaryResponse};
use crate::protocol::grpc::{add_grpc_headers, grpc_code_and_error, grpc_status, parse_trailers_block};
use crate::protocol::header;
use crosswire_core::{
    Code, ENVELOPE_HEADER_LEN, envelope_flags, message_length, pack_envelope, unpack_envelope,
};

/// gRPC-Web protocol translator. Created once per call.
pub(crate) struct GrpcWebTranslator {
    config: Arc<ClientConfig>,
    stream_response_headers: Mutex<Option<HeaderMap>>,
}

impl GrpcWebTranslator {
    pub(crate) fn new(config: Arc<ClientConfig>) -> Self {
        Self {
            config,
            stream_response_headers: Mutex::new(None),
        }
    }

    fn response_pool(&self, headers: &HeaderMap) -> Option<crosswire_core::BoxedPool> {
        headers
            .get(header::GRPC_ENCODING)
            .and_then(|v| v.to_str().ok())
            .and_then(|name| self.config.response_pool(name))
            .cloned()
    }

    /// Unpack the unary response body: an optional enveloped message chunk
    /// followed by the enveloped trailers chunk (either may be compressed).
    fn unpack_unary_body(
        &self,
        response: &UnaryResponse,
        body: &[u8],
    ) -> Result<(Option<Bytes>, HeaderMap), ClientError> {
        let pool = self.response_pool(&response.headers);

        let first_length = message_length(body);
        if first_length < 0 {
            return Err(ClientError::Protocol(
                "gRPC-Web response too short for an envelope".into(),
            ));
        }
        let first_end = ENVELOPE_HEADER_LEN + first_length as usize;
        let first_chunk = body.get(..first_end).ok_or_else(|| {
            ClientError::Protocol("gRPC-Web response shorter than declared frame".into())
        })?;

        let (flags, payload) = unpack_envelope(first_chunk, pool.as_ref())?;
        if flags & envelope_flags::TRAILERS != 0 {
            // Trailers-only response: no message chunk at all.
            let trailers = parse_trailers_block(&payload)?;
            return Ok((None, trailers));
        }

        let trailers_chunk = body.get(first_end..).unwrap_or_default();
        let (_, trailers_payload) = unpack_envelope(trailers_chunk, pool.as_ref())?;
        let trailers = parse_trailers_block(&trailers_payload)?;
        Ok((Some(payload), trailers))
    }
}

impl Interceptor for GrpcWebTranslator {
    fn intercept_request(&self, mut request: UnaryRequest, proceed: TryProceed<UnaryRequest>) {
        // gRPC-Web unary payloads are enveloped.
        let body = request.body.take().unwrap_or_default();
        request.body = Some(pack_envelope(
            &body,
            self.config.request_compression.as_ref(),
        ));
        add_grpc_headers(&mut request.headers, &self.config, true);
        proceed(Ok(request));
    }

    fn intercept_response(&self, mut response: UnaryResponse, proceed: Proceed<UnaryResponse>) {
        if response.code != Code::Ok {
            // Invalid gRPC-Web response - expects HTTP 200. Potentially a
            // network error.
            proceed(response);
            return;
        }

        let Some(body) = response.body.as_ref().filter(|b| !b.is_empty()).cloned() else {
            // No body at all: the status must be in the headers or trailers.
            let (code, error) =
                grpc_code_and_error(Some(&response.headers), Some(&response.trailers));
            let prior = response.error.take();
            proceed(UnaryResponse {
                code,
                error: error.or(prior),
                ..response
            });
            return;
        };

        match self.unpack_unary_body(&response, &body) {
            Ok((message, trailers)) => {
                let (code, error) = grpc_code_and_error(Some(&response.headers), Some(&trailers));
                proceed(UnaryResponse {
                    code,
                    body: message,
                    trailers,
                    error,
                    ..response
                });
            }
            Err(e) => proceed(UnaryResponse {
                code: Code::Unknown,
                error: Some(e),
                ..response
            }),
        }
    }

    fn intercept_stream_start(
        &self,
        mut request: StreamRequest,
        proceed: TryProceed<StreamRequest>,
    ) {
        add_grpc_headers(&mut request.headers, &self.config, true);
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
                if let Some(code) = grpc_status(&headers) {
                    // Headers-only response: complete without any messages.
                    let error = grpc_code_and_error(None, Some(&headers)).1;
                    proceed(StreamResult::Complete {
                        code,
                        error,
                        trailers: Some(headers),
                    });
                } else {
                    *self.stream_response_headers.lock().unwrap() = Some(headers.clone());
                    proceed(StreamResult::Headers(headers));
                }
            }

            StreamResult::Message(frame) => {
                let pool = {
                    let headers = self.stream_response_headers.lock().unwrap();
                    headers.as_ref().and_then(|h| self.response_pool(h))
                };
                match unpack_envelope(&frame, pool.as_ref()) {
                    Ok((flags, payload)) => {
                        if flags & envelope_flags::TRAILERS != 0 {
                            match parse_trailers_block(&payload) {
                                Ok(trailers) => {
                                    let headers =
                                        self.stream_response_headers.lock().unwrap().clone();
                                    let (code, error) =
                                        grpc_code_and_error(headers.as_ref(), Some(&trailers));
                                    proceed(StreamResult::Complete {
                                        code,
                                        error,
                                        trailers: Some(trailers),
                                    });
                                }
                                Err(e) => proceed(StreamResult::Complete {
                                    code: Code::Unknown,
                                    error: Some(e),
                                    trailers: None,
                                }),
                            }
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

            StreamResult::Complete { .. } => proceed(result),
        }
    }
}
