//! The client facade.
//!
//! [`ProtocolClient`] wires configuration (host, protocol, codec,
//! compression, interceptors) into the interceptor chain, protocol
//! translators, and stream engine, and exposes unary and streaming
//! operations in both delivery styles.
//!
//! All operations must be invoked from within a Tokio runtime: unary calls
//! run the transport on a spawned task, and configured timeouts use spawned
//! deadline timers.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use http::{HeaderMap, HeaderValue};
use prost::Message;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::builder::ClientBuilder;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::interceptor::{CallMetrics, InterceptorChain, Proceed, TryProceed};
use crate::message::{
    AnyMessage, Request, ResponseMessage, StreamResult, UnaryRequest, UnaryResponse,
};
use crate::protocol::header;
use crate::streaming::engine::{self, ResultSink, StreamHandles};
use crate::streaming::{
    BidirectionalStream, ClientStream, ServerStream, ServerStreamSender, StreamSender, results,
    shapes,
};
use crate::transport::{Cancelable, Transport};
use crosswire_core::{Code, Codec, JsonCodec};

/// The RPC client: the entry point for unary calls and the three stream
/// shapes over the configured protocol.
///
/// Generic over its serialization codec; defaults to JSON.
///
/// # Example
///
/// ```ignore
/// let client = ProtocolClient::builder("http://localhost:3000")
///     .transport(transport)
///     .protocol(RpcProtocol::Grpc)
///     .build_with_codec(ProtoCodec)?;
///
/// let response = client
///     .unary::<EchoRequest, EchoResponse>("echo.v1.EchoService/Echo", HeaderMap::new(), request)
///     .await;
/// ```
#[derive(Clone)]
pub struct ProtocolClient<C: Codec = JsonCodec> {
    transport: Arc<dyn Transport>,
    config: Arc<ClientConfig>,
    codec: C,
}

impl<C: Codec> std::fmt::Debug for ProtocolClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolClient")
            .field("config", &self.config)
            .field("codec", &self.codec.name())
            .finish()
    }
}

impl ProtocolClient<JsonCodec> {
    /// Start building a client for the given host.
    pub fn builder<S: Into<String>>(host: S) -> ClientBuilder {
        ClientBuilder::new(host)
    }
}

struct UnaryCancelState {
    canceled: bool,
    task: Option<JoinHandle<()>>,
}

impl<C: Codec> ProtocolClient<C> {
    pub(crate) fn new(transport: Arc<dyn Transport>, config: Arc<ClientConfig>, codec: C) -> Self {
        Self {
            transport,
            config,
            codec,
        }
    }

    /// The client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Perform a unary call, suspending until the terminal response.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let response = client
    ///     .unary::<GetUserRequest, GetUserResponse>(
    ///         "users.v1.UserService/GetUser",
    ///         HeaderMap::new(),
    ///         GetUserRequest { id: "123".into() },
    ///     )
    ///     .await;
    /// let user = response.into_result()?;
    /// ```
    pub async fn unary<Req, Res>(
        &self,
        path: &str,
        headers: HeaderMap,
        message: Req,
    ) -> ResponseMessage<Res>
    where
        Req: Message + Serialize + Send + 'static,
        Res: Message + DeserializeOwned + Default + Send + 'static,
    {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let _cancelable = self.unary_with(path, headers, message, move |response| {
            let _ = tx.send(response);
        });
        match rx.await {
            Ok(response) => response,
            // The completion was dropped without firing (canceled call).
            Err(_) => ResponseMessage::canceled(),
        }
    }

    /// Perform a unary call, invoking `completion` with the terminal
    /// response. Returns a handle that cancels the call; a canceled call may
    /// never invoke `completion`.
    pub fn unary_with<Req, Res>(
        &self,
        path: &str,
        headers: HeaderMap,
        message: Req,
        completion: impl FnOnce(ResponseMessage<Res>) + Send + 'static,
    ) -> Cancelable
    where
        Req: Message + Serialize + Send + 'static,
        Res: Message + DeserializeOwned + Default + Send + 'static,
    {
        let span = tracing::debug_span!(
            "rpc.call",
            rpc.method = %path,
            rpc.kind = "unary",
            rpc.encoding = self.codec.name(),
        );
        let _guard = span.enter();

        let chain = InterceptorChain::new(ClientConfig::create_stages(&self.config));
        let cancel_state = Arc::new(Mutex::new(UnaryCancelState {
            canceled: false,
            task: None,
        }));

        let mut headers = headers;
        if let Ok(value) = HeaderValue::from_str(&format!("application/{}", self.codec.name())) {
            headers.insert(header::CONTENT_TYPE, value);
        }
        let request = Request::new(
            self.config.url_for(path),
            headers,
            Box::new(message) as AnyMessage,
        );

        let serialize_codec = self.codec.clone();
        let response_codec = self.codec.clone();
        let response_chain = chain.clone();
        let transport = self.transport.clone();
        let timeout = self.config.timeout;
        let runtime = Handle::current();
        let finish_cancel_state = cancel_state.clone();

        chain.execute_linked_stop_on_failure(
            true,
            |stage, value, proceed| stage.intercept_typed_request(value, proceed),
            request,
            move |request: Request<AnyMessage>, proceed: TryProceed<UnaryRequest>| {
                let Request { uri, headers, body } = request;
                match body.downcast::<Req>() {
                    Ok(message) => match serialize_codec.serialize(&*message) {
                        Ok(bytes) => proceed(Ok(Request::new(uri, headers, Some(bytes)))),
                        Err(error) => proceed(Err(error.into())),
                    },
                    Err(_) => proceed(Err(ClientError::Encode(
                        "interceptor replaced the request message type".into(),
                    ))),
                }
            },
            |stage, value, proceed| stage.intercept_request(value, proceed),
            Box::new(move |result: Result<UnaryRequest, ClientError>| {
                let request = match result {
                    Ok(request) => request,
                    Err(error) => {
                        // The transport is never contacted.
                        completion(ResponseMessage::from_error(error));
                        return;
                    }
                };

                let mut state = finish_cancel_state.lock().unwrap();
                if state.canceled {
                    return;
                }

                let started = Instant::now();
                let future = transport.unary(request);
                let task = runtime.spawn(async move {
                    let outcome = match timeout {
                        Some(t) => match tokio::time::timeout(t, future).await {
                            Ok(outcome) => outcome,
                            Err(_) => Err(ClientError::new(
                                Code::DeadlineExceeded,
                                "request timed out",
                            )),
                        },
                        None => future.await,
                    };
                    // Fold transport failures into a response so the
                    // response legs always run.
                    let response = match outcome {
                        Ok(response) => response,
                        Err(error) => UnaryResponse {
                            code: error.code(),
                            headers: error.metadata().cloned().unwrap_or_default(),
                            body: None,
                            trailers: HeaderMap::new(),
                            error: Some(error),
                        },
                    };

                    response_chain.notify_metrics(&CallMetrics {
                        duration: started.elapsed(),
                    });

                    response_chain.execute_linked(
                        false,
                        |stage, value, proceed| stage.intercept_response(value, proceed),
                        response,
                        move |response: UnaryResponse,
                              proceed: Proceed<ResponseMessage<AnyMessage>>| {
                            proceed(typed_response::<C, Res>(&response_codec, response));
                        },
                        |stage, value, proceed| stage.intercept_typed_response(value, proceed),
                        Box::new(move |typed: ResponseMessage<AnyMessage>| {
                            completion(restore_typed::<Res>(typed));
                        }),
                    );
                });
                state.task = Some(task);
            }),
        );

        Cancelable::new(move || {
            let mut state = cancel_state.lock().unwrap();
            state.canceled = true;
            if let Some(task) = state.task.take() {
                task.abort();
            }
        })
    }

    fn start_stream<Req, Res>(
        &self,
        kind: &'static str,
        path: &str,
        headers: HeaderMap,
        sink: ResultSink<Res>,
    ) -> StreamHandles<Req>
    where
        Req: Message + Serialize + Send + 'static,
        Res: Message + DeserializeOwned + Default + Send + 'static,
    {
        let span = tracing::debug_span!(
            "rpc.call",
            rpc.method = %path,
            rpc.kind = kind,
            rpc.encoding = self.codec.name(),
        );
        let _guard = span.enter();

        engine::start_stream(
            self.transport.clone(),
            self.config.clone(),
            self.codec.clone(),
            path,
            headers,
            sink,
        )
    }

    /// Open a bidirectional stream with pull-style delivery.
    pub fn bidirectional_stream<Req, Res>(
        &self,
        path: &str,
        headers: HeaderMap,
    ) -> BidirectionalStream<Req, Res>
    where
        Req: Message + Serialize + Send + 'static,
        Res: Message + DeserializeOwned + Default + Send + 'static,
    {
        let (sink, stream) = results::result_channel();
        let handles = self.start_stream("bidirectional_stream", path, headers, sink);
        BidirectionalStream::new(handles, stream)
    }

    /// Open a bidirectional stream, delivering each result to `on_result`.
    pub fn bidirectional_stream_with<Req, Res>(
        &self,
        path: &str,
        headers: HeaderMap,
        on_result: impl Fn(StreamResult<Res>) + Send + Sync + 'static,
    ) -> StreamSender<Req>
    where
        Req: Message + Serialize + Send + 'static,
        Res: Message + DeserializeOwned + Default + Send + 'static,
    {
        let handles =
            self.start_stream("bidirectional_stream", path, headers, Box::new(on_result));
        StreamSender::new(handles)
    }

    /// Open a client-only stream with pull-style delivery: send messages,
    /// then [`ClientStream::close_and_receive`] the single response.
    pub fn client_stream<Req, Res>(&self, path: &str, headers: HeaderMap) -> ClientStream<Req, Res>
    where
        Req: Message + Serialize + Send + 'static,
        Res: Message + DeserializeOwned + Default + Send + 'static,
    {
        let (sink, stream) = results::result_channel();
        let handles = self.start_stream(
            "client_stream",
            path,
            headers,
            shapes::client_stream_sink(sink),
        );
        ClientStream::new(handles, stream)
    }

    /// Open a client-only stream, delivering the validated results to
    /// `on_result`.
    pub fn client_stream_with<Req, Res>(
        &self,
        path: &str,
        headers: HeaderMap,
        on_result: impl Fn(StreamResult<Res>) + Send + Sync + 'static,
    ) -> StreamSender<Req>
    where
        Req: Message + Serialize + Send + 'static,
        Res: Message + DeserializeOwned + Default + Send + 'static,
    {
        let handles = self.start_stream(
            "client_stream",
            path,
            headers,
            shapes::client_stream_sink(Box::new(on_result)),
        );
        StreamSender::new(handles)
    }

    /// Open a server-only stream with pull-style delivery. Call
    /// [`ServerStream::send`] exactly once.
    pub fn server_stream<Req, Res>(&self, path: &str, headers: HeaderMap) -> ServerStream<Req, Res>
    where
        Req: Message + Serialize + Send + 'static,
        Res: Message + DeserializeOwned + Default + Send + 'static,
    {
        let (sink, stream) = results::result_channel();
        let handles = self.start_stream("server_stream", path, headers, sink);
        ServerStream::new(handles, stream)
    }

    /// Open a server-only stream, delivering each result to `on_result`.
    pub fn server_stream_with<Req, Res>(
        &self,
        path: &str,
        headers: HeaderMap,
        on_result: impl Fn(StreamResult<Res>) + Send + Sync + 'static,
    ) -> ServerStreamSender<Req>
    where
        Req: Message + Serialize + Send + 'static,
        Res: Message + DeserializeOwned + Default + Send + 'static,
    {
        let handles = self.start_stream("server_stream", path, headers, Box::new(on_result));
        ServerStreamSender::new(handles)
    }
}

/// Turn a raw response into the typed response message.
fn typed_response<C: Codec, Res>(codec: &C, response: UnaryResponse) -> ResponseMessage<AnyMessage>
where
    Res: Message + DeserializeOwned + Default + Send + 'static,
{
    let UnaryResponse {
        code,
        headers,
        body,
        trailers,
        error,
    } = response;

    if code != Code::Ok {
        // Prefer an error a translator already attached; otherwise parse the
        // Connect error body.
        let error =
            error.unwrap_or_else(|| ClientError::from_connect_body(code, &headers, body.as_ref()));
        return ResponseMessage {
            code,
            headers,
            result: Err(error),
            trailers,
        };
    }

    let result = match body {
        Some(body) => codec
            .deserialize::<Res>(&body)
            .map(|message| Box::new(message) as AnyMessage)
            .map_err(ClientError::from),
        None => Ok(Box::new(Res::default()) as AnyMessage),
    };
    ResponseMessage {
        code,
        headers,
        result,
        trailers,
    }
}

/// Restore the concrete response type after the typed interceptor leg.
fn restore_typed<Res: 'static>(typed: ResponseMessage<AnyMessage>) -> ResponseMessage<Res> {
    let ResponseMessage {
        code,
        headers,
        result,
        trailers,
    } = typed;
    let result = match result {
        Ok(boxed) => match boxed.downcast::<Res>() {
            Ok(message) => Ok(*message),
            Err(_) => Err(ClientError::Decode(
                "interceptor replaced the response message type".into(),
            )),
        },
        Err(error) => Err(error),
    };
    ResponseMessage {
        code,
        headers,
        result,
        trailers,
    }
}
