//! Per-stream wiring: reassembly, the send gate, and terminal bookkeeping.
//!
//! One stream owns:
//! - a growable byte buffer that reassembles transport chunks into discrete
//!   envelope frames (one chunk may carry zero, one, or many frames; one
//!   frame may span many chunks),
//! - a send gate stepping through `Pending -> Open -> Closed`, queueing
//!   sends FIFO until the transport stream exists,
//! - a completed flag enforcing `Headers? Message* Complete` with nothing
//!   delivered after `Complete`.
//!
//! Each piece of mutable state is guarded by its own mutex, scoped to the
//! one stream; there are no global locks. Callbacks may arrive from
//! different threads over the stream's life but are never invoked
//! concurrently with themselves for one stream.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, HeaderValue};
use prost::Message;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::interceptor::{CallMetrics, InterceptorChain, Proceed};
use crate::message::{AnyMessage, Request, StreamResult};
use crate::protocol::header;
use crate::transport::{ResponseCallbacks, Transport, TransportStream};
use crosswire_core::{Code, Codec, ENVELOPE_HEADER_LEN, message_length};

/// The delivery sink a stream was created with (a caller callback, or the
/// pull adapter's channel).
pub(crate) type ResultSink<Res> = Box<dyn Fn(StreamResult<Res>) + Send + Sync>;

/// A send-side action, queued while the transport stream does not yet exist.
pub(crate) enum SendAction {
    Send(Bytes),
    Close,
    Cancel,
}

enum GateState {
    /// Transport stream not yet established; actions queue FIFO.
    Pending(Vec<SendAction>),
    /// Transport stream live; actions go straight through.
    Open(Arc<dyn TransportStream>),
    /// Terminal. Sends are no-ops; the handle is retained so a late cancel
    /// can still abort the connection.
    Closed(Option<Arc<dyn TransportStream>>),
}

/// The per-stream send gate.
pub(crate) struct SendGate {
    state: Mutex<GateState>,
}

impl SendGate {
    fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Pending(Vec::new())),
        }
    }

    /// Perform or queue one action, per the current state.
    pub(crate) fn dispatch(&self, action: SendAction) {
        enum Effect {
            None,
            Send(Arc<dyn TransportStream>, Bytes),
            Close(Arc<dyn TransportStream>),
            Cancel(Arc<dyn TransportStream>),
        }

        let effect = {
            let mut guard = self.state.lock().unwrap();
            let current = std::mem::replace(&mut *guard, GateState::Closed(None));
            let (next, effect) = match (current, action) {
                (GateState::Pending(mut queue), action) => {
                    queue.push(action);
                    (GateState::Pending(queue), Effect::None)
                }
                (GateState::Open(handle), SendAction::Send(frame)) => {
                    let effect = Effect::Send(handle.clone(), frame);
                    (GateState::Open(handle), effect)
                }
                (GateState::Open(handle), SendAction::Close) => {
                    let effect = Effect::Close(handle.clone());
                    (GateState::Closed(Some(handle)), effect)
                }
                (GateState::Open(handle), SendAction::Cancel) => {
                    (GateState::Closed(None), Effect::Cancel(handle))
                }
                (GateState::Closed(Some(handle)), SendAction::Cancel) => {
                    (GateState::Closed(None), Effect::Cancel(handle))
                }
                (closed @ GateState::Closed(_), _) => (closed, Effect::None),
            };
            *guard = next;
            effect
        };

        // Transport calls happen outside the state lock.
        match effect {
            Effect::None => {}
            Effect::Send(handle, frame) => handle.send_frame(frame),
            Effect::Close(handle) => handle.close(),
            Effect::Cancel(handle) => handle.cancel(),
        }
    }

    /// Transition `Pending -> Open`, flushing queued actions in order.
    fn open(&self, handle: Arc<dyn TransportStream>) {
        let queued = {
            let mut guard = self.state.lock().unwrap();
            match std::mem::replace(&mut *guard, GateState::Closed(None)) {
                GateState::Pending(queue) => {
                    *guard = GateState::Open(handle);
                    queue
                }
                other => {
                    *guard = other;
                    return;
                }
            }
        };
        for action in queued {
            self.dispatch(action);
        }
    }

    /// Transition to `Closed` without touching the transport (terminal
    /// result observed).
    fn mark_closed(&self) {
        let mut guard = self.state.lock().unwrap();
        let next = match std::mem::replace(&mut *guard, GateState::Closed(None)) {
            GateState::Pending(_) => GateState::Closed(None),
            GateState::Open(handle) => GateState::Closed(Some(handle)),
            closed => closed,
        };
        *guard = next;
    }
}

/// The receive side of one stream.
pub(crate) struct ReceiveState<Res> {
    chain: InterceptorChain,
    gate: Arc<SendGate>,
    buffer: Mutex<BytesMut>,
    completed: Mutex<bool>,
    sink: ResultSink<Res>,
    deserialize: Box<dyn Fn(&[u8]) -> Result<Res, ClientError> + Send + Sync>,
    deadline: Mutex<Option<JoinHandle<()>>>,
    started: Instant,
}

impl<Res: Send + 'static> ReceiveState<Res> {
    fn is_completed(&self) -> bool {
        *self.completed.lock().unwrap()
    }

    /// Feed one raw result through the inbound chain (raw leg LIFO, typed
    /// transform, typed leg LIFO) and deliver the outcome.
    fn deliver_raw(self: &Arc<Self>, result: StreamResult<Bytes>) {
        let transform_state = Arc::clone(self);
        let finish_state = Arc::clone(self);
        self.chain.execute_linked(
            false,
            |stage, value, proceed| stage.intercept_stream_raw_result(value, proceed),
            result,
            move |raw: StreamResult<Bytes>, proceed: Proceed<StreamResult<AnyMessage>>| match raw {
                StreamResult::Headers(headers) => proceed(StreamResult::Headers(headers)),
                StreamResult::Complete {
                    code,
                    error,
                    trailers,
                } => proceed(StreamResult::Complete {
                    code,
                    error,
                    trailers,
                }),
                StreamResult::Message(bytes) => match (transform_state.deserialize)(&bytes) {
                    Ok(message) => proceed(StreamResult::Message(Box::new(message) as AnyMessage)),
                    Err(error) => {
                        // One malformed inbound message does not terminate
                        // the stream; drop it and keep reading.
                        tracing::warn!(error = %error, "dropping stream message that failed to decode");
                    }
                },
            },
            |stage, value, proceed| stage.intercept_stream_result(value, proceed),
            Box::new(move |typed| finish_state.emit_typed(typed)),
        );
    }

    fn emit_typed(&self, result: StreamResult<AnyMessage>) {
        let result = match result {
            StreamResult::Headers(headers) => StreamResult::Headers(headers),
            StreamResult::Complete {
                code,
                error,
                trailers,
            } => StreamResult::Complete {
                code,
                error,
                trailers,
            },
            StreamResult::Message(boxed) => match boxed.downcast::<Res>() {
                Ok(message) => StreamResult::Message(*message),
                Err(_) => {
                    tracing::warn!("stream interceptor replaced the inbound message type");
                    return;
                }
            },
        };
        self.emit(result);
    }

    /// Final delivery point: enforces the ordering invariant and performs
    /// terminal bookkeeping.
    fn emit(&self, result: StreamResult<Res>) {
        {
            let mut completed = self.completed.lock().unwrap();
            if *completed {
                return;
            }
            if result.is_complete() {
                *completed = true;
            }
        }

        if result.is_complete() {
            self.gate.mark_closed();
            if let Some(task) = self.deadline.lock().unwrap().take() {
                task.abort();
            }
            self.chain.notify_metrics(&CallMetrics {
                duration: self.started.elapsed(),
            });
        }
        (self.sink)(result);
    }

    /// Reassemble inbound bytes into frames and feed each through the chain.
    fn on_chunk(self: &Arc<Self>, chunk: Bytes) {
        let frames = {
            let mut buffer = self.buffer.lock().unwrap();
            buffer.extend_from_slice(&chunk);

            let mut frames = Vec::new();
            loop {
                let declared = message_length(&buffer);
                if declared < 0 {
                    break; // not enough header bytes yet
                }
                let framed = ENVELOPE_HEADER_LEN + declared as usize;
                if buffer.len() < framed {
                    break; // frame still incomplete
                }
                frames.push(buffer.split_to(framed).freeze());
            }
            frames
        };

        for frame in frames {
            self.deliver_raw(StreamResult::Message(frame));
        }
    }

    /// Transport-level close. Synthesizes the terminal result if the frame
    /// pipeline has not already produced one.
    fn on_transport_close(
        self: &Arc<Self>,
        code: Code,
        error: Option<ClientError>,
        trailers: Option<HeaderMap>,
    ) {
        if self.is_completed() {
            return;
        }
        self.deliver_raw(StreamResult::Complete {
            code,
            error,
            trailers,
        });
    }

    /// Engine-side terminal synthesis (cancellation, deadline expiry).
    fn synthesize(self: &Arc<Self>, code: Code, message: &str) {
        if self.is_completed() {
            return;
        }
        self.deliver_raw(StreamResult::Complete {
            code,
            error: Some(ClientError::new(code, message)),
            trailers: None,
        });
    }

    /// A request-path stage failed before the transport stream existed:
    /// deliver the terminal result directly, transport never contacted.
    fn fail_before_open(&self, error: ClientError) {
        {
            let mut completed = self.completed.lock().unwrap();
            if *completed {
                return;
            }
            *completed = true;
        }
        self.gate.mark_closed();
        if let Some(task) = self.deadline.lock().unwrap().take() {
            task.abort();
        }
        let trailers = error.metadata().cloned();
        (self.sink)(StreamResult::Complete {
            code: error.code(),
            error: Some(error),
            trailers,
        });
    }
}

/// The send side of one stream.
pub(crate) struct SendState<Req> {
    chain: InterceptorChain,
    gate: Arc<SendGate>,
    serialize: Box<dyn Fn(&Req) -> Result<Bytes, ClientError> + Send + Sync>,
    _marker: PhantomData<fn(Req)>,
}

impl<Req: Send + 'static> SendState<Req> {
    /// Run one outbound message through the typed leg (FIFO), serialization,
    /// and the raw leg (FIFO), then hand the frame to the gate.
    fn send_message(self: &Arc<Self>, message: Req) {
        let transform_state = Arc::clone(self);
        let finish_state = Arc::clone(self);
        self.chain.execute_linked(
            true,
            |stage, value, proceed| stage.intercept_stream_input(value, proceed),
            Box::new(message) as AnyMessage,
            move |boxed: AnyMessage, proceed: Proceed<Bytes>| match boxed.downcast::<Req>() {
                Ok(message) => match (transform_state.serialize)(&message) {
                    Ok(bytes) => proceed(bytes),
                    Err(error) => {
                        // The message never reaches the wire; the stream
                        // itself stays healthy.
                        tracing::error!(error = %error, "failed to send message that could not be serialized");
                    }
                },
                Err(_) => {
                    tracing::error!("stream interceptor replaced the outbound message type");
                }
            },
            |stage, value, proceed| stage.intercept_stream_raw_input(value, proceed),
            Box::new(move |frame: Bytes| finish_state.gate.dispatch(SendAction::Send(frame))),
        );
    }
}

/// Close/cancel operations, independent of the message types.
pub(crate) trait StreamControl: Send + Sync {
    fn close(&self);
    fn cancel(&self);
}

struct Control<Res> {
    gate: Arc<SendGate>,
    receive: Arc<ReceiveState<Res>>,
}

impl<Res: Send + 'static> StreamControl for Control<Res> {
    fn close(&self) {
        self.gate.dispatch(SendAction::Close);
    }

    fn cancel(&self) {
        self.gate.dispatch(SendAction::Cancel);
        self.receive.synthesize(Code::Canceled, "canceled by client");
    }
}

/// The engine-side handles backing every stream shape.
pub(crate) struct StreamHandles<Req> {
    send: Arc<SendState<Req>>,
    control: Arc<dyn StreamControl>,
}

impl<Req> Clone for StreamHandles<Req> {
    fn clone(&self) -> Self {
        Self {
            send: self.send.clone(),
            control: self.control.clone(),
        }
    }
}

impl<Req: Send + 'static> StreamHandles<Req> {
    pub(crate) fn send(&self, message: Req) {
        self.send.send_message(message);
    }

    pub(crate) fn close(&self) {
        self.control.close();
    }

    pub(crate) fn cancel(&self) {
        self.control.cancel();
    }
}

/// Open one stream: run the stream-start leg, contact the transport on
/// success, and wire the inbound pipeline to `sink`.
///
/// Must be called within a Tokio runtime when a timeout is configured (the
/// deadline timer is a spawned task).
pub(crate) fn start_stream<C, Req, Res>(
    transport: Arc<dyn Transport>,
    config: Arc<ClientConfig>,
    codec: C,
    path: &str,
    headers: HeaderMap,
    sink: ResultSink<Res>,
) -> StreamHandles<Req>
where
    C: Codec,
    Req: Message + Serialize + Send + 'static,
    Res: Message + DeserializeOwned + Default + Send + 'static,
{
    let chain = InterceptorChain::new(ClientConfig::create_stages(&config));
    let gate = Arc::new(SendGate::new());

    let serialize_codec = codec.clone();
    let deserialize_codec = codec;
    let receive = Arc::new(ReceiveState {
        chain: chain.clone(),
        gate: gate.clone(),
        buffer: Mutex::new(BytesMut::new()),
        completed: Mutex::new(false),
        sink,
        deserialize: Box::new(move |bytes| {
            deserialize_codec
                .deserialize::<Res>(bytes)
                .map_err(ClientError::from)
        }),
        deadline: Mutex::new(None),
        started: Instant::now(),
    });
    let send = Arc::new(SendState {
        chain: chain.clone(),
        gate: gate.clone(),
        serialize: Box::new(move |message: &Req| {
            serialize_codec.serialize(message).map_err(ClientError::from)
        }),
        _marker: PhantomData,
    });

    // Streams default to the Connect content-type; the gRPC translators
    // overwrite it during stream start.
    let mut headers = headers;
    if let Ok(value) = HeaderValue::from_str(&format!("application/connect+{}", config.codec_name))
    {
        headers.insert(header::CONTENT_TYPE, value);
    }
    let request = Request::new(config.url_for(path), headers, ());

    let callbacks = {
        let on_headers = Arc::clone(&receive);
        let on_data = Arc::clone(&receive);
        let on_close = Arc::clone(&receive);
        ResponseCallbacks {
            on_headers: Box::new(move |headers| {
                on_headers.deliver_raw(StreamResult::Headers(headers))
            }),
            on_data: Box::new(move |chunk| on_data.on_chunk(chunk)),
            on_close: Box::new(move |code, error, trailers| {
                on_close.on_transport_close(code, error, trailers)
            }),
        }
    };

    {
        let receive = Arc::clone(&receive);
        let gate = gate.clone();
        chain.execute_stop_on_failure(
            true,
            |stage, value, proceed| stage.intercept_stream_start(value, proceed),
            request,
            Box::new(move |result| match result {
                Ok(request) => {
                    let handle: Arc<dyn TransportStream> =
                        Arc::from(transport.open_stream(request, callbacks));
                    gate.open(handle);
                }
                Err(error) => receive.fail_before_open(error),
            }),
        );
    }

    if let Some(timeout) = config.timeout {
        let expire_receive = Arc::clone(&receive);
        let expire_gate = gate.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            expire_gate.dispatch(SendAction::Cancel);
            expire_receive.synthesize(Code::DeadlineExceeded, "deadline exceeded");
        });
        *receive.deadline.lock().unwrap() = Some(task);
    }

    StreamHandles {
        send,
        control: Arc::new(Control { gate, receive }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::message::{StreamRequest, UnaryRequest, UnaryResponse};
    use crate::protocol::RpcProtocol;
    use crate::transport::BoxFuture;
    use crosswire_core::{JsonCodec, PoolRegistry, pack_envelope};

    #[derive(Clone, PartialEq, prost::Message, serde::Serialize, serde::Deserialize)]
    struct TestMessage {
        #[prost(string, tag = "1")]
        value: String,
    }

    fn message(value: &str) -> TestMessage {
        TestMessage {
            value: value.into(),
        }
    }

    /// In-memory transport: records sent frames, exposes the response
    /// callbacks so tests can play the server side.
    #[derive(Default)]
    struct ScriptedInner {
        callbacks: Mutex<Option<ResponseCallbacks>>,
        sent: Mutex<Vec<Bytes>>,
        closed: AtomicUsize,
        canceled: AtomicUsize,
    }

    struct ScriptedTransport {
        inner: Arc<ScriptedInner>,
    }

    struct ScriptedStream {
        inner: Arc<ScriptedInner>,
    }

    impl TransportStream for ScriptedStream {
        fn send_frame(&self, frame: Bytes) {
            self.inner.sent.lock().unwrap().push(frame);
        }

        fn close(&self) {
            self.inner.closed.fetch_add(1, Ordering::SeqCst);
        }

        fn cancel(&self) {
            self.inner.canceled.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Transport for ScriptedTransport {
        fn unary(
            &self,
            _request: UnaryRequest,
        ) -> BoxFuture<'static, Result<UnaryResponse, ClientError>> {
            unimplemented!("stream tests only")
        }

        fn open_stream(
            &self,
            _request: StreamRequest,
            callbacks: ResponseCallbacks,
        ) -> Box<dyn TransportStream> {
            *self.inner.callbacks.lock().unwrap() = Some(callbacks);
            Box::new(ScriptedStream {
                inner: self.inner.clone(),
            })
        }
    }

    impl ScriptedInner {
        fn on_data(&self, chunk: &[u8]) {
            let callbacks = self.callbacks.lock().unwrap();
            (callbacks.as_ref().unwrap().on_data)(Bytes::copy_from_slice(chunk));
        }

        fn on_headers(&self, headers: HeaderMap) {
            let callbacks = self.callbacks.lock().unwrap();
            (callbacks.as_ref().unwrap().on_headers)(headers);
        }

        fn on_close(&self, code: Code) {
            let callbacks = self.callbacks.lock().unwrap();
            (callbacks.as_ref().unwrap().on_close)(code, None, None);
        }
    }

    fn make_config() -> Arc<ClientConfig> {
        Arc::new(ClientConfig {
            host: "http://localhost".into(),
            protocol: RpcProtocol::Connect,
            codec_name: "json",
            request_compression: None,
            response_pools: PoolRegistry::new(),
            timeout: None,
            interceptors: vec![],
        })
    }

    type Collected = Arc<Mutex<Vec<String>>>;

    /// Renders results as compact strings for order assertions.
    fn collecting_sink(log: Collected) -> ResultSink<TestMessage> {
        Box::new(move |result: StreamResult<TestMessage>| {
            let entry = match result {
                StreamResult::Headers(_) => "headers".to_string(),
                StreamResult::Message(m) => format!("message:{}", m.value),
                StreamResult::Complete { code, .. } => format!("complete:{}", code.as_str()),
            };
            log.lock().unwrap().push(entry);
        })
    }

    fn open_test_stream(
        config: Arc<ClientConfig>,
    ) -> (Arc<ScriptedInner>, StreamHandles<TestMessage>, Collected) {
        let inner = Arc::new(ScriptedInner::default());
        let transport = Arc::new(ScriptedTransport {
            inner: inner.clone(),
        });
        let log: Collected = Arc::new(Mutex::new(Vec::new()));
        let handles = start_stream::<_, TestMessage, TestMessage>(
            transport,
            config,
            JsonCodec,
            "pkg.Service/Stream",
            HeaderMap::new(),
            collecting_sink(log.clone()),
        );
        (inner, handles, log)
    }

    fn frame_for(value: &str) -> Vec<u8> {
        let payload = serde_json::to_vec(&message(value)).unwrap();
        pack_envelope(&payload, None).to_vec()
    }

    fn end_stream_frame() -> Vec<u8> {
        let mut frame = vec![0x02];
        frame.extend_from_slice(&2u32.to_be_bytes());
        frame.extend_from_slice(b"{}");
        frame
    }

    #[tokio::test]
    async fn test_sequencing_headers_messages_complete() {
        let (inner, _handles, log) = open_test_stream(make_config());

        inner.on_headers(HeaderMap::new());
        inner.on_data(&frame_for("one"));
        inner.on_data(&frame_for("two"));
        inner.on_data(&end_stream_frame());
        // Late transport close after the terminal result: suppressed.
        inner.on_close(Code::Ok);

        assert_eq!(
            *log.lock().unwrap(),
            vec!["headers", "message:one", "message:two", "complete:ok"]
        );
    }

    #[tokio::test]
    async fn test_reassembly_is_chunking_invariant() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&frame_for("alpha"));
        wire.extend_from_slice(&frame_for("beta"));
        wire.extend_from_slice(&frame_for("gamma"));
        wire.extend_from_slice(&end_stream_frame());

        // Whole stream at once, byte-by-byte, and ragged splits must all
        // produce the identical result sequence.
        let splits: Vec<Vec<&[u8]>> = vec![
            vec![&wire[..]],
            wire.chunks(1).collect(),
            wire.chunks(3).collect(),
            vec![&wire[..7], &wire[7..8], &wire[8..]],
        ];

        let mut outcomes = Vec::new();
        for chunks in splits {
            let (inner, _handles, log) = open_test_stream(make_config());
            for chunk in chunks {
                inner.on_data(chunk);
            }
            outcomes.push(log.lock().unwrap().clone());
        }

        assert_eq!(
            outcomes[0],
            vec![
                "message:alpha",
                "message:beta",
                "message:gamma",
                "complete:ok"
            ]
        );
        for outcome in &outcomes[1..] {
            assert_eq!(outcome, &outcomes[0]);
        }
    }

    #[tokio::test]
    async fn test_sends_flow_through_after_open() {
        let (inner, handles, _log) = open_test_stream(make_config());

        handles.send(message("hello"));
        let sent = inner.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        // Connect translator enveloped the JSON payload.
        assert_eq!(sent[0][0], 0x00);
        assert_eq!(&sent[0][5..], br#"{"value":"hello"}"#);
    }

    #[test]
    fn test_pending_sends_flush_in_order_on_open() {
        let inner = Arc::new(ScriptedInner::default());

        // Sends (and the close) issued while the transport stream does not
        // yet exist queue FIFO and flush the instant the gate opens.
        let gate = SendGate::new();
        gate.dispatch(SendAction::Send(Bytes::from_static(b"first")));
        gate.dispatch(SendAction::Send(Bytes::from_static(b"second")));
        gate.dispatch(SendAction::Close);
        assert!(inner.sent.lock().unwrap().is_empty());

        let handle = Arc::new(ScriptedStream {
            inner: inner.clone(),
        });
        gate.open(handle);

        assert_eq!(
            inner.sent.lock().unwrap().as_slice(),
            &[Bytes::from_static(b"first"), Bytes::from_static(b"second")]
        );
        assert_eq!(inner.closed.load(Ordering::SeqCst), 1);

        // Sends after close are dropped.
        gate.dispatch(SendAction::Send(Bytes::from_static(b"late")));
        assert_eq!(inner.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_synthesizes_terminal_result() {
        let (inner, handles, log) = open_test_stream(make_config());

        handles.cancel();

        assert_eq!(inner.canceled.load(Ordering::SeqCst), 1);
        assert_eq!(*log.lock().unwrap(), vec!["complete:canceled"]);

        // Nothing more is accepted or delivered.
        handles.send(message("late"));
        inner.on_data(&frame_for("late"));
        assert!(inner.sent.lock().unwrap().is_empty());
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_close_without_terminal_synthesizes_complete() {
        let (inner, _handles, log) = open_test_stream(make_config());

        inner.on_data(&frame_for("only"));
        inner.on_close(Code::Unavailable);

        assert_eq!(
            *log.lock().unwrap(),
            vec!["message:only", "complete:unavailable"]
        );
    }

    #[tokio::test]
    async fn test_stream_start_failure_never_contacts_transport() {
        use crate::interceptor::{Interceptor, TryProceed};

        struct Rejecting;
        impl Interceptor for Rejecting {
            fn intercept_stream_start(
                &self,
                _request: StreamRequest,
                proceed: TryProceed<StreamRequest>,
            ) {
                proceed(Err(ClientError::new(Code::Unauthenticated, "no token")));
            }
        }

        let mut config = (*make_config()).clone();
        config.interceptors = vec![Arc::new(
            |_: &Arc<ClientConfig>| Arc::new(Rejecting) as Arc<dyn Interceptor>,
        )];
        let (inner, handles, log) = open_test_stream(Arc::new(config));

        // The transport was never asked to open a stream.
        assert!(inner.callbacks.lock().unwrap().is_none());
        assert_eq!(*log.lock().unwrap(), vec!["complete:unauthenticated"]);

        // And sends are dropped rather than queued forever.
        handles.send(message("ignored"));
        assert!(inner.sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expiry_cancels_with_deadline_exceeded() {
        let mut config = (*make_config()).clone();
        config.timeout = Some(std::time::Duration::from_millis(50));
        let (inner, _handles, log) = open_test_stream(Arc::new(config));

        tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        // Let the deadline task run.
        tokio::task::yield_now().await;

        assert_eq!(inner.canceled.load(Ordering::SeqCst), 1);
        assert_eq!(*log.lock().unwrap(), vec!["complete:deadline_exceeded"]);
    }

    #[tokio::test]
    async fn test_malformed_message_dropped_stream_continues() {
        let (inner, _handles, log) = open_test_stream(make_config());

        // Frame whose payload is not valid JSON for the message type.
        let bad = pack_envelope(b"not json", None);
        inner.on_data(&bad);
        inner.on_data(&frame_for("good"));
        inner.on_data(&end_stream_frame());

        assert_eq!(*log.lock().unwrap(), vec!["message:good", "complete:ok"]);
    }
}
