//! The interceptor chain: an ordered, cancelable middleware pipeline that
//! every call and stream passes through.
//!
//! An [`Interceptor`] is a capability set over up to five extension points
//! (typed request, raw request, raw response/result, typed response/result,
//! and metrics), each defaulting to a pass-through. Stages are created once
//! per call by an [`InterceptorFactory`] and discarded when the call ends;
//! they may hold per-call state behind a lock but must never be shared
//! across calls.
//!
//! Every extension point receives a `proceed` continuation. A stage that
//! never invokes its continuation silently stalls the call — this is a
//! caller contract, deliberately not backed by a hidden watchdog. Stages may
//! invoke `proceed` from a different thread or at a later time; within one
//! call all stage invocations remain strictly ordered.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::message::{
    AnyMessage, Request, ResponseMessage, StreamRequest, StreamResult, UnaryRequest, UnaryResponse,
};

/// Continuation passing a value to the next stage (or to the finish step).
pub type Proceed<T> = Box<dyn FnOnce(T) + Send>;

/// Continuation for request-path extension points.
///
/// Supplying an `Err` instead of a value short-circuits all remaining
/// request-path stages; the error is delivered to the caller without
/// reaching the transport.
pub type TryProceed<T> = Box<dyn FnOnce(Result<T, ClientError>) + Send>;

/// Timing data reported once per call through the metrics extension point.
#[derive(Debug, Clone)]
pub struct CallMetrics {
    /// Wall-clock duration from transport dispatch to the terminal result.
    pub duration: Duration,
}

/// One per-call unit of the middleware pipeline.
///
/// All methods default to pass-through. Request-path points run first-in
/// first-out in registration order; response-path points run last-in
/// first-out, so the stage registered first is the outermost observer on
/// both legs.
#[allow(unused_variables)]
pub trait Interceptor: Send + Sync {
    /// Observe and/or mutate a typed unary request before serialization.
    fn intercept_typed_request(
        &self,
        request: Request<AnyMessage>,
        proceed: TryProceed<Request<AnyMessage>>,
    ) {
        proceed(Ok(request));
    }

    /// Observe and/or mutate a serialized unary request.
    fn intercept_request(&self, request: UnaryRequest, proceed: TryProceed<UnaryRequest>) {
        proceed(Ok(request));
    }

    /// Observe and/or mutate a raw unary response.
    fn intercept_response(&self, response: UnaryResponse, proceed: Proceed<UnaryResponse>) {
        proceed(response);
    }

    /// Observe and/or mutate a typed unary response.
    fn intercept_typed_response(
        &self,
        response: ResponseMessage<AnyMessage>,
        proceed: Proceed<ResponseMessage<AnyMessage>>,
    ) {
        proceed(response);
    }

    /// Observe and/or mutate stream establishment.
    fn intercept_stream_start(&self, request: StreamRequest, proceed: TryProceed<StreamRequest>) {
        proceed(Ok(request));
    }

    /// Observe and/or mutate a typed outbound stream message.
    fn intercept_stream_input(&self, message: AnyMessage, proceed: Proceed<AnyMessage>) {
        proceed(message);
    }

    /// Observe and/or mutate the serialized bytes of an outbound message.
    fn intercept_stream_raw_input(&self, frame: Bytes, proceed: Proceed<Bytes>) {
        proceed(frame);
    }

    /// Observe and/or mutate a raw inbound stream result.
    fn intercept_stream_raw_result(
        &self,
        result: StreamResult<Bytes>,
        proceed: Proceed<StreamResult<Bytes>>,
    ) {
        proceed(result);
    }

    /// Observe and/or mutate a typed inbound stream result.
    fn intercept_stream_result(
        &self,
        result: StreamResult<AnyMessage>,
        proceed: Proceed<StreamResult<AnyMessage>>,
    ) {
        proceed(result);
    }

    /// Observe call timing after the terminal result.
    fn on_metrics(&self, metrics: &CallMetrics) {}
}

/// Produces one interceptor instance per call or stream.
///
/// Factories are stateless; any per-call state belongs on the produced
/// instance.
pub trait InterceptorFactory: Send + Sync {
    /// Create the stage for one call.
    fn create(&self, config: &Arc<ClientConfig>) -> Arc<dyn Interceptor>;
}

impl<F> InterceptorFactory for F
where
    F: Fn(&Arc<ClientConfig>) -> Arc<dyn Interceptor> + Send + Sync,
{
    fn create(&self, config: &Arc<ClientConfig>) -> Arc<dyn Interceptor> {
        self(config)
    }
}

/// The per-call stage list, orchestrating invocation order.
///
/// Execution folds the stage list into nested continuations, so a stage can
/// hold its continuation and resume the pipeline later without blocking a
/// thread.
#[derive(Clone)]
pub(crate) struct InterceptorChain {
    stages: Vec<Arc<dyn Interceptor>>,
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("count", &self.stages.len())
            .finish()
    }
}

impl InterceptorChain {
    pub(crate) fn new(stages: Vec<Arc<dyn Interceptor>>) -> Self {
        Self { stages }
    }

    fn ordered(&self, fifo: bool) -> Vec<Arc<dyn Interceptor>> {
        // The last stage wrapped becomes the first to run, so FIFO wraps in
        // reverse registration order.
        if fifo {
            self.stages.iter().rev().cloned().collect()
        } else {
            self.stages.iter().cloned().collect()
        }
    }

    /// Invoke one extension point on every stage in order.
    pub(crate) fn execute<T: Send + 'static>(
        &self,
        fifo: bool,
        point: fn(&dyn Interceptor, T, Proceed<T>),
        initial: T,
        finish: Proceed<T>,
    ) {
        let mut next = finish;
        for stage in self.ordered(fifo) {
            let prev = next;
            next = Box::new(move |value: T| point(stage.as_ref(), value, prev));
        }
        next(initial);
    }

    /// Invoke a request-path extension point on every stage in order,
    /// short-circuiting the remaining stages as soon as one supplies an
    /// error.
    pub(crate) fn execute_stop_on_failure<T: Send + 'static>(
        &self,
        fifo: bool,
        point: fn(&dyn Interceptor, T, TryProceed<T>),
        initial: T,
        finish: TryProceed<T>,
    ) {
        let mut next = finish;
        for stage in self.ordered(fifo) {
            let prev = next;
            next = Box::new(move |result: Result<T, ClientError>| match result {
                Ok(value) => point(stage.as_ref(), value, prev),
                Err(error) => prev(Err(error)),
            });
        }
        next(Ok(initial));
    }

    /// Run one extension point, transform the final value into another type,
    /// then run a second extension point with the transformed value.
    ///
    /// Used to join a typed leg and a raw leg around serialization or
    /// deserialization.
    pub(crate) fn execute_linked<T1, T2>(
        &self,
        fifo: bool,
        first: fn(&dyn Interceptor, T1, Proceed<T1>),
        initial: T1,
        transform: impl FnOnce(T1, Proceed<T2>) + Send + 'static,
        second: fn(&dyn Interceptor, T2, Proceed<T2>),
        finish: Proceed<T2>,
    ) where
        T1: Send + 'static,
        T2: Send + 'static,
    {
        let chain = self.clone();
        self.execute(
            fifo,
            first,
            initial,
            Box::new(move |value| {
                transform(
                    value,
                    Box::new(move |transformed| chain.execute(fifo, second, transformed, finish)),
                );
            }),
        );
    }

    /// Like [`execute_linked`](Self::execute_linked), but for request-path
    /// legs where any stage (or the transform itself) may fail the call.
    pub(crate) fn execute_linked_stop_on_failure<T1, T2>(
        &self,
        fifo: bool,
        first: fn(&dyn Interceptor, T1, TryProceed<T1>),
        initial: T1,
        transform: impl FnOnce(T1, TryProceed<T2>) + Send + 'static,
        second: fn(&dyn Interceptor, T2, TryProceed<T2>),
        finish: TryProceed<T2>,
    ) where
        T1: Send + 'static,
        T2: Send + 'static,
    {
        let chain = self.clone();
        self.execute_stop_on_failure(
            fifo,
            first,
            initial,
            Box::new(move |result| match result {
                Ok(value) => transform(
                    value,
                    Box::new(move |transformed| match transformed {
                        Ok(value) => {
                            chain.execute_stop_on_failure(fifo, second, value, finish);
                        }
                        Err(error) => finish(Err(error)),
                    }),
                ),
                Err(error) => finish(Err(error)),
            }),
        );
    }

    /// Report call metrics to every stage, last-registered first.
    pub(crate) fn notify_metrics(&self, metrics: &CallMetrics) {
        for stage in self.stages.iter().rev() {
            stage.on_metrics(metrics);
        }
    }
}

/// An interceptor that adds one header to unary requests and stream starts.
///
/// # Example
///
/// ```ignore
/// let client = ProtocolClient::builder("http://localhost:3000")
///     .with_interceptor(HeaderInterceptor::factory("authorization", "Bearer token123"))
///     .build()?;
/// ```
#[derive(Clone)]
pub struct HeaderInterceptor {
    name: HeaderName,
    value: HeaderValue,
}

impl HeaderInterceptor {
    /// Create a new header interceptor.
    ///
    /// # Errors
    ///
    /// Fails if the header name or value is invalid.
    pub fn new(name: &str, value: &str) -> Result<Self, ClientError> {
        let name = name
            .parse()
            .map_err(|_| ClientError::Protocol(format!("invalid header name: {}", name)))?;
        let value = value
            .parse()
            .map_err(|_| ClientError::Protocol(format!("invalid header value: {}", value)))?;
        Ok(Self { name, value })
    }

    /// Create a factory registering this interceptor on every call.
    ///
    /// # Panics
    ///
    /// Panics if the header name or value is invalid.
    pub fn factory(name: &str, value: &str) -> impl InterceptorFactory + use<> {
        let interceptor = Arc::new(
            Self::new(name, value).expect("invalid header name or value"),
        );
        move |_config: &Arc<ClientConfig>| interceptor.clone() as Arc<dyn Interceptor>
    }

    fn apply(&self, headers: &mut HeaderMap) {
        headers.insert(self.name.clone(), self.value.clone());
    }
}

impl Interceptor for HeaderInterceptor {
    fn intercept_request(&self, mut request: UnaryRequest, proceed: TryProceed<UnaryRequest>) {
        self.apply(&mut request.headers);
        proceed(Ok(request));
    }

    fn intercept_stream_start(
        &self,
        mut request: StreamRequest,
        proceed: TryProceed<StreamRequest>,
    ) {
        self.apply(&mut request.headers);
        proceed(Ok(request));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crosswire_core::Code;

    /// Records the order in which its extension points run.
    struct Recorder {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn new(label: &'static str, log: Arc<Mutex<Vec<String>>>) -> Arc<dyn Interceptor> {
            Arc::new(Self { label, log })
        }

        fn record(&self, point: &str) {
            self.log.lock().unwrap().push(format!("{}:{}", self.label, point));
        }
    }

    impl Interceptor for Recorder {
        fn intercept_request(&self, request: UnaryRequest, proceed: TryProceed<UnaryRequest>) {
            self.record("request");
            proceed(Ok(request));
        }

        fn intercept_response(&self, response: UnaryResponse, proceed: Proceed<UnaryResponse>) {
            self.record("response");
            proceed(response);
        }
    }

    /// Fails the request path with a fixed error.
    struct Failing;

    impl Interceptor for Failing {
        fn intercept_request(&self, _request: UnaryRequest, proceed: TryProceed<UnaryRequest>) {
            proceed(Err(ClientError::new(Code::PermissionDenied, "rejected")));
        }
    }

    fn empty_request() -> UnaryRequest {
        Request::new("http://host/svc/Method", HeaderMap::new(), None)
    }

    fn empty_response() -> UnaryResponse {
        UnaryResponse {
            code: Code::Ok,
            headers: HeaderMap::new(),
            body: None,
            trailers: HeaderMap::new(),
            error: None,
        }
    }

    #[test]
    fn test_request_fifo_response_lifo() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::new(vec![
            Recorder::new("a", log.clone()),
            Recorder::new("b", log.clone()),
            Recorder::new("c", log.clone()),
        ]);

        chain.execute_stop_on_failure(
            true,
            |s, v, p| s.intercept_request(v, p),
            empty_request(),
            Box::new(|_| {}),
        );
        chain.execute(
            false,
            |s, v, p| s.intercept_response(v, p),
            empty_response(),
            Box::new(|_| {}),
        );

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "a:request",
                "b:request",
                "c:request",
                "c:response",
                "b:response",
                "a:response",
            ]
        );
    }

    #[test]
    fn test_failure_short_circuits_remaining_stages() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::new(vec![
            Recorder::new("a", log.clone()),
            Arc::new(Failing),
            Recorder::new("c", log.clone()),
        ]);

        let outcome = Arc::new(Mutex::new(None));
        let outcome_clone = outcome.clone();
        chain.execute_stop_on_failure(
            true,
            |s, v, p| s.intercept_request(v, p),
            empty_request(),
            Box::new(move |result| {
                *outcome_clone.lock().unwrap() = Some(result.map(|_| ()));
            }),
        );

        // Stage c never ran; the failure reached the finish step.
        assert_eq!(*log.lock().unwrap(), vec!["a:request"]);
        let outcome = outcome.lock().unwrap().take().unwrap();
        assert_eq!(outcome.unwrap_err().code(), Code::PermissionDenied);
    }

    #[test]
    fn test_linked_execution_runs_transform_between_legs() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::new(vec![Recorder::new("a", log.clone())]);

        let log_clone = log.clone();
        chain.execute_linked(
            false,
            |s, v, p| s.intercept_response(v, p),
            empty_response(),
            move |response, proceed| {
                log_clone.lock().unwrap().push("transform".into());
                proceed(ResponseMessage::<AnyMessage> {
                    code: response.code,
                    headers: response.headers,
                    result: Ok(Box::new(0u32)),
                    trailers: response.trailers,
                });
            },
            |s, v, p| s.intercept_typed_response(v, p),
            Box::new(|_| {}),
        );

        assert_eq!(*log.lock().unwrap(), vec!["a:response", "transform"]);
    }

    #[test]
    fn test_deferred_proceed_resumes_pipeline() {
        // A stage may hold its continuation and resume later from another
        // thread; the remaining stages still run, in order.
        struct Deferring;

        impl Interceptor for Deferring {
            fn intercept_request(&self, request: UnaryRequest, proceed: TryProceed<UnaryRequest>) {
                std::thread::spawn(move || proceed(Ok(request)));
            }
        }

        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::new(vec![
            Arc::new(Deferring),
            Recorder::new("after", log.clone()),
        ]);

        let (tx, rx) = std::sync::mpsc::channel();
        chain.execute_stop_on_failure(
            true,
            |s, v, p| s.intercept_request(v, p),
            empty_request(),
            Box::new(move |result| {
                tx.send(result.is_ok()).unwrap();
            }),
        );

        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        assert_eq!(*log.lock().unwrap(), vec!["after:request"]);
    }

    #[test]
    fn test_header_interceptor_adds_header() {
        let interceptor = HeaderInterceptor::new("x-auth", "bearer-token").unwrap();

        let captured = Arc::new(Mutex::new(None));
        let captured_clone = captured.clone();
        interceptor.intercept_request(
            empty_request(),
            Box::new(move |result| {
                *captured_clone.lock().unwrap() = Some(result.unwrap().headers);
            }),
        );

        let headers = captured.lock().unwrap().take().unwrap();
        assert_eq!(headers.get("x-auth").unwrap(), "bearer-token");
    }

    #[test]
    fn test_header_interceptor_invalid_name() {
        assert!(HeaderInterceptor::new("bad header\n", "v").is_err());
    }

    #[test]
    fn test_metrics_notified_lifo() {
        struct MetricsRecorder {
            label: &'static str,
            log: Arc<Mutex<Vec<&'static str>>>,
        }

        impl Interceptor for MetricsRecorder {
            fn on_metrics(&self, _metrics: &CallMetrics) {
                self.log.lock().unwrap().push(self.label);
            }
        }

        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::new(vec![
            Arc::new(MetricsRecorder { label: "a", log: log.clone() }),
            Arc::new(MetricsRecorder { label: "b", log: log.clone() }),
        ]);

        chain.notify_metrics(&CallMetrics {
            duration: Duration::from_millis(5),
        });

        assert_eq!(*log.lock().unwrap(), vec!["b", "a"]);
    }
}
