//! The three stream shapes, in both delivery styles.
//!
//! - Bidirectional: send any number of times, close and cancel independently
//!   of receiving.
//! - Client-only: send any number of times, then one combined
//!   close-and-receive expecting exactly one terminal response.
//! - Server-only: exactly one send at stream start; the engine half-closes
//!   immediately after it, so later sends are ignored.
//!
//! Pull-style shapes expose a [`ResultStream`]; callback-style creation
//! (the `*_with` client methods) returns only the send handles.

use std::sync::Mutex;

use futures::StreamExt;
use http::HeaderMap;

use crate::error::ClientError;
use crate::message::{ResponseMessage, StreamResult};
use crate::streaming::engine::{ResultSink, StreamHandles};
use crate::streaming::results::ResultStream;
use crosswire_core::Code;

/// Send-side handle for a callback-style bidirectional or client-only
/// stream.
pub struct StreamSender<Req> {
    handles: StreamHandles<Req>,
}

impl<Req> Clone for StreamSender<Req> {
    fn clone(&self) -> Self {
        Self {
            handles: self.handles.clone(),
        }
    }
}

impl<Req: Send + 'static> StreamSender<Req> {
    pub(crate) fn new(handles: StreamHandles<Req>) -> Self {
        Self { handles }
    }

    /// Send a message. Queued if the transport stream is still being
    /// established; a no-op once the stream is closed.
    pub fn send(&self, message: Req) {
        self.handles.send(message);
    }

    /// Half-close the send side.
    pub fn close(&self) {
        self.handles.close();
    }

    /// Cancel the stream: the transport connection is forced closed and a
    /// `Complete` with the canceled code is delivered if nothing terminal
    /// arrived yet.
    pub fn cancel(&self) {
        self.handles.cancel();
    }
}

/// A pull-style bidirectional stream.
pub struct BidirectionalStream<Req, Res> {
    sender: StreamSender<Req>,
    results: ResultStream<Res>,
}

impl<Req: Send + 'static, Res> BidirectionalStream<Req, Res> {
    pub(crate) fn new(handles: StreamHandles<Req>, results: ResultStream<Res>) -> Self {
        Self {
            sender: StreamSender::new(handles),
            results,
        }
    }

    /// Send a message over the stream.
    pub fn send(&self, message: Req) {
        self.sender.send(message);
    }

    /// Half-close the send side; results keep arriving.
    pub fn close(&self) {
        self.sender.close();
    }

    /// Cancel the stream.
    pub fn cancel(&self) {
        self.sender.cancel();
    }

    /// The inbound result sequence.
    pub fn results_mut(&mut self) -> &mut ResultStream<Res> {
        &mut self.results
    }

    /// Split into an independently owned sender and result sequence, for
    /// concurrent sending and receiving.
    pub fn into_parts(self) -> (StreamSender<Req>, ResultStream<Res>) {
        (self.sender, self.results)
    }
}

/// A pull-style client-only stream.
pub struct ClientStream<Req, Res> {
    sender: StreamSender<Req>,
    results: ResultStream<Res>,
}

impl<Req: Send + 'static, Res> ClientStream<Req, Res> {
    pub(crate) fn new(handles: StreamHandles<Req>, results: ResultStream<Res>) -> Self {
        Self {
            sender: StreamSender::new(handles),
            results,
        }
    }

    /// Send a message over the stream.
    pub fn send(&self, message: Req) {
        self.sender.send(message);
    }

    /// Cancel the stream.
    pub fn cancel(&self) {
        self.sender.cancel();
    }

    /// Close the send side and await the single expected response.
    pub async fn close_and_receive(mut self) -> ResponseMessage<Res> {
        self.sender.close();

        let mut headers = HeaderMap::new();
        let mut message = None;
        while let Some(result) = self.results.next().await {
            match result {
                StreamResult::Headers(h) => headers = h,
                StreamResult::Message(m) => message = Some(m),
                StreamResult::Complete {
                    code,
                    error,
                    trailers,
                } => {
                    let trailers = trailers.unwrap_or_default();
                    let result = if let Some(error) = error {
                        Err(error)
                    } else if code != Code::Ok {
                        Err(ClientError::from_code(code))
                    } else if let Some(message) = message {
                        Ok(message)
                    } else {
                        Err(ClientError::new(
                            Code::Unimplemented,
                            "unary stream has no messages",
                        ))
                    };
                    return ResponseMessage {
                        code,
                        headers,
                        result,
                        trailers,
                    };
                }
            }
        }

        ResponseMessage::from_error(ClientError::Protocol(
            "stream ended without a terminal result".into(),
        ))
    }
}

/// A pull-style server-only stream.
pub struct ServerStream<Req, Res> {
    sender: StreamSender<Req>,
    results: ResultStream<Res>,
}

impl<Req: Send + 'static, Res> ServerStream<Req, Res> {
    pub(crate) fn new(handles: StreamHandles<Req>, results: ResultStream<Res>) -> Self {
        Self {
            sender: StreamSender::new(handles),
            results,
        }
    }

    /// Send the single request message. The send side is closed immediately
    /// afterwards, so any further send is ignored.
    pub fn send(&self, message: Req) {
        self.sender.send(message);
        self.sender.close();
    }

    /// Cancel the stream.
    pub fn cancel(&self) {
        self.sender.cancel();
    }

    /// The inbound result sequence.
    pub fn results_mut(&mut self) -> &mut ResultStream<Res> {
        &mut self.results
    }

    /// Consume the shape, keeping only the result sequence.
    pub fn into_results(self) -> ResultStream<Res> {
        self.results
    }
}

/// Send-side handle for a callback-style server-only stream.
pub struct ServerStreamSender<Req> {
    sender: StreamSender<Req>,
}

impl<Req: Send + 'static> ServerStreamSender<Req> {
    pub(crate) fn new(handles: StreamHandles<Req>) -> Self {
        Self {
            sender: StreamSender::new(handles),
        }
    }

    /// Send the single request message and half-close.
    pub fn send(&self, message: Req) {
        self.sender.send(message);
        self.sender.close();
    }

    /// Cancel the stream.
    pub fn cancel(&self) {
        self.sender.cancel();
    }
}

/// Wrap a sink with client-only stream validation: results are buffered
/// until the terminal `Complete`, then checked for the exactly-one-message
/// rule before being released downstream.
pub(crate) fn client_stream_sink<Res: Send + 'static>(downstream: ResultSink<Res>) -> ResultSink<Res> {
    let buffered: Mutex<Vec<StreamResult<Res>>> = Mutex::new(Vec::new());
    Box::new(move |result| {
        let released = {
            let mut buffered = buffered.lock().unwrap();
            let terminal = result.is_complete();
            buffered.push(result);
            if terminal {
                validate_client_stream_results(std::mem::take(&mut *buffered))
            } else {
                return;
            }
        };
        for result in released {
            downstream(result);
        }
    })
}

/// Client-only streams expect exactly one message on success; anything else
/// is a broken server.
fn validate_client_stream_results<Res>(
    results: Vec<StreamResult<Res>>,
) -> Vec<StreamResult<Res>> {
    let mut message_count = 0usize;
    for result in &results {
        match result {
            StreamResult::Headers(_) => {}
            StreamResult::Message(_) => message_count += 1,
            StreamResult::Complete { code, .. } => {
                if *code != Code::Ok {
                    return results;
                }
            }
        }
    }

    let fault = match message_count {
        0 => Some("unary stream has no messages"),
        1 => None,
        _ => Some("unary stream has multiple messages"),
    };
    match fault {
        None => results,
        Some(message) => vec![StreamResult::Complete {
            code: Code::Internal,
            error: Some(ClientError::new(Code::Unimplemented, message)),
            trailers: None,
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn complete_ok<T>() -> StreamResult<T> {
        StreamResult::Complete {
            code: Code::Ok,
            error: None,
            trailers: None,
        }
    }

    #[test]
    fn test_validation_passes_single_message() {
        let results =
            validate_client_stream_results(vec![StreamResult::Message(1u32), complete_ok()]);
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_validation_rejects_zero_messages() {
        let results = validate_client_stream_results::<u32>(vec![complete_ok()]);
        assert_eq!(results.len(), 1);
        match &results[0] {
            StreamResult::Complete { code, error, .. } => {
                assert_eq!(*code, Code::Internal);
                assert_eq!(error.as_ref().unwrap().code(), Code::Unimplemented);
            }
            other => panic!("expected complete, got {:?}", other),
        }
    }

    #[test]
    fn test_validation_rejects_multiple_messages() {
        let results = validate_client_stream_results(vec![
            StreamResult::Message(1u32),
            StreamResult::Message(2u32),
            complete_ok(),
        ]);
        assert_eq!(results.len(), 1);
        match &results[0] {
            StreamResult::Complete { error, .. } => {
                assert_eq!(
                    error.as_ref().unwrap().message(),
                    Some("unary stream has multiple messages")
                );
            }
            other => panic!("expected complete, got {:?}", other),
        }
    }

    #[test]
    fn test_validation_keeps_failed_streams_untouched() {
        let results = validate_client_stream_results::<u32>(vec![StreamResult::Complete {
            code: Code::Unavailable,
            error: Some(ClientError::from_code(Code::Unavailable)),
            trailers: None,
        }]);
        assert_eq!(results.len(), 1);
        match &results[0] {
            StreamResult::Complete { code, .. } => assert_eq!(*code, Code::Unavailable),
            other => panic!("expected complete, got {:?}", other),
        }
    }

    #[test]
    fn test_buffering_sink_releases_only_at_terminal() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();
        let sink = client_stream_sink::<u32>(Box::new(move |result| {
            log_clone.lock().unwrap().push(match result {
                StreamResult::Headers(_) => "headers".to_string(),
                StreamResult::Message(m) => format!("message:{}", m),
                StreamResult::Complete { code, .. } => format!("complete:{}", code.as_str()),
            });
        }));

        sink(StreamResult::Headers(HeaderMap::new()));
        sink(StreamResult::Message(9));
        assert!(log.lock().unwrap().is_empty()); // buffered

        sink(complete_ok());
        assert_eq!(
            *log.lock().unwrap(),
            vec!["headers", "message:9", "complete:ok"]
        );
    }
}
