//! The stream engine.
//!
//! [`engine`] owns the per-stream machinery: the reassembly buffer that
//! turns transport chunks back into envelope frames, the Pending/Open/Closed
//! send gate with its pending-send queue, and terminal-result bookkeeping.
//! [`results`] is the single event producer behind both delivery styles, and
//! [`shapes`] exposes the three stream shapes built on top.

pub(crate) mod engine;
pub(crate) mod results;
pub(crate) mod shapes;

pub use results::ResultStream;
pub use shapes::{
    BidirectionalStream, ClientStream, ServerStream, ServerStreamSender, StreamSender,
};
