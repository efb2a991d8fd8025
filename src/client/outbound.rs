//! Client-side outbound queue.
//!
//! Dispatch tasks enqueue finished responses; one send loop per session
//! writes them to the tunnel in enqueue order. A response is taken off the
//! queue before it is written, so a failed write is never retried.

use bytes::Bytes;
use futures_util::{Sink, SinkExt};
use http::Response;
use tokio::sync::mpsc;

use crate::protocol::{self, CodecError};

/// FIFO of responses waiting for the tunnel writer.
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    tx: mpsc::UnboundedSender<Response<Bytes>>,
}

impl OutboundQueue {
    /// Create a queue and the receiver its send loop drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Response<Bytes>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Append `response`. Returns false if the session's send loop is gone.
    pub fn enqueue(&self, response: Response<Bytes>) -> bool {
        self.tx.send(response).is_ok()
    }
}

/// Drain `rx` into `sink`, one response at a time.
///
/// Returns on the first write failure, or once every queue handle is gone.
pub async fn send_loop<Si>(
    mut rx: mpsc::UnboundedReceiver<Response<Bytes>>,
    mut sink: Si,
) -> Result<(), CodecError>
where
    Si: Sink<Response<Bytes>, Error = CodecError> + Unpin,
{
    while let Some(mut response) = rx.recv().await {
        protocol::set_keep_alive(response.headers_mut(), true);
        sink.send(response).await?;
    }
    Ok(())
}
