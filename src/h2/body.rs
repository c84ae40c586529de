//! outbound response bodies, pulled by the session as stream windows open.

use std::task::{Context, Poll};

use bytes::Bytes;
use tracing::debug;

const CHUNK_SIZE: usize = 16_384;

/// Owns the bytes of one in-flight response. Capacity is reserved chunk by
/// chunk and the final send carries END_STREAM; the cursor is dropped
/// exactly once, when everything is sent or the stream dies.
pub(super) struct BodyCursor {
    stream: ::h2::SendStream<Bytes>,
    data: Bytes,
}

impl BodyCursor {
    pub(super) fn new(stream: ::h2::SendStream<Bytes>, data: Bytes) -> Self {
        Self { stream, data }
    }

    /// Sends as much as current capacity allows. Returns whether any bytes
    /// moved and whether this cursor is finished.
    pub(super) fn pump(&mut self, cx: &mut Context<'_>) -> (bool, bool) {
        let mut progress = false;
        while !self.data.is_empty() {
            self.stream
                .reserve_capacity(self.data.len().min(CHUNK_SIZE));
            match self.stream.poll_capacity(cx) {
                // a zero grant can surface while windows rebalance; poll on.
                Poll::Ready(Some(Ok(0))) => continue,
                Poll::Ready(Some(Ok(capacity))) => {
                    let chunk = self.data.split_to(capacity.min(self.data.len()));
                    let end_of_stream = self.data.is_empty();
                    if let Err(e) = self.stream.send_data(chunk, end_of_stream) {
                        debug!("send_data failed: {e}");
                        return (progress, true);
                    }
                    progress = true;
                }
                Poll::Ready(Some(Err(e))) => {
                    debug!("stream reset while sending: {e}");
                    return (progress, true);
                }
                Poll::Ready(None) => return (progress, true),
                Poll::Pending => break,
            }
        }
        (progress, self.data.is_empty())
    }
}
