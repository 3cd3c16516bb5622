//! Server-sent-events plumbing shared by the adapters.
//!
//! Both wire formats deliver `data:` payloads separated by blank lines; each
//! adapter only supplies a payload parser.

use crate::util::from_reqwest;
use kb_domain::error::Result;
use kb_domain::stream::{BoxStream, StreamEvent};

/// Pull every complete `data:` payload out of `buffer`, leaving a trailing
/// partial event in place for the next chunk.
///
/// The buffer holds raw bytes: a network chunk may end inside a multi-byte
/// character, so only whole event blocks are decoded.
pub(crate) fn drain_data_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut payloads = Vec::new();

    while let Some(end) = buffer.windows(2).position(|w| w == b"\n\n") {
        let raw: Vec<u8> = buffer.drain(..end + 2).collect();
        let block = String::from_utf8_lossy(&raw);
        payloads.extend(
            block
                .lines()
                .filter_map(|line| line.trim().strip_prefix("data:"))
                .map(str::trim)
                .filter(|data| !data.is_empty())
                .map(str::to_owned),
        );
    }

    payloads
}

/// Turn an SSE response into a [`BoxStream`] of events.
///
/// `parse_data` is `FnMut` so adapters can keep assembly state (partial tool
/// calls, usage) across payloads. A `Done` is synthesised if the body closes
/// without the parser producing one. Dropping the stream drops the response,
/// which stops reading from the backend.
pub(crate) fn sse_response_stream<F>(
    response: reqwest::Response,
    mut parse_data: F,
) -> BoxStream<'static, Result<StreamEvent>>
where
    F: FnMut(&str) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer: Vec<u8> = Vec::new();
        let mut saw_done = false;

        loop {
            let closed = match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.extend_from_slice(&bytes);
                    false
                }
                Ok(None) => {
                    if !buffer.iter().all(u8::is_ascii_whitespace) {
                        buffer.extend_from_slice(b"\n\n");
                    }
                    true
                }
                Err(e) => {
                    yield Err(from_reqwest(e));
                    return;
                }
            };

            for data in drain_data_lines(&mut buffer) {
                for event in parse_data(&data) {
                    saw_done |= matches!(&event, Ok(StreamEvent::Done { .. }));
                    yield event;
                }
            }

            if closed {
                break;
            }
        }

        if !saw_done {
            yield Ok(StreamEvent::Done {
                usage: None,
                finish_reason: Some("stop".into()),
            });
        }
    };

    Box::pin(stream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
