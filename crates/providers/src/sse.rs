//! Shared SSE streaming infrastructure for the provider adapters.
//!
//! Both wire formats follow the same pattern: receive a
//! `reqwest::Response`, buffer the body, split on `\n\n`, extract
//! `data:` payloads, and feed each payload to a format-specific parser
//! that returns zero or more completion chunks.

use crate::util::from_reqwest;
use colony_domain::error::Result;
use colony_domain::stream::{BoxStream, CompletionChunk};

/// Extract complete `data:` payloads from an SSE buffer.
///
/// Events are delimited by `\n\n`; event blocks may contain `event:`,
/// `data:`, `id:`, or `retry:` lines, of which only `data:` matters.
/// The buffer is drained in place — consumed bytes are removed and any
/// trailing partial event stays for the next call.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let mut data_lines = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2); // remove the \n\n delimiter

        for line in block.lines() {
            let line = line.trim();
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    data_lines.push(data.to_string());
                }
            }
        }
    }

    data_lines
}

/// Build a chunk stream from an SSE `reqwest::Response` and a
/// format-specific parser closure.
///
/// The closure is `FnMut` because both adapters keep state across
/// payloads (usage counters, tool-call block bookkeeping). The stream:
/// 1. buffers incoming bytes and drains complete SSE events,
/// 2. flushes the remaining buffer when the body closes,
/// 3. emits a fallback finished chunk if the parser never produced one.
pub(crate) fn chunk_stream<F>(
    response: reqwest::Response,
    mut parse_data: F,
) -> BoxStream<'static, Result<CompletionChunk>>
where
    F: FnMut(&str) -> Vec<Result<CompletionChunk>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();
        let mut finished_emitted = false;

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));

                    for data in drain_data_lines(&mut buffer) {
                        for chunk in parse_data(&data) {
                            if matches!(&chunk, Ok(c) if c.finished) {
                                finished_emitted = true;
                            }
                            yield chunk;
                        }
                    }
                }
                Ok(None) => {
                    // Body ended — flush any trailing partial event.
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                        for data in drain_data_lines(&mut buffer) {
                            for chunk in parse_data(&data) {
                                if matches!(&chunk, Ok(c) if c.finished) {
                                    finished_emitted = true;
                                }
                                yield chunk;
                            }
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(from_reqwest(e));
                    break;
                }
            }
        }

        if !finished_emitted {
            yield Ok(CompletionChunk::finished(None));
        }
    };

    Box::pin(stream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
