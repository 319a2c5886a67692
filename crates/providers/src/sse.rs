//! SSE framing over raw provider byte streams.
//!
//! Every supported family frames its stream as Server-Sent Events: the
//! transport hands us bytes, we buffer them, split on blank lines, and
//! surface each `data:` payload. A trailing partial event is flushed when
//! the byte stream closes.

use futures_util::StreamExt;

use ah_domain::error::Result;
use ah_domain::BoxStream;

use crate::transport::ProviderStream;

/// Extract complete `data:` payloads from an SSE buffer.
///
/// Events are delimited by a blank line (`\n\n`, tolerating `\r\n`).
/// Each event block may carry `event:`, `data:`, `id:`, or `retry:`
/// lines; only `data:` payloads matter here — the payload itself names
/// its type for every family we normalize.
///
/// The buffer is drained in place; a trailing partial event remains for
/// the next call.
pub(crate) fn drain_data_payloads(buffer: &mut String) -> Vec<String> {
    let mut payloads = Vec::new();

    loop {
        let Some((pos, sep_len)) = find_blank_line(buffer) else {
            break;
        };
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..sep_len);

        // Multi-line data fields concatenate per the SSE spec.
        let mut data = String::new();
        for line in block.lines() {
            if let Some(rest) = line.trim_end_matches('\r').strip_prefix("data:") {
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(rest.trim());
            }
        }
        if !data.is_empty() {
            payloads.push(data);
        }
    }

    payloads
}

fn find_blank_line(buffer: &str) -> Option<(usize, usize)> {
    let lf = buffer.find("\n\n").map(|p| (p, 2));
    let crlf = buffer.find("\r\n\r\n").map(|p| (p, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 < b.0 { a } else { b }),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

/// Turn an open provider stream into a stream of `data:` payloads.
///
/// The `[DONE]` sentinel used by OpenAI-compatible endpoints is filtered
/// out — end of stream is signalled by the byte stream closing.
pub fn data_payload_stream(stream: ProviderStream) -> BoxStream<'static, Result<String>> {
    let mut bytes = stream.bytes;
    let out = async_stream::stream! {
        let mut buffer = String::new();

        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(bytes) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for payload in drain_data_payloads(&mut buffer) {
                        if payload.trim() == "[DONE]" {
                            continue;
                        }
                        yield Ok(payload);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }

        // Stream ended: flush any trailing partial event.
        if !buffer.trim().is_empty() {
            buffer.push_str("\n\n");
            for payload in drain_data_payloads(&mut buffer) {
                if payload.trim() != "[DONE]" {
                    yield Ok(payload);
                }
            }
        }
    };
    Box::pin(out)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use ah_domain::capability::ProviderFamily;

    #[test]
    fn drain_single_complete_event() {
        let mut buf = String::from("event: message\ndata: {\"hello\":\"world\"}\n\n");
        let payloads = drain_data_payloads(&mut buf);
        assert_eq!(payloads, vec!["{\"hello\":\"world\"}"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_multiple_events() {
        let mut buf = String::from("data: first\n\ndata: second\n\n");
        assert_eq!(drain_data_payloads(&mut buf), vec!["first", "second"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_partial_event_stays_in_buffer() {
        let mut buf = String::from("data: complete\n\ndata: partial");
        assert_eq!(drain_data_payloads(&mut buf), vec!["complete"]);
        assert_eq!(buf, "data: partial");
    }

    #[test]
    fn drain_handles_crlf_delimiters() {
        let mut buf = String::from("data: one\r\n\r\ndata: two\r\n\r\n");
        assert_eq!(drain_data_payloads(&mut buf), vec!["one", "two"]);
    }

    #[test]
    fn drain_ignores_non_data_lines() {
        let mut buf = String::from("event: ping\nid: 42\nretry: 5000\ndata: payload\n\n");
        assert_eq!(drain_data_payloads(&mut buf), vec!["payload"]);
    }

    #[test]
    fn drain_skips_empty_data_lines() {
        let mut buf = String::from("data: \n\n");
        assert!(drain_data_payloads(&mut buf).is_empty());
    }

    #[tokio::test]
    async fn payload_stream_reassembles_split_chunks() {
        let chunks: Vec<ah_domain::error::Result<bytes::Bytes>> = vec![
            Ok(bytes::Bytes::from("data: {\"a\"")),
            Ok(bytes::Bytes::from(":1}\n\ndata: {\"b\":2}\n\n")),
        ];
        let stream = ProviderStream {
            family: ProviderFamily::Anthropic,
            bytes: Box::pin(futures_util::stream::iter(chunks)),
        };
        let mut payloads = data_payload_stream(stream);
        assert_eq!(payloads.next().await.unwrap().unwrap(), "{\"a\":1}");
        assert_eq!(payloads.next().await.unwrap().unwrap(), "{\"b\":2}");
        assert!(payloads.next().await.is_none());
    }

    #[tokio::test]
    async fn payload_stream_flushes_trailing_partial() {
        let chunks: Vec<ah_domain::error::Result<bytes::Bytes>> =
            vec![Ok(bytes::Bytes::from("data: tail-no-delimiter"))];
        let stream = ProviderStream {
            family: ProviderFamily::OpenAi,
            bytes: Box::pin(futures_util::stream::iter(chunks)),
        };
        let mut payloads = data_payload_stream(stream);
        assert_eq!(payloads.next().await.unwrap().unwrap(), "tail-no-delimiter");
        assert!(payloads.next().await.is_none());
    }

    #[tokio::test]
    async fn payload_stream_filters_done_sentinel() {
        let chunks: Vec<ah_domain::error::Result<bytes::Bytes>> =
            vec![Ok(bytes::Bytes::from("data: {\"x\":1}\n\ndata: [DONE]\n\n"))];
        let stream = ProviderStream {
            family: ProviderFamily::DeepSeek,
            bytes: Box::pin(futures_util::stream::iter(chunks)),
        };
        let mut payloads = data_payload_stream(stream);
        assert_eq!(payloads.next().await.unwrap().unwrap(), "{\"x\":1}");
        assert!(payloads.next().await.is_none());
    }
}
