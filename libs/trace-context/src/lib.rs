//! W3C trace-context propagation across HTTP and Kafka boundaries.
//!
//! The gateway extracts (or generates) a trace context per request and
//! injects it into Kafka record headers; the processor extracts it and
//! attaches the ids to all spans for that record. This is the only way the
//! distributed trace survives the asynchronous hop through the log.
//!
//! ```text
//! Client HTTP Request
//!   ↓ (traceparent header, optional)
//! Gateway handler (parse or generate)
//!   ↓ (traceparent Kafka record header)
//! Processor (extract, child span per record)
//! ```

use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rand::RngCore;

/// HTTP header and Kafka record header key, per the W3C convention.
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Supported trace-context version.
const VERSION: &str = "00";

/// A parsed `traceparent` value: 16-byte trace id, 8-byte parent span id,
/// one flags byte, all hex-encoded on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
    pub flags: u8,
}

impl TraceContext {
    /// Parse a `traceparent` header value. Returns `None` on anything
    /// malformed: wrong segment count, wrong lengths, non-hex characters,
    /// unknown version, or all-zero ids (reserved as invalid by the W3C
    /// convention).
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;
        if parts.next().is_some() || version != VERSION {
            return None;
        }
        if trace_id.len() != 32 || span_id.len() != 16 || flags.len() != 2 {
            return None;
        }
        if !is_lower_hex(trace_id) || !is_lower_hex(span_id) || !is_lower_hex(flags) {
            return None;
        }
        if trace_id.bytes().all(|b| b == b'0') || span_id.bytes().all(|b| b == b'0') {
            return None;
        }
        let flags = u8::from_str_radix(flags, 16).ok()?;
        Some(Self {
            trace_id: trace_id.to_string(),
            span_id: span_id.to_string(),
            flags,
        })
    }

    /// Generate a fresh sampled context (new trace id, new span id).
    pub fn generate() -> Self {
        Self {
            trace_id: random_hex(16),
            span_id: random_hex(8),
            flags: 0x01,
        }
    }

    /// A child of this context: same trace id, fresh span id. Used when
    /// crossing a process boundary so the downstream span parents correctly.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: random_hex(8),
            flags: self.flags,
        }
    }

    /// Render as a `traceparent` header value.
    pub fn to_traceparent(&self) -> String {
        format!("{VERSION}-{}-{}-{:02x}", self.trace_id, self.span_id, self.flags)
    }
}

fn is_lower_hex(s: &str) -> bool {
    s.bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    // The W3C convention reserves all-zero ids as invalid; a zero-filled
    // random draw is astronomically unlikely but cheap to rule out.
    if buf.iter().all(|b| *b == 0) {
        buf[0] = 1;
    }
    buf.iter().map(|b| format!("{b:02x}")).collect()
}

/// Add the `traceparent` record header for a produced message.
pub fn inject_headers(headers: OwnedHeaders, ctx: &TraceContext) -> OwnedHeaders {
    let value = ctx.to_traceparent();
    headers.insert(Header {
        key: TRACEPARENT_HEADER,
        value: Some(value.as_bytes()),
    })
}

/// Extract the trace context from a consumed record's headers, if present
/// and well-formed.
pub fn extract_from_message(msg: &BorrowedMessage<'_>) -> Option<TraceContext> {
    let headers = msg.headers()?;
    for header in headers.iter() {
        if header.key == TRACEPARENT_HEADER {
            let value = std::str::from_utf8(header.value?).ok()?;
            return TraceContext::parse(value);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    #[test]
    fn test_parse_valid_traceparent() {
        let ctx = TraceContext::parse(SAMPLE).unwrap();
        assert_eq!(ctx.trace_id, "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(ctx.span_id, "00f067aa0ba902b7");
        assert_eq!(ctx.flags, 0x01);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in [
            "",
            "00-abc-def-01",
            "01-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-extra",
            "00-ZZf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            "00-00000000000000000000000000000000-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-0000000000000000-01",
            "00-4BF92F3577B34DA6A3CE929D0E0E4736-00f067aa0ba902b7-01",
        ] {
            assert!(TraceContext::parse(bad).is_none(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_render_round_trip() {
        let ctx = TraceContext::parse(SAMPLE).unwrap();
        assert_eq!(ctx.to_traceparent(), SAMPLE);
    }

    #[test]
    fn test_generate_is_well_formed() {
        let ctx = TraceContext::generate();
        let rendered = ctx.to_traceparent();
        assert_eq!(TraceContext::parse(&rendered), Some(ctx));
    }

    #[test]
    fn test_child_keeps_trace_id() {
        let parent = TraceContext::generate();
        let child = parent.child();
        assert_eq!(child.trace_id, parent.trace_id);
        assert_ne!(child.span_id, parent.span_id);
        assert_eq!(child.flags, parent.flags);
    }
}
