//! W3C trace context propagation
//!
//! Carries `traceparent` across HTTP requests and event headers so the
//! settlement log lines of a payment share the trace id of its intake request.
//!
//! Format: `00-<32 hex trace id>-<16 hex span id>-<2 hex flags>`

use std::fmt;

pub const TRACEPARENT_HEADER: &str = "traceparent";

const VERSION: &str = "00";
const FLAG_SAMPLED: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceContext {
    trace_id: u128,
    span_id: u64,
    flags: u8,
}

impl TraceContext {
    /// Start a new trace.
    pub fn new_root() -> Self {
        Self {
            trace_id: nonzero_u128(),
            span_id: nonzero_u64(),
            flags: FLAG_SAMPLED,
        }
    }

    /// Same trace, new span.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: nonzero_u64(),
            flags: self.flags,
        }
    }

    pub fn trace_id(&self) -> String {
        format!("{:032x}", self.trace_id)
    }

    pub fn span_id(&self) -> String {
        format!("{:016x}", self.span_id)
    }

    pub fn is_sampled(&self) -> bool {
        self.flags & FLAG_SAMPLED != 0
    }

    pub fn to_traceparent(&self) -> String {
        self.to_string()
    }

    /// Parse a `traceparent` value. Malformed input yields `None`.
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let version = parts.next()?;
        let trace = parts.next()?;
        let span = parts.next()?;
        let flags = parts.next()?;

        if version.len() != 2 || !is_lower_hex(version) || version == "ff" {
            return None;
        }
        // Version 00 has exactly four fields; later versions may append more
        if version == VERSION && parts.next().is_some() {
            return None;
        }
        if trace.len() != 32 || span.len() != 16 || flags.len() != 2 {
            return None;
        }
        if !is_lower_hex(trace) || !is_lower_hex(span) || !is_lower_hex(flags) {
            return None;
        }

        let trace_id = u128::from_str_radix(trace, 16).ok()?;
        let span_id = u64::from_str_radix(span, 16).ok()?;
        let flags = u8::from_str_radix(flags, 16).ok()?;
        if trace_id == 0 || span_id == 0 {
            return None;
        }

        Some(Self {
            trace_id,
            span_id,
            flags,
        })
    }

    /// Write `traceparent` into a header list, replacing any existing value.
    pub fn inject(&self, headers: &mut Vec<(String, String)>) {
        headers.retain(|(k, _)| !k.eq_ignore_ascii_case(TRACEPARENT_HEADER));
        headers.push((TRACEPARENT_HEADER.to_string(), self.to_traceparent()));
    }

    /// Read `traceparent` from a header list.
    pub fn extract(headers: &[(String, String)]) -> Option<Self> {
        headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(TRACEPARENT_HEADER))
            .and_then(|(_, v)| Self::parse(v))
    }
}

impl fmt::Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{:032x}-{:016x}-{:02x}",
            VERSION, self.trace_id, self.span_id, self.flags
        )
    }
}

fn is_lower_hex(s: &str) -> bool {
    s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn nonzero_u128() -> u128 {
    loop {
        let v = uuid::Uuid::new_v4().as_u128();
        if v != 0 {
            return v;
        }
    }
}

fn nonzero_u64() -> u64 {
    loop {
        let v: u64 = rand::random();
        if v != 0 {
            return v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    #[test]
    fn test_parse_valid() {
        let ctx = TraceContext::parse(SAMPLE).unwrap();
        assert_eq!(ctx.trace_id(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(ctx.span_id(), "00f067aa0ba902b7");
        assert!(ctx.is_sampled());
        assert_eq!(ctx.to_traceparent(), SAMPLE);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(TraceContext::parse("").is_none());
        assert!(TraceContext::parse("garbage").is_none());
        // all-zero trace id
        assert!(TraceContext::parse("00-00000000000000000000000000000000-00f067aa0ba902b7-01").is_none());
        // all-zero span id
        assert!(TraceContext::parse("00-4bf92f3577b34da6a3ce929d0e0e4736-0000000000000000-01").is_none());
        // uppercase hex
        assert!(TraceContext::parse("00-4BF92F3577B34DA6A3CE929D0E0E4736-00f067aa0ba902b7-01").is_none());
        // forbidden version
        assert!(TraceContext::parse("ff-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01").is_none());
        // trailing field on version 00
        assert!(TraceContext::parse(&format!("{}-extra", SAMPLE)).is_none());
    }

    #[test]
    fn test_child_keeps_trace_id() {
        let root = TraceContext::new_root();
        let child = root.child();
        assert_eq!(root.trace_id(), child.trace_id());
        assert_ne!(root.span_id(), child.span_id());
    }

    #[test]
    fn test_inject_replaces_existing() {
        let ctx = TraceContext::parse(SAMPLE).unwrap();
        let mut headers = vec![
            ("Traceparent".to_string(), "stale".to_string()),
            ("x-other".to_string(), "1".to_string()),
        ];
        ctx.inject(&mut headers);

        assert_eq!(headers.len(), 2);
        assert_eq!(TraceContext::extract(&headers), Some(ctx));
    }

    #[test]
    fn test_extract_missing() {
        assert!(TraceContext::extract(&[]).is_none());
    }
}
