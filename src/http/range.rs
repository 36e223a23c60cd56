use axum::http::{header, HeaderMap, StatusCode};
use std::ops::Range;

/// A single `Range: bytes=...` spec, already validated against a known
/// content length. Only the first range in a (possibly multi-range) header
/// is honored — byte-range sets are not implemented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRequest {
    pub start: u64,
    pub end: Option<u64>,
}

/// The three shapes a single `bytes=` spec can take before it's checked
/// against the real content length.
enum RawBounds {
    /// `start-end`
    Closed(u64, u64),
    /// `start-`
    OpenEnded(u64),
    /// `-suffix_len`
    Suffix(u64),
}

impl RangeRequest {
    pub fn parse_range_header(
        headers: &HeaderMap,
        content_length: u64,
    ) -> Result<Option<RangeRequest>, StatusCode> {
        let Some(header_value) = headers.get(header::RANGE) else {
            return Ok(None);
        };

        let spec = header_value
            .to_str()
            .ok()
            .and_then(|s| s.strip_prefix("bytes="))
            .ok_or(StatusCode::BAD_REQUEST)?;

        // Multiple comma-separated ranges are accepted syntactically but only
        // the leading one is served.
        let first = spec.split(',').next().unwrap_or("").trim();
        let bounds = Self::parse_bounds(first)?;
        let (start, end) = Self::resolve(bounds, content_length);

        if start >= content_length || end.is_some_and(|e| e >= content_length || e < start) {
            return Err(StatusCode::RANGE_NOT_SATISFIABLE);
        }

        Ok(Some(RangeRequest { start, end }))
    }

    fn parse_bounds(spec: &str) -> Result<RawBounds, StatusCode> {
        let (lhs, rhs) = spec.split_once('-').ok_or(StatusCode::BAD_REQUEST)?;
        let (lhs, rhs) = (lhs.trim(), rhs.trim());

        if lhs.is_empty() {
            return rhs
                .parse()
                .map(RawBounds::Suffix)
                .map_err(|_| StatusCode::BAD_REQUEST);
        }

        let start: u64 = lhs.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
        if rhs.is_empty() {
            return Ok(RawBounds::OpenEnded(start));
        }
        let end: u64 = rhs.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
        Ok(RawBounds::Closed(start, end))
    }

    fn resolve(bounds: RawBounds, content_length: u64) -> (u64, Option<u64>) {
        match bounds {
            RawBounds::Closed(start, end) => (start, Some(end)),
            RawBounds::OpenEnded(start) => (start, None),
            RawBounds::Suffix(len) => (content_length.saturating_sub(len), None),
        }
    }

    /// Last byte index (inclusive), clamped to `total_length`.
    fn last_byte(&self, total_length: u64) -> u64 {
        self.end.unwrap_or(total_length - 1).min(total_length - 1)
    }

    pub fn to_range(&self, total_length: u64) -> Range<u64> {
        self.start..self.last_byte(total_length) + 1
    }

    pub fn content_length(&self, total_length: u64) -> u64 {
        self.last_byte(total_length) - self.start + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with_range(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn closed_range_parses_both_bounds() {
        let parsed = RangeRequest::parse_range_header(&headers_with_range("bytes=0-1023"), 4096)
            .unwrap()
            .unwrap();
        assert_eq!((parsed.start, parsed.end), (0, Some(1023)));
        assert_eq!(parsed.content_length(4096), 1024);
    }

    #[test]
    fn missing_range_header_yields_none() {
        let headers = HeaderMap::new();
        assert!(RangeRequest::parse_range_header(&headers, 4096).unwrap().is_none());
    }

    #[test]
    fn open_ended_range_reads_to_total_length() {
        let parsed = RangeRequest::parse_range_header(&headers_with_range("bytes=2048-"), 4096)
            .unwrap()
            .unwrap();
        assert_eq!(parsed.end, None);
        assert_eq!(parsed.to_range(4096), 2048..4096);
    }

    #[test]
    fn suffix_range_counts_back_from_total_length() {
        let parsed = RangeRequest::parse_range_header(&headers_with_range("bytes=-200"), 1000)
            .unwrap()
            .unwrap();
        assert_eq!(parsed.start, 800);
        assert_eq!(parsed.to_range(1000), 800..1000);
    }

    #[test]
    fn suffix_longer_than_total_length_clamps_to_zero() {
        let parsed = RangeRequest::parse_range_header(&headers_with_range("bytes=-5000"), 1000)
            .unwrap()
            .unwrap();
        assert_eq!(parsed.start, 0);
    }

    #[test]
    fn start_past_total_length_is_not_satisfiable() {
        let err = RangeRequest::parse_range_header(&headers_with_range("bytes=5000-"), 1000).unwrap_err();
        assert_eq!(err, StatusCode::RANGE_NOT_SATISFIABLE);
    }

    #[test]
    fn end_before_start_is_not_satisfiable() {
        let err = RangeRequest::parse_range_header(&headers_with_range("bytes=500-100"), 1000).unwrap_err();
        assert_eq!(err, StatusCode::RANGE_NOT_SATISFIABLE);
    }

    #[test]
    fn malformed_unit_is_rejected() {
        let err = RangeRequest::parse_range_header(&headers_with_range("chunks=0-100"), 1000).unwrap_err();
        assert_eq!(err, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn to_range_is_end_exclusive() {
        let range = RangeRequest { start: 100, end: Some(199) };
        assert_eq!(range.to_range(1000), 100..200);
    }
}
