//! Conditional-request evaluation and byte-range parsing for GET/HEAD.

use std::time::SystemTime;

use axum::http::{header, HeaderMap};
use chrono::{DateTime, Utc};

/// Outcome of evaluating the conditional headers of a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    Proceed,
    /// 304
    NotModified,
    /// 412
    Failed,
}

fn header_str<'a>(headers: &'a HeaderMap, name: header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn opaque(tag: &str) -> &str {
    tag.trim().trim_start_matches("W/")
}

/// Whether a comma-separated entity-tag list matches `etag`.
fn etag_list_matches(list: &str, etag: Option<&str>, weak: bool) -> bool {
    if list.trim() == "*" {
        return true;
    }
    let Some(etag) = etag else {
        return false;
    };
    list.split(',').any(|candidate| {
        let candidate = candidate.trim();
        if weak {
            opaque(candidate) == opaque(etag)
        } else {
            !candidate.starts_with("W/") && candidate == etag
        }
    })
}

fn parse_date(value: &str) -> Option<SystemTime> {
    httpdate::parse_http_date(value.trim()).ok()
}

/// Evaluate If-Match, If-Unmodified-Since, If-None-Match and If-Modified-Since
/// in that order against the current representation.
pub fn evaluate(
    headers: &HeaderMap,
    etag: Option<&str>,
    last_modified: Option<DateTime<Utc>>,
) -> Precondition {
    // HTTP dates have one-second resolution.
    let modified_secs = last_modified.map(|dt| dt.timestamp());

    if let Some(if_match) = header_str(headers, header::IF_MATCH) {
        if !etag_list_matches(if_match, etag, false) {
            return Precondition::Failed;
        }
    } else if let Some(since) = header_str(headers, header::IF_UNMODIFIED_SINCE).and_then(parse_date)
    {
        if let Some(modified) = modified_secs {
            if modified > DateTime::<Utc>::from(since).timestamp() {
                return Precondition::Failed;
            }
        }
    }

    if let Some(if_none_match) = header_str(headers, header::IF_NONE_MATCH) {
        if etag_list_matches(if_none_match, etag, true) {
            return Precondition::NotModified;
        }
    } else if let Some(since) = header_str(headers, header::IF_MODIFIED_SINCE).and_then(parse_date)
    {
        if let Some(modified) = modified_secs {
            if modified <= DateTime::<Utc>::from(since).timestamp() {
                return Precondition::NotModified;
            }
        }
    }

    Precondition::Proceed
}

/// Inclusive byte range within an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}

/// Parse a single `bytes=start-end` or `bytes=start-` range.
///
/// Anything else (suffix ranges, multiple ranges, `start > end`, start past
/// the end of the object) is `None` and the caller serves the whole object.
pub fn parse_range(value: &str, size: u64) -> Option<ByteRange> {
    let spec = value.trim().strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }
    let (start, end) = spec.split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end: u64 = match end.trim() {
        "" => size.checked_sub(1)?,
        e => e.parse().ok()?,
    };
    if start > end || start >= size {
        return None;
    }
    Some(ByteRange {
        start,
        end: end.min(size - 1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(header::HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    fn at(secs: i64) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(secs, 0)
    }

    #[test]
    fn test_if_none_match() {
        let h = headers(&[(header::IF_NONE_MATCH, "\"abc\"")]);
        assert_eq!(evaluate(&h, Some("\"abc\""), None), Precondition::NotModified);
        assert_eq!(evaluate(&h, Some("\"other\""), None), Precondition::Proceed);

        let weak = headers(&[(header::IF_NONE_MATCH, "W/\"abc\", \"zzz\"")]);
        assert_eq!(evaluate(&weak, Some("\"abc\""), None), Precondition::NotModified);
    }

    #[test]
    fn test_if_match() {
        let h = headers(&[(header::IF_MATCH, "\"abc\"")]);
        assert_eq!(evaluate(&h, Some("\"abc\""), None), Precondition::Proceed);
        assert_eq!(evaluate(&h, Some("\"nope\""), None), Precondition::Failed);

        let any = headers(&[(header::IF_MATCH, "*")]);
        assert_eq!(evaluate(&any, Some("\"x\""), None), Precondition::Proceed);
    }

    #[test]
    fn test_dates() {
        let date = "Thu, 01 Jan 1970 00:16:40 GMT"; // 1000s
        let ims = headers(&[(header::IF_MODIFIED_SINCE, date)]);
        assert_eq!(evaluate(&ims, None, at(1000)), Precondition::NotModified);
        assert_eq!(evaluate(&ims, None, at(1001)), Precondition::Proceed);

        let ius = headers(&[(header::IF_UNMODIFIED_SINCE, date)]);
        assert_eq!(evaluate(&ius, None, at(999)), Precondition::Proceed);
        assert_eq!(evaluate(&ius, None, at(2000)), Precondition::Failed);
    }

    #[test]
    fn test_if_modified_since_ignored_with_if_none_match() {
        let h = headers(&[
            (header::IF_NONE_MATCH, "\"other\""),
            (header::IF_MODIFIED_SINCE, "Thu, 01 Jan 1970 00:16:40 GMT"),
        ]);
        assert_eq!(evaluate(&h, Some("\"abc\""), at(10)), Precondition::Proceed);
    }

    #[test]
    fn test_parse_range() {
        assert_eq!(
            parse_range("bytes=10-19", 100),
            Some(ByteRange { start: 10, end: 19 })
        );
        assert_eq!(
            parse_range("bytes=95-200", 100),
            Some(ByteRange { start: 95, end: 99 })
        );
        assert_eq!(
            parse_range("bytes=90-", 100),
            Some(ByteRange { start: 90, end: 99 })
        );
        assert_eq!(parse_range("bytes=20-10", 100), None);
        assert_eq!(parse_range("bytes=-10", 100), None);
        assert_eq!(parse_range("bytes=0-1,5-6", 100), None);
        assert_eq!(parse_range("bytes=100-", 100), None);
        assert_eq!(parse_range("items=0-1", 100), None);
        assert_eq!(parse_range("bytes=0-0", 0), None);

        let r = parse_range("bytes=10-19", 100).unwrap();
        assert_eq!(r, ByteRange { start: 10, end: 19 });
        assert_eq!(r.content_range(100), "bytes 10-19/100");
    }
}
