//! RFC 4918 XML bodies: multistatus, lock discovery and error documents.

use std::fmt::Write as _;
use std::time::SystemTime;

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

pub const CONTENT_TYPE: &str = "application/xml; charset=utf-8";

const XML_DECL: &str = r#"<?xml version="1.0" encoding="utf-8"?>"#;

/// Escape text for use in element content and attribute values.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Percent-encode each path segment, keeping `/` separators.
pub fn encode_href(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// ETag for entries the backend has none for (prefixes, virtual directories).
pub fn generated_etag(seed: &str) -> String {
    let digest = Sha256::digest(seed.as_bytes());
    format!("\"{}\"", &hex::encode(digest)[..16])
}

pub fn http_date(dt: DateTime<Utc>) -> String {
    httpdate::fmt_http_date(SystemTime::from(dt))
}

/// Properties of one `<D:response>`.
#[derive(Debug, Clone)]
pub struct PropEntry {
    /// Already percent-encoded href
    pub href: String,
    pub display_name: String,
    pub is_collection: bool,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub etag: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
}

/// Incremental `<D:multistatus>` writer.
pub struct Multistatus {
    buf: String,
}

impl Multistatus {
    pub fn new() -> Self {
        let mut buf = String::with_capacity(4096);
        buf.push_str(XML_DECL);
        buf.push_str(r#"<D:multistatus xmlns:D="DAV:">"#);
        Self { buf }
    }

    pub fn push(&mut self, entry: &PropEntry) {
        let buf = &mut self.buf;
        buf.push_str("<D:response>");
        let _ = write!(buf, "<D:href>{}</D:href>", escape(&entry.href));
        buf.push_str("<D:propstat><D:prop>");
        let _ = write!(
            buf,
            "<D:displayname>{}</D:displayname>",
            escape(&entry.display_name)
        );
        if let Some(modified) = entry.last_modified {
            let _ = write!(
                buf,
                "<D:getlastmodified>{}</D:getlastmodified>",
                http_date(modified)
            );
        }
        if let Some(created) = entry.created.or(entry.last_modified) {
            let _ = write!(
                buf,
                "<D:creationdate>{}</D:creationdate>",
                created.to_rfc3339_opts(SecondsFormat::Secs, true)
            );
        }
        let _ = write!(buf, "<D:getetag>{}</D:getetag>", escape(&entry.etag));
        if entry.is_collection {
            buf.push_str("<D:resourcetype><D:collection/></D:resourcetype>");
        } else {
            buf.push_str("<D:resourcetype/>");
            let _ = write!(
                buf,
                "<D:getcontentlength>{}</D:getcontentlength>",
                entry.content_length.unwrap_or(0)
            );
            if let Some(content_type) = &entry.content_type {
                let _ = write!(
                    buf,
                    "<D:getcontenttype>{}</D:getcontenttype>",
                    escape(content_type)
                );
            }
        }
        buf.push_str("</D:prop><D:status>HTTP/1.1 200 OK</D:status></D:propstat>");
        buf.push_str("</D:response>");
    }

    /// A bare status response, used for the truncation marker.
    pub fn push_status(&mut self, href: &str, status_line: &str, description: &str) {
        let _ = write!(
            self.buf,
            "<D:response><D:href>{}</D:href><D:status>{}</D:status>\
             <D:responsedescription>{}</D:responsedescription></D:response>",
            escape(href),
            status_line,
            escape(description)
        );
    }

    pub fn finish(mut self) -> String {
        self.buf.push_str("</D:multistatus>");
        self.buf
    }
}

impl Default for Multistatus {
    fn default() -> Self {
        Self::new()
    }
}

/// PROPPATCH reply: every property "set", none stored.
pub fn proppatch_document(href: &str) -> String {
    format!(
        "{}<D:multistatus xmlns:D=\"DAV:\"><D:response><D:href>{}</D:href>\
         <D:propstat><D:prop/><D:status>HTTP/1.1 200 OK</D:status></D:propstat>\
         </D:response></D:multistatus>",
        XML_DECL,
        escape(href)
    )
}

/// Lock owner echoed back in a lock discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOwner {
    Href(String),
    Text(String),
}

/// The `<owner>` of a `lockinfo` body, reduced to its href or its text.
///
/// Client markup is never copied through: it may carry namespace prefixes
/// that are not declared in the response.
pub fn lock_owner(body: &str) -> Option<LockOwner> {
    let owner = element_content(body, "owner")?;
    if let Some(href) = element_content(owner, "href") {
        let href = unescape(&strip_tags(href));
        let href = href.trim();
        if !href.is_empty() {
            return Some(LockOwner::Href(href.to_string()));
        }
    }
    let text = unescape(&strip_tags(owner));
    let text = text.trim();
    (!text.is_empty()).then(|| LockOwner::Text(text.to_string()))
}

fn strip_tags(markup: &str) -> String {
    let mut out = String::with_capacity(markup.len());
    let mut in_tag = false;
    for c in markup.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Details of a granted advisory lock.
#[derive(Debug, Clone)]
pub struct ActiveLock<'a> {
    pub token: &'a str,
    pub root_href: &'a str,
    pub owner: Option<LockOwner>,
    pub timeout_secs: u64,
    pub depth_infinity: bool,
}

pub fn lock_discovery_document(lock: &ActiveLock<'_>) -> String {
    let mut buf = String::with_capacity(512);
    buf.push_str(XML_DECL);
    buf.push_str(r#"<D:prop xmlns:D="DAV:"><D:lockdiscovery><D:activelock>"#);
    buf.push_str("<D:locktype><D:write/></D:locktype>");
    buf.push_str("<D:lockscope><D:exclusive/></D:lockscope>");
    let _ = write!(
        buf,
        "<D:depth>{}</D:depth>",
        if lock.depth_infinity { "infinity" } else { "0" }
    );
    match &lock.owner {
        Some(LockOwner::Href(href)) => {
            let _ = write!(buf, "<D:owner><D:href>{}</D:href></D:owner>", escape(href));
        }
        Some(LockOwner::Text(text)) => {
            let _ = write!(buf, "<D:owner>{}</D:owner>", escape(text));
        }
        None => {}
    }
    let _ = write!(buf, "<D:timeout>Second-{}</D:timeout>", lock.timeout_secs);
    let _ = write!(
        buf,
        "<D:locktoken><D:href>{}</D:href></D:locktoken>",
        escape(lock.token)
    );
    let _ = write!(
        buf,
        "<D:lockroot><D:href>{}</D:href></D:lockroot>",
        escape(lock.root_href)
    );
    buf.push_str("</D:activelock></D:lockdiscovery></D:prop>");
    buf
}

pub fn error_document(message: &str) -> String {
    format!(
        "{}<D:error xmlns:D=\"DAV:\"><D:responsedescription>{}</D:responsedescription></D:error>",
        XML_DECL,
        escape(message)
    )
}

/// Raw inner content of the first element named `local_name`, whatever its
/// namespace prefix.
pub fn element_content<'a>(body: &'a str, local_name: &str) -> Option<&'a str> {
    let mut offset = 0;
    while let Some(pos) = body[offset..].find('<') {
        let tag_start = offset + pos + 1;
        let rest = &body[tag_start..];
        let name_len = rest
            .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
            .unwrap_or(rest.len());
        let qualified = &rest[..name_len];
        let local = qualified.rsplit(':').next().unwrap_or(qualified);

        if local == local_name && !qualified.is_empty() {
            let open_end = tag_start + rest.find('>')?;
            if body[..open_end].ends_with('/') {
                return Some("");
            }
            let content_start = open_end + 1;
            let closing = format!("</{}>", qualified);
            let content_end = content_start + body[content_start..].find(&closing)?;
            return Some(&body[content_start..content_end]);
        }
        offset = tag_start;
    }
    None
}
