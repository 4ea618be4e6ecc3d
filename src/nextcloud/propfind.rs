//! PROPFIND request body and multistatus response parsing.

use chrono::{DateTime, Utc};
use regex::Regex;

/// Properties requested for every listing.
pub const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:displayname/>
    <d:getcontentlength/>
    <d:getlastmodified/>
    <d:resourcetype/>
  </d:prop>
</d:propfind>"#;

/// One resource from a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavEntry {
    /// Server-relative href, still percent-encoded.
    pub href: String,
    pub name: String,
    pub size: Option<u64>,
    pub last_modified: Option<DateTime<Utc>>,
    pub is_dir: bool,
}

/// Element patterns used while walking a multistatus document.
struct Patterns {
    response: Regex,
    collection: Regex,
    href: Regex,
    displayname: Regex,
    content_length: Regex,
    last_modified: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            response: element("response")?,
            collection: Regex::new(r"<(?:[\w-]+:)?collection\s*/?>")?,
            href: element("href")?,
            displayname: element("displayname")?,
            content_length: element("getcontentlength")?,
            last_modified: element("getlastmodified")?,
        })
    }
}

/// Matches `<prefix:name ...>text</prefix:name>`, capturing the text.
fn element(name: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!(
        r"(?s)<(?:[\w-]+:)?{name}(?:\s[^>]*)?>(.*?)</(?:[\w-]+:)?{name}>",
        name = regex::escape(name)
    ))
}

/// Parse a `207 Multi-Status` body into entries, in document order.
///
/// Namespace prefixes vary between servers, so elements are matched by
/// local name.
pub fn parse_multistatus(xml: &str) -> Vec<DavEntry> {
    let patterns = match Patterns::compile() {
        Ok(p) => p,
        Err(_) => return Vec::new(),
    };

    let mut entries = Vec::new();
    for caps in patterns.response.captures_iter(xml) {
        let block = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let href = match element_text(&patterns.href, block) {
            Some(href) => href,
            None => continue,
        };

        let name = element_text(&patterns.displayname, block)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| last_segment(&href));
        let size = element_text(&patterns.content_length, block).and_then(|s| s.parse().ok());
        let last_modified = element_text(&patterns.last_modified, block)
            .and_then(|s| DateTime::parse_from_rfc2822(&s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        entries.push(DavEntry {
            href,
            name,
            size,
            last_modified,
            is_dir: patterns.collection.is_match(block),
        });
    }

    entries
}

/// Unescaped text of the first match of `re` in `block`.
fn element_text(re: &Regex, block: &str) -> Option<String> {
    let caps = re.captures(block)?;
    Some(unescape_xml(caps.get(1)?.as_str().trim()))
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Decoded final path segment of an href.
pub fn last_segment(href: &str) -> String {
    let segment = href
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("");
    percent_decode(segment)
}

/// Decode `%XX` escapes; malformed escapes are kept literally.
pub fn percent_decode(text: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(text.as_bytes())).into_owned()
}
