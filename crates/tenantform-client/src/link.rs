//! `Link` header pagination.

use reqwest::header::{HeaderMap, LINK};
use url::Url;

/// Query parameter carrying the opaque pagination cursor.
pub const CURSOR_PARAM: &str = "after";

/// The `rel="next"` target of the `Link` header(s), if any.
///
/// The tenant may send several `Link` headers or a single comma separated
/// one; both are handled.
#[must_use]
pub fn next_link(headers: &HeaderMap) -> Option<Url> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .find_map(parse_next)
}

fn parse_next(entry: &str) -> Option<Url> {
    let mut parts = entry.split(';');
    let target = parts.next()?.trim();
    let is_next = parts.any(|param| {
        let param = param.trim();
        param == "rel=\"next\"" || param == "rel=next"
    });
    if !is_next {
        return None;
    }
    let target = target.strip_prefix('<')?.strip_suffix('>')?;
    Url::parse(target).ok()
}

/// The cursor carried by a next link. Cursors are never interpreted.
#[must_use]
pub fn cursor_of(link: &Url) -> Option<String> {
    link.query_pairs()
        .find(|(key, _)| key == CURSOR_PARAM)
        .map(|(_, value)| value.into_owned())
}
