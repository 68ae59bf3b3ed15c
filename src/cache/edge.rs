//! Edge (CDN and browser) cache headers.
//!
//! Pure helpers: the axum middleware that applies them lives in
//! `cache::middleware`.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

/// Directives of a `Cache-Control` response header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheControl {
    pub visibility: Option<Visibility>,
    pub max_age: Option<u64>,
    pub s_maxage: Option<u64>,
    pub stale_while_revalidate: Option<u64>,
    pub stale_if_error: Option<u64>,
    pub must_revalidate: bool,
    pub no_cache: bool,
    pub no_store: bool,
}

impl CacheControl {
    pub fn public() -> Self {
        Self {
            visibility: Some(Visibility::Public),
            ..Self::default()
        }
    }

    /// `private, no-store`, used for admin and error responses.
    pub fn private_no_store() -> Self {
        Self {
            visibility: Some(Visibility::Private),
            no_store: true,
            ..Self::default()
        }
    }

    pub fn s_maxage(mut self, secs: u64) -> Self {
        self.s_maxage = Some(secs);
        self
    }

    pub fn stale_while_revalidate(mut self, secs: u64) -> Self {
        self.stale_while_revalidate = Some(secs);
        self
    }

    pub fn stale_if_error(mut self, secs: u64) -> Self {
        self.stale_if_error = Some(secs);
        self
    }
}

/// Render directives in a fixed order: visibility, no-store, no-cache,
/// max-age, s-maxage, stale-while-revalidate, stale-if-error, must-revalidate.
pub fn build_cache_control(control: &CacheControl) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(8);

    match control.visibility {
        Some(Visibility::Public) => parts.push("public".into()),
        Some(Visibility::Private) => parts.push("private".into()),
        None => {}
    }
    if control.no_store {
        parts.push("no-store".into());
    }
    if control.no_cache {
        parts.push("no-cache".into());
    }

    let timed = [
        ("max-age", control.max_age),
        ("s-maxage", control.s_maxage),
        ("stale-while-revalidate", control.stale_while_revalidate),
        ("stale-if-error", control.stale_if_error),
    ];
    parts.extend(
        timed
            .into_iter()
            .filter_map(|(name, secs)| secs.map(|secs| format!("{name}={secs}"))),
    );

    if control.must_revalidate {
        parts.push("must-revalidate".into());
    }

    parts.join(", ")
}

/// Strong validator for `body`: the quoted hex SHA-256 digest.
pub fn compute_etag(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    format!("\"{}\"", hex::encode(digest.as_slice()))
}

/// Decide whether a conditional GET can be answered with 304.
///
/// `If-None-Match` wins whenever it is present; `If-Modified-Since` is only
/// consulted without it. Unparseable dates never short-circuit.
pub fn handle_conditional(
    if_none_match: Option<&str>,
    if_modified_since: Option<&str>,
    current_etag: Option<&str>,
    last_modified: Option<OffsetDateTime>,
) -> Option<StatusCode> {
    if let Some(candidates) = if_none_match {
        let current = current_etag?;
        return etag_list_matches(candidates, current).then_some(StatusCode::NOT_MODIFIED);
    }

    let since = parse_http_date(if_modified_since?)?;
    let modified = last_modified?;
    // HTTP dates carry whole seconds only.
    (modified.unix_timestamp() <= since.unix_timestamp()).then_some(StatusCode::NOT_MODIFIED)
}

fn etag_list_matches(candidates: &str, current: &str) -> bool {
    let current = opaque_tag(current);
    candidates.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || (!candidate.is_empty() && opaque_tag(candidate) == current)
    })
}

// Weak comparison: `W/"x"` and `"x"` are equivalent.
fn opaque_tag(tag: &str) -> &str {
    tag.strip_prefix("W/").unwrap_or(tag)
}

const HTTP_DATE: &[BorrowedFormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn format_http_date(at: OffsetDateTime) -> Option<String> {
    at.to_offset(UtcOffset::UTC).format(HTTP_DATE).ok()
}

pub fn parse_http_date(raw: &str) -> Option<OffsetDateTime> {
    PrimitiveDateTime::parse(raw.trim(), HTTP_DATE)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn dynamic_directives_render_in_canonical_order() {
        let control = CacheControl::public().s_maxage(60).stale_while_revalidate(300);
        assert_eq!(
            build_cache_control(&control),
            "public, s-maxage=60, stale-while-revalidate=300"
        );
    }

    #[test]
    fn full_directive_set_keeps_order() {
        let control = CacheControl {
            visibility: Some(Visibility::Private),
            max_age: Some(0),
            s_maxage: None,
            stale_while_revalidate: None,
            stale_if_error: Some(10),
            must_revalidate: true,
            no_cache: true,
            no_store: true,
        };
        assert_eq!(
            build_cache_control(&control),
            "private, no-store, no-cache, max-age=0, stale-if-error=10, must-revalidate"
        );
    }

    #[test]
    fn empty_control_renders_empty_string() {
        assert_eq!(build_cache_control(&CacheControl::default()), "");
    }

    #[test]
    fn etag_is_deterministic_and_quoted() {
        let first = compute_etag(b"{\"a\":1}");
        let second = compute_etag(b"{\"a\":1}");
        assert_eq!(first, second);
        assert!(first.starts_with('"') && first.ends_with('"'));
        assert_eq!(first.len(), 64 + 2);
        assert_ne!(first, compute_etag(b"{\"a\":2}"));
    }

    #[test]
    fn matching_if_none_match_yields_not_modified() {
        let etag = compute_etag(b"body");
        assert_eq!(
            handle_conditional(Some(etag.as_str()), None, Some(etag.as_str()), None),
            Some(StatusCode::NOT_MODIFIED)
        );
        assert_eq!(
            handle_conditional(Some("\"other\""), None, Some(etag.as_str()), None),
            None
        );
    }

    #[test]
    fn if_none_match_accepts_lists_wildcards_and_weak_tags() {
        let etag = "\"abc\"";
        assert!(handle_conditional(Some("\"x\", W/\"abc\""), None, Some(etag), None).is_some());
        assert!(handle_conditional(Some("*"), None, Some(etag), None).is_some());
    }

    #[test]
    fn if_none_match_takes_precedence_over_if_modified_since() {
        let modified = datetime!(1994-11-06 08:49:37 UTC);
        let result = handle_conditional(
            Some("\"stale\""),
            Some("Sun, 06 Nov 1994 08:49:37 GMT"),
            Some("\"fresh\""),
            Some(modified),
        );
        assert_eq!(result, None);
    }

    #[test]
    fn if_modified_since_compares_whole_seconds() {
        let modified = datetime!(1994-11-06 08:49:37.500 UTC);
        assert!(
            handle_conditional(None, Some("Sun, 06 Nov 1994 08:49:37 GMT"), None, Some(modified))
                .is_some()
        );
        assert!(
            handle_conditional(None, Some("Sun, 06 Nov 1994 08:49:36 GMT"), None, Some(modified))
                .is_none()
        );
    }

    #[test]
    fn unparseable_date_is_ignored() {
        let modified = datetime!(1994-11-06 08:49:37 UTC);
        assert_eq!(
            handle_conditional(None, Some("yesterday"), None, Some(modified)),
            None
        );
    }

    #[test]
    fn http_dates_round_trip() {
        let at = datetime!(1994-11-06 08:49:37 UTC);
        let formatted = format_http_date(at).expect("format date");
        assert_eq!(formatted, "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(parse_http_date(&formatted), Some(at));
    }
}
