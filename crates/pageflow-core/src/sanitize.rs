//! Pure normalisation of a raw [`HitPayload`] into a [`SanitizedHit`].
//!
//! Nothing here touches storage and nothing here fails: malformed input
//! degrades to empty strings, zeros and empty lists.

use serde_json::Value;
use url::Url;

use crate::event::HitPayload;

/// Page types the tracking script reports for known templates. Anything else
/// is slugified.
pub const KNOWN_PAGE_TYPES: &[&str] = &[
    "front-page",
    "home",
    "blog-index",
    "post",
    "page",
    "attachment",
    "archive",
    "category",
    "tag",
    "taxonomy",
    "author",
    "date",
    "search",
    "404",
    "product",
    "product-category",
    "shop",
    "cart",
    "checkout",
    "account",
];

/// Upper bound for a single `time_on_page` increment, in milliseconds (24h).
pub const MAX_TIME_ON_PAGE_MS: i64 = 86_400_000;

const MAX_URL_LEN: usize = 2048;
const MAX_ID_LEN: usize = 64;
const MAX_PAGE_TYPE_LEN: usize = 64;
const UNKNOWN: &str = "UNKNOWN";

/// A URL split into the parts the event model stores.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlParts {
    pub host: String,
    pub path: String,
    pub query: String,
}

/// Names parsed out of a user agent. Empty strings mean "not reported".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserAgentInfo {
    pub browser: String,
    pub browser_version: String,
    pub platform: String,
    pub device: String,
    pub is_bot: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizedHit {
    pub uid: String,
    pub fingerprint: String,
    pub host: String,
    pub path: String,
    pub parameters: String,
    pub referrer: Option<String>,
    pub user_agent: UserAgentInfo,
    pub time_on_page: i64,
    pub page_id: i64,
    pub page_type: String,
    pub completed_goals: Vec<i64>,
    pub should_load_ecommerce: bool,
}

impl SanitizedHit {
    /// The path the classifier and session cache compare: the bare path, or
    /// path plus query string when URL changes are tracked.
    pub fn normalized_path(&self, track_url_changes: bool) -> String {
        normalized_path(&self.path, &self.parameters, track_url_changes)
    }
}

pub fn normalized_path(path: &str, parameters: &str, track_url_changes: bool) -> String {
    if track_url_changes && !parameters.is_empty() {
        format!("{path}?{parameters}")
    } else {
        path.to_string()
    }
}

pub fn prepare(raw: &HitPayload) -> SanitizedHit {
    let url = split_url(&coerce_string(raw.url.as_ref()).unwrap_or_default());
    let referrer = coerce_string(raw.referrer_url.as_ref())
        .and_then(|r| sanitize_referrer(&r, &url.host));

    SanitizedHit {
        uid: sanitize_token(coerce_string(raw.uid.as_ref()).as_deref()),
        fingerprint: sanitize_token(coerce_string(raw.fingerprint.as_ref()).as_deref()),
        referrer,
        user_agent: parse_user_agent(&coerce_string(raw.user_agent.as_ref()).unwrap_or_default()),
        time_on_page: sanitize_time_on_page(raw.time_on_page.as_ref()),
        page_id: coerce_i64(raw.page_id.as_ref())
            .filter(|id| *id > 0)
            .unwrap_or(0),
        page_type: sanitize_page_type(&coerce_string(raw.page_type.as_ref()).unwrap_or_default()),
        completed_goals: sanitize_goal_ids(raw.completed_goals.as_ref()),
        should_load_ecommerce: coerce_bool(raw.should_load_ecommerce.as_ref()),
        host: url.host,
        path: url.path,
        parameters: url.query,
    }
}

/// Decompose a page URL into host, path and query string.
///
/// Accepts absolute http(s) URLs and root-relative paths. Fragments are
/// dropped. Any other scheme, or unparsable input, yields empty parts.
pub fn split_url(raw: &str) -> UrlParts {
    let raw = raw.trim();
    if raw.is_empty() {
        return UrlParts::default();
    }

    let parsed = if raw.starts_with('/') && !raw.starts_with("//") {
        Url::parse("http://relative.invalid")
            .and_then(|base| base.join(raw))
            .ok()
            .map(|u| (u, false))
    } else {
        Url::parse(raw).ok().map(|u| (u, true))
    };

    let Some((url, absolute)) = parsed else {
        return UrlParts::default();
    };
    if !matches!(url.scheme(), "http" | "https") {
        return UrlParts::default();
    }

    let host = if absolute {
        url.host_str().unwrap_or("").to_ascii_lowercase()
    } else {
        String::new()
    };

    UrlParts {
        host: truncate_chars(&host, 255),
        path: truncate_chars(url.path(), MAX_URL_LEN),
        query: truncate_chars(url.query().unwrap_or(""), MAX_URL_LEN),
    }
}

/// Keep a referrer only if it is an http(s) URL pointing at another host.
pub fn sanitize_referrer(raw: &str, page_host: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?.to_ascii_lowercase();
    if !page_host.is_empty() && strip_www(&host) == strip_www(page_host) {
        return None;
    }
    Some(truncate_chars(url.as_str(), MAX_URL_LEN))
}

fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

/// Visitor ids and fingerprints are opaque tokens of `[A-Za-z0-9_-]`.
/// Anything else is discarded whole rather than partially repaired.
pub fn sanitize_token(raw: Option<&str>) -> String {
    let Some(raw) = raw.map(str::trim) else {
        return String::new();
    };
    if raw.is_empty()
        || raw.len() > MAX_ID_LEN
        || !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return String::new();
    }
    raw.to_string()
}

pub fn sanitize_page_type(raw: &str) -> String {
    let lowered = raw.trim().to_ascii_lowercase();
    if KNOWN_PAGE_TYPES.contains(&lowered.as_str()) {
        return lowered;
    }
    slugify(&lowered)
}

/// Lowercase ASCII slug: alphanumerics kept, runs of anything else become a
/// single `-`, no leading or trailing dashes.
pub fn slugify(raw: &str) -> String {
    let mut slug = String::with_capacity(raw.len());
    let mut pending_dash = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
        if slug.len() >= MAX_PAGE_TYPE_LEN {
            break;
        }
    }
    slug
}

pub fn sanitize_time_on_page(raw: Option<&Value>) -> i64 {
    coerce_i64(raw)
        .unwrap_or(0)
        .clamp(0, MAX_TIME_ON_PAGE_MS)
}

/// Positive, de-duplicated goal ids in first-seen order.
pub fn sanitize_goal_ids(raw: Option<&Value>) -> Vec<i64> {
    let items: Vec<&Value> = match raw {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(single @ (Value::Number(_) | Value::String(_))) => vec![single],
        _ => return Vec::new(),
    };

    let mut ids = Vec::with_capacity(items.len());
    for item in items {
        if let Some(id) = coerce_i64(Some(item)).filter(|id| *id > 0) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}

/// Strings as-is, numbers in their JSON spelling. Anything else is absent.
fn coerce_string(raw: Option<&Value>) -> Option<String> {
    match raw? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `true`, non-zero numbers and the strings `"true"`/`"1"`/`"yes"`.
fn coerce_bool(raw: Option<&Value>) -> bool {
    match raw {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes"
        ),
        _ => false,
    }
}

/// Integers, floats (truncated) and numeric strings.
fn coerce_i64(raw: Option<&Value>) -> Option<i64> {
    match raw? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(|f| f as i64)
            })
        }
        _ => None,
    }
}

/// Parse a user agent via `woothee`.
///
/// Crawlers are flagged so the caller can block them. Values woothee cannot
/// classify come back empty, which resolves to lookup id 0.
pub fn parse_user_agent(user_agent: &str) -> UserAgentInfo {
    let user_agent = user_agent.trim();
    if user_agent.is_empty() {
        return UserAgentInfo::default();
    }
    let Some(result) = woothee::parser::Parser::new().parse(user_agent) else {
        return UserAgentInfo::default();
    };

    let os = known(&result.os);
    let device = match result.category {
        "pc" => "desktop",
        "smartphone" | "mobilephone" if os == "iPad" => "tablet",
        "smartphone" | "mobilephone" => "mobile",
        "appliance" | "misc" => "other",
        _ => "",
    }
    .to_string();

    // Major version only keeps the lookup table small.
    let version = known(&result.version);
    let browser_version = version.split('.').next().unwrap_or("").to_string();

    UserAgentInfo {
        browser: known(&result.name),
        browser_version,
        platform: os,
        device,
        is_bot: result.category == "crawler",
    }
}

fn known(value: &str) -> String {
    if value.is_empty() || value == UNKNOWN {
        String::new()
    } else {
        value.to_string()
    }
}

fn truncate_chars(raw: &str, max: usize) -> String {
    raw.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CHROME_MAC: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                              (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

    #[test]
    fn split_url_decomposes_absolute_url() {
        let parts = split_url("https://Example.com/blog/post?utm_source=x&b=2#top");
        assert_eq!(parts.host, "example.com");
        assert_eq!(parts.path, "/blog/post");
        assert_eq!(parts.query, "utm_source=x&b=2");
    }

    #[test]
    fn split_url_accepts_root_relative_path() {
        let parts = split_url("/a?b=1");
        assert_eq!(parts.host, "");
        assert_eq!(parts.path, "/a");
        assert_eq!(parts.query, "b=1");
    }

    #[test]
    fn split_url_rejects_other_schemes_and_garbage() {
        assert_eq!(split_url("javascript:alert(1)"), UrlParts::default());
        assert_eq!(split_url("not a url"), UrlParts::default());
        assert_eq!(split_url(""), UrlParts::default());
    }

    #[test]
    fn referrer_from_same_host_is_dropped() {
        assert_eq!(
            sanitize_referrer("https://www.example.com/previous", "example.com"),
            None
        );
        assert_eq!(
            sanitize_referrer("https://news.ycombinator.com/item?id=1", "example.com")
                .as_deref(),
            Some("https://news.ycombinator.com/item?id=1")
        );
        assert_eq!(sanitize_referrer("android-app://foo", "example.com"), None);
    }

    #[test]
    fn tokens_with_invalid_characters_are_discarded() {
        assert_eq!(sanitize_token(Some(" a1b2-c3_ ")), "a1b2-c3_");
        assert_eq!(sanitize_token(Some("abc'; DROP")), "");
        assert_eq!(sanitize_token(Some(&"x".repeat(65))), "");
        assert_eq!(sanitize_token(None), "");
    }

    #[test]
    fn page_type_known_values_pass_and_others_are_slugified() {
        assert_eq!(sanitize_page_type("Post"), "post");
        assert_eq!(sanitize_page_type("  Custom Landing!! Page "), "custom-landing-page");
        assert_eq!(sanitize_page_type("***"), "");
    }

    #[test]
    fn time_on_page_is_clamped() {
        assert_eq!(sanitize_time_on_page(Some(&json!(-50))), 0);
        assert_eq!(sanitize_time_on_page(Some(&json!("1500"))), 1500);
        assert_eq!(sanitize_time_on_page(Some(&json!(12.9))), 12);
        assert_eq!(
            sanitize_time_on_page(Some(&json!(i64::MAX))),
            MAX_TIME_ON_PAGE_MS
        );
        assert_eq!(sanitize_time_on_page(Some(&json!({ "a": 1 }))), 0);
    }

    #[test]
    fn goal_ids_are_positive_and_deduplicated() {
        let ids = sanitize_goal_ids(Some(&json!([3, "3", 0, -1, "x", 7, 3.0])));
        assert_eq!(ids, vec![3, 7]);
        assert_eq!(sanitize_goal_ids(Some(&json!("12"))), vec![12]);
        assert!(sanitize_goal_ids(Some(&json!(null))).is_empty());
    }

    #[test]
    fn user_agent_is_parsed_into_names() {
        let ua = parse_user_agent(CHROME_MAC);
        assert_eq!(ua.browser, "Chrome");
        assert_eq!(ua.browser_version, "120");
        assert_eq!(ua.device, "desktop");
        assert!(!ua.platform.is_empty());
        assert!(!ua.is_bot);
    }

    #[test]
    fn crawler_user_agent_is_flagged() {
        let ua = parse_user_agent(
            "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)",
        );
        assert!(ua.is_bot);
    }

    #[test]
    fn empty_user_agent_yields_no_signal() {
        assert_eq!(parse_user_agent(""), UserAgentInfo::default());
    }

    #[test]
    fn prepare_never_fails_on_hostile_input() {
        let raw: HitPayload = serde_json::from_value(json!({
            "url": "ftp://example.com/x",
            "uid": "<script>",
            "time_on_page": "NaN",
            "completed_goals": { "a": 1 },
            "page_id": "abc",
            "page_type": "%%%"
        }))
        .expect("payload");
        let hit = prepare(&raw);
        assert_eq!(hit.path, "");
        assert_eq!(hit.uid, "");
        assert_eq!(hit.time_on_page, 0);
        assert!(hit.completed_goals.is_empty());
        assert_eq!(hit.page_id, 0);
        assert_eq!(hit.page_type, "");
    }

    #[test]
    fn prepare_coerces_mistyped_scalars() {
        let raw: HitPayload = serde_json::from_value(json!({
            "url": "https://example.com/a",
            "uid": 12345,
            "fingerprint": ["nested"],
            "page_type": 7,
            "user_agent": false,
            "should_load_ecommerce": "true"
        }))
        .expect("payload");
        let hit = prepare(&raw);
        assert_eq!(hit.uid, "12345");
        assert_eq!(hit.fingerprint, "");
        assert_eq!(hit.page_type, "7");
        assert_eq!(hit.user_agent, UserAgentInfo::default());
        assert!(hit.should_load_ecommerce);
    }

    #[test]
    fn ecommerce_flag_accepts_common_truthy_spellings() {
        for (value, expected) in [
            (json!(true), true),
            (json!(1), true),
            (json!("1"), true),
            (json!("TRUE"), true),
            (json!(0), false),
            (json!("no"), false),
            (json!(null), false),
        ] {
            assert_eq!(coerce_bool(Some(&value)), expected, "{value}");
        }
    }

    #[test]
    fn normalized_path_includes_query_only_when_tracking_url_changes() {
        let raw = HitPayload {
            url: Some(json!("https://example.com/a?x=1")),
            ..HitPayload::default()
        };
        let hit = prepare(&raw);
        assert_eq!(hit.normalized_path(false), "/a");
        assert_eq!(hit.normalized_path(true), "/a?x=1");
    }
}
