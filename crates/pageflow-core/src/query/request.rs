use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde_json::{Map, Value};
use tracing::warn;

use super::guard::{validate_fragment, CustomFragment};
use super::vocabulary::{self, FilterKind};
use super::QueryMode;

pub const MAX_LIMIT: i64 = 10_000;
pub const DEFAULT_METRIC: &str = "pageviews";
pub const DEFAULT_RANGE_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    Text(String),
    Int(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

impl OrderDirection {
    pub fn as_sql(self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: &'static str,
    pub direction: OrderDirection,
}

/// A sanitized analytics query.
///
/// Only constructible through [`QueryRequest::from_value`], so every field has
/// passed its sanitizer and every name refers to a vocabulary entry.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    mode: QueryMode,
    metrics: Vec<&'static str>,
    dimensions: Vec<&'static str>,
    filters: BTreeMap<&'static str, FilterValue>,
    order_by: Vec<OrderBy>,
    exclude_bounces: bool,
    custom_select: Option<CustomFragment>,
    custom_where: Option<CustomFragment>,
    date_start: DateTime<Utc>,
    date_end: DateTime<Utc>,
    limit: Option<i64>,
    distinct: bool,
}

impl QueryRequest {
    pub fn from_value(input: &Value, mode: QueryMode) -> Self {
        Self::from_value_at(input, mode, Utc::now())
    }

    /// Build a request from an untyped map, resolving default dates against
    /// `now`. Anything that is not a JSON object yields the default query.
    pub fn from_value_at(input: &Value, mode: QueryMode, now: DateTime<Utc>) -> Self {
        let empty = Map::new();
        let map = match input {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => {
                warn!("Query input is not an object; using defaults");
                &empty
            }
        };

        for key in map.keys() {
            if !FIELD_SANITIZERS.iter().any(|(name, _)| *name == key.as_str()) {
                warn!(field = %key, "Unknown query field ignored");
            }
        }

        let mut draft = Draft::new(mode);
        for (name, sanitize) in FIELD_SANITIZERS {
            if let Some(value) = map.get(*name) {
                sanitize(&mut draft, value);
            }
        }
        draft.finish(now)
    }

    pub fn mode(&self) -> QueryMode {
        self.mode
    }

    pub fn metrics(&self) -> &[&'static str] {
        &self.metrics
    }

    /// Selected and grouped dimensions. Every one of them is grouped by.
    pub fn dimensions(&self) -> &[&'static str] {
        &self.dimensions
    }

    pub fn filters(&self) -> &BTreeMap<&'static str, FilterValue> {
        &self.filters
    }

    pub fn order_by(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn exclude_bounces(&self) -> bool {
        self.exclude_bounces
    }

    pub fn custom_select(&self) -> Option<&CustomFragment> {
        self.custom_select.as_ref()
    }

    pub fn custom_where(&self) -> Option<&CustomFragment> {
        self.custom_where.as_ref()
    }

    pub fn date_start(&self) -> DateTime<Utc> {
        self.date_start
    }

    pub fn date_end(&self) -> DateTime<Utc> {
        self.date_end
    }

    pub fn limit(&self) -> Option<i64> {
        self.limit
    }

    pub fn distinct(&self) -> bool {
        self.distinct
    }

    /// Output column names in select order.
    pub fn columns(&self) -> Vec<&'static str> {
        self.dimensions
            .iter()
            .chain(self.metrics.iter())
            .copied()
            .collect()
    }
}

type FieldSanitizer = fn(&mut Draft, &Value);

/// One named sanitizer per accepted request field.
const FIELD_SANITIZERS: &[(&str, FieldSanitizer)] = &[
    ("select", sanitize_select),
    ("group_by", sanitize_group_by),
    ("filters", sanitize_filters),
    ("order_by", sanitize_order_by),
    ("custom_select", sanitize_custom_select),
    ("custom_select_parameters", sanitize_custom_select_parameters),
    ("custom_where", sanitize_custom_where),
    ("custom_where_parameters", sanitize_custom_where_parameters),
    ("date_start", sanitize_date_start),
    ("date_end", sanitize_date_end),
    ("limit", sanitize_limit),
    ("distinct", sanitize_distinct),
];

struct Draft {
    mode: QueryMode,
    metrics: Vec<&'static str>,
    dimensions: Vec<&'static str>,
    filters: BTreeMap<&'static str, FilterValue>,
    order_by: Vec<(String, OrderDirection)>,
    exclude_bounces: bool,
    custom_select: Option<String>,
    custom_select_parameters: Option<Value>,
    custom_where: Option<String>,
    custom_where_parameters: Option<Value>,
    date_start: Option<DateTime<Utc>>,
    date_end: Option<DateTime<Utc>>,
    limit: Option<i64>,
    distinct: bool,
}

impl Draft {
    fn new(mode: QueryMode) -> Self {
        Self {
            mode,
            metrics: Vec::new(),
            dimensions: Vec::new(),
            filters: BTreeMap::new(),
            order_by: Vec::new(),
            exclude_bounces: false,
            custom_select: None,
            custom_select_parameters: None,
            custom_where: None,
            custom_where_parameters: None,
            date_start: None,
            date_end: None,
            limit: None,
            distinct: false,
        }
    }

    fn push_dimension(&mut self, name: &'static str) {
        if !self.dimensions.contains(&name) {
            self.dimensions.push(name);
        }
    }

    fn finish(mut self, now: DateTime<Utc>) -> QueryRequest {
        if self.metrics.is_empty() {
            self.metrics.push(DEFAULT_METRIC);
        }

        let (custom_select, custom_where) = match self.mode {
            QueryMode::Flexible => (
                guarded("custom_select", self.custom_select, self.custom_select_parameters),
                guarded("custom_where", self.custom_where, self.custom_where_parameters),
            ),
            QueryMode::Strict => {
                if self.custom_select.is_some() || self.custom_where.is_some() {
                    warn!("Custom SQL is not available in strict mode; fragments ignored");
                }
                (None, None)
            }
        };

        let columns: Vec<&'static str> = self
            .dimensions
            .iter()
            .chain(self.metrics.iter())
            .copied()
            .collect();
        let order_by = self
            .order_by
            .into_iter()
            .filter_map(|(field, direction)| {
                match columns.iter().copied().find(|c| *c == field) {
                    Some(column) => Some(OrderBy {
                        field: column,
                        direction,
                    }),
                    None => {
                        warn!(field = %field, "order_by field is not selected; dropped");
                        None
                    }
                }
            })
            .collect();

        let mut date_end = self.date_end.unwrap_or(now);
        let mut date_start = self
            .date_start
            .unwrap_or(date_end - Duration::days(DEFAULT_RANGE_DAYS));
        if date_start > date_end {
            warn!(%date_start, %date_end, "date_start after date_end; swapped");
            std::mem::swap(&mut date_start, &mut date_end);
        }

        QueryRequest {
            mode: self.mode,
            metrics: self.metrics,
            dimensions: self.dimensions,
            filters: self.filters,
            order_by,
            exclude_bounces: self.exclude_bounces,
            custom_select,
            custom_where,
            date_start,
            date_end,
            limit: self.limit,
            distinct: self.distinct,
        }
    }
}

fn guarded(field: &'static str, sql: Option<String>, params: Option<Value>) -> Option<CustomFragment> {
    let sql = sql?;
    match validate_fragment(&sql, params.as_ref()) {
        Ok(fragment) => Some(fragment),
        Err(reason) => {
            warn!(field, %reason, "Custom SQL fragment rejected");
            None
        }
    }
}

/// Accepts a list of names or one comma separated string.
fn names(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => s
            .split(',')
            .map(|n| n.trim().to_ascii_lowercase())
            .filter(|n| !n.is_empty())
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|n| n.trim().to_ascii_lowercase())
            .filter(|n| !n.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

fn sanitize_select(draft: &mut Draft, value: &Value) {
    for name in names(value) {
        if let Some(metric) = vocabulary::metric(&name, draft.mode) {
            if !draft.metrics.contains(&metric.name) {
                draft.metrics.push(metric.name);
            }
        } else if let Some(dimension) = vocabulary::dimension(&name, draft.mode) {
            draft.push_dimension(dimension.name);
        } else {
            warn!(field = "select", value = %name, "Unknown or disallowed metric dropped");
        }
    }
}

fn sanitize_group_by(draft: &mut Draft, value: &Value) {
    for name in names(value) {
        match vocabulary::dimension(&name, draft.mode) {
            Some(dimension) => draft.push_dimension(dimension.name),
            None => warn!(field = "group_by", value = %name, "Unknown or disallowed dimension dropped"),
        }
    }
}

fn sanitize_filters(draft: &mut Draft, value: &Value) {
    let Value::Object(filters) = value else {
        warn!("filters must be an object; ignored");
        return;
    };
    for (key, raw) in filters {
        let Some(def) = vocabulary::filter(&key.to_ascii_lowercase(), draft.mode) else {
            warn!(filter = %key, "Unknown or disallowed filter dropped");
            continue;
        };
        match def.kind {
            FilterKind::Bounces => match raw.as_str().map(str::trim) {
                Some("exclude") => draft.exclude_bounces = true,
                Some("include") => draft.exclude_bounces = false,
                _ => warn!(filter = %key, "bounces filter must be include or exclude"),
            },
            FilterKind::IntEquals(_) | FilterKind::GoalCompleted => match filter_int(raw) {
                Some(id) => {
                    draft.filters.insert(def.name, FilterValue::Int(id));
                }
                None => warn!(filter = %key, "Filter expects an integer; dropped"),
            },
            FilterKind::Equals(_) | FilterKind::Contains(_) | FilterKind::Referrer => {
                match filter_text(raw) {
                    Some(text) => {
                        draft.filters.insert(def.name, FilterValue::Text(text));
                    }
                    None => warn!(filter = %key, "Filter value is empty or not a scalar; dropped"),
                }
            }
        }
    }
}

fn filter_int(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn filter_text(raw: &Value) -> Option<String> {
    let text = match raw {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn sanitize_order_by(draft: &mut Draft, value: &Value) {
    let entries: Vec<String> = match value {
        Value::String(s) => s.split(',').map(str::to_string).collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };
    for entry in entries {
        let mut parts = entry.split_whitespace();
        let Some(field) = parts.next() else {
            continue;
        };
        let direction = match parts.next().map(str::to_ascii_uppercase).as_deref() {
            None | Some("DESC") => OrderDirection::Desc,
            Some("ASC") => OrderDirection::Asc,
            Some(_) => {
                warn!(value = %entry, "order_by direction must be ASC or DESC; dropped");
                continue;
            }
        };
        if parts.next().is_some() {
            warn!(value = %entry, "order_by entry has trailing content; dropped");
            continue;
        }
        draft
            .order_by
            .push((field.to_ascii_lowercase(), direction));
    }
}

fn sanitize_custom_select(draft: &mut Draft, value: &Value) {
    draft.custom_select = value.as_str().map(str::to_string);
}

fn sanitize_custom_select_parameters(draft: &mut Draft, value: &Value) {
    draft.custom_select_parameters = Some(value.clone());
}

fn sanitize_custom_where(draft: &mut Draft, value: &Value) {
    draft.custom_where = value.as_str().map(str::to_string);
}

fn sanitize_custom_where_parameters(draft: &mut Draft, value: &Value) {
    draft.custom_where_parameters = Some(value.clone());
}

fn sanitize_date_start(draft: &mut Draft, value: &Value) {
    draft.date_start = parse_date(value, false);
}

fn sanitize_date_end(draft: &mut Draft, value: &Value) {
    draft.date_end = parse_date(value, true);
}

/// Unix seconds, `YYYY-MM-DD` or RFC 3339. A bare date used as an end bound
/// covers the whole day.
fn parse_date(value: &Value, end_of_day: bool) -> Option<DateTime<Utc>> {
    let parsed = match value {
        Value::Number(n) => n
            .as_i64()
            .filter(|secs| *secs > 0)
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(secs) = s.parse::<i64>() {
                Utc.timestamp_opt(secs, 0).single().filter(|_| secs > 0)
            } else if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                let time = if end_of_day {
                    NaiveTime::from_hms_milli_opt(23, 59, 59, 999)
                } else {
                    NaiveTime::from_hms_opt(0, 0, 0)
                };
                time.map(|t| Utc.from_utc_datetime(&date.and_time(t)))
            } else {
                DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            }
        }
        _ => None,
    };
    if parsed.is_none() {
        warn!(value = %value, "Unparsable query date ignored");
    }
    parsed
}

fn sanitize_limit(draft: &mut Draft, value: &Value) {
    let raw = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    draft.limit = match raw {
        Some(n) if n > 0 => Some(n.min(MAX_LIMIT)),
        Some(_) => None,
        None => {
            warn!(value = %value, "limit must be an integer; ignored");
            None
        }
    };
}

fn sanitize_distinct(draft: &mut Draft, value: &Value) {
    draft.distinct = match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64() == Some(1),
        Value::String(s) => matches!(s.trim(), "1" | "true"),
        _ => false,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0)
            .single()
            .expect("ts")
    }

    fn strict(input: Value) -> QueryRequest {
        QueryRequest::from_value_at(&input, QueryMode::Strict, now())
    }

    fn flexible(input: Value) -> QueryRequest {
        QueryRequest::from_value_at(&input, QueryMode::Flexible, now())
    }

    #[test]
    fn empty_request_degrades_to_default_metric() {
        let request = strict(json!({}));
        assert_eq!(request.metrics(), &["pageviews"]);
        assert!(request.dimensions().is_empty());
        assert_eq!(request.date_end(), now());
        assert_eq!(request.date_start(), now() - Duration::days(7));
        assert_eq!(request.limit(), None);
    }

    #[test]
    fn unknown_metrics_are_dropped() {
        let request = flexible(json!({ "select": ["pageviews", "revenue", "visitors"] }));
        assert_eq!(request.metrics(), &["pageviews", "visitors"]);

        let only_unknown = flexible(json!({ "select": "revenue" }));
        assert_eq!(only_unknown.metrics(), &["pageviews"]);
    }

    #[test]
    fn strict_mode_ignores_privileged_vocabulary() {
        let request = strict(json!({
            "select": ["pageviews", "conversions", "platform"],
            "filters": { "browser_id": 3, "page_url": "/a" },
            "group_by": ["browser", "device"],
            "custom_where": "e.bounce = 0",
            "custom_where_parameters": ""
        }));
        assert_eq!(request.metrics(), &["pageviews"]);
        assert_eq!(request.dimensions(), &["device"]);
        assert_eq!(request.filters().len(), 1);
        assert!(request.filters().contains_key("page_url"));
        assert!(request.custom_where().is_none());
    }

    #[test]
    fn selected_dimensions_are_grouped() {
        let request = flexible(json!({
            "select": ["page_url", "pageviews"],
            "group_by": ["referrer", "page_url"]
        }));
        assert_eq!(request.dimensions(), &["page_url", "referrer"]);
        assert_eq!(request.columns(), vec!["page_url", "referrer", "pageviews"]);
    }

    #[test]
    fn bounces_filter_sets_the_flag() {
        let request = strict(json!({ "filters": { "bounces": "exclude" } }));
        assert!(request.exclude_bounces());
        assert!(request.filters().is_empty());

        let bogus = strict(json!({ "filters": { "bounces": "maybe" } }));
        assert!(!bogus.exclude_bounces());
    }

    #[test]
    fn filter_values_are_typed() {
        let request = flexible(json!({
            "filters": { "device_id": "4", "page_url": " /a ", "referrer": "", "goal_id": "x" }
        }));
        assert_eq!(request.filters().get("device_id"), Some(&FilterValue::Int(4)));
        assert_eq!(
            request.filters().get("page_url"),
            Some(&FilterValue::Text("/a".into()))
        );
        assert!(!request.filters().contains_key("referrer"));
        assert!(!request.filters().contains_key("goal_id"));
    }

    #[test]
    fn custom_fragments_need_parameters() {
        let without = flexible(json!({ "custom_where": "e.bounce = 0" }));
        assert!(without.custom_where().is_none());

        let with = flexible(json!({
            "custom_where": "e.page_url = ?",
            "custom_where_parameters": ["/a"]
        }));
        assert_eq!(with.custom_where().map(|f| f.sql()), Some("e.page_url = ?"));
    }

    #[test]
    fn order_by_accepts_selected_columns_only() {
        let request = flexible(json!({
            "select": ["pageviews", "page_url"],
            "order_by": ["pageviews", "page_url ASC", "visitors DESC", "pageviews; DROP"]
        }));
        assert_eq!(
            request.order_by(),
            &[
                OrderBy {
                    field: "pageviews",
                    direction: OrderDirection::Desc
                },
                OrderBy {
                    field: "page_url",
                    direction: OrderDirection::Asc
                },
            ]
        );
    }

    #[test]
    fn limit_is_clamped() {
        assert_eq!(strict(json!({ "limit": 50 })).limit(), Some(50));
        assert_eq!(strict(json!({ "limit": "999999" })).limit(), Some(MAX_LIMIT));
        assert_eq!(strict(json!({ "limit": 0 })).limit(), None);
        assert_eq!(strict(json!({ "limit": -3 })).limit(), None);
    }

    #[test]
    fn dates_accept_several_shapes() {
        let request = strict(json!({ "date_start": "2026-06-01", "date_end": "2026-06-02" }));
        assert_eq!(
            request.date_start(),
            Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).single().expect("ts")
        );
        assert_eq!(
            request.date_end().date_naive(),
            NaiveDate::from_ymd_opt(2026, 6, 2).expect("date")
        );

        let unix = strict(json!({ "date_start": 1_780_000_000, "date_end": "2026-06-10T00:00:00Z" }));
        assert_eq!(unix.date_start().timestamp(), 1_780_000_000);
    }

    #[test]
    fn reversed_range_is_swapped() {
        let request = strict(json!({ "date_start": "2026-06-10", "date_end": "2026-06-01" }));
        assert!(request.date_start() < request.date_end());
    }
}
