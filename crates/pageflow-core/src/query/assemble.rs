use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use super::request::{FilterValue, QueryRequest};
use super::vocabulary::{self, FilterKind, Join};
use super::QueryParam;

/// A prepared statement and the values bound to its `?` placeholders, in
/// textual order. The two are only ever handed out together.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledQuery {
    sql: String,
    params: Vec<QueryParam>,
}

impl AssembledQuery {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[QueryParam] {
        &self.params
    }
}

/// Joins available to raw fragments. Conversions are left out: they are only
/// joined for the metric that needs them.
const FRAGMENT_JOINS: [Join; 5] = [
    Join::Sessions,
    Join::Devices,
    Join::Browsers,
    Join::BrowserVersions,
    Join::Platforms,
];

pub fn assemble(request: &QueryRequest) -> AssembledQuery {
    let mode = request.mode();
    let mut params: Vec<QueryParam> = Vec::new();
    let mut joins: BTreeSet<Join> = BTreeSet::new();

    let mut columns: Vec<String> = Vec::new();
    let mut group_by: Vec<&'static str> = Vec::new();
    for def in request
        .dimensions()
        .iter()
        .filter_map(|name| vocabulary::dimension(name, mode))
    {
        columns.push(format!("{} AS {}", def.expr, def.name));
        group_by.push(def.expr);
        joins.extend(def.join);
    }
    for def in request
        .metrics()
        .iter()
        .filter_map(|name| vocabulary::metric(name, mode))
    {
        let expr = if request.exclude_bounces() {
            def.without_bounces
        } else {
            def.expr
        };
        columns.push(format!("{expr} AS {}", def.name));
        joins.extend(def.join);
    }
    if let Some(fragment) = request.custom_select() {
        columns.push(fragment.sql().to_string());
        params.extend_from_slice(fragment.params());
    }

    let mut predicates = vec!["e.time >= ?".to_string(), "e.time <= ?".to_string()];
    params.push(QueryParam::Text(format_timestamp(request.date_start())));
    params.push(QueryParam::Text(format_timestamp(request.date_end())));

    for (name, value) in request.filters() {
        let Some(def) = vocabulary::filter(name, mode) else {
            continue;
        };
        joins.extend(def.join);
        match def.kind {
            FilterKind::Equals(column) | FilterKind::IntEquals(column) => {
                predicates.push(format!("{column} = ?"));
                params.push(bound(value));
            }
            FilterKind::Contains(column) => {
                predicates.push(format!("{column} LIKE ?"));
                params.push(contains(value));
            }
            FilterKind::Referrer => {
                if is_direct(value) {
                    predicates.push("(e.referrer IS NULL OR e.referrer = '')".to_string());
                } else {
                    predicates.push("e.referrer LIKE ?".to_string());
                    params.push(contains(value));
                }
            }
            FilterKind::GoalCompleted => {
                predicates.push(
                    "e.id IN (SELECT statistic_id FROM goal_completions WHERE goal_id = ?)"
                        .to_string(),
                );
                params.push(bound(value));
            }
            // Folded into `exclude_bounces` by the request model.
            FilterKind::Bounces => {}
        }
    }

    if let Some(fragment) = request.custom_where() {
        predicates.push(format!("({})", fragment.sql()));
        params.extend_from_slice(fragment.params());
    }
    if request.custom_select().is_some() || request.custom_where().is_some() {
        joins.extend(FRAGMENT_JOINS);
    }

    let mut sql = String::from("SELECT ");
    if request.distinct() {
        sql.push_str("DISTINCT ");
    }
    sql.push_str(&columns.join(", "));
    sql.push_str(" FROM events e");
    for join in &joins {
        sql.push(' ');
        sql.push_str(join.clause());
    }
    sql.push_str(" WHERE ");
    sql.push_str(&predicates.join(" AND "));

    if !group_by.is_empty() {
        sql.push_str(" GROUP BY ");
        sql.push_str(&group_by.join(", "));
    }
    if !request.order_by().is_empty() {
        let order: Vec<String> = request
            .order_by()
            .iter()
            .map(|o| format!("{} {}", o.field, o.direction.as_sql()))
            .collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&order.join(", "));
    }
    if let Some(limit) = request.limit() {
        sql.push_str(" LIMIT ?");
        params.push(QueryParam::Int(limit));
    }

    AssembledQuery { sql, params }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()
}

fn bound(value: &FilterValue) -> QueryParam {
    match value {
        FilterValue::Text(text) => QueryParam::Text(text.clone()),
        FilterValue::Int(n) => QueryParam::Int(*n),
    }
}

fn contains(value: &FilterValue) -> QueryParam {
    match value {
        FilterValue::Text(text) => QueryParam::Text(format!("%{text}%")),
        FilterValue::Int(n) => QueryParam::Text(format!("%{n}%")),
    }
}

fn is_direct(value: &FilterValue) -> bool {
    matches!(value, FilterValue::Text(text) if text.eq_ignore_ascii_case("direct"))
}
