//! Fixed tables of metrics, dimensions and filters a query may reference.
//!
//! Every SQL expression here is a constant. User input only ever selects
//! entries by name; values travel as bound parameters.

use super::QueryMode;

/// Tables joined onto `events e`, in the order they are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Join {
    Sessions,
    Devices,
    Browsers,
    BrowserVersions,
    Platforms,
    Conversions,
}

impl Join {
    pub const ALL: [Join; 6] = [
        Join::Sessions,
        Join::Devices,
        Join::Browsers,
        Join::BrowserVersions,
        Join::Platforms,
        Join::Conversions,
    ];

    pub fn clause(self) -> &'static str {
        match self {
            Join::Sessions => "LEFT JOIN sessions s ON s.id = e.session_id",
            Join::Devices => "LEFT JOIN devices d ON d.id = e.device_id",
            Join::Browsers => "LEFT JOIN browsers b ON b.id = e.browser_id",
            Join::BrowserVersions => {
                "LEFT JOIN browser_versions bv ON bv.id = e.browser_version_id"
            }
            Join::Platforms => "LEFT JOIN platforms p ON p.id = e.platform_id",
            // Pre-aggregated so an event with several completions is still one row.
            Join::Conversions => {
                "LEFT JOIN (SELECT statistic_id, COUNT(*) AS completed \
                 FROM goal_completions GROUP BY statistic_id) gc ON gc.statistic_id = e.id"
            }
        }
    }
}

#[derive(Debug)]
pub struct MetricDef {
    pub name: &'static str,
    pub expr: &'static str,
    /// Used instead of `expr` when bounced page views are filtered out.
    pub without_bounces: &'static str,
    pub join: Option<Join>,
    pub public: bool,
}

#[derive(Debug)]
pub struct DimensionDef {
    pub name: &'static str,
    pub expr: &'static str,
    pub join: Option<Join>,
    pub public: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    /// `column = ?`
    Equals(&'static str),
    /// `column LIKE ?` with the value wrapped in `%`.
    Contains(&'static str),
    /// `column = ?` with an integer value.
    IntEquals(&'static str),
    /// Substring match, except `Direct` which means "no referrer".
    Referrer,
    /// Events that completed the given goal id.
    GoalCompleted,
    /// `exclude` switches every metric to its no-bounce variant.
    Bounces,
}

#[derive(Debug)]
pub struct FilterDef {
    pub name: &'static str,
    pub kind: FilterKind,
    pub join: Option<Join>,
    pub public: bool,
}

pub const METRICS: &[MetricDef] = &[
    MetricDef {
        name: "pageviews",
        expr: "COUNT(*)",
        without_bounces: "COUNT(CASE WHEN e.bounce = 0 THEN 1 END)",
        join: None,
        public: true,
    },
    MetricDef {
        name: "visitors",
        expr: "COUNT(DISTINCT e.uid)",
        without_bounces: "COUNT(DISTINCT CASE WHEN e.bounce = 0 THEN e.uid END)",
        join: None,
        public: true,
    },
    MetricDef {
        name: "sessions",
        expr: "COUNT(DISTINCT e.session_id)",
        without_bounces: "COUNT(DISTINCT CASE WHEN e.bounce = 0 THEN e.session_id END)",
        join: None,
        public: true,
    },
    MetricDef {
        name: "first_time_visitors",
        expr: "COUNT(DISTINCT CASE WHEN e.first_time_visit = 1 THEN e.uid END)",
        without_bounces: "COUNT(DISTINCT CASE WHEN e.first_time_visit = 1 AND e.bounce = 0 \
                          THEN e.uid END)",
        join: None,
        public: false,
    },
    MetricDef {
        name: "bounces",
        expr: "COUNT(DISTINCT CASE WHEN e.bounce = 1 THEN e.session_id END)",
        without_bounces: "0",
        join: None,
        public: false,
    },
    MetricDef {
        name: "bounce_rate",
        expr: "COALESCE(SUM(e.bounce) / NULLIF(COUNT(DISTINCT e.session_id), 0) * 100, 0)",
        without_bounces: "0",
        join: None,
        public: true,
    },
    MetricDef {
        name: "time_on_page",
        expr: "COALESCE(SUM(e.time_on_page), 0)",
        without_bounces: "COALESCE(SUM(CASE WHEN e.bounce = 0 THEN e.time_on_page END), 0)",
        join: None,
        public: false,
    },
    MetricDef {
        name: "avg_time_on_page",
        expr: "COALESCE(AVG(e.time_on_page), 0)",
        without_bounces: "COALESCE(AVG(CASE WHEN e.bounce = 0 THEN e.time_on_page END), 0)",
        join: None,
        public: false,
    },
    MetricDef {
        name: "avg_session_duration",
        expr: "COALESCE(SUM(e.time_on_page) / NULLIF(COUNT(DISTINCT e.session_id), 0), 0)",
        without_bounces: "COALESCE(SUM(CASE WHEN e.bounce = 0 THEN e.time_on_page END) \
                          / NULLIF(COUNT(DISTINCT CASE WHEN e.bounce = 0 \
                          THEN e.session_id END), 0), 0)",
        join: None,
        public: false,
    },
    MetricDef {
        name: "conversions",
        expr: "COALESCE(SUM(gc.completed), 0)",
        without_bounces: "COALESCE(SUM(CASE WHEN e.bounce = 0 THEN gc.completed END), 0)",
        join: Some(Join::Conversions),
        public: false,
    },
];

pub const DIMENSIONS: &[DimensionDef] = &[
    DimensionDef {
        name: "page_url",
        expr: "e.page_url",
        join: None,
        public: true,
    },
    DimensionDef {
        name: "parameters",
        expr: "e.parameters",
        join: None,
        public: false,
    },
    DimensionDef {
        name: "page_id",
        expr: "e.page_id",
        join: None,
        public: false,
    },
    DimensionDef {
        name: "page_type",
        expr: "e.page_type",
        join: None,
        public: false,
    },
    DimensionDef {
        name: "referrer",
        expr: "COALESCE(NULLIF(e.referrer, ''), 'Direct')",
        join: None,
        public: true,
    },
    DimensionDef {
        name: "host",
        expr: "s.host",
        join: Some(Join::Sessions),
        public: false,
    },
    DimensionDef {
        name: "device",
        expr: "d.name",
        join: Some(Join::Devices),
        public: true,
    },
    DimensionDef {
        name: "browser",
        expr: "b.name",
        join: Some(Join::Browsers),
        public: false,
    },
    DimensionDef {
        name: "browser_version",
        expr: "bv.name",
        join: Some(Join::BrowserVersions),
        public: false,
    },
    DimensionDef {
        name: "platform",
        expr: "p.name",
        join: Some(Join::Platforms),
        public: false,
    },
    DimensionDef {
        name: "date",
        expr: "CAST(e.time AS DATE)",
        join: None,
        public: false,
    },
];

pub const FILTERS: &[FilterDef] = &[
    FilterDef {
        name: "page_url",
        kind: FilterKind::Equals("e.page_url"),
        join: None,
        public: true,
    },
    FilterDef {
        name: "parameters",
        kind: FilterKind::Contains("e.parameters"),
        join: None,
        public: false,
    },
    FilterDef {
        name: "page_id",
        kind: FilterKind::IntEquals("e.page_id"),
        join: None,
        public: false,
    },
    FilterDef {
        name: "page_type",
        kind: FilterKind::Equals("e.page_type"),
        join: None,
        public: false,
    },
    FilterDef {
        name: "referrer",
        kind: FilterKind::Referrer,
        join: None,
        public: true,
    },
    FilterDef {
        name: "host",
        kind: FilterKind::Equals("s.host"),
        join: Some(Join::Sessions),
        public: false,
    },
    FilterDef {
        name: "device",
        kind: FilterKind::Equals("d.name"),
        join: Some(Join::Devices),
        public: true,
    },
    FilterDef {
        name: "browser",
        kind: FilterKind::Equals("b.name"),
        join: Some(Join::Browsers),
        public: false,
    },
    FilterDef {
        name: "browser_version",
        kind: FilterKind::Equals("bv.name"),
        join: Some(Join::BrowserVersions),
        public: false,
    },
    FilterDef {
        name: "platform",
        kind: FilterKind::Equals("p.name"),
        join: Some(Join::Platforms),
        public: false,
    },
    FilterDef {
        name: "device_id",
        kind: FilterKind::IntEquals("e.device_id"),
        join: None,
        public: false,
    },
    FilterDef {
        name: "browser_id",
        kind: FilterKind::IntEquals("e.browser_id"),
        join: None,
        public: false,
    },
    FilterDef {
        name: "browser_version_id",
        kind: FilterKind::IntEquals("e.browser_version_id"),
        join: None,
        public: false,
    },
    FilterDef {
        name: "platform_id",
        kind: FilterKind::IntEquals("e.platform_id"),
        join: None,
        public: false,
    },
    FilterDef {
        name: "goal_id",
        kind: FilterKind::GoalCompleted,
        join: None,
        public: false,
    },
    FilterDef {
        name: "first_time_visit",
        kind: FilterKind::IntEquals("e.first_time_visit"),
        join: None,
        public: false,
    },
    FilterDef {
        name: "bounces",
        kind: FilterKind::Bounces,
        join: None,
        public: true,
    },
];

fn allowed(public: bool, mode: QueryMode) -> bool {
    public || mode == QueryMode::Flexible
}

pub fn metric(name: &str, mode: QueryMode) -> Option<&'static MetricDef> {
    METRICS
        .iter()
        .find(|m| m.name == name && allowed(m.public, mode))
}

pub fn dimension(name: &str, mode: QueryMode) -> Option<&'static DimensionDef> {
    DIMENSIONS
        .iter()
        .find(|d| d.name == name && allowed(d.public, mode))
}

pub fn filter(name: &str, mode: QueryMode) -> Option<&'static FilterDef> {
    FILTERS
        .iter()
        .find(|f| f.name == name && allowed(f.public, mode))
}
