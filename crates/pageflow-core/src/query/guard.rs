//! Layered validation for caller-supplied SQL fragments.
//!
//! A fragment must clear every layer before it is allowed into a statement:
//! disallowed keywords, suspicious constructs, bracket and quote balance, and
//! finally an exact match between `?` placeholders and bind parameters.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use super::QueryParam;

pub const MAX_FRAGMENT_LEN: usize = 2000;

/// Matched as whole words, case-insensitively.
pub const DISALLOWED_KEYWORDS: &[&str] = &[
    // statements
    "DROP", "DELETE", "INSERT", "UPDATE", "ALTER", "CREATE", "TRUNCATE", "MERGE", "REPLACE",
    "GRANT", "REVOKE", "EXEC", "EXECUTE", "CALL", "BEGIN", "COMMIT", "ROLLBACK",
    // storage and extensions
    "ATTACH", "DETACH", "COPY", "EXPORT", "IMPORT", "INSTALL", "LOAD", "PRAGMA", "SET",
    "RESET", "CHECKPOINT", "VACUUM",
    // clause escapes and file output
    "UNION", "INTO", "OUTFILE", "DUMPFILE",
    // timing
    "SLEEP", "BENCHMARK", "PG_SLEEP", "WAITFOR", "DELAY",
    // introspection
    "INFORMATION_SCHEMA", "SCHEMA", "DATABASE", "SHOW", "DESCRIBE", "SUMMARIZE", "HANDLER",
    "LOCK", "UNLOCK", "SYSTEM", "SHELL", r"duckdb_\w*", r"sqlite_\w*", r"pg_\w*",
];

const STRING_BUILDERS: &[&str] = &[
    "char", "chr", "concat", "concat_ws", "string_agg", "group_concat", "listagg", "printf",
    "format", "repeat", "unhex", "from_hex",
];

/// Whole families of table functions and settings readers that reach outside
/// the event tables: files, remote scans, nested queries and the environment.
const FILE_FUNCTIONS: &[&str] = &[
    r"read_\w+", r"\w+_scan", r"sniff_\w+", r"parquet_\w+", r"\w+_metadata", r"iceberg_\w+",
    r"st_read\w*", "load_file", "glob", "getenv", "current_setting", "query", "query_table",
];

static KEYWORDS: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b({})\b", DISALLOWED_KEYWORDS.join("|"))).ok()
});

static HEX_LITERAL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)\b0x[0-9a-f]+|\bx'[0-9a-f]*'").ok());

static STRING_BUILDER_CALL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b({})\s*\(", STRING_BUILDERS.join("|"))).ok()
});

static FILE_CALL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b({})\s*\(", FILE_FUNCTIONS.join("|"))).ok()
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FragmentRejection {
    #[error("fragment is empty")]
    Empty,

    #[error("fragment is too long")]
    TooLong,

    #[error("disallowed keyword {0}")]
    Keyword(String),

    #[error("suspicious construct: {0}")]
    Suspicious(&'static str),

    #[error("unbalanced parentheses or quotes")]
    Unbalanced,

    #[error("bind parameters are required")]
    MissingParameters,

    #[error("bind parameter {0} must be a string, number or boolean")]
    InvalidParameter(usize),

    #[error("{placeholders} placeholders but {params} bind parameters")]
    PlaceholderMismatch { placeholders: usize, params: usize },

    #[error("guard pattern unavailable")]
    GuardUnavailable,
}

/// A raw SQL fragment that passed every guard layer, with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomFragment {
    sql: String,
    params: Vec<QueryParam>,
}

impl CustomFragment {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[QueryParam] {
        &self.params
    }
}

/// Run `sql` and its raw parameter list through every guard layer.
///
/// `params` is the untyped parameter value from the request. It must be
/// present: an empty string, or a list holding only an empty string, stands
/// for "no parameters".
pub fn validate_fragment(
    sql: &str,
    params: Option<&Value>,
) -> Result<CustomFragment, FragmentRejection> {
    let sql = sql.trim();
    if sql.is_empty() {
        return Err(FragmentRejection::Empty);
    }
    if sql.len() > MAX_FRAGMENT_LEN {
        return Err(FragmentRejection::TooLong);
    }

    check_keywords(sql)?;
    check_constructs(sql)?;
    let placeholders = scan_balance(sql)?;
    let params = parse_parameters(params)?;
    if placeholders != params.len() {
        return Err(FragmentRejection::PlaceholderMismatch {
            placeholders,
            params: params.len(),
        });
    }

    Ok(CustomFragment {
        sql: sql.to_string(),
        params,
    })
}

fn compiled(pattern: &'static LazyLock<Option<Regex>>) -> Result<&'static Regex, FragmentRejection> {
    Option::as_ref(pattern).ok_or(FragmentRejection::GuardUnavailable)
}

fn check_keywords(sql: &str) -> Result<(), FragmentRejection> {
    match compiled(&KEYWORDS)?.captures(sql) {
        Some(caps) => Err(FragmentRejection::Keyword(
            caps.get(1)
                .map(|m| m.as_str().to_uppercase())
                .unwrap_or_default(),
        )),
        None => Ok(()),
    }
}

fn check_constructs(sql: &str) -> Result<(), FragmentRejection> {
    let found = if sql.contains(';') {
        Some("statement separator")
    } else if sql.contains("--") || sql.contains('#') {
        Some("line comment")
    } else if sql.contains("/*") || sql.contains("*/") {
        Some("block comment")
    } else if compiled(&HEX_LITERAL)?.is_match(sql) {
        Some("hex literal")
    } else if sql.contains("||") || compiled(&STRING_BUILDER_CALL)?.is_match(sql) {
        Some("string building")
    } else if compiled(&FILE_CALL)?.is_match(sql) {
        Some("external access")
    } else {
        None
    };
    match found {
        Some(construct) => Err(FragmentRejection::Suspicious(construct)),
        None => Ok(()),
    }
}

/// Check bracket and quote balance, returning the number of `?` placeholders
/// outside quoted text.
fn scan_balance(sql: &str) -> Result<usize, FragmentRejection> {
    let mut depth: i32 = 0;
    let mut quote: Option<char> = None;
    let mut placeholders = 0;

    for c in sql.chars() {
        if let Some(open) = quote {
            if c == open {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => quote = Some(c),
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return Err(FragmentRejection::Unbalanced);
                }
            }
            '?' => placeholders += 1,
            _ => {}
        }
    }

    if depth != 0 || quote.is_some() {
        return Err(FragmentRejection::Unbalanced);
    }
    Ok(placeholders)
}

fn parse_parameters(raw: Option<&Value>) -> Result<Vec<QueryParam>, FragmentRejection> {
    match raw {
        None | Some(Value::Null) => Err(FragmentRejection::MissingParameters),
        Some(Value::String(s)) if s.is_empty() => Ok(Vec::new()),
        Some(Value::Array(items)) => {
            if matches!(items.as_slice(), [Value::String(s)] if s.is_empty()) {
                return Ok(Vec::new());
            }
            items
                .iter()
                .enumerate()
                .map(|(i, v)| scalar_param(v).ok_or(FragmentRejection::InvalidParameter(i)))
                .collect()
        }
        Some(other) => scalar_param(other)
            .map(|p| vec![p])
            .ok_or(FragmentRejection::InvalidParameter(0)),
    }
}

fn scalar_param(value: &Value) -> Option<QueryParam> {
    match value {
        Value::String(s) => Some(QueryParam::Text(s.clone())),
        Value::Number(n) => n
            .as_i64()
            .map(QueryParam::Int)
            .or_else(|| n.as_f64().map(QueryParam::Float)),
        Value::Bool(b) => Some(QueryParam::Int(i64::from(*b))),
        _ => None,
    }
}
