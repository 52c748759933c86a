//! Analytics query construction.
//!
//! An untyped request map is sanitized field by field into a [`QueryRequest`],
//! raw SQL extension points pass through [`guard`], and [`assemble`] renders
//! one prepared statement together with its bound values.

mod assemble;
pub mod guard;
mod request;
pub mod vocabulary;

use serde::{Deserialize, Serialize};

pub use assemble::{assemble, AssembledQuery};
pub use guard::{validate_fragment, CustomFragment, FragmentRejection};
pub use request::{FilterValue, OrderBy, OrderDirection, QueryRequest, MAX_LIMIT};

/// Trust level of the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    /// Public callers: narrow allowlist, no raw SQL.
    Strict,
    /// Privileged callers: full vocabulary plus guarded raw SQL fragments.
    Flexible,
}

impl QueryMode {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryMode::Strict => "strict",
            QueryMode::Flexible => "flexible",
        }
    }
}

/// A value bound to one `?` placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for QueryParam {
    fn from(value: &str) -> Self {
        QueryParam::Text(value.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(value: String) -> Self {
        QueryParam::Text(value)
    }
}

impl From<i64> for QueryParam {
    fn from(value: i64) -> Self {
        QueryParam::Int(value)
    }
}
