use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate};
use duckdb::types::{ToSql, Value};
use serde_json::{Map, Number, Value as Json};

use pageflow_core::query::{AssembledQuery, QueryParam};

use crate::DuckDbBackend;

impl DuckDbBackend {
    /// Run an assembled analytics query and return one JSON object per row,
    /// keyed by column name.
    pub async fn run_query(&self, query: &AssembledQuery) -> Result<Vec<Map<String, Json>>> {
        let conn = self.conn.lock().await;

        let params: Vec<Box<dyn ToSql>> = query.params().iter().map(bind).collect();
        let refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(query.sql())?;
        let mut rows = stmt.query(refs.as_slice())?;
        let columns: Vec<String> = rows
            .as_ref()
            .map(|stmt| stmt.column_names())
            .unwrap_or_default();

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Map::with_capacity(columns.len());
            for (idx, name) in columns.iter().enumerate() {
                let value: Value = row.get(idx)?;
                record.insert(name.clone(), to_json(value));
            }
            out.push(record);
        }
        Ok(out)
    }
}

fn bind(param: &QueryParam) -> Box<dyn ToSql> {
    match param {
        QueryParam::Int(n) => Box::new(*n),
        QueryParam::Float(f) => Box::new(*f),
        QueryParam::Text(s) => Box::new(s.clone()),
    }
}

fn to_json(value: Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Boolean(b) => Json::Bool(b),
        Value::TinyInt(n) => Json::from(n),
        Value::SmallInt(n) => Json::from(n),
        Value::Int(n) => Json::from(n),
        Value::BigInt(n) => Json::from(n),
        Value::UTinyInt(n) => Json::from(n),
        Value::USmallInt(n) => Json::from(n),
        Value::UInt(n) => Json::from(n),
        Value::UBigInt(n) => Json::from(n),
        // SUM over integer columns yields HUGEINT.
        Value::HugeInt(n) => match i64::try_from(n) {
            Ok(n) => Json::from(n),
            Err(_) => Json::String(n.to_string()),
        },
        Value::Float(f) => float(f64::from(f)),
        Value::Double(f) => float(f),
        Value::Decimal(d) => d
            .to_string()
            .parse::<f64>()
            .map(float)
            .unwrap_or_else(|_| Json::String(d.to_string())),
        Value::Text(s) => Json::String(s),
        Value::Date32(days) => NaiveDate::from_ymd_opt(1970, 1, 1)
            .and_then(|epoch| epoch.checked_add_signed(Duration::days(i64::from(days))))
            .map(|d| Json::String(d.format("%Y-%m-%d").to_string()))
            .unwrap_or(Json::Null),
        Value::Timestamp(unit, raw) => DateTime::from_timestamp_micros(unit.to_micros(raw))
            .map(|ts| Json::String(ts.naive_utc().format("%Y-%m-%d %H:%M:%S").to_string()))
            .unwrap_or(Json::Null),
        other => Json::String(format!("{other:?}")),
    }
}

fn float(f: f64) -> Json {
    Number::from_f64(f).map(Json::Number).unwrap_or(Json::Null)
}
