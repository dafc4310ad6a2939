//! Owned bind values for the query facade. Every value goes through driver-level
//! binding; SQL text is never built from parameter values.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgArguments, Postgres};
use sqlx::query::Query;

/// A value bound to a `$n` placeholder with its native PostgreSQL type.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlParam {
    /// Bound as a text-typed NULL; cast in SQL (`$1::int`) for other column types.
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(uuid::Uuid),
    Json(Value),
    Timestamp(DateTime<Utc>),
}

impl SqlParam {
    pub fn bind_to<'q>(
        &'q self,
        query: Query<'q, Postgres, PgArguments>,
    ) -> Query<'q, Postgres, PgArguments> {
        match self {
            SqlParam::Null => query.bind(None::<String>),
            SqlParam::Bool(b) => query.bind(*b),
            SqlParam::Int(n) => query.bind(*n),
            SqlParam::Float(f) => query.bind(*f),
            SqlParam::Text(s) => query.bind(s.as_str()),
            SqlParam::Uuid(u) => query.bind(*u),
            SqlParam::Json(v) => query.bind(sqlx::types::Json(v)),
            SqlParam::Timestamp(t) => query.bind(*t),
        }
    }

    /// Map a JSON request value onto a bind value. Objects and arrays stay JSON.
    pub fn from_json(v: &Value) -> Self {
        match v {
            Value::Null => SqlParam::Null,
            Value::Bool(b) => SqlParam::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlParam::Int(i),
                None => n.as_f64().map(SqlParam::Float).unwrap_or(SqlParam::Json(v.clone())),
            },
            Value::String(s) => SqlParam::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => SqlParam::Json(v.clone()),
        }
    }
}

/// `sqlx::query(sql)` with every parameter bound in order.
pub fn bind_all<'q>(sql: &'q str, params: &'q [SqlParam]) -> Query<'q, Postgres, PgArguments> {
    params
        .iter()
        .fold(sqlx::query(sql), |query, param| param.bind_to(query))
}

impl From<bool> for SqlParam {
    fn from(v: bool) -> Self {
        SqlParam::Bool(v)
    }
}

impl From<i32> for SqlParam {
    fn from(v: i32) -> Self {
        SqlParam::Int(v.into())
    }
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        SqlParam::Int(v)
    }
}

impl From<f64> for SqlParam {
    fn from(v: f64) -> Self {
        SqlParam::Float(v)
    }
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        SqlParam::Text(v.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        SqlParam::Text(v)
    }
}

impl From<uuid::Uuid> for SqlParam {
    fn from(v: uuid::Uuid) -> Self {
        SqlParam::Uuid(v)
    }
}

impl From<DateTime<Utc>> for SqlParam {
    fn from(v: DateTime<Utc>) -> Self {
        SqlParam::Timestamp(v)
    }
}

impl<T: Into<SqlParam>> From<Option<T>> for SqlParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlParam::Null)
    }
}

/// Build a `Vec<SqlParam>` from heterogeneous values: `params![slug, 42, true]`.
#[macro_export]
macro_rules! params {
    () => { ::std::vec::Vec::<$crate::sql::SqlParam>::new() };
    ($($value:expr),+ $(,)?) => {
        vec![$($crate::sql::SqlParam::from($value)),+]
    };
}
