use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "$eq")] Eq,
    #[serde(rename = "$ne")] Ne,
    #[serde(rename = "$gt")] Gt,
    #[serde(rename = "$gte")] Gte,
    #[serde(rename = "$lt")] Lt,
    #[serde(rename = "$lte")] Lte,

    #[serde(rename = "$like")] Like,
    #[serde(rename = "$nlike")] NLike,
    #[serde(rename = "$ilike")] ILike,

    #[serde(rename = "$in")] In,
    #[serde(rename = "$nin")] NIn,

    #[serde(rename = "$between")] Between,
    #[serde(rename = "$null")] Null,
}

/// Query shape accepted by every read path: `{ select, where, order, limit, offset }`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterData {
    pub select: Option<Vec<String>>,
    #[serde(rename = "where")]
    pub where_clause: Option<Value>,
    pub order: Option<Value>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

impl FilterData {
    pub fn with_where(where_clause: Value) -> Self {
        Self {
            where_clause: Some(where_clause),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct FilterWhereInfo {
    pub column: String,
    pub operator: FilterOp,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FilterOrderInfo {
    pub column: String,
    pub sort: SortDirection,
}

/// A positional parameter together with the column it is compared against,
/// so the binder can encode it with that column's storage type.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlParam {
    pub column: String,
    pub value: Value,
}

#[derive(Debug, Clone)]
pub struct SqlResult {
    pub query: String,
    pub params: Vec<SqlParam>,
}
