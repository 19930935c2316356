use serde_json::Value;

use super::error::FilterError;
use super::types::{FilterOp, FilterWhereInfo, SqlParam};
use super::is_identifier;

/// Translates a JSON where-document into a SQL predicate with positional
/// `$N` parameters. Nested `$and`/`$or`/`$not` groups share one parameter
/// sequence, so the numbering stays contiguous however deep the document is.
pub struct FilterWhere {
    params: Vec<SqlParam>,
    starting_param_index: usize,
    max_depth: u32,
}

impl FilterWhere {
    pub fn new(starting_param_index: usize) -> Self {
        Self {
            params: vec![],
            starting_param_index,
            max_depth: crate::config::CONFIG.filter.max_nested_depth,
        }
    }

    /// Build the predicate; the first parameter is `$starting_param_index + 1`
    pub fn generate(where_data: &Value, starting_param_index: usize) -> Result<(String, Vec<SqlParam>), FilterError> {
        let mut filter_where = Self::new(starting_param_index);
        let clause = filter_where.build(where_data, 0)?;
        Ok((clause, filter_where.params))
    }

    pub fn validate(where_data: &Value) -> Result<(), FilterError> {
        match where_data {
            Value::Null | Value::Object(_) => Ok(()),
            _ => Err(FilterError::InvalidWhereClause("WHERE must be an object".to_string())),
        }
    }

    fn build(&mut self, where_data: &Value, depth: u32) -> Result<String, FilterError> {
        if depth > self.max_depth {
            return Err(FilterError::NestingTooDeep(self.max_depth));
        }

        let obj = match where_data {
            Value::Null => return Ok("1=1".to_string()),
            Value::Object(obj) => obj,
            _ => return Err(FilterError::InvalidWhereClause("Unsupported WHERE format".to_string())),
        };

        let mut sql_conditions = vec![];
        for (key, value) in obj {
            if key.starts_with('$') {
                sql_conditions.push(self.parse_logical_operator(key, value, depth)?);
            } else {
                for condition in Self::parse_field_condition(key, value)? {
                    sql_conditions.push(self.build_sql_condition(&condition)?);
                }
            }
        }

        if sql_conditions.is_empty() {
            Ok("1=1".to_string())
        } else {
            Ok(sql_conditions.join(" AND "))
        }
    }

    fn parse_logical_operator(&mut self, op: &str, value: &Value, depth: u32) -> Result<String, FilterError> {
        match op {
            "$and" | "$or" => {
                let arr = value
                    .as_array()
                    .ok_or_else(|| FilterError::InvalidOperatorData(format!("{} requires array", op)))?;
                if arr.is_empty() {
                    return Ok(if op == "$and" { "1=1" } else { "1=0" }.to_string());
                }
                let mut sql_parts = Vec::with_capacity(arr.len());
                for v in arr {
                    sql_parts.push(format!("({})", self.build(v, depth + 1)?));
                }
                let joiner = if op == "$and" { " AND " } else { " OR " };
                Ok(format!("({})", sql_parts.join(joiner)))
            }
            "$not" => Ok(format!("NOT ({})", self.build(value, depth + 1)?)),
            _ => Err(FilterError::UnsupportedOperator(op.to_string())),
        }
    }

    fn parse_field_condition(field: &str, value: &Value) -> Result<Vec<FilterWhereInfo>, FilterError> {
        if !is_identifier(field) {
            return Err(FilterError::InvalidColumn(field.to_string()));
        }

        match value {
            Value::Object(obj) if obj.keys().all(|k| k.starts_with('$')) && !obj.is_empty() => obj
                .iter()
                .map(|(op_key, op_val)| {
                    Ok(FilterWhereInfo {
                        column: field.to_string(),
                        operator: Self::map_operator(op_key)?,
                        data: op_val.clone(),
                    })
                })
                .collect(),
            // Implicit equality: { field: value }
            _ => Ok(vec![FilterWhereInfo {
                column: field.to_string(),
                operator: FilterOp::Eq,
                data: value.clone(),
            }]),
        }
    }

    fn map_operator(op_key: &str) -> Result<FilterOp, FilterError> {
        Ok(match op_key {
            "$eq" => FilterOp::Eq,
            "$ne" | "$neq" => FilterOp::Ne,
            "$gt" => FilterOp::Gt,
            "$gte" => FilterOp::Gte,
            "$lt" => FilterOp::Lt,
            "$lte" => FilterOp::Lte,
            "$like" => FilterOp::Like,
            "$nlike" => FilterOp::NLike,
            "$ilike" => FilterOp::ILike,
            "$in" => FilterOp::In,
            "$nin" => FilterOp::NIn,
            "$between" => FilterOp::Between,
            "$null" => FilterOp::Null,
            other => return Err(FilterError::UnsupportedOperator(other.to_string())),
        })
    }

    fn build_sql_condition(&mut self, condition: &FilterWhereInfo) -> Result<String, FilterError> {
        let column = condition.column.as_str();
        let quoted_column = format!("\"{}\"", column);
        let data = &condition.data;

        match condition.operator {
            FilterOp::Eq if data.is_null() => Ok(format!("{} IS NULL", quoted_column)),
            FilterOp::Ne if data.is_null() => Ok(format!("{} IS NOT NULL", quoted_column)),
            FilterOp::Eq => Ok(format!("{} = {}", quoted_column, self.param(column, data)?)),
            FilterOp::Ne => Ok(format!("{} <> {}", quoted_column, self.param(column, data)?)),
            FilterOp::Gt => Ok(format!("{} > {}", quoted_column, self.param(column, data)?)),
            FilterOp::Gte => Ok(format!("{} >= {}", quoted_column, self.param(column, data)?)),
            FilterOp::Lt => Ok(format!("{} < {}", quoted_column, self.param(column, data)?)),
            FilterOp::Lte => Ok(format!("{} <= {}", quoted_column, self.param(column, data)?)),
            FilterOp::Like => Ok(format!("{} LIKE {}", quoted_column, self.param(column, data)?)),
            FilterOp::NLike => Ok(format!("{} NOT LIKE {}", quoted_column, self.param(column, data)?)),
            // ILIKE is Postgres-only; lowering both sides works on every dialect
            FilterOp::ILike => Ok(format!("LOWER({}) LIKE LOWER({})", quoted_column, self.param(column, data)?)),
            FilterOp::In | FilterOp::NIn => {
                let negate = condition.operator == FilterOp::NIn;
                match data {
                    Value::Array(values) if values.is_empty() => Ok(if negate { "1=1" } else { "1=0" }.to_string()),
                    Value::Array(values) => {
                        let mut params = Vec::with_capacity(values.len());
                        for v in values {
                            params.push(self.param(column, v)?);
                        }
                        let keyword = if negate { "NOT IN" } else { "IN" };
                        Ok(format!("{} {} ({})", quoted_column, keyword, params.join(", ")))
                    }
                    _ => {
                        let op = if negate { "<>" } else { "=" };
                        Ok(format!("{} {} {}", quoted_column, op, self.param(column, data)?))
                    }
                }
            }
            FilterOp::Between => match data {
                Value::Array(values) if values.len() == 2 => Ok(format!(
                    "{} BETWEEN {} AND {}",
                    quoted_column,
                    self.param(column, &values[0])?,
                    self.param(column, &values[1])?
                )),
                _ => Err(FilterError::InvalidOperatorData("$between requires array with 2 values".to_string())),
            },
            FilterOp::Null => match data {
                Value::Bool(true) => Ok(format!("{} IS NULL", quoted_column)),
                Value::Bool(false) => Ok(format!("{} IS NOT NULL", quoted_column)),
                _ => Err(FilterError::InvalidOperatorData("$null requires a boolean".to_string())),
            },
        }
    }

    fn param(&mut self, column: &str, value: &Value) -> Result<String, FilterError> {
        // NULL is always expressed as IS [NOT] NULL, never bound
        if value.is_null() {
            return Err(FilterError::InvalidOperatorData(format!("null is not comparable for column {}", column)));
        }
        self.params.push(SqlParam {
            column: column.to_string(),
            value: value.clone(),
        });
        Ok(format!("${}", self.starting_param_index + self.params.len()))
    }
}
