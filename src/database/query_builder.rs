use std::collections::BTreeMap;

use serde_json::Value;
use sqlx::any::{Any, AnyArguments, AnyRow};
use sqlx::query::Query;
use sqlx::{Column, Row};

use crate::database::entity::{BindValue, ColumnType, EntityDef};
use crate::database::error::DataError;
use crate::database::record::Record;
use crate::filter::{Filter, FilterData, SqlParam};

/// SQL text plus its typed positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct BoundQuery {
    pub sql: String,
    pub binds: Vec<BindValue>,
}

impl BoundQuery {
    pub fn query(&self) -> Query<'_, Any, AnyArguments<'_>> {
        self.binds.iter().fold(sqlx::query::<Any>(&self.sql), |query, bind| match bind {
            BindValue::Text(s) => query.bind(s.as_str()),
            BindValue::Integer(i) => query.bind(*i),
        })
    }
}

/// Statement builder for one entity.
///
/// Nulls are never bound: inserts omit null columns, updates write a literal
/// `NULL` and filters use `IS NULL`. This keeps the `Any` driver away from
/// untyped null parameters, which Postgres rejects for non-integer columns.
pub struct QueryBuilder<'a> {
    entity: &'a EntityDef,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(entity: &'a EntityDef) -> Self {
        Self { entity }
    }

    pub fn select(&self, filter_data: FilterData) -> Result<BoundQuery, DataError> {
        let mut filter = Filter::new(&self.entity.table)?;
        filter.assign(filter_data)?;
        let sql = filter.to_sql()?;
        Ok(BoundQuery { sql: sql.query, binds: self.bind_params(&sql.params)? })
    }

    pub fn count(&self, filter_data: FilterData) -> Result<BoundQuery, DataError> {
        let mut filter = Filter::new(&self.entity.table)?;
        filter.where_clause(filter_data.where_clause.unwrap_or(Value::Null))?;
        let sql = filter.to_count_sql()?;
        Ok(BoundQuery { sql: sql.query, binds: self.bind_params(&sql.params)? })
    }

    pub fn insert(&self, record: &Record) -> Result<BoundQuery, DataError> {
        let mut columns = Vec::new();
        let mut binds = Vec::new();
        for (name, value) in record.fields() {
            let column_type = self.entity.column_type(name)?;
            if value.is_null() {
                continue;
            }
            binds.push(column_type.to_bind(name, value)?);
            columns.push(format!("\"{}\"", name));
        }

        if columns.is_empty() {
            return Err(DataError::InvalidOperation(format!("nothing to insert into {}", self.entity.name)));
        }

        let placeholders = (1..=binds.len()).map(|i| format!("${}", i)).collect::<Vec<_>>().join(", ");
        Ok(BoundQuery {
            sql: format!("INSERT INTO \"{}\" ({}) VALUES ({})", self.entity.table, columns.join(", "), placeholders),
            binds,
        })
    }

    /// `UPDATE ... SET <changed fields> WHERE id = $n`
    pub fn update(&self, record: &Record) -> Result<Option<BoundQuery>, DataError> {
        let id = record
            .id()
            .ok_or_else(|| DataError::InvalidOperation(format!("{} record without id cannot be updated", self.entity.name)))?;

        let mut assignments = Vec::new();
        let mut binds = Vec::new();
        for name in record.changed_fields() {
            let column_type = self.entity.column_type(&name)?;
            match record.get(&name) {
                None | Some(Value::Null) => assignments.push(format!("\"{}\" = NULL", name)),
                Some(value) => {
                    binds.push(column_type.to_bind(&name, value)?);
                    assignments.push(format!("\"{}\" = ${}", name, binds.len()));
                }
            }
        }

        if assignments.is_empty() {
            return Ok(None);
        }

        binds.push(BindValue::Text(id.to_string()));
        Ok(Some(BoundQuery {
            sql: format!(
                "UPDATE \"{}\" SET {} WHERE \"id\" = ${}",
                self.entity.table,
                assignments.join(", "),
                binds.len()
            ),
            binds,
        }))
    }

    pub fn delete_ids(&self, ids: &[String]) -> Result<BoundQuery, DataError> {
        if ids.is_empty() {
            return Err(DataError::InvalidOperation("no ids to delete".to_string()));
        }
        let placeholders = (1..=ids.len()).map(|i| format!("${}", i)).collect::<Vec<_>>().join(", ");
        Ok(BoundQuery {
            sql: format!("DELETE FROM \"{}\" WHERE \"id\" IN ({})", self.entity.table, placeholders),
            binds: ids.iter().map(|id| BindValue::Text(id.clone())).collect(),
        })
    }

    fn bind_params(&self, params: &[SqlParam]) -> Result<Vec<BindValue>, DataError> {
        params
            .iter()
            .map(|param| self.entity.column_type(&param.column)?.to_bind(&param.column, &param.value))
            .collect()
    }

    /// Decode a row into a loaded record using the entity's column types
    pub fn decode_row(&self, row: &AnyRow) -> Result<Record, DataError> {
        let mut data = BTreeMap::new();
        for column in row.columns() {
            let name = column.name();
            let Some(def) = self.entity.column_def(name) else {
                continue;
            };

            let value = match def.column_type {
                ColumnType::Integer => decode_integer(row, name),
                ColumnType::Text | ColumnType::Timestamp => decode_text(row, name).map(Value::String).unwrap_or(Value::Null),
                // Stored as text; keep unparseable legacy content as a plain string
                ColumnType::Json => match decode_text(row, name) {
                    Some(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
                    None => Value::Null,
                },
            };
            data.insert(name.to_string(), value);
        }
        Ok(Record::from_sql_data(data))
    }
}

// The Any driver does not report SQLite NULLs as null, so a failed decode of
// the expected type falls back to the other storage class and then to NULL.
fn decode_text(row: &AnyRow, name: &str) -> Option<String> {
    if let Ok(text) = row.try_get::<Option<String>, _>(name) {
        text
    } else if let Ok(number) = row.try_get::<Option<i64>, _>(name) {
        number.map(|n| n.to_string())
    } else {
        None
    }
}

fn decode_integer(row: &AnyRow, name: &str) -> Value {
    if let Ok(number) = row.try_get::<Option<i64>, _>(name) {
        number.map(Value::from).unwrap_or(Value::Null)
    } else if let Ok(Some(text)) = row.try_get::<Option<String>, _>(name) {
        text.parse::<i64>().map(Value::from).unwrap_or(Value::Null)
    } else {
        Value::Null
    }
}
