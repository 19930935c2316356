use serde_json::Value;

use super::error::FilterError;
use super::is_identifier;
use super::types::{FilterOrderInfo, SortDirection};

pub struct FilterOrder;

impl FilterOrder {
    pub fn validate_and_parse(order: &Value) -> Result<Vec<FilterOrderInfo>, FilterError> {
        let infos = match order {
            Value::String(s) => Self::parse_order_string(s),
            // ["created_at desc", "name asc"]
            Value::Array(arr) => {
                let mut out = Vec::new();
                for v in arr {
                    match v {
                        Value::String(s) => out.extend(Self::parse_order_string(s)),
                        other => return Err(FilterError::InvalidOperatorData(format!("Invalid order entry: {}", other))),
                    }
                }
                out
            }
            // { "created_at": "desc", "name": "asc" }
            Value::Object(obj) => obj
                .iter()
                .map(|(k, v)| FilterOrderInfo {
                    column: k.clone(),
                    sort: Self::direction(v.as_str().unwrap_or("asc")),
                })
                .collect(),
            _ => vec![],
        };

        for info in &infos {
            if !is_identifier(&info.column) {
                return Err(FilterError::InvalidColumn(info.column.clone()));
            }
        }
        Ok(infos)
    }

    fn parse_order_string(s: &str) -> Vec<FilterOrderInfo> {
        s.split(',')
            .filter_map(|part| {
                let mut it = part.split_whitespace();
                let column = it.next()?;
                Some(FilterOrderInfo {
                    column: column.to_string(),
                    sort: Self::direction(it.next().unwrap_or("asc")),
                })
            })
            .collect()
    }

    fn direction(dir: &str) -> SortDirection {
        if dir.eq_ignore_ascii_case("desc") {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        }
    }

    pub fn generate(infos: &[FilterOrderInfo]) -> String {
        if infos.is_empty() {
            return String::new();
        }
        let parts: Vec<String> = infos
            .iter()
            .map(|i| format!("\"{}\" {}", i.column, i.sort.to_sql()))
            .collect();
        format!("ORDER BY {}", parts.join(", "))
    }
}
