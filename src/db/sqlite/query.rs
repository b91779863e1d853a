//! Translation of store queries into SQL

use super::codec::{format_date, format_timestamp};
use crate::store::{Clause, Field, ItemQuery, Sort, SortOrder, Value};
use rusqlite::types::Value as SqlValue;
use std::ops::Bound;

/// Positional parameters collected while building a statement
#[derive(Debug, Default)]
pub struct SqlParams {
    values: Vec<SqlValue>,
}

impl SqlParams {
    /// Register a parameter and return its placeholder
    pub fn bind(&mut self, value: SqlValue) -> String {
        self.values.push(value);
        format!("?{}", self.values.len())
    }

    pub fn bind_value(&mut self, value: &Value) -> String {
        self.bind(to_sql(value))
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }
}

pub fn column(field: Field) -> &'static str {
    match field {
        Field::Id => "id",
        Field::AccountId => "account_id",
        Field::SerialNumber => "serial_number",
        Field::ItemNumber => "item_number",
        Field::Type => "item_type",
        Field::Code => "code",
        Field::CaratRange => "carat_range",
        Field::Quality => "quality",
        Field::MetalType => "metal_type",
        Field::MetalCode => "metal_code",
        Field::LocationCode => "location_code",
        Field::SalespersonCode => "salesperson_code",
        Field::State => "state",
        Field::UnitPrice => "unit_price",
        Field::TotalCaratWeight => "total_carat_weight",
        Field::DateCreated => "date_created",
        Field::ShipmentDate => "shipment_date",
        Field::FirstSeenAt => "first_seen_at",
        Field::LastSeenAt => "last_seen_at",
        Field::SoldAt => "sold_at",
        Field::CreatedAt => "created_at",
        Field::UpdatedAt => "updated_at",
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Number(n) => SqlValue::Real(*n),
        Value::Date(d) => SqlValue::Text(format_date(*d)),
        Value::Time(t) => SqlValue::Text(format_timestamp(*t)),
    }
}

/// WHERE body for a query, always scoped to its account
pub fn where_clause(query: &ItemQuery, params: &mut SqlParams) -> String {
    let account = params.bind(SqlValue::Text(query.account_id.clone()));
    let mut parts = vec![format!("account_id = {}", account)];
    parts.extend(query.clauses.iter().map(|c| clause_sql(c, params)));
    parts.join(" AND ")
}

fn clause_sql(clause: &Clause, params: &mut SqlParams) -> String {
    match clause {
        Clause::Term(field, value) => {
            format!("{} = {}", column(*field), params.bind_value(value))
        }
        Clause::Terms(field, values) => {
            if values.is_empty() {
                return "0".to_string();
            }
            let placeholders: Vec<String> = values.iter().map(|v| params.bind_value(v)).collect();
            format!("{} IN ({})", column(*field), placeholders.join(", "))
        }
        Clause::Range {
            field,
            lower,
            upper,
        } => {
            let col = column(*field);
            let mut parts = Vec::new();
            match lower {
                Bound::Included(v) => parts.push(format!("{} >= {}", col, params.bind_value(v))),
                Bound::Excluded(v) => parts.push(format!("{} > {}", col, params.bind_value(v))),
                Bound::Unbounded => {}
            }
            match upper {
                Bound::Included(v) => parts.push(format!("{} <= {}", col, params.bind_value(v))),
                Bound::Excluded(v) => parts.push(format!("{} < {}", col, params.bind_value(v))),
                Bound::Unbounded => {}
            }
            if parts.is_empty() {
                "1".to_string()
            } else {
                format!("({})", parts.join(" AND "))
            }
        }
        Clause::Missing(field) => format!("{} IS NULL", column(*field)),
        Clause::Any(clauses) => {
            if clauses.is_empty() {
                return "0".to_string();
            }
            let parts: Vec<String> = clauses.iter().map(|c| clause_sql(c, params)).collect();
            format!("({})", parts.join(" OR "))
        }
    }
}

/// ORDER BY body. Ties always break on id so results are deterministic.
pub fn order_clause(sort: &[Sort]) -> String {
    let mut parts: Vec<String> = sort
        .iter()
        .map(|s| {
            let dir = match s.order {
                SortOrder::Asc => "ASC",
                SortOrder::Desc => "DESC",
            };
            format!("{} {}", column(s.field), dir)
        })
        .collect();
    if !sort.iter().any(|s| s.field == Field::Id) {
        parts.push("id ASC".to_string());
    }
    parts.join(", ")
}
