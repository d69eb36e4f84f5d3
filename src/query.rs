use serde_json::Value;
use url::form_urlencoded;

use std::cmp::Ordering;

/// A filtered, ordered read (or the filter part of an update/delete) against
/// one table.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    table: String,
    columns: String,
    filters: Vec<Filter>,
    order: Option<Order>,
    limit: Option<usize>,
}

/// Equality filter on a single column.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

impl Query {
    pub fn table<T: Into<String>>(table: T) -> Self {
        Query {
            table: table.into(),
            columns: "*".to_string(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn select<C: Into<String>>(mut self, columns: C) -> Self {
        self.columns = columns.into();
        self
    }

    pub fn eq<C: Into<String>, V: Into<Value>>(mut self, column: C, value: V) -> Self {
        self.filters.push(Filter {
            column: column.into(),
            value: value.into(),
        });
        self
    }

    pub fn order<C: Into<String>>(mut self, column: C, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.into(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Single-row lookup.
    pub fn single(self) -> Self {
        self.limit(1)
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn is_filtered(&self) -> bool {
        !self.filters.is_empty()
    }

    pub fn filters_on(&self, column: &str) -> bool {
        self.filters.iter().any(|filter| filter.column == column)
    }

    /// Renders the PostgREST query string, e.g.
    /// `select=*&post_id=eq.42&order=created_at.desc&limit=1`.
    pub fn to_query_string(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        serializer.append_pair("select", &self.columns);
        self.append_filters(&mut serializer);
        if let Some(order) = &self.order {
            let direction = if order.ascending { "asc" } else { "desc" };
            serializer.append_pair("order", &format!("{}.{}", order.column, direction));
        }
        if let Some(limit) = self.limit {
            serializer.append_pair("limit", &limit.to_string());
        }
        serializer.finish()
    }

    /// Query string carrying only the filters, for PATCH and DELETE.
    pub fn to_filter_string(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        self.append_filters(&mut serializer);
        serializer.finish()
    }

    fn append_filters(&self, serializer: &mut form_urlencoded::Serializer<String>) {
        for filter in &self.filters {
            serializer.append_pair(&filter.column, &format!("eq.{}", plain_text(&filter.value)));
        }
    }

    pub fn matches(&self, row: &Value) -> bool {
        self.filters.iter().all(|filter| {
            row.get(&filter.column)
                .map_or(false, |value| loosely_equal(value, &filter.value))
        })
    }

    /// Applies ordering and limit to rows that already passed `matches`.
    pub fn arrange(&self, mut rows: Vec<Value>) -> Vec<Value> {
        if let Some(order) = &self.order {
            rows.sort_by(|a, b| {
                let ordering = compare(a.get(&order.column), b.get(&order.column));
                if order.ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            });
        }
        if let Some(limit) = self.limit {
            rows.truncate(limit);
        }
        rows
    }
}

fn plain_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

// The REST layer compares everything as text, so `42` matches `"42"`.
pub(crate) fn loosely_equal(left: &Value, right: &Value) -> bool {
    left == right || plain_text(left) == plain_text(right)
}

fn compare(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    match (left, right) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Null), Some(Value::Null)) | (None, None) => Ordering::Equal,
        // nulls sort last
        (Some(Value::Null), _) | (None, _) => Ordering::Greater,
        (_, Some(Value::Null)) | (_, None) => Ordering::Less,
        _ => Ordering::Equal,
    }
}
