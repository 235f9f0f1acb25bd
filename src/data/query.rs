// Query description
// Ordered filter terms joined by AND/OR with optional grouping

use serde::{Deserialize, Serialize};

use super::value::CellValue;

/// Comparison applied by a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Like,
}

impl FilterOp {
    pub fn sql(&self) -> &'static str {
        match self {
            FilterOp::Equal => "=",
            FilterOp::NotEqual => "<>",
            FilterOp::GreaterThan => ">",
            FilterOp::GreaterThanOrEqual => ">=",
            FilterOp::LessThan => "<",
            FilterOp::LessThanOrEqual => "<=",
            FilterOp::Like => "LIKE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFilter {
    pub name: String,
    pub op: FilterOp,
    pub value: CellValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryTerm {
    Filter(DataFilter),
    And,
    Or,
    OpenGroup,
    CloseGroup,
}

/// Ordered list of query terms. A filter at position `i` binds through
/// the placeholder named `DQ{i}{field}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataQuery {
    terms: Vec<QueryTerm>,
}

impl DataQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, name: impl Into<String>, op: FilterOp, value: impl Into<CellValue>) -> Self {
        self.terms.push(QueryTerm::Filter(DataFilter {
            name: name.into(),
            op,
            value: value.into(),
        }));
        self
    }

    pub fn and(mut self) -> Self {
        self.terms.push(QueryTerm::And);
        self
    }

    pub fn or(mut self) -> Self {
        self.terms.push(QueryTerm::Or);
        self
    }

    pub fn open_group(mut self) -> Self {
        self.terms.push(QueryTerm::OpenGroup);
        self
    }

    pub fn close_group(mut self) -> Self {
        self.terms.push(QueryTerm::CloseGroup);
        self
    }

    pub fn terms(&self) -> &[QueryTerm] {
        &self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Placeholder name (without the `@` prefix) of the filter at `position`
    pub fn parameter_name(position: usize, field: &str) -> String {
        format!("DQ{}{}", position, field)
    }

    /// Value bound to the placeholder `name`, when it belongs to one of the filters
    pub fn find_value(&self, name: &str) -> Option<&CellValue> {
        self.terms.iter().enumerate().find_map(|(i, term)| match term {
            QueryTerm::Filter(f) if Self::parameter_name(i, &f.name) == name => Some(&f.value),
            _ => None,
        })
    }
}
