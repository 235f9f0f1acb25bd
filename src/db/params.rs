// Parameter Scanning and Binding
// Finds `@name` placeholders in generated SQL and binds values to them

use crate::data::{CellValue, Data, DataQuery};
use crate::db::traits::{DbCommand, DbParameter};

/// Separator between a field name and its row index in batched statements
pub const ROW_SEPARATOR: char = '$';

/// A placeholder occurrence; `start..end` covers the leading `@`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub name: String,
    pub start: usize,
    pub end: usize,
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '$' || c == '_'
}

/// Every placeholder outside single-quoted literals, in order, duplicates kept.
/// `@@name` system variables are not placeholders.
pub fn scan_placeholders(sql: &str) -> Vec<Placeholder> {
    let mut found = Vec::new();
    let mut in_quote = false;
    let mut start: Option<usize> = None;
    let mut system = false;

    // Synthetic terminator flushes a placeholder at end of text
    let chars = sql.char_indices().chain(std::iter::once((sql.len(), ' ')));
    for (i, c) in chars {
        if let Some(s) = start {
            if c == '@' && i == s + 1 {
                system = true;
                continue;
            }
            if is_name_char(c) {
                continue;
            }
            if !system && i > s + 1 {
                found.push(Placeholder {
                    name: sql[s + 1..i].to_string(),
                    start: s,
                    end: i,
                });
            }
            start = None;
            system = false;
        }

        if c == '\'' {
            in_quote = !in_quote;
        } else if c == '@' && !in_quote {
            start = Some(i);
        }
    }

    found
}

/// Placeholder names (without `@`) in order of appearance
pub fn get_parameter_names(sql: &str) -> Vec<String> {
    scan_placeholders(sql).into_iter().map(|p| p.name).collect()
}

/// Rewrites every placeholder into `marker(n)`, `n` being the 1-based index of
/// its distinct name. Returns the new text and the distinct names by index.
pub fn rewrite_placeholders<F>(sql: &str, marker: F) -> (String, Vec<String>)
where
    F: Fn(usize) -> String,
{
    let mut names: Vec<String> = Vec::new();
    let mut text = String::with_capacity(sql.len());
    let mut last = 0;

    for placeholder in scan_placeholders(sql) {
        let index = match names.iter().position(|n| *n == placeholder.name) {
            Some(i) => i + 1,
            None => {
                names.push(placeholder.name);
                names.len()
            }
        };
        text.push_str(&sql[last..placeholder.start]);
        text.push_str(&marker(index));
        last = placeholder.end;
    }
    text.push_str(&sql[last..]);

    (text, names)
}

/// Splits on `;` outside single-quoted literals, dropping empty statements
pub fn split_statements(sql: &str) -> Vec<&str> {
    let mut statements = Vec::new();
    let mut in_quote = false;
    let mut begin = 0;

    for (i, c) in sql.char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            ';' if !in_quote => {
                statements.push(&sql[begin..i]);
                begin = i + 1;
            }
            _ => {}
        }
    }
    statements.push(&sql[begin..]);

    statements
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Placeholder name for `field` in row `row` of a batched statement
pub fn row_parameter_name(field: &str, row: usize) -> String {
    format!("{}{}{}", field, ROW_SEPARATOR, row)
}

/// Decodes `name$row` into the field name and row index
pub fn split_row_parameter(name: &str) -> Option<(&str, usize)> {
    let (field, row) = name.rsplit_once(ROW_SEPARATOR)?;
    let row = row.parse().ok()?;
    Some((field, row))
}

/// Binds every unbound placeholder of a select or count statement.
/// A query filter named `DQ{i}{field}` wins, then the template record's field, else NULL.
pub fn bind_query_parameters(command: &mut DbCommand, query: Option<&DataQuery>, data: &Data) {
    for name in get_parameter_names(&command.text) {
        if command.has_parameter(&name) {
            continue;
        }
        let value = query
            .and_then(|q| q.find_value(&name))
            .or_else(|| data.get(&name))
            .cloned()
            .unwrap_or(CellValue::Null);
        command.add_parameter(DbParameter::new(name, value));
    }
}

/// Binds every unbound `field$row` placeholder from `records[row]` through `value_of`.
/// Unresolvable placeholders are bound as NULL.
pub fn bind_row_parameters<F>(command: &mut DbCommand, records: &[&Data], value_of: F)
where
    F: Fn(&Data, &str) -> Option<CellValue>,
{
    for name in get_parameter_names(&command.text) {
        if command.has_parameter(&name) {
            continue;
        }
        let value = split_row_parameter(&name)
            .and_then(|(field, row)| records.get(row).and_then(|data| value_of(data, field)))
            .unwrap_or(CellValue::Null);
        command.add_parameter(DbParameter::new(name, value));
    }
}
