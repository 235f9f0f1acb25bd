// ADO Connection Strings
// Parses and rebuilds `key=value;` connection strings

use std::fmt;

/// Ordered `key=value` pairs of an ADO connection string.
/// Keys compare case-insensitively; values may be single or double quoted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionStringBuilder {
    pairs: Vec<(String, String)>,
}

impl ConnectionStringBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(connection_string: &str) -> Self {
        let mut builder = Self::new();
        let mut chars = connection_string.chars().peekable();

        loop {
            // key
            let mut key = String::new();
            let mut has_value = false;
            for c in chars.by_ref() {
                if c == '=' {
                    has_value = true;
                    break;
                }
                if c == ';' {
                    break;
                }
                key.push(c);
            }
            let key = key.trim().to_string();

            if !has_value {
                if chars.peek().is_none() {
                    break;
                }
                continue;
            }

            while chars.next_if(|c| c.is_whitespace()).is_some() {}

            // value
            let mut value = String::new();
            match chars.peek().copied() {
                Some(quote @ ('\'' | '"')) => {
                    chars.next();
                    while let Some(c) = chars.next() {
                        if c == quote {
                            // Doubled quote is a literal quote
                            if chars.next_if_eq(&quote).is_some() {
                                value.push(quote);
                                continue;
                            }
                            break;
                        }
                        value.push(c);
                    }
                    for c in chars.by_ref() {
                        if c == ';' {
                            break;
                        }
                    }
                }
                _ => {
                    for c in chars.by_ref() {
                        if c == ';' {
                            break;
                        }
                        value.push(c);
                    }
                    value = value.trim().to_string();
                }
            }

            if !key.is_empty() {
                builder.set(&key, value);
            }
            if chars.peek().is_none() {
                break;
            }
        }

        builder
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// First value present among several synonyms of a key
    pub fn get_any(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.get(k))
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.pairs.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(key)) {
            Some(pair) => pair.1 = value,
            None => self.pairs.push((key.to_string(), value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.pairs.iter().position(|(k, _)| k.eq_ignore_ascii_case(key))?;
        Some(self.pairs.remove(index).1)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(k, _)| k.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// File or server named by `Data Source` and its common synonyms
    pub fn data_source(&self) -> Option<&str> {
        self.get_any(&["Data Source", "DataSource", "Server", "Filename"])
    }
}

impl fmt::Display for ConnectionStringBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.pairs.iter().enumerate() {
            if i > 0 {
                write!(f, ";")?;
            }
            if value.contains(';') || value.contains('\'') || value.starts_with(' ') {
                write!(f, "{}=\"{}\"", key, value.replace('"', "\"\""))?;
            } else {
                write!(f, "{}={}", key, value)?;
            }
        }
        Ok(())
    }
}
