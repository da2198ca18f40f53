//! Merged probe parameters.
//!
//! A `Params` is the deep merge of a probe descriptor's default parameters
//! with the host-level config section (host values win, unknown keys are
//! ignored by the probes). Typed accessors are forgiving: a missing or
//! mistyped value falls back to the caller's default.

use toml::Value;

/// Merged parameter map handed to a probe factory.
#[derive(Debug, Clone, Default)]
pub struct Params {
    table: toml::Table,
}

impl Params {
    /// Wrap an already-merged table.
    pub fn from_table(table: toml::Table) -> Self {
        Self { table }
    }

    /// Deep-merge `overrides` on top of `defaults`: nested tables merge
    /// recursively, everything else is replaced wholesale.
    pub fn merged(defaults: &toml::Table, overrides: &toml::Table) -> Self {
        let mut out = defaults.clone();
        deep_merge(&mut out, overrides);
        Self { table: out }
    }

    /// Insert a value if the key is absent or blank.
    pub fn set_default_str(&mut self, key: &str, value: &str) {
        let present = self
            .table
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .is_some_and(|s| !s.is_empty());
        if !present {
            self.table.insert(key.to_string(), Value::String(value.to_string()));
        }
    }

    /// Raw access for probes with structured sections (e.g. ssh commands).
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.table.get(key)
    }

    /// Trimmed non-empty string value.
    pub fn get_str(&self, key: &str) -> Option<String> {
        let s = self.table.get(key)?.as_str()?.trim();
        if s.is_empty() {
            None
        } else {
            Some(s.to_string())
        }
    }

    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        match self.table.get(key) {
            Some(Value::Integer(n)) => *n,
            Some(Value::Float(f)) => *f as i64,
            Some(Value::String(s)) => s.trim().parse::<f64>().map(|f| f as i64).unwrap_or(default),
            _ => default,
        }
    }

    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        match self.table.get(key) {
            Some(Value::Float(f)) => *f,
            Some(Value::Integer(n)) => *n as f64,
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.table.get(key) {
            Some(Value::Boolean(b)) => *b,
            Some(Value::Integer(n)) => *n != 0,
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" | "enabled" => true,
                "0" | "false" | "no" | "off" | "disabled" => false,
                _ => default,
            },
            _ => default,
        }
    }

    /// String list; a single scalar string becomes a one-element list.
    pub fn get_str_list(&self, key: &str) -> Vec<String> {
        match self.table.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect(),
            Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
            _ => Vec::new(),
        }
    }
}

fn deep_merge(base: &mut toml::Table, overrides: &toml::Table) {
    for (key, value) in overrides {
        match (base.get_mut(key), value) {
            (Some(Value::Table(existing)), Value::Table(incoming)) => {
                deep_merge(existing, incoming);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Convenience for building default parameter tables in probe descriptors.
#[macro_export]
macro_rules! params_table {
    ($($key:expr => $value:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut table = toml::Table::new();
        $(table.insert($key.to_string(), toml::Value::from($value));)*
        table
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> toml::Table {
        s.parse().unwrap()
    }

    #[test]
    fn merge_prefers_overrides_and_keeps_defaults() {
        let defaults = parse("every_sec = 5.0\ntimeout_ms = 2000");
        let overrides = parse("every_sec = 1.5");
        let p = Params::merged(&defaults, &overrides);
        assert!((p.get_f64("every_sec", 0.0) - 1.5).abs() < f64::EPSILON);
        assert_eq!(p.get_i64("timeout_ms", 0), 2000);
    }

    #[test]
    fn merge_recurses_into_tables() {
        let defaults = parse("[limits]\nwarn = 1\nbad = 10");
        let overrides = parse("[limits]\nbad = 20");
        let p = Params::merged(&defaults, &overrides);
        let limits = p.get("limits").and_then(|v| v.as_table()).unwrap();
        assert_eq!(limits.get("warn").and_then(toml::Value::as_integer), Some(1));
        assert_eq!(limits.get("bad").and_then(toml::Value::as_integer), Some(20));
    }

    #[test]
    fn typed_accessors_tolerate_strings_and_bad_types() {
        let p = Params::from_table(parse(
            "port = \"8765\"\nflag = \"on\"\nrate = \"0.25\"\njunk = [1]",
        ));
        assert_eq!(p.get_i64("port", 0), 8765);
        assert!(p.get_bool("flag", false));
        assert!((p.get_f64("rate", 0.0) - 0.25).abs() < f64::EPSILON);
        assert_eq!(p.get_i64("junk", 7), 7);
        assert_eq!(p.get_i64("missing", 7), 7);
    }

    #[test]
    fn str_list_accepts_scalar_or_array() {
        let p = Params::from_table(parse("one = \"a\"\nmany = [\"a\", \" b \", \"\"]"));
        assert_eq!(p.get_str_list("one"), vec!["a"]);
        assert_eq!(p.get_str_list("many"), vec!["a", "b"]);
        assert!(p.get_str_list("none").is_empty());
    }

    #[test]
    fn set_default_str_only_fills_blanks() {
        let mut p = Params::from_table(parse("host = \"db1\""));
        p.set_default_str("host", "other");
        p.set_default_str("name", "db1");
        assert_eq!(p.get_str("host").as_deref(), Some("db1"));
        assert_eq!(p.get_str("name").as_deref(), Some("db1"));
    }
}
