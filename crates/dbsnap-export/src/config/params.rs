//! `key=value` parameter files
//!
//! One `name=value` pair per line, split on the first `=`, both sides
//! trimmed. Blank lines and lines starting with `#` or `;` are ignored.

use crate::error::{ExportError, Result};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Raw parameters resolved by a [`super::ConfigProvider`]
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ParamSet {
    values: BTreeMap<String, String>,
}

impl ParamSet {
    pub fn parse(text: &str) -> Self {
        let values = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with(';'))
            .filter_map(|line| {
                let (name, value) = line.split_once('=').unwrap_or((line, ""));
                let name = name.trim();
                (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
            })
            .collect();

        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn required(&self, name: &str) -> Result<&str> {
        self.get(name)
            .ok_or_else(|| ExportError::config(format!("missing required parameter '{}'", name)))
    }

    pub fn required_parsed<T: FromStr>(&self, name: &str) -> Result<T>
    where
        T::Err: std::fmt::Display,
    {
        parse_value(name, self.required(name)?)
    }

    pub fn optional_parsed<T: FromStr>(&self, name: &str) -> Result<Option<T>>
    where
        T::Err: std::fmt::Display,
    {
        self.get(name)
            .filter(|value| !value.is_empty())
            .map(|value| parse_value(name, value))
            .transpose()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn parse_value<T: FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| {
        ExportError::config(format!("invalid value '{}' for parameter '{}': {}", value, name, e))
    })
}

// Values may hold credentials, so only names are printed.
impl std::fmt::Debug for ParamSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const PARAMS: &str = "\
# database
host = db.internal
port=3306
password = p@ss=word
; comment

timeout_seconds=
";

    #[test]
    fn test_parse_params() {
        let params = ParamSet::parse(PARAMS);
        assert_eq!(params.len(), 4);
        assert_eq!(params.get("host"), Some("db.internal"));
        assert_eq!(params.get("password"), Some("p@ss=word"));
        assert_eq!(params.required_parsed::<u16>("port").unwrap(), 3306);
        assert_eq!(params.optional_parsed::<u64>("timeout_seconds").unwrap(), None);
    }

    #[test]
    fn test_missing_and_invalid_values() {
        let params = ParamSet::parse("port=abc\n");
        assert!(matches!(params.required("host"), Err(ExportError::Config(_))));

        let err = params.required_parsed::<u16>("port").unwrap_err();
        assert!(err.to_string().contains("port"));
    }

    #[test]
    fn test_debug_hides_values() {
        let params = ParamSet::parse("password=hunter2\n");
        let debug = format!("{:?}", params);
        assert!(debug.contains("password"));
        assert!(!debug.contains("hunter2"));
    }
}
