//! Per-table SELECT statements
//!
//! The catalog is a TOML file mapping statement names to SQL:
//!
//! ```toml
//! prefix = "sql_db_bakery_"
//!
//! [statements]
//! sql_db_bakery_orders = "SELECT * FROM orders WHERE {partition_key} = '{run_date}'"
//! sql_db_bakery_customers = "SELECT id, name FROM customers"
//! ```
//!
//! The statement for table `orders` is looked up as `{prefix}orders`.
//! `{run_date}` and `{partition_key}` are substituted from the
//! [`RunContext`].

use crate::context::RunContext;
use crate::error::{ExportError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

const RUN_DATE: &str = "{run_date}";
const PARTITION_KEY: &str = "{partition_key}";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogFile {
    #[serde(default)]
    prefix: String,
    #[serde(default)]
    statements: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct QueryCatalog {
    prefix: String,
    statements: BTreeMap<String, String>,
}

impl QueryCatalog {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ExportError::catalog(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: CatalogFile = toml::from_str(text)
            .map_err(|e| ExportError::catalog(format!("malformed catalog: {}", e)))?;

        if let Some((name, _)) = file.statements.iter().find(|(_, sql)| sql.trim().is_empty()) {
            return Err(ExportError::catalog(format!("empty statement '{}'", name)));
        }

        Ok(Self {
            prefix: file.prefix,
            statements: file.statements,
        })
    }

    /// Catalog key for `table`
    pub fn statement_name(&self, table: &str) -> String {
        format!("{}{}", self.prefix, table)
    }

    /// Tables this catalog can export, with the prefix stripped
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.statements
            .keys()
            .filter_map(|name| name.strip_prefix(self.prefix.as_str()))
    }

    /// Statement for `ctx.table()` with placeholders filled in
    pub fn resolve(&self, ctx: &RunContext) -> Result<String> {
        let name = self.statement_name(ctx.table());
        let template = self.statements.get(&name).ok_or_else(|| {
            ExportError::catalog(format!(
                "no statement '{}' for table '{}'",
                name,
                ctx.table()
            ))
        })?;

        let mut sql = substitute(template, PARTITION_KEY, ctx.partition_key())?;

        if sql.contains(RUN_DATE) {
            let run_date = ctx.run_date().ok_or_else(|| {
                ExportError::catalog(format!(
                    "statement '{}' references {} but no run date was given",
                    name, RUN_DATE
                ))
            })?;
            sql = substitute(&sql, RUN_DATE, run_date)?;
        }

        Ok(sql.trim().trim_end_matches(';').trim_end().to_string())
    }
}

fn substitute(template: &str, placeholder: &str, value: &str) -> Result<String> {
    if !template.contains(placeholder) {
        return Ok(template.to_string());
    }
    if let Some(bad) = value.chars().find(|c| matches!(c, '\'' | '"' | '\\' | ';' | '`')) {
        return Err(ExportError::catalog(format!(
            "value '{}' for {} contains forbidden character '{}'",
            value, placeholder, bad
        )));
    }
    Ok(template.replace(placeholder, value))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::context::LoadType;

    const CATALOG: &str = r#"
prefix = "sql_db_bakery_"

[statements]
sql_db_bakery_orders = "SELECT * FROM orders WHERE {partition_key} = '{run_date}';"
sql_db_bakery_customers = "SELECT id, name FROM customers"
"#;

    #[test]
    fn test_resolve_incremental() {
        let catalog = QueryCatalog::from_toml_str(CATALOG).unwrap();
        let ctx =
            RunContext::new("orders", LoadType::Incremental, Some("2024-05-01".into()), "dt", 10)
                .unwrap();

        assert_eq!(
            catalog.resolve(&ctx).unwrap(),
            "SELECT * FROM orders WHERE dt = '2024-05-01'"
        );
    }

    #[test]
    fn test_resolve_full() {
        let catalog = QueryCatalog::from_toml_str(CATALOG).unwrap();
        let ctx = RunContext::new("customers", LoadType::Full, None, "dt", 10).unwrap();
        assert_eq!(catalog.resolve(&ctx).unwrap(), "SELECT id, name FROM customers");
        assert_eq!(catalog.tables().collect::<Vec<_>>(), vec!["customers", "orders"]);
    }

    #[test]
    fn test_without_prefix() {
        let catalog =
            QueryCatalog::from_toml_str("[statements]\norders = \"SELECT 1\"\n").unwrap();
        let ctx = RunContext::new("orders", LoadType::Full, None, "dt", 10).unwrap();
        assert_eq!(catalog.statement_name("orders"), "orders");
        assert_eq!(catalog.resolve(&ctx).unwrap(), "SELECT 1");
    }

    #[test]
    fn test_unknown_table() {
        let catalog = QueryCatalog::from_toml_str(CATALOG).unwrap();
        let ctx = RunContext::new("invoices", LoadType::Full, None, "dt", 10).unwrap();
        let err = catalog.resolve(&ctx).unwrap_err();
        assert!(matches!(err, ExportError::Catalog(_)));
        assert!(err.to_string().contains("sql_db_bakery_invoices"));
    }

    #[test]
    fn test_run_date_required_by_statement() {
        let catalog = QueryCatalog::from_toml_str(CATALOG).unwrap();
        let ctx = RunContext::new("orders", LoadType::Full, None, "dt", 10).unwrap();
        let err = catalog.resolve(&ctx).unwrap_err();
        assert!(err.to_string().contains("{run_date}"));
    }

    #[test]
    fn test_substitute_rejects_quotes() {
        assert!(substitute("x = '{run_date}'", RUN_DATE, "1' OR '1").is_err());
        assert!(substitute("x = '{run_date}'", RUN_DATE, "a;b").is_err());
        assert!(substitute("SELECT 1", RUN_DATE, "a;b").is_ok());
    }

    #[test]
    fn test_malformed_catalog() {
        assert!(QueryCatalog::from_toml_str("[statements]\norders = 3").is_err());
        assert!(QueryCatalog::from_toml_str("[statements]\norders = \"  \"").is_err());
        assert!(QueryCatalog::from_toml_str("queries = {}").is_err());
    }
}
