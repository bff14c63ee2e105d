//! Statements for the logical-index catalog, per-index namespace tables and
//! the connection-limit probe.

use crate::builder::{quote_ident, DistanceMetric, HnswParams, Statement};
use crate::error::{LanternError, Result};
use crate::params::Param;
use crate::pool::Row;
use serde::{Deserialize, Serialize};

pub const CATALOG_TABLE: &str = "lantern_indexes";

/// Reserved name of the namespace every index starts with.
pub const DEFAULT_NAMESPACE: &str = "";

/// One row of the logical-index catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexCatalogEntry {
    pub name: String,
    pub metric: DistanceMetric,
    pub dimension: usize,
    pub m: Option<u32>,
    pub ef: Option<u32>,
    pub ef_construction: Option<u32>,
}

impl IndexCatalogEntry {
    pub fn hnsw_params(&self) -> HnswParams {
        HnswParams {
            dimension: Some(self.dimension as u32),
            m: self.m,
            ef_construction: self.ef_construction,
            ef_search: self.ef,
        }
    }

    pub fn from_row(row: &Row) -> Result<Self> {
        let narrow = |v: Option<i64>| v.map(|v| v.max(0) as u32);
        Ok(Self {
            name: row.text("name")?,
            metric: DistanceMetric::parse(&row.text("metric")?)?,
            dimension: row.int("dim")?.max(0) as usize,
            m: narrow(row.opt_int("m")?),
            ef: narrow(row.opt_int("ef")?),
            ef_construction: narrow(row.opt_int("ef_construction")?),
        })
    }
}

/// Longest identifier Postgres keeps without truncating.
const MAX_IDENT_BYTES: usize = 63;

const MAX_INDEX_NAME: usize = 45;

/// Index names are lowercase ASCII letters, digits and `-`, at most 45
/// characters. Without `_` in index names, `<index>_<namespace>` splits
/// back into exactly one index and namespace.
pub fn check_index_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_INDEX_NAME {
        return Err(LanternError::validation(format!(
            "index name must be 1 to {MAX_INDEX_NAME} characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(LanternError::validation(format!(
            "index name '{name}' may only hold lowercase letters, digits and '-'"
        )));
    }
    Ok(())
}

/// Rejects namespaces whose table would alias the index's namespace table,
/// the catalog, or get truncated by the server.
pub fn check_namespace(index: &str, namespace: &str) -> Result<()> {
    let table = namespace_table_name(index, namespace);
    if namespace == "namespaces" || table == CATALOG_TABLE {
        return Err(LanternError::validation(format!(
            "namespace '{namespace}' is reserved"
        )));
    }
    if table.len() > MAX_IDENT_BYTES {
        return Err(LanternError::validation(format!(
            "namespace '{namespace}' makes table name '{table}' longer than {MAX_IDENT_BYTES} bytes"
        )));
    }
    Ok(())
}

/// Physical table holding one namespace of `index`.
pub fn namespace_table_name(index: &str, namespace: &str) -> String {
    if namespace == DEFAULT_NAMESPACE {
        index.to_string()
    } else {
        format!("{index}_{namespace}")
    }
}

fn namespaces_table(index: &str) -> String {
    quote_ident(&format!("{index}_namespaces"))
}

/// Spare server connections, floored at one. Four are left for other clients.
pub fn connection_limit_probe() -> Statement {
    Statement::new(
        "SELECT greatest(1, ((SELECT setting::int FROM pg_settings WHERE name = 'max_connections') \
         - (SELECT count(*) FROM pg_stat_activity) - 4)::int)::int8",
    )
}

pub fn create_catalog_table() -> Statement {
    Statement::new(format!(
        "CREATE TABLE IF NOT EXISTS {} (id SERIAL PRIMARY KEY, name TEXT UNIQUE, metric TEXT, \
         dim INT, m INT, ef INT, ef_construction INT)",
        quote_ident(CATALOG_TABLE)
    ))
}

pub fn insert_index(entry: &IndexCatalogEntry) -> Statement {
    Statement::with_params(
        format!(
            "INSERT INTO {} (name, metric, dim, m, ef, ef_construction) \
             VALUES ($1, $2, ($3)::INT, ($4)::INT, ($5)::INT, ($6)::INT)",
            quote_ident(CATALOG_TABLE)
        ),
        vec![
            Param::from(entry.name.as_str()),
            Param::from(entry.metric.name()),
            Param::Int(entry.dimension as i64),
            Param::from(entry.m),
            Param::from(entry.ef),
            Param::from(entry.ef_construction),
        ],
    )
}

pub fn select_index(name: &str) -> Statement {
    Statement::with_params(
        format!(
            "SELECT name, metric, dim, m, ef, ef_construction FROM {} WHERE name = $1 LIMIT 1",
            quote_ident(CATALOG_TABLE)
        ),
        vec![Param::from(name)],
    )
}

pub fn list_indexes() -> Statement {
    Statement::new(format!(
        "SELECT name FROM {} ORDER BY id",
        quote_ident(CATALOG_TABLE)
    ))
}

pub fn delete_index(name: &str) -> Statement {
    Statement::with_params(
        format!("DELETE FROM {} WHERE name = $1", quote_ident(CATALOG_TABLE)),
        vec![Param::from(name)],
    )
}

/// Namespace table plus the default namespace row.
pub fn create_namespace_table(index: &str) -> Statement {
    let table = namespaces_table(index);
    Statement::new(format!(
        "CREATE TABLE IF NOT EXISTS {table} (id SERIAL PRIMARY KEY, name TEXT UNIQUE); \
         INSERT INTO {table} (name) VALUES ('') ON CONFLICT DO NOTHING"
    ))
}

pub fn insert_namespace(index: &str, namespace: &str) -> Statement {
    Statement::with_params(
        format!(
            "INSERT INTO {} (name) VALUES ($1) ON CONFLICT DO NOTHING",
            namespaces_table(index)
        ),
        vec![Param::from(namespace)],
    )
}

pub fn list_namespaces(index: &str) -> Statement {
    Statement::new(format!(
        "SELECT name FROM {} ORDER BY id",
        namespaces_table(index)
    ))
}

pub fn drop_namespace_table(index: &str) -> Statement {
    Statement::new(format!(
        "DROP TABLE IF EXISTS {} CASCADE",
        namespaces_table(index)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Cell;

    #[test]
    fn default_namespace_maps_to_the_index_table() {
        assert_eq!(namespace_table_name("books", ""), "books");
        assert_eq!(namespace_table_name("books", "fr"), "books_fr");
    }

    #[test]
    fn index_names_cannot_hold_the_namespace_separator() {
        assert!(check_index_name("books-2024").is_ok());
        let long = "x".repeat(46);
        for bad in ["", "a_b", "Books", "bö", long.as_str()] {
            assert!(check_index_name(bad).unwrap_err().is_validation(), "{bad}");
        }
    }

    #[test]
    fn reserved_and_overlong_namespaces_are_rejected() {
        assert!(check_namespace("books", "fr").is_ok());
        assert!(check_namespace("books", "").is_ok());
        assert!(check_namespace("books", "namespaces").unwrap_err().is_validation());
        assert!(check_namespace("lantern", "indexes").unwrap_err().is_validation());
        assert!(check_namespace("books", &"n".repeat(60)).unwrap_err().is_validation());
    }

    #[test]
    fn insert_index_binds_optional_params() {
        let entry = IndexCatalogEntry {
            name: "books".into(),
            metric: DistanceMetric::Hamming,
            dimension: 8,
            m: Some(12),
            ef: None,
            ef_construction: Some(64),
        };
        let stmt = insert_index(&entry);
        assert!(stmt.sql.starts_with("INSERT INTO \"lantern_indexes\""));
        assert_eq!(stmt.params[1], Param::Text("hamming".into()));
        assert_eq!(stmt.params[4], Param::OptionalInt(None));
        assert_eq!(stmt.params[5], Param::OptionalInt(Some(64)));
    }

    #[test]
    fn namespace_statements_quote_the_table() {
        let sql = create_namespace_table("my\"idx").sql;
        assert!(sql.contains("CREATE TABLE IF NOT EXISTS \"my\"\"idx_namespaces\""));
        assert!(sql.contains("VALUES ('') ON CONFLICT DO NOTHING"));
        assert_eq!(
            drop_namespace_table("a").sql,
            "DROP TABLE IF EXISTS \"a_namespaces\" CASCADE"
        );
    }

    #[test]
    fn decodes_catalog_row() {
        let row = Row::new(
            ["name", "metric", "dim", "m", "ef", "ef_construction"]
                .map(String::from)
                .to_vec(),
            vec![
                Cell::Text("books".into()),
                Cell::Text("cosine".into()),
                Cell::Int(3),
                Cell::Int(12),
                Cell::Null,
                Cell::Int(64),
            ],
        );
        let entry = IndexCatalogEntry::from_row(&row).unwrap();
        assert_eq!(entry.metric, DistanceMetric::Cosine);
        assert_eq!(entry.dimension, 3);
        assert_eq!(entry.ef, None);
        let params = entry.hnsw_params();
        assert_eq!(params.m, Some(12));
        assert_eq!(params.dimension, Some(3));
    }

    #[test]
    fn unknown_metric_in_catalog_is_rejected() {
        let row = Row::new(
            ["name", "metric", "dim", "m", "ef", "ef_construction"]
                .map(String::from)
                .to_vec(),
            vec![
                Cell::Text("x".into()),
                Cell::Text("dotproduct".into()),
                Cell::Int(3),
                Cell::Null,
                Cell::Null,
                Cell::Null,
            ],
        );
        assert!(IndexCatalogEntry::from_row(&row).is_err());
    }
}
