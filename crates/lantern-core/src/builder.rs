//! SQL text for one collection table.
//!
//! Every statement the crate sends is produced here or in [`crate::catalog`];
//! identifiers are always interpolated through [`quote_ident`].

use crate::error::{LanternError, Result};
use crate::filter::MetadataFilter;
use crate::params::Param;
use crate::record::VectorRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Rows per multi-row INSERT; keeps the bind count well under the protocol limit.
pub const UPSERT_CHUNK_ROWS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    Euclidean,
    #[default]
    Cosine,
    Hamming,
}

impl DistanceMetric {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "euclidean" | "l2sq" => Ok(DistanceMetric::Euclidean),
            "cosine" | "cos" => Ok(DistanceMetric::Cosine),
            "hamming" => Ok(DistanceMetric::Hamming),
            other => Err(LanternError::InvalidMetric(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Hamming => "hamming",
        }
    }

    pub fn op_class(&self) -> &'static str {
        match self {
            DistanceMetric::Euclidean => "dist_l2sq_ops",
            DistanceMetric::Cosine => "dist_cos_ops",
            DistanceMetric::Hamming => "dist_hamming_ops",
        }
    }

    pub fn operator(&self) -> &'static str {
        match self {
            DistanceMetric::Euclidean => "<->",
            DistanceMetric::Cosine => "<=>",
            DistanceMetric::Hamming => "<#>",
        }
    }

    pub fn function(&self) -> &'static str {
        match self {
            DistanceMetric::Euclidean => "l2sq_dist",
            DistanceMetric::Cosine => "cos_dist",
            DistanceMetric::Hamming => "hamming_dist",
        }
    }

    /// User-facing score for a raw ranking distance: cosine distance becomes
    /// a similarity in `[0, 1]`, other metrics pass through.
    pub fn score(&self, distance: f64) -> f64 {
        match self {
            DistanceMetric::Cosine => (1.0 - distance.max(0.0)).max(0.0),
            _ => distance,
        }
    }
}

impl FromStr for DistanceMetric {
    type Err = LanternError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// HNSW build parameters. Absent values defer to the extension defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HnswParams {
    pub dimension: Option<u32>,
    pub m: Option<u32>,
    pub ef_construction: Option<u32>,
    pub ef_search: Option<u32>,
}

impl HnswParams {
    fn with_clause(&self) -> String {
        let mut parts = Vec::new();
        if let Some(m) = self.m {
            parts.push(format!("m = {m}"));
        }
        if let Some(ef_construction) = self.ef_construction {
            parts.push(format!("ef_construction = {ef_construction}"));
        }
        if let Some(ef) = self.ef_search {
            parts.push(format!("ef = {ef}"));
        }
        if let Some(dim) = self.dimension {
            parts.push(format!("dim = {dim}"));
        }
        if parts.is_empty() {
            String::new()
        } else {
            format!(" WITH ({})", parts.join(", "))
        }
    }
}

/// SQL type of the `id` column. Ids are strings at the API and are cast
/// on the way in and projected back as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdType {
    #[default]
    Text,
    Integer,
    BigInt,
    Uuid,
}

impl IdType {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(IdType::Text),
            "int" | "integer" => Ok(IdType::Integer),
            "bigint" => Ok(IdType::BigInt),
            "uuid" => Ok(IdType::Uuid),
            other => Err(LanternError::Configuration(format!(
                "unsupported id type '{other}'"
            ))),
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            IdType::Text => "TEXT",
            IdType::Integer => "INTEGER",
            IdType::BigInt => "BIGINT",
            IdType::Uuid => "UUID",
        }
    }
}

/// Projectable columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Id,
    Metadata,
    Embedding,
}

impl Field {
    pub const ALL: [Field; 3] = [Field::Id, Field::Metadata, Field::Embedding];

    fn select_expr(&self) -> &'static str {
        match self {
            Field::Id => "id::TEXT AS id",
            Field::Metadata => "metadata",
            Field::Embedding => "embedding",
        }
    }
}

fn select_list(fields: &[Field]) -> String {
    let fields = if fields.is_empty() {
        &Field::ALL[..]
    } else {
        fields
    };
    fields
        .iter()
        .map(Field::select_expr)
        .collect::<Vec<_>>()
        .join(", ")
}

/// A statement template with `$N` placeholders and its ordered bind values.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Param>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<Param>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[derive(Debug, Clone)]
pub struct QueryBuilder {
    table_name: String,
    table: String,
    dimensions: usize,
    id_type: IdType,
    metric: DistanceMetric,
    pgvector_compat: bool,
}

impl QueryBuilder {
    pub fn new(
        table_name: impl Into<String>,
        dimensions: usize,
        id_type: IdType,
        metric: DistanceMetric,
        pgvector_compat: bool,
    ) -> Self {
        let table_name = table_name.into();
        Self {
            table: quote_ident(&table_name),
            table_name,
            dimensions,
            id_type,
            metric,
            pgvector_compat,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn id_cast(&self) -> &'static str {
        self.id_type.sql()
    }

    pub fn row_exists(&self) -> Statement {
        Statement::new(format!("SELECT 1 FROM {} LIMIT 1", self.table))
    }

    pub fn count(&self) -> Statement {
        Statement::new(format!("SELECT COUNT(*) AS cnt FROM {}", self.table))
    }

    pub fn create_table(&self) -> Statement {
        Statement::new(format!(
            "CREATE EXTENSION IF NOT EXISTS lantern; \
             CREATE TABLE IF NOT EXISTS {} (\
             id {} PRIMARY KEY, \
             metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb, \
             embedding REAL[{}] NOT NULL)",
            self.table,
            self.id_type.sql(),
            self.dimensions
        ))
    }

    fn embedding_index_name(&self) -> String {
        quote_ident(&format!("{}_embedding_idx", self.table_name))
    }

    pub fn create_embedding_index(&self, params: &HnswParams) -> Statement {
        Statement::new(format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} USING hnsw (embedding {}){}",
            self.embedding_index_name(),
            self.table,
            self.metric.op_class(),
            params.with_clause()
        ))
    }

    pub fn create_metadata_index(&self) -> Statement {
        Statement::new(format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} USING GIN (metadata jsonb_path_ops)",
            quote_ident(&format!("{}_meta_idx", self.table_name)),
            self.table
        ))
    }

    pub fn drop_embedding_index(&self) -> Statement {
        Statement::new(format!(
            "DROP INDEX IF EXISTS {}",
            self.embedding_index_name()
        ))
    }

    pub fn truncate(&self) -> Statement {
        Statement::new(format!("TRUNCATE {}", self.table))
    }

    pub fn drop_table(&self) -> Statement {
        Statement::new(format!("DROP TABLE IF EXISTS {} CASCADE", self.table))
    }

    /// `INSERT ... ON CONFLICT DO NOTHING`: an existing id keeps its row.
    pub fn upsert(&self, records: &[VectorRecord]) -> Statement {
        let mut params = Vec::with_capacity(records.len() * 3);
        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            let base = params.len();
            rows.push(format!(
                "(${}::{id}, ${}, ${})",
                base + 1,
                base + 2,
                base + 3,
                id = self.id_cast()
            ));
            params.push(Param::Text(record.id.clone()));
            params.push(Param::Vector(record.embedding.clone()));
            params.push(Param::Json(record.metadata.clone()));
        }
        Statement::with_params(
            format!(
                "INSERT INTO {} (id, embedding, metadata) VALUES {} ON CONFLICT DO NOTHING",
                self.table,
                rows.join(", ")
            ),
            params,
        )
    }

    /// One statement per [`UPSERT_CHUNK_ROWS`] records.
    pub fn upsert_batches(&self, records: &[VectorRecord]) -> Vec<Statement> {
        records
            .chunks(UPSERT_CHUNK_ROWS)
            .map(|chunk| self.upsert(chunk))
            .collect()
    }

    pub fn copy_in(&self) -> String {
        format!(
            "COPY {} (id, metadata, embedding) FROM STDIN",
            self.table
        )
    }

    /// Narrows the SET clause to the columns supplied.
    pub fn update_by_id(
        &self,
        id: &str,
        embedding: Option<&[f32]>,
        metadata: Option<&serde_json::Value>,
    ) -> Result<Statement> {
        let mut params = vec![Param::Text(id.to_string())];
        let mut sets = Vec::new();
        if let Some(embedding) = embedding {
            params.push(Param::Vector(embedding.to_vec()));
            sets.push(format!("embedding=${}", params.len()));
        }
        if let Some(metadata) = metadata {
            params.push(Param::Json(metadata.clone()));
            sets.push(format!("metadata=${}", params.len()));
        }
        if sets.is_empty() {
            return Err(LanternError::validation(
                "update needs an embedding or metadata",
            ));
        }
        Ok(Statement::with_params(
            format!(
                "UPDATE {} SET {} WHERE id=$1::{}",
                self.table,
                sets.join(", "),
                self.id_cast()
            ),
            params,
        ))
    }

    pub fn delete_by_ids(&self, ids: &[String]) -> Statement {
        Statement::with_params(
            format!(
                "DELETE FROM {} WHERE id = ANY($1::{}[])",
                self.table,
                self.id_cast()
            ),
            vec![Param::TextArray(ids.to_vec())],
        )
    }

    pub fn delete_by_metadata(&self, filter: &MetadataFilter) -> Result<Statement> {
        let mut params = Vec::new();
        let fragments = filter.compile(&mut params)?;
        Ok(Statement::with_params(
            format!(
                "DELETE FROM {} WHERE {}",
                self.table,
                where_clause(&fragments)
            ),
            params,
        ))
    }

    pub fn get_by_id(&self, id: &str, fields: &[Field]) -> Statement {
        Statement::with_params(
            format!(
                "SELECT {} FROM {} WHERE id = $1::{}",
                select_list(fields),
                self.table,
                self.id_cast()
            ),
            vec![Param::Text(id.to_string())],
        )
    }

    pub fn get_by_ids(&self, ids: &[String], fields: &[Field]) -> Statement {
        Statement::with_params(
            format!(
                "SELECT {} FROM {} WHERE id = ANY($1::{}[])",
                select_list(fields),
                self.table,
                self.id_cast()
            ),
            vec![Param::TextArray(ids.to_vec())],
        )
    }

    /// Nearest-neighbour query. Without a query vector the statement browses
    /// rows in storage order with a constant `-1.0` distance.
    pub fn search(
        &self,
        query: Option<&[f32]>,
        limit: usize,
        filter: Option<&MetadataFilter>,
        fields: &[Field],
    ) -> Result<Statement> {
        let mut params = Vec::new();
        let (distance, order_by) = match query {
            Some(query) => {
                params.push(Param::Vector(query.to_vec()));
                let n = params.len();
                let function = format!("{}(embedding, ${n})", self.metric.function());
                let order = if self.pgvector_compat {
                    format!("embedding {} ${n}", self.metric.operator())
                } else {
                    function.clone()
                };
                (function, Some(format!("ORDER BY {order} ASC")))
            }
            None => ("-1.0".to_string(), None),
        };

        let fragments = match filter {
            Some(filter) if !filter.is_empty() => filter.compile(&mut params)?,
            _ => Vec::new(),
        };

        let mut sql = format!(
            "SELECT {}, ({distance})::FLOAT8 AS distance FROM {} WHERE {}",
            select_list(fields),
            self.table,
            where_clause(&fragments)
        );
        if let Some(order_by) = order_by {
            sql.push(' ');
            sql.push_str(&order_by);
        }
        sql.push_str(&format!(" LIMIT {limit}"));
        Ok(Statement::with_params(sql, params))
    }

    /// Settings applied right before a search statement. They are scoped to
    /// the unit of work's transaction and end with it, so nothing stays on
    /// the pooled connection.
    pub fn search_hints(&self, limit: usize) -> Vec<String> {
        let mut hints = vec![
            format!("SET LOCAL hnsw.init_k = {limit}"),
            "SET LOCAL enable_seqscan = OFF".to_string(),
        ];
        if !self.pgvector_compat {
            hints.push("SET LOCAL lantern.pgvectorcompat = OFF".to_string());
        }
        hints
    }
}

fn where_clause(fragments: &[String]) -> String {
    if fragments.is_empty() {
        "TRUE".to_string()
    } else {
        fragments.join(" AND ")
    }
}

/// Tab/newline delimited COPY payload with columns `(id, metadata, embedding)`.
pub fn encode_copy_rows(records: &[VectorRecord]) -> Vec<u8> {
    let mut out = String::new();
    for (i, record) in records.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&escape_copy_text(&record.id));
        out.push('\t');
        let metadata = record.metadata.to_string();
        out.push_str(&metadata.replace('\\', "\\\\").replace('"', "\\\""));
        out.push('\t');
        out.push('{');
        let values: Vec<String> = record.embedding.iter().map(f32::to_string).collect();
        out.push_str(&values.join(","));
        out.push('}');
    }
    out.into_bytes()
}

fn escape_copy_text(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('\t', "\\t")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}
