//! Request and response shapes of the Pinecone-compatible surface.

use lantern_core::{LanternError, MetadataFilter, Result, VectorRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A vector as Pinecone returns it from `fetch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vector {
    pub id: String,
    #[serde(default)]
    pub values: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Vector {
    pub fn new(id: impl Into<String>, values: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            values,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// The input shapes `upsert` accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertVector {
    /// `{"id": .., "values": [..], "metadata": {..}}`
    Keyed(Value),
    Tuple(String, Vec<f32>, Option<Value>),
    Native(Vector),
}

impl UpsertVector {
    pub fn into_record(self) -> Result<VectorRecord> {
        let (id, values, metadata) = match self {
            UpsertVector::Keyed(value) => keyed_parts(value)?,
            UpsertVector::Tuple(id, values, metadata) => (id, values, metadata),
            UpsertVector::Native(v) => (v.id, v.values, v.metadata),
        };
        Ok(VectorRecord::new(id, values).with_metadata(metadata.unwrap_or(Value::Null)))
    }
}

fn keyed_parts(value: Value) -> Result<(String, Vec<f32>, Option<Value>)> {
    let Value::Object(mut object) = value else {
        return Err(LanternError::Validation(
            "keyed vector must be a JSON object".into(),
        ));
    };
    let id = match object.remove("id") {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => {
            return Err(LanternError::Validation(
                "keyed vector needs a string or numeric id".into(),
            ))
        }
    };
    let values = match object.remove("values") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| {
                LanternError::Validation(format!("vector '{id}' has non-numeric values"))
            })?,
        _ => {
            return Err(LanternError::Validation(format!(
                "vector '{id}' is missing values"
            )))
        }
    };
    Ok((id, values, object.remove("metadata")))
}

impl From<Value> for UpsertVector {
    fn from(v: Value) -> Self {
        UpsertVector::Keyed(v)
    }
}

impl From<Vector> for UpsertVector {
    fn from(v: Vector) -> Self {
        UpsertVector::Native(v)
    }
}

impl<S: Into<String>> From<(S, Vec<f32>)> for UpsertVector {
    fn from((id, values): (S, Vec<f32>)) -> Self {
        UpsertVector::Tuple(id.into(), values, None)
    }
}

impl<S: Into<String>> From<(S, Vec<f32>, Value)> for UpsertVector {
    fn from((id, values, metadata): (S, Vec<f32>, Value)) -> Self {
        UpsertVector::Tuple(id.into(), values, Some(metadata))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub vector: Option<Vec<f32>>,
    /// Query by a stored vector instead of an explicit one.
    pub id: Option<String>,
    pub top_k: usize,
    pub namespace: String,
    pub include_values: bool,
    pub include_metadata: bool,
    pub filter: Option<MetadataFilter>,
}

impl Default for QueryRequest {
    fn default() -> Self {
        Self {
            vector: None,
            id: None,
            top_k: 10,
            namespace: String::new(),
            include_values: false,
            include_metadata: false,
            filter: None,
        }
    }
}

impl QueryRequest {
    pub fn by_vector(vector: Vec<f32>) -> Self {
        Self {
            vector: Some(vector),
            ..Default::default()
        }
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn include_values(mut self, include: bool) -> Self {
        self.include_values = include;
        self
    }

    pub fn include_metadata(mut self, include: bool) -> Self {
        self.include_metadata = include;
        self
    }

    pub fn filter(mut self, filter: MetadataFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMatch {
    pub id: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub namespace: String,
    pub matches: Vec<QueryMatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResponse {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub vectors: BTreeMap<String, Vector>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceStats {
    pub vector_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    #[serde(default)]
    pub dimension: usize,
    #[serde(default)]
    pub index_fullness: f64,
    #[serde(default)]
    pub total_vector_count: u64,
    #[serde(default)]
    pub namespaces: BTreeMap<String, NamespaceStats>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStatus {
    pub ready: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDescription {
    pub name: String,
    pub dimension: usize,
    pub metric: String,
    pub status: IndexStatus,
}
