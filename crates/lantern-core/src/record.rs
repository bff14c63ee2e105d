use crate::error::{LanternError, Result};
use crate::pool::{Cell, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A row to be written: `id` is unique per table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    #[serde(default = "empty_object")]
    pub metadata: Value,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

impl VectorRecord {
    pub fn new(id: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            embedding,
            metadata: empty_object(),
        }
    }

    /// `null` metadata is stored as the column default (`{}`).
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = if metadata.is_null() {
            empty_object()
        } else {
            metadata
        };
        self
    }

    pub fn check_dimension(&self, dimensions: usize) -> Result<()> {
        if self.embedding.len() != dimensions {
            return Err(LanternError::validation(format!(
                "vector '{}' has {} dimensions, expected {dimensions}",
                self.id,
                self.embedding.len()
            )));
        }
        Ok(())
    }
}

impl<S: Into<String>> From<(S, Vec<f32>)> for VectorRecord {
    fn from((id, embedding): (S, Vec<f32>)) -> Self {
        VectorRecord::new(id, embedding)
    }
}

impl<S: Into<String>> From<(S, Vec<f32>, Value)> for VectorRecord {
    fn from((id, embedding, metadata): (S, Vec<f32>, Value)) -> Self {
        VectorRecord::new(id, embedding).with_metadata(metadata)
    }
}

/// A row read back. Columns that were not projected stay `None`; `distance`
/// is the raw ranking value (`-1.0` in browse mode and for point reads).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorResult {
    pub id: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub metadata: Option<Value>,
    pub distance: f64,
}

impl VectorResult {
    pub fn from_row(row: &Row) -> Result<Self> {
        let id = match row.get("id") {
            Some(Cell::Text(s)) => Some(s.clone()),
            Some(Cell::Int(i)) => Some(i.to_string()),
            Some(Cell::Null) | None => None,
            Some(other) => return Err(LanternError::decode("id", format!("{other:?}"))),
        };
        let embedding = match row.get("embedding") {
            Some(Cell::Vector(v)) => Some(v.clone()),
            Some(Cell::Null) | None => None,
            Some(other) => {
                return Err(LanternError::decode("embedding", format!("{other:?}")))
            }
        };
        let metadata = match row.get("metadata") {
            Some(Cell::Json(v)) => Some(v.clone()),
            Some(Cell::Null) | None => None,
            Some(other) => return Err(LanternError::decode("metadata", format!("{other:?}"))),
        };
        let distance = match row.get("distance") {
            Some(Cell::Float(f)) => *f,
            Some(Cell::Int(i)) => *i as f64,
            _ => -1.0,
        };
        Ok(Self {
            id,
            embedding,
            metadata,
            distance,
        })
    }
}
