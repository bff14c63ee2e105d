//! Flat metadata filter DSL and its compiler to SQL boolean fragments.
//!
//! A filter maps top-level metadata keys to either a literal (containment /
//! equality) or a single-operator predicate object such as `{"$gt": 3}`.
//! Keys always combine with AND; there is no OR and no nesting.
//!
//! When no key uses the predicate form the whole filter compiles to one
//! `metadata @> (...)` containment fragment. As soon as one key does, every
//! key compiles to its own comparison. The cast type of a predicate follows
//! the kind of the predicate value (integer → `INT`, float → `FLOAT`,
//! anything else → `TEXT`), never a declared column type, so a number stored
//! as a JSON string compares as text only if the filter value is text too.

use crate::error::{LanternError, Result};
use crate::params::Param;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    Nin,
}

impl PredicateOp {
    pub fn parse(token: &str) -> Result<Self> {
        match token {
            "$eq" => Ok(PredicateOp::Eq),
            "$neq" => Ok(PredicateOp::Neq),
            "$lt" => Ok(PredicateOp::Lt),
            "$lte" => Ok(PredicateOp::Lte),
            "$gt" => Ok(PredicateOp::Gt),
            "$gte" => Ok(PredicateOp::Gte),
            "$in" => Ok(PredicateOp::In),
            "$nin" => Ok(PredicateOp::Nin),
            other => Err(LanternError::UnsupportedPredicate(other.to_string())),
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            PredicateOp::Eq => "$eq",
            PredicateOp::Neq => "$neq",
            PredicateOp::Lt => "$lt",
            PredicateOp::Lte => "$lte",
            PredicateOp::Gt => "$gt",
            PredicateOp::Gte => "$gte",
            PredicateOp::In => "$in",
            PredicateOp::Nin => "$nin",
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            PredicateOp::Eq => "=",
            PredicateOp::Neq => "!=",
            PredicateOp::Lt => "<",
            PredicateOp::Lte => "<=",
            PredicateOp::Gt => ">",
            PredicateOp::Gte => ">=",
            PredicateOp::In => "IN",
            PredicateOp::Nin => "NOT IN",
        }
    }

    fn takes_list(&self) -> bool {
        matches!(self, PredicateOp::In | PredicateOp::Nin)
    }
}

/// Supported predicate value kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    IntList(Vec<i64>),
    FloatList(Vec<f64>),
    TextList(Vec<String>),
}

impl FilterValue {
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Number(n) => Ok(match n.as_i64() {
                Some(i) => FilterValue::Int(i),
                None => FilterValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            }),
            Value::String(s) => Ok(FilterValue::Text(s.clone())),
            Value::Bool(b) => Ok(FilterValue::Bool(*b)),
            Value::Array(items) => Self::list_from_json(items),
            Value::Null | Value::Object(_) => Err(LanternError::validation(format!(
                "unsupported predicate value {value}"
            ))),
        }
    }

    fn list_from_json(items: &[Value]) -> Result<Self> {
        if !items.is_empty() && items.iter().all(|v| v.as_i64().is_some()) {
            return Ok(FilterValue::IntList(
                items.iter().filter_map(Value::as_i64).collect(),
            ));
        }
        if !items.is_empty() && items.iter().all(Value::is_number) {
            return Ok(FilterValue::FloatList(
                items.iter().filter_map(Value::as_f64).collect(),
            ));
        }
        let mut texts = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::String(s) => texts.push(s.clone()),
                Value::Number(_) | Value::Bool(_) => texts.push(item.to_string()),
                _ => {
                    return Err(LanternError::validation(format!(
                        "unsupported list element {item}"
                    )))
                }
            }
        }
        Ok(FilterValue::TextList(texts))
    }

    fn cast(&self) -> &'static str {
        match self {
            FilterValue::Int(_) | FilterValue::IntList(_) => "INT",
            FilterValue::Float(_) | FilterValue::FloatList(_) => "FLOAT",
            _ => "TEXT",
        }
    }

    fn is_list(&self) -> bool {
        matches!(
            self,
            FilterValue::IntList(_) | FilterValue::FloatList(_) | FilterValue::TextList(_)
        )
    }

    fn into_param(self) -> Param {
        match self {
            FilterValue::Int(v) => Param::Int(v),
            FilterValue::Float(v) => Param::Float(v),
            FilterValue::Text(v) => Param::Text(v),
            FilterValue::Bool(v) => Param::Text(v.to_string()),
            FilterValue::IntList(v) => Param::IntArray(v),
            FilterValue::FloatList(v) => Param::FloatArray(v),
            FilterValue::TextList(v) => Param::TextArray(v),
        }
    }
}

impl From<i64> for FilterValue {
    fn from(v: i64) -> Self {
        FilterValue::Int(v)
    }
}

impl From<i32> for FilterValue {
    fn from(v: i32) -> Self {
        FilterValue::Int(v as i64)
    }
}

impl From<f64> for FilterValue {
    fn from(v: f64) -> Self {
        FilterValue::Float(v)
    }
}

impl From<&str> for FilterValue {
    fn from(v: &str) -> Self {
        FilterValue::Text(v.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(v: String) -> Self {
        FilterValue::Text(v)
    }
}

impl From<bool> for FilterValue {
    fn from(v: bool) -> Self {
        FilterValue::Bool(v)
    }
}

impl From<Vec<&str>> for FilterValue {
    fn from(v: Vec<&str>) -> Self {
        FilterValue::TextList(v.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<i64>> for FilterValue {
    fn from(v: Vec<i64>) -> Self {
        FilterValue::IntList(v)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterCondition {
    Literal(Value),
    Predicate { op: PredicateOp, value: FilterValue },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    conditions: Vec<(String, FilterCondition)>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Containment / equality on a top-level key.
    pub fn eq(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions
            .push((key.into(), FilterCondition::Literal(value.into())));
        self
    }

    pub fn predicate(
        mut self,
        key: impl Into<String>,
        op: PredicateOp,
        value: impl Into<FilterValue>,
    ) -> Self {
        self.conditions.push((
            key.into(),
            FilterCondition::Predicate {
                op,
                value: value.into(),
            },
        ));
        self
    }

    /// Parse the JSON form, e.g. `{"genre": "drama", "year": {"$gte": 2020}}`.
    /// Any object value is read as a predicate object.
    pub fn from_json(value: &Value) -> Result<Self> {
        let Some(obj) = value.as_object() else {
            return Err(LanternError::validation("metadata filter must be an object"));
        };
        let mut filter = Self::new();
        for (key, val) in obj {
            let condition = match val {
                Value::Object(pred) => Self::parse_predicate(pred)?,
                other => FilterCondition::Literal(other.clone()),
            };
            filter.conditions.push((key.clone(), condition));
        }
        Ok(filter)
    }

    fn parse_predicate(pred: &Map<String, Value>) -> Result<FilterCondition> {
        let mut entries = pred.iter();
        let (Some((token, value)), None) = (entries.next(), entries.next()) else {
            return Err(LanternError::validation(
                "predicate object must hold exactly one operator",
            ));
        };
        Ok(FilterCondition::Predicate {
            op: PredicateOp::parse(token)?,
            value: FilterValue::from_json(value)?,
        })
    }

    pub fn conditions(&self) -> &[(String, FilterCondition)] {
        &self.conditions
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    fn has_predicate(&self) -> bool {
        self.conditions
            .iter()
            .any(|(_, c)| matches!(c, FilterCondition::Predicate { .. }))
    }

    /// Compile into AND-able fragments, appending bind values to `params`.
    /// Placeholder ordinals continue after whatever `params` already holds.
    pub fn compile(&self, params: &mut Vec<Param>) -> Result<Vec<String>> {
        if !self.has_predicate() {
            let object: Map<String, Value> = self
                .conditions
                .iter()
                .filter_map(|(k, c)| match c {
                    FilterCondition::Literal(v) => Some((k.clone(), v.clone())),
                    FilterCondition::Predicate { .. } => None,
                })
                .collect();
            params.push(Param::Json(Value::Object(object)));
            return Ok(vec![format!("metadata @> (${})", params.len())]);
        }

        let mut fragments = Vec::with_capacity(self.conditions.len());
        for (key, condition) in &self.conditions {
            let key = quote_literal(key);
            match condition {
                FilterCondition::Literal(value) => {
                    params.push(Param::Text(literal_text(value)));
                    fragments.push(format!("(metadata->>{key}) = (${})", params.len()));
                }
                FilterCondition::Predicate { op, value } => {
                    if value.is_list() && !op.takes_list() {
                        return Err(LanternError::validation(format!(
                            "{} does not accept a list value",
                            op.token()
                        )));
                    }
                    let cast = value.cast();
                    let list = value.is_list();
                    params.push(value.clone().into_param());
                    let n = params.len();
                    let rhs = if list {
                        format!("(SELECT UNNEST(${n}))")
                    } else {
                        format!("(${n})")
                    };
                    fragments.push(format!("(metadata->>{key})::{cast} {} {rhs}", op.sql()));
                }
            }
        }
        Ok(fragments)
    }
}

fn literal_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn literal_only_filter_is_one_containment_fragment() {
        let raw = json!({"name": "a", "year": 2020, "tags": ["x"]});
        let filter = MetadataFilter::from_json(&raw).unwrap();
        let mut params = vec![Param::Vector(vec![0.0, 1.0])];
        let fragments = filter.compile(&mut params).unwrap();
        assert_eq!(fragments, vec!["metadata @> ($2)".to_string()]);
        assert_eq!(params.len(), 2);
        assert_eq!(params[1], Param::Json(raw));
    }

    #[test]
    fn any_predicate_switches_to_per_key_comparison() {
        let filter = MetadataFilter::new()
            .eq("name", "a")
            .predicate("year", PredicateOp::Gte, 2020)
            .predicate("score", PredicateOp::Lt, 0.5)
            .predicate("lang", PredicateOp::Neq, "en");
        let mut params = Vec::new();
        let fragments = filter.compile(&mut params).unwrap();
        assert_eq!(fragments.len(), filter.len());
        assert_eq!(
            fragments,
            vec![
                "(metadata->>'name') = ($1)",
                "(metadata->>'year')::INT >= ($2)",
                "(metadata->>'score')::FLOAT < ($3)",
                "(metadata->>'lang')::TEXT != ($4)",
            ]
        );
        assert_eq!(
            params,
            vec![
                Param::Text("a".into()),
                Param::Int(2020),
                Param::Float(0.5),
                Param::Text("en".into()),
            ]
        );
    }

    #[test]
    fn literal_numbers_bind_as_text_in_comparison_mode() {
        let raw = json!({"page": 3, "year": {"$gt": 1}});
        let mut params = Vec::new();
        let fragments = MetadataFilter::from_json(&raw)
            .unwrap()
            .compile(&mut params)
            .unwrap();
        assert_eq!(fragments[0], "(metadata->>'page') = ($1)");
        assert_eq!(params[0], Param::Text("3".into()));
    }

    #[test]
    fn list_values_use_membership() {
        let raw = json!({"genre": {"$in": ["a", "b"]}, "year": {"$nin": [1, 2]}});
        let mut params = Vec::new();
        let fragments = MetadataFilter::from_json(&raw)
            .unwrap()
            .compile(&mut params)
            .unwrap();
        assert_eq!(
            fragments,
            vec![
                "(metadata->>'genre')::TEXT IN (SELECT UNNEST($1))",
                "(metadata->>'year')::INT NOT IN (SELECT UNNEST($2))",
            ]
        );
        assert_eq!(params[1], Param::IntArray(vec![1, 2]));
    }

    #[test]
    fn list_with_scalar_operator_is_rejected() {
        let raw = json!({"year": {"$gt": [1, 2]}});
        let err = MetadataFilter::from_json(&raw)
            .unwrap()
            .compile(&mut Vec::new())
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn unknown_operator_fails_fast() {
        let err = MetadataFilter::from_json(&json!({"year": {"$between": 1}})).unwrap_err();
        assert!(matches!(err, LanternError::UnsupportedPredicate(ref op) if op == "$between"));
        assert!(err.is_configuration());
    }

    #[test]
    fn predicate_object_needs_exactly_one_operator() {
        let err =
            MetadataFilter::from_json(&json!({"year": {"$gt": 1, "$lt": 5}})).unwrap_err();
        assert!(err.is_validation());
        assert!(MetadataFilter::from_json(&json!({"year": {}})).is_err());
    }

    #[test]
    fn keys_are_escaped_as_literals() {
        let filter = MetadataFilter::new().predicate("it's", PredicateOp::Eq, 1);
        let fragments = filter.compile(&mut Vec::new()).unwrap();
        assert_eq!(fragments[0], "(metadata->>'it''s')::INT = ($1)");
    }

    #[test]
    fn non_object_filter_is_rejected() {
        assert!(MetadataFilter::from_json(&json!([1, 2])).is_err());
    }
}
