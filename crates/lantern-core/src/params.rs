//! Bind values and the placeholder translator.
//!
//! Statement templates carry bare ordinal placeholders (`$1`, `$2`, ...). The
//! backend infers a parameter's type from the surrounding expression, which
//! does not always agree with the Rust value we bind (an `INT` cast next to an
//! `i64`, a `jsonb` column next to a `Value`). The translator rewrites every
//! placeholder into `$N::<type>` keyed by its ordinal so the inferred type is
//! always the bound value's type.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A value bound to one ordinal placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Text(String),
    Int(i64),
    OptionalInt(Option<i64>),
    Float(f64),
    Json(Value),
    Vector(Vec<f32>),
    TextArray(Vec<String>),
    IntArray(Vec<i64>),
    FloatArray(Vec<f64>),
}

impl Param {
    /// SQL type appended to the placeholder this value binds to.
    pub fn sql_type(&self) -> &'static str {
        match self {
            Param::Text(_) => "text",
            Param::Int(_) | Param::OptionalInt(_) => "int8",
            Param::Float(_) => "float8",
            Param::Json(_) => "jsonb",
            Param::Vector(_) => "real[]",
            Param::TextArray(_) => "text[]",
            Param::IntArray(_) => "int8[]",
            Param::FloatArray(_) => "float8[]",
        }
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Param::Text(v.to_string())
    }
}

impl From<String> for Param {
    fn from(v: String) -> Self {
        Param::Text(v)
    }
}

impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Param::Int(v)
    }
}

impl From<Option<u32>> for Param {
    fn from(v: Option<u32>) -> Self {
        Param::OptionalInt(v.map(i64::from))
    }
}

impl From<f64> for Param {
    fn from(v: f64) -> Self {
        Param::Float(v)
    }
}

impl From<Value> for Param {
    fn from(v: Value) -> Self {
        Param::Json(v)
    }
}

impl From<Vec<f32>> for Param {
    fn from(v: Vec<f32>) -> Self {
        Param::Vector(v)
    }
}

impl From<Vec<String>> for Param {
    fn from(v: Vec<String>) -> Self {
        Param::TextArray(v)
    }
}

/// Templates binding more values than this are rewritten on every call
/// and never cached (multi-row inserts, long filters).
pub const MAX_CACHED_PARAMS: usize = 32;

/// Upper bound on memoized templates per translator.
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Memoizing placeholder rewriter.
///
/// Rewrites are cached by the original template text. Callers must guarantee
/// that one template string always comes with the same placeholder shape and
/// the same value kind per ordinal; a template reused with differently typed
/// values gets the first rewrite back. This is a caller contract and is not
/// re-checked on cache hits.
///
/// The cache holds at most `capacity` templates; once full, new templates
/// are rewritten without being stored.
pub struct Translator {
    cache: RwLock<HashMap<String, Arc<str>>>,
    capacity: usize,
}

impl Default for Translator {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }
}

impl Translator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    pub fn translate(&self, template: &str, params: &[Param]) -> Arc<str> {
        if params.is_empty() {
            return Arc::from(template);
        }
        if params.len() > MAX_CACHED_PARAMS {
            return Arc::from(rewrite(template, params));
        }
        if let Some(hit) = self.cache.read().get(template) {
            return hit.clone();
        }
        let rewritten: Arc<str> = Arc::from(rewrite(template, params));
        let mut cache = self.cache.write();
        if let Some(hit) = cache.get(template) {
            return hit.clone();
        }
        if cache.len() < self.capacity {
            cache.insert(template.to_string(), rewritten.clone());
        }
        rewritten
    }

    pub fn cached_templates(&self) -> usize {
        self.cache.read().len()
    }
}

fn rewrite(template: &str, params: &[Param]) -> String {
    let mut out = String::with_capacity(template.len() + params.len() * 8);
    let mut chars = template.char_indices().peekable();
    let mut quote: Option<char> = None;

    while let Some((_, c)) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                out.push(c);
            }
            '$' => {
                let mut digits = String::new();
                while let Some(&(_, d)) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    digits.push(d);
                    chars.next();
                }
                out.push('$');
                out.push_str(&digits);
                let ordinal = digits.parse::<usize>().unwrap_or(0);
                if ordinal >= 1 && ordinal <= params.len() {
                    out.push_str("::");
                    out.push_str(params[ordinal - 1].sql_type());
                }
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rewrites_placeholders_with_bound_types() {
        let t = Translator::new();
        let sql = t.translate(
            "UPDATE \"t\" SET embedding=$2, metadata=$3 WHERE id=$1",
            &[
                Param::from("a"),
                Param::Vector(vec![1.0]),
                Param::Json(json!({})),
            ],
        );
        assert_eq!(
            &*sql,
            "UPDATE \"t\" SET embedding=$2::real[], metadata=$3::jsonb WHERE id=$1::text"
        );
    }

    #[test]
    fn multi_digit_ordinals_are_not_confused() {
        let params: Vec<Param> = (0..12).map(Param::Int).collect();
        let sql = Translator::new().translate("VALUES ($1, $10, $12)", &params);
        assert_eq!(&*sql, "VALUES ($1::int8, $10::int8, $12::int8)");
    }

    #[test]
    fn quoted_text_is_left_alone() {
        let sql = Translator::new().translate(
            "SELECT '$1' AS \"$1\", $1 FROM x",
            &[Param::Float(1.0)],
        );
        assert_eq!(&*sql, "SELECT '$1' AS \"$1\", $1::float8 FROM x");
    }

    #[test]
    fn without_params_it_is_identity() {
        let t = Translator::new();
        assert_eq!(&*t.translate("SELECT $1", &[]), "SELECT $1");
        assert_eq!(&*t.translate("SELECT 1", &[Param::Int(1)]), "SELECT 1");
        assert_eq!(&*t.translate("SELECT $0, $", &[Param::Int(1)]), "SELECT $0, $");
    }

    #[test]
    fn wide_templates_are_not_cached() {
        let t = Translator::new();
        for rows in 1..=300usize {
            let placeholders: Vec<String> = (1..=rows * 3).map(|n| format!("${n}")).collect();
            let params = vec![Param::Int(0); rows * 3];
            let sql = t.translate(&format!("VALUES ({})", placeholders.join(", ")), &params);
            assert!(sql.ends_with(&format!("${}::int8)", rows * 3)));
        }
        assert_eq!(t.cached_templates(), MAX_CACHED_PARAMS / 3);
    }

    #[test]
    fn cache_stops_growing_at_capacity() {
        let t = Translator::with_capacity(2);
        for i in 0..5 {
            let sql = t.translate(&format!("SELECT $1, {i}"), &[Param::Int(1)]);
            assert_eq!(&*sql, format!("SELECT $1::int8, {i}"));
        }
        assert_eq!(t.cached_templates(), 2);
        // cached entries still hit
        let first = t.translate("SELECT $1, 0", &[Param::Int(1)]);
        assert!(Arc::ptr_eq(&first, &t.translate("SELECT $1, 0", &[Param::Int(1)])));
    }

    #[test]
    fn rewrites_are_memoized_by_template() {
        let t = Translator::new();
        let first = t.translate("SELECT $1", &[Param::Int(1)]);
        // Same template, different kind: the cached rewrite wins.
        let second = t.translate("SELECT $1", &[Param::from("x")]);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(t.cached_templates(), 1);
        t.translate("SELECT $1, $2", &[Param::Int(1), Param::Int(2)]);
        assert_eq!(t.cached_templates(), 2);
    }
}
