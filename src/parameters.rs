use crate::{
    result::{ConduitError, Result},
    str_utils::is_in_quotes,
};
use regex::Regex;
use serde_json::{Map, Value};

// Regex compiled once as a lazy static for performance
pub static PARAMETER_REGEX: once_cell::sync::Lazy<Regex> =
    once_cell::sync::Lazy::new(|| Regex::new(r"@(\w+)").unwrap());

/// Database-agnostic parameter value decoded from a JSON request value
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
    Blob(Vec<u8>),
}

impl ParamValue {
    /// Decode a JSON request value. Arrays must contain byte-range numbers and
    /// decode to blobs; objects are rejected.
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(ParamValue::Null),
            Value::Bool(flag) => Ok(ParamValue::Boolean(*flag)),
            Value::Number(number) => {
                if let Some(int_val) = number.as_i64() {
                    Ok(ParamValue::Integer(int_val))
                } else if let Some(float_val) = number.as_f64() {
                    Ok(ParamValue::Float(float_val))
                } else {
                    Err(ConduitError::new_type_mismatch(
                        "integer or float",
                        value.to_string(),
                    ))
                }
            }
            Value::String(text) => Ok(ParamValue::Text(text.clone())),
            Value::Array(items) => {
                let mut bytes = Vec::with_capacity(items.len());
                for item in items {
                    let byte = item
                        .as_u64()
                        .filter(|b| *b <= u8::MAX as u64)
                        .ok_or_else(|| {
                            ConduitError::new_type_mismatch("array of bytes", value.to_string())
                        })?;
                    bytes.push(byte as u8);
                }
                Ok(ParamValue::Blob(bytes))
            }
            Value::Object(_) => Err(ConduitError::new_type_mismatch(
                "scalar or byte array",
                value.to_string(),
            )),
        }
    }
}

// Implement trait for converting generic ParamValue to SQLite-specific ToSql
#[cfg(feature = "sqlite")]
impl From<ParamValue> for Box<dyn rusqlite::ToSql> {
    fn from(param_value: ParamValue) -> Self {
        match param_value {
            ParamValue::Null => Box::new(rusqlite::types::Null),
            ParamValue::Integer(i) => Box::new(i),
            ParamValue::Float(f) => Box::new(f),
            ParamValue::Text(s) => Box::new(s),
            ParamValue::Boolean(b) => Box::new(b as i64), // SQLite represents booleans as integers
            ParamValue::Blob(bytes) => Box::new(bytes),
        }
    }
}

/// Convert a generic ParamValue directly to PostgreSQL ToSql trait object.
/// Integers bind as i32 when they fit so INT4 comparisons type-check.
#[cfg(feature = "postgresql")]
pub fn to_postgres_sql(param_value: ParamValue) -> Box<dyn tokio_postgres::types::ToSql + Sync + Send> {
    match param_value {
        ParamValue::Null => Box::new(Option::<String>::None),
        ParamValue::Integer(i) => match i32::try_from(i) {
            Ok(small) => Box::new(small),
            Err(_) => Box::new(i),
        },
        ParamValue::Float(f) => Box::new(f),
        ParamValue::Text(s) => Box::new(s),
        ParamValue::Boolean(b) => Box::new(b),
        ParamValue::Blob(bytes) => Box::new(bytes),
    }
}

/// Extract unique parameter names in order of first appearance, skipping quoted text
pub fn extract_parameters(statement: &str) -> Vec<String> {
    let mut params = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for cap in PARAMETER_REGEX.captures_iter(statement) {
        if let Some(named_match) = cap.get(0) {
            if !is_in_quotes(statement, named_match.start()) {
                let name = cap.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
                if !name.is_empty() && seen.insert(name.clone()) {
                    params.push(name);
                }
            }
        }
    }

    params
}

/// A statement rendered with driver placeholders plus its values in placeholder order
#[derive(Debug, Clone)]
pub struct BoundStatement {
    pub sql: String,
    pub values: Vec<(String, ParamValue)>,
}

/// Render `@name` references through `placeholder_gen` (1-based index, name)
/// and resolve each name against the request parameters in first-appearance
/// order. Names absent from the map are an error; map entries the SQL never
/// references are ignored.
pub fn bind_statement(
    sql: &str,
    params: &Map<String, Value>,
    placeholder_gen: impl Fn(usize, &str) -> String,
) -> Result<BoundStatement> {
    let names = extract_parameters(sql);
    let mut values = Vec::with_capacity(names.len());
    for name in &names {
        let value = params
            .get(name)
            .ok_or_else(|| ConduitError::new_parameter_not_provided(name.clone()))?;
        values.push((name.clone(), ParamValue::from_json(value)?));
    }

    // Replace longest names first so @id does not corrupt @id_ext
    let mut order: Vec<usize> = (0..names.len()).collect();
    order.sort_by_key(|&idx| std::cmp::Reverse(names[idx].len()));

    let mut bound_sql = sql.to_string();
    for idx in order {
        let name = &names[idx];
        bound_sql = bound_sql.replace(&format!("@{name}"), &placeholder_gen(idx + 1, name));
    }

    Ok(BoundStatement {
        sql: bound_sql,
        values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_keeps_first_appearance_order_and_skips_quotes() {
        let names =
            extract_parameters("select * from t where b = @beta and a = @alpha and c = '@gamma'");
        assert_eq!(names, vec!["beta".to_string(), "alpha".to_string()]);
    }

    #[test]
    fn extract_dedups_repeated_names() {
        let names = extract_parameters("select @id, @name, @id");
        assert_eq!(names, vec!["id".to_string(), "name".to_string()]);
    }

    #[test]
    fn bind_renders_positional_placeholders_in_order() {
        let params = json!({"id": 3, "name": "ada"});
        let bound = bind_statement(
            "update t set name = @name where id = @id",
            params.as_object().unwrap(),
            |idx, _| format!("${idx}"),
        )
        .unwrap();

        assert_eq!(bound.sql, "update t set name = $1 where id = $2");
        assert_eq!(bound.values[0].0, "name");
        assert_eq!(bound.values[0].1, ParamValue::Text("ada".to_string()));
        assert_eq!(bound.values[1].1, ParamValue::Integer(3));
    }

    #[test]
    fn bind_renders_named_placeholders() {
        let params = json!({"id": 1});
        let bound = bind_statement(
            "select * from t where id = @id",
            params.as_object().unwrap(),
            |_, name| format!(":{name}"),
        )
        .unwrap();
        assert_eq!(bound.sql, "select * from t where id = :id");
    }

    #[test]
    fn bind_keeps_prefixed_names_intact() {
        let params = json!({"id": 1, "id_ext": 2});
        let bound = bind_statement(
            "select * from t where a = @id and b = @id_ext",
            params.as_object().unwrap(),
            |idx, _| format!("${idx}"),
        )
        .unwrap();
        assert_eq!(bound.sql, "select * from t where a = $1 and b = $2");
    }

    #[test]
    fn bind_missing_parameter_is_an_error() {
        let params = json!({});
        let err = bind_statement(
            "select * from t where id = @id",
            params.as_object().unwrap(),
            |idx, _| format!("${idx}"),
        )
        .unwrap_err();
        assert!(matches!(err, ConduitError::ParameterNotProvided(name) if name == "id"));
    }

    #[test]
    fn param_value_decodes_json_scalars() {
        assert_eq!(ParamValue::from_json(&json!(null)).unwrap(), ParamValue::Null);
        assert_eq!(
            ParamValue::from_json(&json!(true)).unwrap(),
            ParamValue::Boolean(true)
        );
        assert_eq!(
            ParamValue::from_json(&json!(42)).unwrap(),
            ParamValue::Integer(42)
        );
        assert_eq!(
            ParamValue::from_json(&json!(2.5)).unwrap(),
            ParamValue::Float(2.5)
        );
        assert_eq!(
            ParamValue::from_json(&json!("hi")).unwrap(),
            ParamValue::Text("hi".to_string())
        );
    }

    #[test]
    fn param_value_decodes_byte_arrays_as_blobs() {
        assert_eq!(
            ParamValue::from_json(&json!([1, 2, 255])).unwrap(),
            ParamValue::Blob(vec![1, 2, 255])
        );
        assert!(ParamValue::from_json(&json!([1, 256])).is_err());
        assert!(ParamValue::from_json(&json!({"a": 1})).is_err());
    }
}
