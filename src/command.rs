use crate::result::{ConduitError, Result};
use serde_json::{Map, Value};

/// Discriminates ad-hoc command text from a stored procedure invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandKind {
    #[default]
    Text,
    Procedure,
}

/// One SQL statement: command text, named parameters and a kind discriminator.
/// Parameters are referenced in the text as `@name` and resolved from the map
/// at execution time. A command is never mutated once handed to an executor.
#[derive(Debug, Clone)]
pub struct Command {
    pub sql: String,
    pub params: Map<String, Value>,
    pub kind: CommandKind,
}

impl Command {
    /// Ad-hoc command text.
    pub fn text(sql: impl Into<String>) -> Self {
        Command {
            sql: sql.into(),
            params: Map::new(),
            kind: CommandKind::Text,
        }
    }

    /// Stored procedure invocation; `name` is the procedure name, parameters
    /// are passed in map order.
    pub fn procedure(name: impl Into<String>) -> Self {
        Command {
            sql: name.into(),
            params: Map::new(),
            kind: CommandKind::Procedure,
        }
    }

    /// Add one named parameter.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Merge a parameter map into the command.
    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params.extend(params);
        self
    }
}

/// Coerce a caller-supplied JSON value into a named-parameter map.
/// Accepts an object, or null for a parameterless call.
pub fn params_object(value: &Value) -> Result<Map<String, Value>> {
    match value {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map.clone()),
        other => Err(ConduitError::new_type_mismatch("object", other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_collects_params_in_map() {
        let cmd = Command::text("select * from users where id = @id and name = @name")
            .param("id", 7)
            .param("name", "ada");

        assert_eq!(cmd.kind, CommandKind::Text);
        assert_eq!(cmd.params.get("id"), Some(&json!(7)));
        assert_eq!(cmd.params.get("name"), Some(&json!("ada")));
    }

    #[test]
    fn with_params_merges_a_map() {
        let extra = params_object(&json!({"limit": 10, "offset": 0})).unwrap();
        let cmd = Command::text("select * from users limit @limit offset @offset")
            .with_params(extra);
        assert_eq!(cmd.params.get("limit"), Some(&json!(10)));
        assert_eq!(cmd.params.get("offset"), Some(&json!(0)));
    }

    #[test]
    fn params_object_accepts_null_and_object() {
        assert!(params_object(&Value::Null).unwrap().is_empty());

        let map = params_object(&json!({"a": 1})).unwrap();
        assert_eq!(map.get("a"), Some(&json!(1)));
    }

    #[test]
    fn params_object_rejects_non_objects() {
        let err = params_object(&json!([1, 2])).unwrap_err();
        assert!(matches!(err, ConduitError::ParameterTypeMismatch { .. }));
    }
}
