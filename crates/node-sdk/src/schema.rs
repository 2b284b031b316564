//! Structural contracts checked at the invocation boundary.

use std::fmt;
use std::sync::Arc;

use jsonschema::JSONSchema;
use serde_json::{json, Value};

/// A compiled JSON Schema together with its source document.
///
/// Compiled once at registration; cheap to clone.
#[derive(Clone)]
pub struct Schema {
    raw: Arc<Value>,
    compiled: Arc<JSONSchema>,
}

impl Schema {
    /// Compile `raw`.  The error is a human-readable reason.
    pub fn compile(raw: Value) -> Result<Self, String> {
        let compiled = JSONSchema::compile(&raw).map_err(|e| e.to_string())?;
        Ok(Self {
            raw: Arc::new(raw),
            compiled: Arc::new(compiled),
        })
    }

    /// Default input contract: any JSON object.
    pub fn default_input() -> Value {
        json!({"type": "object", "additionalProperties": true})
    }

    /// Default output contract: anything.
    pub fn default_output() -> Value {
        json!({})
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Check `instance`, joining every violation into one message.
    pub fn validate(&self, instance: &Value) -> Result<(), String> {
        match self.compiled.validate(instance) {
            Ok(()) => Ok(()),
            Err(errors) => {
                let messages: Vec<String> = errors.map(|e| e.to_string()).collect();
                Err(messages.join("; "))
            }
        }
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Schema").field(&self.raw).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_input_accepts_objects_only() {
        let s = Schema::compile(Schema::default_input()).unwrap();
        assert!(s.validate(&json!({"anything": 1})).is_ok());
        assert!(s.validate(&json!([1, 2])).is_err());
    }

    #[test]
    fn default_output_accepts_anything() {
        let s = Schema::compile(Schema::default_output()).unwrap();
        assert!(s.validate(&json!("annotated:text")).is_ok());
        assert!(s.validate(&json!(null)).is_ok());
    }

    #[test]
    fn reports_violations() {
        let s = Schema::compile(json!({
            "type": "object",
            "properties": {"value": {"type": "integer"}},
            "required": ["value"]
        }))
        .unwrap();
        assert!(s.validate(&json!({"value": 3})).is_ok());
        let err = s.validate(&json!({"value": "three"})).unwrap_err();
        assert!(err.contains("integer"), "{err}");
        assert!(s.validate(&json!({})).is_err());
    }

    #[test]
    fn rejects_uncompilable_schema() {
        assert!(Schema::compile(json!({"type": 12})).is_err());
    }
}
