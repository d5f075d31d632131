//! Validación de payloads contra JSON Schema.
//!
//! Los schemas se compilan una sola vez al construir el `PipelineDefinition`
//! (o al registrar una tool); en cada llamada sólo se valida.

use std::sync::Arc;

use jsonschema::Validator;
use schemars::JsonSchema;
use serde_json::Value;

use crate::errors::FlowError;

/// Schema compilado, barato de clonar.
#[derive(Clone)]
pub struct CompiledSchema {
    raw: Value,
    validator: Arc<Validator>,
}

impl std::fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledSchema").field("raw", &self.raw).finish()
    }
}

impl CompiledSchema {
    pub fn compile(raw: Value) -> Result<Self, FlowError> {
        let validator = Validator::new(&raw).map_err(|e| FlowError::InvalidDefinition(format!("invalid schema: {e}")))?;
        Ok(Self { raw,
                  validator: Arc::new(validator) })
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Valida `value`; `what` nombra el payload en el mensaje de error.
    pub fn validate(&self, what: &str, value: &Value) -> Result<(), FlowError> {
        if self.validator.is_valid(value) {
            return Ok(());
        }
        let errors: Vec<String> = self.validator.iter_errors(value).map(|e| e.to_string()).collect();
        Err(FlowError::schema(what, errors.join("; ")))
    }
}

/// JSON Schema derivado de un tipo Rust (sin la clave `$schema`).
pub fn schema_of<T: JsonSchema>() -> Value {
    let mut v = serde_json::to_value(schemars::schema_for!(T)).unwrap_or_else(|_| serde_json::json!({"type": "object"}));
    if let Some(obj) = v.as_object_mut() {
        obj.remove("$schema");
    }
    v
}

/// Valida contra un schema opcional (sin schema todo es válido).
pub fn validate_optional(schema: Option<&CompiledSchema>, what: &str, value: &Value) -> Result<(), FlowError> {
    match schema {
        Some(s) => s.validate(what, value),
        None => Ok(()),
    }
}

fn property_names(schema: &Value) -> Option<Vec<&str>> {
    schema.get("properties")
          .and_then(Value::as_object)
          .map(|props| props.keys().map(String::as_str).collect())
}

fn required_names(schema: &Value) -> Vec<&str> {
    schema.get("required")
          .and_then(Value::as_array)
          .map(|req| req.iter().filter_map(Value::as_str).collect())
          .unwrap_or_default()
}

/// Chequeo estructural entre pasos adyacentes: toda propiedad requerida por la
/// entrada del siguiente step debe estar declarada en la salida del anterior.
/// Si la salida no declara `properties` no hay nada que comparar.
pub fn check_adjacent(prev_id: &str, output: &Value, next_id: &str, input: &Value) -> Result<(), FlowError> {
    let Some(declared) = property_names(output) else {
        return Ok(());
    };
    let missing: Vec<&str> = required_names(input).into_iter()
                                                  .filter(|r| !declared.contains(r))
                                                  .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(FlowError::InvalidDefinition(format!("step '{next_id}' requires {missing:?} which '{prev_id}' does not produce")))
    }
}
