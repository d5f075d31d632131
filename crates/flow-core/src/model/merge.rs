//! Merge de la entrada previa de un step con el payload de resume.
//!
//! Semántica "shallow": las claves del resume reemplazan a las de la entrada.
//! Un resume `null` deja la entrada intacta; cualquier otro valor no-objeto la
//! reemplaza por completo.

use serde_json::Value;

pub fn merge_json(input: &Value, resume: &Value) -> Value {
    match (input, resume) {
        (Value::Object(base), Value::Object(over)) => {
            let mut out = base.clone();
            for (k, v) in over {
                out.insert(k.clone(), v.clone());
            }
            Value::Object(out)
        }
        (base, Value::Null) => base.clone(),
        (_, other) => other.clone(),
    }
}
