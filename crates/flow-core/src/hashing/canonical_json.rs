//! JSON canónico: claves de objeto ordenadas, sin espacios.
//!
//! Dos valores semánticamente iguales producen el mismo string, así el hash de
//! una definición no depende del orden en que `serde_json` insertó las claves.

use serde_json::Value;
use std::collections::BTreeMap;

pub fn to_canonical_json(value: &Value) -> String {
    match value {
        Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(to_canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        Value::Object(map) => {
            let tree: BTreeMap<&String, String> = map.iter().map(|(k, v)| (k, to_canonical_json(v))).collect();
            let items: Vec<String> = tree.into_iter()
                                         .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), v))
                                         .collect();
            format!("{{{}}}", items.join(","))
        }
        // escalares: Display de `Value` ya es JSON válido (strings escapados)
        scalar => scalar.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_keys_are_sorted_recursively() {
        let a = json!({"b": 1, "a": {"y": [1, "x"], "x": null}});
        assert_eq!(to_canonical_json(&a), r#"{"a":{"x":null,"y":[1,"x"]},"b":1}"#);
    }

    #[test]
    fn strings_are_escaped() {
        assert_eq!(to_canonical_json(&json!("a\"b")), r#""a\"b""#);
    }
}
