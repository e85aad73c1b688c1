//! Conformance of values against declared schema shapes.
//!
//! The port treats conformance as a collaborator: it hands a declared shape
//! and a provider-supplied value to a [`Conform`] implementation and emits
//! whatever comes back. [`SchemaConformer`] is the default.

use serde_json::{Map, Number, Value};

/// Coerce a value so it fits a declared template.
pub trait Conform: Send + Sync {
    fn conform(&self, template: &Value, value: &Value) -> Value;
}

impl<F> Conform for F
where
    F: Fn(&Value, &Value) -> Value + Send + Sync,
{
    fn conform(&self, template: &Value, value: &Value) -> Value {
        self(template, value)
    }
}

/// Default conformance over type tags, list templates and object templates.
///
/// - `"string"`, `"number"`, `"boolean"`, `"object"`, `"array"` coerce.
/// - `"data"`, `"buffer"`, `"proxy"`, `"any"` and unknown tags pass through.
/// - `["array", T]` conforms every element against `T`; any other list
///   template conforms positionally.
/// - Object templates keep only declared keys that are present.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaConformer;

impl Conform for SchemaConformer {
    fn conform(&self, template: &Value, value: &Value) -> Value {
        conform_value(template, value)
    }
}

fn conform_value(template: &Value, value: &Value) -> Value {
    match template {
        Value::String(tag) => conform_tag(tag, value),
        Value::Array(items) => conform_list(items, value),
        Value::Object(fields) => conform_object(fields, value),
        _ => value.clone(),
    }
}

fn conform_tag(tag: &str, value: &Value) -> Value {
    match tag {
        "string" => Value::String(match value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            other => other.to_string(),
        }),
        "number" => to_number(value),
        "boolean" => Value::Bool(truthy(value)),
        "object" => match value {
            Value::Object(_) => value.clone(),
            _ => Value::Object(Map::new()),
        },
        "array" => match value {
            Value::Array(_) => value.clone(),
            _ => Value::Array(Vec::new()),
        },
        "data" | "buffer" | "proxy" | "any" => value.clone(),
        other => {
            log::debug!("conform: unknown type tag '{}', passing value through", other);
            value.clone()
        }
    }
}

fn conform_list(items: &[Value], value: &Value) -> Value {
    if let (Some(Value::String(head)), Some(inner)) = (items.first(), items.get(1)) {
        if head == "array" {
            return match value {
                Value::Array(elems) => {
                    Value::Array(elems.iter().map(|e| conform_value(inner, e)).collect())
                }
                _ => Value::Array(Vec::new()),
            };
        }
    }

    let elems: &[Value] = match value {
        Value::Array(elems) => elems,
        _ => std::slice::from_ref(value),
    };
    Value::Array(
        items
            .iter()
            .zip(elems.iter())
            .map(|(t, v)| conform_value(t, v))
            .collect(),
    )
}

fn conform_object(fields: &Map<String, Value>, value: &Value) -> Value {
    let mut out = Map::new();
    if let Value::Object(given) = value {
        for (key, template) in fields {
            if let Some(v) = given.get(key) {
                out.insert(key.clone(), conform_value(template, v));
            }
        }
    }
    Value::Object(out)
}

fn to_number(value: &Value) -> Value {
    match value {
        Value::Number(_) => value.clone(),
        Value::Bool(b) => Value::Number(Number::from(u8::from(*b))),
        Value::Null => Value::Number(Number::from(0)),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Value::Number(Number::from(0));
            }
            if let Ok(i) = trimmed.parse::<i64>() {
                return Value::Number(Number::from(i));
            }
            trimmed
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        }
        _ => Value::Null,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn conform(template: Value, value: Value) -> Value {
        SchemaConformer.conform(&template, &value)
    }

    #[test]
    fn test_scalar_tags() {
        assert_eq!(conform(json!("string"), json!(12)), json!("12"));
        assert_eq!(conform(json!("string"), Value::Null), json!(""));
        assert_eq!(conform(json!("number"), json!("42")), json!(42));
        assert_eq!(conform(json!("number"), json!("1.5")), json!(1.5));
        assert_eq!(conform(json!("number"), json!("abc")), Value::Null);
        assert_eq!(conform(json!("number"), json!(true)), json!(1));
        assert_eq!(conform(json!("boolean"), json!("")), json!(false));
        assert_eq!(conform(json!("boolean"), json!("x")), json!(true));
        assert_eq!(conform(json!("object"), json!(3)), json!({}));
        assert_eq!(conform(json!("array"), json!("x")), json!([]));
        assert_eq!(conform(json!("data"), json!({"a": 1})), json!({"a": 1}));
    }

    #[test]
    fn test_object_template_drops_undeclared_keys() {
        let template = json!({
            "from": {"userId": "string", "status": "number"},
            "message": "string"
        });
        let value = json!({
            "from": {"userId": "alice", "status": "2", "extra": true},
            "message": 7,
            "unexpected": "dropped"
        });
        assert_eq!(
            conform(template, value),
            json!({"from": {"userId": "alice", "status": 2}, "message": "7"})
        );
    }

    #[test]
    fn test_missing_keys_are_omitted() {
        let template = json!({"userId": "string", "name": "string"});
        assert_eq!(
            conform(template, json!({"userId": "bob"})),
            json!({"userId": "bob"})
        );
    }

    #[test]
    fn test_list_templates() {
        assert_eq!(
            conform(json!(["array", "number"]), json!(["1", 2, "x"])),
            json!([1, 2, null])
        );
        assert_eq!(
            conform(json!(["string", "number"]), json!([1, "2", "ignored"])),
            json!(["1", 2])
        );
        assert_eq!(conform(json!(["string"]), json!(5)), json!(["5"]));
    }

    #[test]
    fn test_closure_conformer() {
        let upper = |_: &Value, v: &Value| json!(v.as_str().unwrap_or_default().to_uppercase());
        assert_eq!(upper.conform(&json!("string"), &json!("hi")), json!("HI"));
    }
}
