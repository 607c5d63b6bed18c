//! Zero values substituted for failed calls when exceptions are suppressed

use serde_json::{Map, Value};

/// Object nesting depth after which nested objects become `null`
pub const MAX_DEFAULT_DEPTH: usize = 3;

/// Shape of a method's declared return type
#[derive(Debug, Clone)]
pub enum TypeDescriptor {
    /// No value
    Unit,
    /// Boolean
    Bool,
    /// Any integer type
    Integer,
    /// Any floating point type
    Float,
    /// String or char
    Text,
    /// Sequence or set
    List(Box<TypeDescriptor>),
    /// Key/value map
    Map(Box<TypeDescriptor>),
    /// Nullable value
    Optional(Box<TypeDescriptor>),
    /// Plain object; fields are produced lazily so types may refer to themselves
    Object {
        /// Type name, for diagnostics
        name: &'static str,
        /// Field names and types
        fields: fn() -> Vec<(&'static str, TypeDescriptor)>,
    },
}

impl TypeDescriptor {
    /// List of `element`
    pub fn list(element: TypeDescriptor) -> Self {
        Self::List(Box::new(element))
    }

    /// Map with `value` values
    pub fn map(value: TypeDescriptor) -> Self {
        Self::Map(Box::new(value))
    }

    /// Optional `inner`
    pub fn optional(inner: TypeDescriptor) -> Self {
        Self::Optional(Box::new(inner))
    }
}

/// Zero value for a type
pub fn default_value(descriptor: &TypeDescriptor) -> Value {
    default_at_depth(descriptor, 0)
}

fn default_at_depth(descriptor: &TypeDescriptor, depth: usize) -> Value {
    match descriptor {
        TypeDescriptor::Unit | TypeDescriptor::Optional(_) => Value::Null,
        TypeDescriptor::Bool => Value::Bool(false),
        TypeDescriptor::Integer => Value::from(0),
        TypeDescriptor::Float => Value::from(0.0),
        TypeDescriptor::Text => Value::String(String::new()),
        TypeDescriptor::List(_) => Value::Array(Vec::new()),
        TypeDescriptor::Map(_) => Value::Object(Map::new()),
        TypeDescriptor::Object { fields, .. } => {
            if depth >= MAX_DEFAULT_DEPTH {
                return Value::Null;
            }
            let object = fields()
                .into_iter()
                .map(|(name, field)| (name.to_string(), default_at_depth(&field, depth + 1)))
                .collect();
            Value::Object(object)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node_fields() -> Vec<(&'static str, TypeDescriptor)> {
        vec![
            ("id", TypeDescriptor::Integer),
            ("label", TypeDescriptor::Text),
            ("next", node()),
        ]
    }

    fn node() -> TypeDescriptor {
        TypeDescriptor::Object {
            name: "Node",
            fields: node_fields,
        }
    }

    #[test]
    fn test_primitives_and_containers() {
        assert_eq!(default_value(&TypeDescriptor::Unit), Value::Null);
        assert_eq!(default_value(&TypeDescriptor::Bool), json!(false));
        assert_eq!(default_value(&TypeDescriptor::Integer), json!(0));
        assert_eq!(default_value(&TypeDescriptor::Float), json!(0.0));
        assert_eq!(default_value(&TypeDescriptor::Text), json!(""));
        assert_eq!(
            default_value(&TypeDescriptor::list(TypeDescriptor::Integer)),
            json!([])
        );
        assert_eq!(
            default_value(&TypeDescriptor::map(TypeDescriptor::Text)),
            json!({})
        );
        assert_eq!(
            default_value(&TypeDescriptor::optional(TypeDescriptor::Integer)),
            Value::Null
        );
    }

    #[test]
    fn test_self_referential_object_is_bounded() {
        let value = default_value(&node());
        assert_eq!(
            value,
            json!({
                "id": 0,
                "label": "",
                "next": {
                    "id": 0,
                    "label": "",
                    "next": {
                        "id": 0,
                        "label": "",
                        "next": null
                    }
                }
            })
        );
    }
}
