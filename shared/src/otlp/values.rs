//! Conversion between OTLP `AnyValue`/`KeyValue` and [`AttributeValue`]/[`Attributes`].

use super::proto::common::v1::{any_value, AnyValue, ArrayValue, KeyValue, KeyValueList};
use crate::models::{AttributeValue, Attributes};

/// Converts an OTLP value. Returns `None` for an empty `AnyValue`.
#[must_use]
pub fn from_any_value(value: AnyValue) -> Option<AttributeValue> {
    Some(match value.value? {
        any_value::Value::StringValue(s) => AttributeValue::String(s),
        any_value::Value::BoolValue(b) => AttributeValue::Bool(b),
        any_value::Value::IntValue(i) => AttributeValue::Int(i),
        any_value::Value::DoubleValue(d) => AttributeValue::Double(d),
        any_value::Value::BytesValue(b) => AttributeValue::Bytes(b),
        any_value::Value::ArrayValue(array) => AttributeValue::Array(
            array
                .values
                .into_iter()
                .filter_map(from_any_value)
                .collect(),
        ),
        any_value::Value::KvlistValue(list) => AttributeValue::Map(
            list.values
                .into_iter()
                .filter_map(|kv| Some((kv.key, from_any_value(kv.value?)?)))
                .collect(),
        ),
    })
}

/// Converts an attribute value back into its OTLP form.
#[must_use]
pub fn to_any_value(value: &AttributeValue) -> AnyValue {
    let value = match value {
        AttributeValue::String(s) => any_value::Value::StringValue(s.clone()),
        AttributeValue::Bool(b) => any_value::Value::BoolValue(*b),
        AttributeValue::Int(i) => any_value::Value::IntValue(*i),
        AttributeValue::Double(d) => any_value::Value::DoubleValue(*d),
        AttributeValue::Bytes(b) => any_value::Value::BytesValue(b.clone()),
        AttributeValue::Array(values) => any_value::Value::ArrayValue(ArrayValue {
            values: values.iter().map(to_any_value).collect(),
        }),
        AttributeValue::Map(map) => any_value::Value::KvlistValue(KeyValueList {
            values: map
                .iter()
                .map(|(key, value)| key_value(key, value))
                .collect(),
        }),
    };
    AnyValue { value: Some(value) }
}

/// Moves an OTLP key/value list into an attribute map.
///
/// Entries without a value are dropped. On duplicate keys the last one wins.
#[must_use]
pub fn to_attributes(key_values: Vec<KeyValue>) -> Attributes {
    key_values
        .into_iter()
        .filter_map(|kv| Some((kv.key, from_any_value(kv.value?)?)))
        .collect()
}

/// Renders an attribute map as an OTLP key/value list, in key order.
#[must_use]
pub fn to_key_values(attributes: &Attributes) -> Vec<KeyValue> {
    attributes
        .iter()
        .map(|(key, value)| key_value(key, value))
        .collect()
}

fn key_value(key: &str, value: &AttributeValue) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(to_any_value(value)),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string_kv(key: &str, value: &str) -> KeyValue {
        KeyValue {
            key: key.to_string(),
            value: Some(AnyValue {
                value: Some(any_value::Value::StringValue(value.to_string())),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_to_attributes_skips_empty_values() {
        let attrs = to_attributes(vec![
            string_kv("service.name", "api"),
            KeyValue {
                key: "empty".to_string(),
                value: None,
                ..Default::default()
            },
        ]);
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs.get("service.name"), Some(&AttributeValue::from("api")));
    }

    #[test]
    fn test_nested_values_survive_conversion() {
        let nested = AnyValue {
            value: Some(any_value::Value::KvlistValue(KeyValueList {
                values: vec![string_kv("inner", "v")],
            })),
        };
        let converted = from_any_value(nested.clone()).unwrap();
        assert!(matches!(converted, AttributeValue::Map(ref m) if m.len() == 1));
        assert_eq!(to_any_value(&converted), nested);
    }

    #[test]
    fn test_to_key_values_is_key_ordered() {
        let attrs = Attributes::new().with("b", 2_i64).with("a", 1_i64);
        let kvs = to_key_values(&attrs);
        let keys: Vec<_> = kvs.iter().map(|kv| kv.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }
}
