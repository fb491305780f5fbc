use serde_json::Value;

/// A single cell written to a schema table.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

impl From<&Value> for FieldValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(flag) => FieldValue::Integer(i64::from(*flag)),
            Value::Number(number) => match number.as_i64() {
                Some(int) => FieldValue::Integer(int),
                None => number
                    .as_f64()
                    .map(FieldValue::Real)
                    .unwrap_or(FieldValue::Null),
            },
            Value::String(text) => FieldValue::Text(text.clone()),
            // Nested structures are stored as their JSON text.
            Value::Array(_) | Value::Object(_) => {
                FieldValue::Text(value.to_string())
            }
        }
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        FieldValue::from(&value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Real(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl<T> From<Option<T>> for FieldValue
where
    T: Into<FieldValue>,
{
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_values_map_to_sqlite_affinities() {
        assert_eq!(FieldValue::from(&json!(7)), FieldValue::Integer(7));
        assert_eq!(FieldValue::from(&json!(1.5)), FieldValue::Real(1.5));
        assert_eq!(FieldValue::from(&json!(true)), FieldValue::Integer(1));
        assert_eq!(FieldValue::from(&json!("x")), FieldValue::from("x"));
        assert_eq!(FieldValue::from(&json!(null)), FieldValue::Null);
        assert_eq!(
            FieldValue::from(&json!([1, 2])),
            FieldValue::Text("[1,2]".into())
        );
        assert_eq!(
            FieldValue::from(&json!(u64::MAX)),
            FieldValue::Real(u64::MAX as f64)
        );
    }
}
