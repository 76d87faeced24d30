use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::ser::SerializeMap;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Driver-specific dial payload. The persistence layer never interprets it.
///
/// Serialized documents embed compact JSON payloads as plain JSON values.
/// Anything else (other bytes, or JSON whose compact form differs from the
/// stored text) is written as `{"$base64": "..."}` so reads return the exact
/// bytes. An empty payload is written as `null`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DialConfiguration(Vec<u8>);

impl DialConfiguration {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for DialConfiguration {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

/// Key of the single-entry map carrying a payload that is not inlined.
const ENCODED_KEY: &str = "$base64";

/// The payload as a JSON value, when re-serializing that value reproduces
/// the stored bytes exactly.
fn inline_value(bytes: &[u8]) -> Option<Value> {
    let value: Value = serde_json::from_slice(bytes).ok()?;
    if encoded_text(&value).is_some() {
        return None;
    }
    let canonical = serde_json::to_vec(&value).ok()?;
    (canonical == bytes).then_some(value)
}

fn encoded_text(value: &Value) -> Option<&str> {
    match value {
        Value::Object(map) if map.len() == 1 => map.get(ENCODED_KEY).and_then(Value::as_str),
        _ => None,
    }
}

impl Serialize for DialConfiguration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0.is_empty() {
            return serializer.serialize_none();
        }
        if let Some(value) = inline_value(&self.0) {
            return value.serialize(serializer);
        }
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(ENCODED_KEY, &STANDARD.encode(&self.0))?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for DialConfiguration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        if value.is_null() {
            return Ok(Self::default());
        }
        if let Some(text) = encoded_text(&value) {
            return STANDARD
                .decode(text)
                .map(Self)
                .map_err(|err| de::Error::custom(format!("invalid dial payload: {err}")));
        }
        serde_json::to_vec(&value).map(Self).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_serializes_as_null() {
        let json = serde_json::to_string(&DialConfiguration::default()).unwrap();
        assert_eq!(json, "null");
        let back: DialConfiguration = serde_json::from_str(&json).unwrap();
        assert!(back.is_empty());
    }

    #[test]
    fn compact_json_payload_survives_serialization() {
        let payload = DialConfiguration::new(br#"{"a":1,"b":[true,null]}"#.to_vec());
        let json = serde_json::to_string(&payload).unwrap();
        let back: DialConfiguration = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn non_json_payload_is_carried_as_base64() {
        let payload = DialConfiguration::new(b"user=x;pw=y".to_vec());
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(json, r#"{"$base64":"dXNlcj14O3B3PXk="}"#);
        let back: DialConfiguration = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn reordered_or_spaced_json_keeps_its_bytes() {
        let payload = DialConfiguration::new(br#"{"b":1, "a":2}"#.to_vec());
        let yaml = serde_yaml::to_string(&payload).unwrap();
        let back: DialConfiguration = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.as_bytes(), br#"{"b":1, "a":2}"#);
    }

    #[test]
    fn payload_shaped_like_the_envelope_is_not_inlined() {
        let payload = DialConfiguration::new(br#"{"$base64":"AAAA"}"#.to_vec());
        let json = serde_json::to_string(&payload).unwrap();
        let back: DialConfiguration = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
    }
}
