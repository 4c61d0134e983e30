//! Base64 (de)serialization for opaque byte payloads embedded in JSON.
//!
//! Pipelines and execution results travel through the platform as opaque
//! blobs. Database columns hold them as raw bytes; whenever they are embedded
//! in a JSON document they are base64-encoded with this module via
//! `#[serde(with = "netunicorn_core::serde_bytes")]`.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD
        .decode(encoded.as_bytes())
        .map_err(serde::de::Error::custom)
}

pub mod option {
    use super::*;

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Payload {
        #[serde(with = "crate::serde_bytes")]
        data: Vec<u8>,
        #[serde(with = "crate::serde_bytes::option")]
        maybe: Option<Vec<u8>>,
    }

    #[test]
    fn round_trips_raw_bytes() {
        let payload = Payload {
            data: vec![0, 159, 146, 150],
            maybe: None,
        };
        let json = serde_json::to_string(&payload).unwrap();
        let back: Payload = serde_json::from_str(&json).unwrap();
        assert_eq!(back.data, vec![0, 159, 146, 150]);
        assert_eq!(back.maybe, None);
    }
}
