use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::WireError;

pub const ENVELOPE_VERSION: u16 = 1;

/// MessagePack frame exchanged between manager and nodes.
///
/// `correlation_id` pairs a reply with its request; a reply keeps the id of
/// the request and appends `.reply` to its topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: String,
    pub correlation_id: Uuid,
    pub sent_at: DateTime<Utc>,
    #[serde(default = "default_version")]
    pub version: u16,
    #[serde(with = "raw_bytes")]
    pub body: Vec<u8>,
}

fn default_version() -> u16 {
    ENVELOPE_VERSION
}

impl Envelope {
    pub fn request<T: Serialize>(topic: impl Into<String>, body: &T) -> Result<Self, WireError> {
        Ok(Self {
            topic: topic.into(),
            correlation_id: Uuid::new_v4(),
            sent_at: Utc::now(),
            version: ENVELOPE_VERSION,
            body: rmp_serde::to_vec(body)?,
        })
    }

    pub fn reply_to<T: Serialize>(&self, body: &T) -> Result<Self, WireError> {
        Ok(Self {
            topic: format!("{}.reply", self.topic),
            correlation_id: self.correlation_id,
            sent_at: Utc::now(),
            version: ENVELOPE_VERSION,
            body: rmp_serde::to_vec(body)?,
        })
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, WireError> {
        Ok(rmp_serde::from_slice(&self.body)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// Encode `Vec<u8>` as a MessagePack bin instead of an array of integers.
mod raw_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let bytes: &[u8] = Deserialize::deserialize(d)?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_keeps_correlation() {
        let request = Envelope::request("manager.status", &7u64).unwrap();
        let reply = request.reply_to(&"running".to_string()).unwrap();
        assert_eq!(reply.correlation_id, request.correlation_id);
        assert_eq!(reply.topic, "manager.status.reply");
        assert_eq!(reply.decode::<String>().unwrap(), "running");
    }

    #[test]
    fn envelope_survives_bytes() {
        let envelope = Envelope::request("manager.submit", &vec![1u8, 2, 3]).unwrap();
        let decoded = Envelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.topic, "manager.submit");
        assert_eq!(decoded.version, ENVELOPE_VERSION);
        assert_eq!(decoded.decode::<Vec<u8>>().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            Envelope::from_bytes(&[0xc1, 0x00]),
            Err(WireError::Deserialization(_))
        ));
    }
}
