//! The email-send task carried as the body of every queue message.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// One email-send request as it travels through the queue.
///
/// The body is a JSON object `{ to, subject, template, data, type }`. `to` and
/// `subject` are required; the remaining fields fall back to empty values when
/// they are missing or `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailTask {
    /// Recipient address.
    pub to: String,

    /// Subject line. This is itself a template rendered against `data`.
    pub subject: String,

    /// Name of the body template.
    #[serde(default, deserialize_with = "null_as_default")]
    pub template: String,

    /// Values made available to the subject and body templates.
    #[serde(default, deserialize_with = "null_as_default")]
    pub data: HashMap<String, serde_json::Value>,

    /// Free-form discriminator set by the producer (e.g. `welcome`).
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub kind: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// The body of a delivery could not be decoded into an [`EmailTask`].
#[derive(Debug, Error)]
#[error("Malformed task payload: {0}")]
pub struct TaskDecodeError(#[from] serde_json::Error);

impl EmailTask {
    /// Decode a task from a raw message body.
    pub fn decode(body: &[u8]) -> Result<Self, TaskDecodeError> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Encode this task as a message body.
    pub fn encode(&self) -> Result<Vec<u8>, TaskDecodeError> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_decode_full_payload() {
        let body = json!({
            "to": "a@example.com",
            "subject": "Hello {{ name }}",
            "template": "welcome",
            "data": { "name": "A" },
            "type": "welcome",
        })
        .to_string();

        let task = EmailTask::decode(body.as_bytes()).unwrap();
        assert_eq!(task.to, "a@example.com");
        assert_eq!(task.subject, "Hello {{ name }}");
        assert_eq!(task.template, "welcome");
        assert_eq!(task.kind, "welcome");
        assert_eq!(task.data.get("name"), Some(&json!("A")));
    }

    #[test]
    fn test_optional_fields_default() {
        let task = EmailTask::decode(br#"{"to":"a@example.com","subject":"s"}"#).unwrap();
        assert!(task.template.is_empty());
        assert!(task.data.is_empty());
        assert!(task.kind.is_empty());
    }

    #[test]
    fn test_null_optional_fields_decode_as_empty() {
        let body = json!({
            "to": "a@example.com",
            "subject": "s",
            "template": null,
            "data": null,
            "type": null,
        })
        .to_string();

        let task = EmailTask::decode(body.as_bytes()).unwrap();
        assert!(task.template.is_empty());
        assert!(task.data.is_empty());
        assert!(task.kind.is_empty());
    }

    #[test]
    fn test_null_required_field_is_malformed() {
        assert!(EmailTask::decode(br#"{"to":null,"subject":"s"}"#).is_err());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(EmailTask::decode(b"not json").is_err());
        assert!(EmailTask::decode(br#"{"subject":"missing recipient"}"#).is_err());
        assert!(EmailTask::decode(br#"{"to":"a@example.com","subject":"s","data":[1]}"#).is_err());
    }

    #[test]
    fn test_type_field_uses_wire_name() {
        let task = EmailTask {
            to: "a@example.com".to_string(),
            subject: "s".to_string(),
            template: "t".to_string(),
            data: HashMap::new(),
            kind: "reset".to_string(),
        };

        let value: serde_json::Value = serde_json::from_slice(&task.encode().unwrap()).unwrap();
        assert_eq!(value["type"], json!("reset"));
        assert!(value.get("kind").is_none());
    }
}
