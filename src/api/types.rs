use async_trait::async_trait;
use serde_json::Value;

use crate::error::ApiError;

/// Write half of the requisition API, as consumed by the mutation queue.
#[async_trait]
pub trait RemoteApi: Send + Sync {
  /// Create an entity. The server answers with the stored entity including its id.
  async fn create(&self, entity: &Value) -> Result<Value, ApiError>;

  /// Replace an entity. Returns the server's copy when it sends one, `Value::Null` otherwise.
  async fn update(&self, id: &str, entity: &Value) -> Result<Value, ApiError>;

  async fn delete(&self, id: &str) -> Result<(), ApiError>;
}

/// Strip the server's `{ success, message, data, timestamp }` envelope if present.
pub fn unwrap_envelope(value: Value) -> Value {
  match value {
    Value::Object(mut obj) if obj.contains_key("success") && obj.contains_key("data") => {
      obj.remove("data").unwrap_or(Value::Null)
    }
    other => other,
  }
}

/// Pull a human-readable message out of an error body.
pub fn error_message(body: &[u8]) -> String {
  if let Ok(Value::Object(obj)) = serde_json::from_slice::<Value>(body) {
    for field in ["message", "error", "detail"] {
      if let Some(Value::String(msg)) = obj.get(field) {
        return msg.clone();
      }
    }
  }
  let text = String::from_utf8_lossy(body);
  let text = text.trim();
  if text.is_empty() {
    "no details".to_string()
  } else {
    text.chars().take(200).collect()
  }
}

/// Read the identifier field of an entity as a string.
///
/// Numeric ids are rendered without quotes so `17` and `"17"` address the same record.
pub fn entity_id(entity: &Value, field: &str) -> Option<String> {
  id_string(entity.get(field)?)
}

/// Render a bare id value (number or non-empty string).
pub fn id_string(value: &Value) -> Option<String> {
  match value {
    Value::String(s) if !s.is_empty() => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_unwrap_envelope() {
    let wrapped = json!({"success": true, "message": "ok", "data": {"id": 4}, "timestamp": "x"});
    assert_eq!(unwrap_envelope(wrapped), json!({"id": 4}));

    let bare = json!({"id": 4, "data": "payload"});
    assert_eq!(unwrap_envelope(bare.clone()), bare);
  }

  #[test]
  fn test_error_message_prefers_json_message() {
    assert_eq!(
      error_message(br#"{"success":false,"message":"Amount must be positive"}"#),
      "Amount must be positive"
    );
    assert_eq!(error_message(b"Bad Gateway"), "Bad Gateway");
    assert_eq!(error_message(b""), "no details");
  }

  #[test]
  fn test_entity_id_accepts_numbers_and_strings() {
    assert_eq!(entity_id(&json!({"id": 17}), "id"), Some("17".to_string()));
    assert_eq!(entity_id(&json!({"id": "local-3"}), "id"), Some("local-3".to_string()));
    assert_eq!(entity_id(&json!({"id": null}), "id"), None);
    assert_eq!(entity_id(&json!({"title": "x"}), "id"), None);
  }
}
