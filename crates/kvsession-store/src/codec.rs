//! Byte encoding of session payloads at the store boundary.

use kvsession_core::{SessionData, SessionError, SessionResult};

/// Encodes a payload just before it is written.
pub fn encode(data: &SessionData) -> SessionResult<Vec<u8>> {
    serde_json::to_vec(data)
        .map_err(|e| SessionError::CorruptSessionData(format!("Failed to encode session: {e}")))
}

/// Decodes a payload just after it is read.
///
/// Empty input and a JSON `null` both mean "no data".
pub fn decode(bytes: &[u8]) -> SessionResult<SessionData> {
    if bytes.is_empty() {
        return Ok(SessionData::new());
    }
    let data: Option<SessionData> = serde_json::from_slice(bytes)
        .map_err(|e| SessionError::CorruptSessionData(format!("Failed to parse session: {e}")))?;
    Ok(data.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_and_null_decode_to_empty_mapping() {
        assert!(decode(b"").unwrap().is_empty());
        assert!(decode(b"null").unwrap().is_empty());
    }

    #[test]
    fn nested_values_survive() {
        let mut data = SessionData::new();
        data.insert("cart".into(), json!({"items": [1, 2, 3], "total": 9.5}));
        data.insert("user".into(), json!("ada"));
        let decoded = decode(&encode(&data).unwrap()).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn garbage_is_corrupt() {
        let err = decode(b"\x80\x04not json").unwrap_err();
        assert!(matches!(err, SessionError::CorruptSessionData(_)));

        // Valid JSON of the wrong shape is corrupt too.
        let err = decode(b"[1, 2]").unwrap_err();
        assert!(matches!(err, SessionError::CorruptSessionData(_)));
    }
}
