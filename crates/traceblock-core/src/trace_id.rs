//! Trace ID formatting.

use crate::trace::TRACE_ID_LEN;

/// Hex-encode a trace ID, dropping leading zeros.
///
/// An all-zero ID renders as `"0"`.
pub fn trace_id_to_hex(id: &[u8]) -> String {
    let encoded = hex::encode(id);
    let trimmed = encoded.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Parse a hex trace ID, left-padding it with zeros to [`TRACE_ID_LEN`] bytes.
pub fn hex_to_trace_id(value: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let value = value.trim();
    if value.len() > TRACE_ID_LEN * 2 {
        return Err(hex::FromHexError::InvalidStringLength);
    }
    let padded = format!("{:0>width$}", value, width = TRACE_ID_LEN * 2);
    hex::decode(padded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leading_zeros_are_trimmed() {
        let mut id = vec![0u8; TRACE_ID_LEN];
        id[15] = 0x0f;
        assert_eq!(trace_id_to_hex(&id), "f");
        assert_eq!(trace_id_to_hex(&[0u8; TRACE_ID_LEN]), "0");
    }

    #[test]
    fn test_hex_round_trip() {
        let id: Vec<u8> = (1..=16).collect();
        let hex = trace_id_to_hex(&id);
        assert_eq!(hex_to_trace_id(&hex).unwrap(), id);
    }

    #[test]
    fn test_short_hex_is_padded() {
        let id = hex_to_trace_id("abc").unwrap();
        assert_eq!(id.len(), TRACE_ID_LEN);
        assert_eq!(&id[14..], &[0x0a, 0xbc]);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(hex_to_trace_id("zz").is_err());
        assert!(hex_to_trace_id(&"f".repeat(33)).is_err());
    }
}
