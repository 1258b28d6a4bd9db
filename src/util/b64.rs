use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use std::fmt::Display;

/// Standard-alphabet base64 text, as carried in the `X-PAYMENT` header and in
/// the `transaction` field of a Solana payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64Bytes(String);

impl Base64Bytes {
    /// Encode raw bytes.
    pub fn encode<T: AsRef<[u8]>>(input: T) -> Self {
        Self(b64.encode(input.as_ref()))
    }

    /// Wrap text that is expected to already be base64.
    pub fn from_encoded<S: Into<String>>(encoded: S) -> Self {
        Self(encoded.into())
    }

    /// Decode back to raw bytes.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        b64.decode(self.0.trim())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl Display for Base64Bytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_tolerates_surrounding_whitespace() {
        let encoded = Base64Bytes::from_encoded(" aGVsbG8=\n");
        assert_eq!(encoded.decode().unwrap(), b"hello");
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(Base64Bytes::from_encoded("not base64!").decode().is_err());
    }
}
