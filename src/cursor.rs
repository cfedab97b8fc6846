use anyhow::{anyhow, Result};
use base64::prelude::*;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::storage::VisitPosition;

/// Signs and verifies opaque visit-list cursors.
///
/// Without a configured secret a random key is drawn per process, so cursors
/// do not survive a restart.
#[derive(Clone)]
pub struct CursorSigner {
    key: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CursorData {
    created_at: i64,
    id: i64,
}

impl CursorSigner {
    pub fn new(secret: Option<&str>) -> Self {
        let key = match secret {
            Some(s) if !s.is_empty() => s.as_bytes().to_vec(),
            _ => rand::random::<[u8; 32]>().to_vec(),
        };
        Self { key }
    }

    fn mac(&self, payload: &str) -> Result<Hmac<Sha256>> {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.key)
            .map_err(|e| anyhow!("Failed to create HMAC: {}", e))?;
        mac.update(payload.as_bytes());
        Ok(mac)
    }

    /// Encode a position as `payload.signature`
    pub fn sign(&self, position: VisitPosition) -> Result<String> {
        let json = serde_json::to_string(&CursorData {
            created_at: position.created_at,
            id: position.id,
        })?;
        let payload = BASE64_URL_SAFE_NO_PAD.encode(json.as_bytes());

        let signature = self.mac(&payload)?.finalize().into_bytes();
        Ok(format!(
            "{}.{}",
            payload,
            BASE64_URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    pub fn verify(&self, cursor: &str) -> Result<VisitPosition> {
        let (payload, signature_b64) = cursor
            .split_once('.')
            .filter(|(_, sig)| !sig.contains('.'))
            .ok_or_else(|| anyhow!("Invalid cursor format"))?;

        let expected = self.mac(payload)?.finalize().into_bytes();
        let provided = BASE64_URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| anyhow!("Invalid cursor signature encoding"))?;

        if !bool::from(expected.ct_eq(&provided[..])) {
            return Err(anyhow!("Cursor signature verification failed"));
        }

        let json_bytes = BASE64_URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| anyhow!("Invalid cursor payload encoding"))?;
        let data: CursorData =
            serde_json::from_slice(&json_bytes).map_err(|_| anyhow!("Invalid cursor data"))?;

        Ok(VisitPosition {
            created_at: data.created_at,
            id: data.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position() -> VisitPosition {
        VisitPosition {
            created_at: 1_709_283_600,
            id: 42,
        }
    }

    #[test]
    fn test_cursor_sign_and_verify() {
        let signer = CursorSigner::new(Some("test_secret_key_for_hmac_signing"));
        let cursor = signer.sign(position()).unwrap();
        assert_eq!(signer.verify(&cursor).unwrap(), position());
    }

    #[test]
    fn test_cursor_tampering_detection() {
        let signer = CursorSigner::new(Some("test_secret_key_for_hmac_signing"));
        let cursor = signer.sign(position()).unwrap();

        let (payload, _) = cursor.split_once('.').unwrap();
        assert!(signer.verify(&format!("{payload}.invalid_signature")).is_err());
    }

    #[test]
    fn test_cursor_from_other_key_rejected() {
        let cursor = CursorSigner::new(Some("one")).sign(position()).unwrap();
        assert!(CursorSigner::new(Some("two")).verify(&cursor).is_err());
    }

    #[test]
    fn test_random_key_signers_disagree() {
        let cursor = CursorSigner::new(None).sign(position()).unwrap();
        assert!(CursorSigner::new(None).verify(&cursor).is_err());
    }

    #[test]
    fn test_cursor_invalid_format() {
        let signer = CursorSigner::new(Some("secret"));
        assert!(signer.verify("invalid").is_err());
        assert!(signer.verify("invalid.format.extra").is_err());
    }
}
