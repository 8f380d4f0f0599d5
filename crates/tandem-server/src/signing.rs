//! HMAC-signed file URLs.
//!
//! A signed URL carries its folder, file name and expiry (in ticks) as query
//! parameters followed by `hash`, the lower-case hex HMAC-SHA-256 of exactly
//! `folderName=<f>&fileName=<n>&expires=<ticks>`.

use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use tandem_shared::ticks::to_ticks;

use crate::error::ChatError;
use crate::file_store::validate_segment;

type HmacSha256 = Hmac<Sha256>;

/// Route prefix under which signed files are served.
pub const FILE_ROUTE_PREFIX: &str = "/content/file";

#[derive(Clone)]
pub struct UrlSigner {
    mac: HmacSha256,
    public_base: String,
}

impl UrlSigner {
    pub fn new(key: &[u8], public_base: impl Into<String>) -> Result<Self, ChatError> {
        let mac = HmacSha256::new_from_slice(key)
            .map_err(|e| ChatError::Internal(format!("Invalid URL signing key: {e}")))?;
        Ok(Self {
            mac,
            public_base: public_base.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn canonical(folder: &str, file_name: &str, expires: i64) -> String {
        format!("folderName={folder}&fileName={file_name}&expires={expires}")
    }

    /// Lower-case hex signature of the canonical parameter string.
    pub fn sign(&self, folder: &str, file_name: &str, expires: i64) -> String {
        let mut mac = self.mac.clone();
        mac.update(Self::canonical(folder, file_name, expires).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Recompute the signature and compare it to `supplied` in constant time.
    pub fn verify(&self, folder: &str, file_name: &str, expires: i64, supplied: &str) -> bool {
        let expected = self.sign(folder, file_name, expires);
        let supplied = supplied.to_ascii_lowercase();
        expected.len() == supplied.len()
            && expected.as_bytes().ct_eq(supplied.as_bytes()).unwrap_u8() == 1
    }

    /// Full URL for a file, valid until `expires` (ticks).
    pub fn url_at(&self, folder: &str, file_name: &str, expires: i64) -> Result<String, ChatError> {
        validate_segment(folder)?;
        validate_segment(file_name)?;

        let hash = self.sign(folder, file_name, expires);
        Ok(format!(
            "{}{FILE_ROUTE_PREFIX}/{folder}/{file_name}?{}&hash={hash}",
            self.public_base,
            Self::canonical(folder, file_name, expires),
        ))
    }

    /// Full URL for a file, valid for `hours` from now.
    pub fn url_for(&self, folder: &str, file_name: &str, hours: i64) -> Result<String, ChatError> {
        let expires = to_ticks(Utc::now() + Duration::hours(hours));
        self.url_at(folder, file_name, expires)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_shared::ticks::now_ticks;

    fn signer() -> UrlSigner {
        UrlSigner::new(b"url-secret", "https://chat.example.test/").unwrap()
    }

    #[test]
    fn test_sign_and_verify() {
        let signer = signer();
        let expires = now_ticks();
        let hash = signer.sign("images", "a.png", expires);

        assert_eq!(hash.len(), 64);
        assert!(signer.verify("images", "a.png", expires, &hash));
        assert!(signer.verify("images", "a.png", expires, &hash.to_uppercase()));
    }

    #[test]
    fn test_any_changed_parameter_fails() {
        let signer = signer();
        let expires = now_ticks();
        let hash = signer.sign("images", "a.png", expires);

        assert!(!signer.verify("sounds", "a.png", expires, &hash));
        assert!(!signer.verify("images", "b.png", expires, &hash));
        assert!(!signer.verify("images", "a.png", expires + 1, &hash));
        assert!(!signer.verify("images", "a.png", expires, &hash[..63]));
        assert!(!signer.verify("images", "a.png", expires, ""));
    }

    #[test]
    fn test_different_key_fails() {
        let expires = now_ticks();
        let hash = signer().sign("images", "a.png", expires);
        let other = UrlSigner::new(b"other", "https://chat.example.test").unwrap();
        assert!(!other.verify("images", "a.png", expires, &hash));
    }

    #[test]
    fn test_url_format() {
        let signer = signer();
        let url = signer.url_at("images", "a.png", 42).unwrap();
        let hash = signer.sign("images", "a.png", 42);

        assert_eq!(
            url,
            format!(
                "https://chat.example.test/content/file/images/a.png?folderName=images&fileName=a.png&expires=42&hash={hash}"
            )
        );
    }

    #[test]
    fn test_url_rejects_traversal() {
        let signer = signer();
        assert!(signer.url_at("..", "a.png", 1).is_err());
        assert!(signer.url_at("images", "../a.png", 1).is_err());
    }
}
