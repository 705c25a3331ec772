//! CSRF token issuance and validation
//!
//! Double-submit cookie: the same random token is stored in the `csrf_token`
//! cookie and echoed by the SPA in the `x-csrf-token` header. The two must
//! match on every unsafe request.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use subtle::ConstantTimeEq;

/// CSRF service for generating and validating tokens
#[derive(Clone, Debug)]
pub struct CsrfService {
    /// Token length in bytes (before base64 encoding)
    token_bytes: usize,
}

impl CsrfService {
    /// Create a new CSRF service with the specified token length
    pub fn new(token_bytes: usize) -> Self {
        Self { token_bytes }
    }

    /// Generate a new random token, URL-safe base64 without padding
    pub fn generate_token(&self) -> String {
        let mut bytes = vec![0u8; self.token_bytes];
        rand::thread_rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(&bytes)
    }

    /// Whether a token has the shape this service generates
    ///
    /// Used to decide if an existing cookie can be reused.
    pub fn is_well_formed(&self, token: &str) -> bool {
        URL_SAFE_NO_PAD
            .decode(token)
            .map(|bytes| bytes.len() == self.token_bytes)
            .unwrap_or(false)
    }

    /// Validate a CSRF token using constant-time comparison
    ///
    /// # Arguments
    /// * `provided` - The token from the `x-csrf-token` header
    /// * `expected` - The token from the cookie
    pub fn validate_token(&self, provided: &str, expected: &str) -> bool {
        // Length is not secret for CSRF tokens
        if provided.is_empty() || provided.len() != expected.len() {
            return false;
        }

        provided.as_bytes().ct_eq(expected.as_bytes()).into()
    }

    /// Get the configured token length in bytes
    pub fn token_bytes(&self) -> usize {
        self.token_bytes
    }
}

impl Default for CsrfService {
    fn default() -> Self {
        Self::new(32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_token_length() {
        let token = CsrfService::default().generate_token();
        // 32 bytes = 43 base64 characters (URL-safe, no padding)
        assert_eq!(token.len(), 43);
        assert!(!token.contains('='));
        assert!(!token.contains('+'));
        assert!(!token.contains('/'));
    }

    #[test]
    fn test_generate_token_uniqueness() {
        let service = CsrfService::default();
        assert_ne!(service.generate_token(), service.generate_token());
    }

    #[test]
    fn test_validate_token_matching() {
        let service = CsrfService::default();
        let token = service.generate_token();
        assert!(service.validate_token(&token, &token));
    }

    #[test]
    fn test_validate_token_mismatch() {
        let service = CsrfService::default();
        let a = service.generate_token();
        let b = service.generate_token();
        assert!(!service.validate_token(&a, &b));
        assert!(!service.validate_token(&a[..10], &a));
        assert!(!service.validate_token("", ""));
    }

    #[test]
    fn test_is_well_formed() {
        let service = CsrfService::default();
        assert!(service.is_well_formed(&service.generate_token()));
        assert!(!service.is_well_formed("short"));
        assert!(!service.is_well_formed("not base64 at all!!"));
        assert!(!CsrfService::new(16).is_well_formed(&service.generate_token()));
    }
}
