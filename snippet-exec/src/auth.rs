use tracing::warn;

use crate::{config::Credential, error::Error, Result};

/// Checks caller credentials against the configured secret.
#[derive(Debug, Clone)]
pub struct CredentialGate {
    credential: Credential,
}

impl CredentialGate {
    pub fn new(credential: Credential) -> Self {
        Self { credential }
    }

    /// Succeeds only on an exact match. Runs before anything is allocated for the request.
    pub fn authorize(&self, supplied: Option<&str>) -> Result<()> {
        let supplied = match supplied {
            Some(s) if !s.is_empty() => s,
            _ => {
                warn!("Rejected request without credential");
                return Err(Error::Unauthorized);
            }
        };

        if constant_time_eq(supplied.as_bytes(), self.credential.as_bytes()) {
            Ok(())
        } else {
            warn!("Rejected request with invalid credential");
            Err(Error::Unauthorized)
        }
    }
}

/// Compares without short-circuiting on the first differing byte. Length still leaks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
