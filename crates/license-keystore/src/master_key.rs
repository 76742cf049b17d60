//! The KMS master key: 32 bytes, loaded once at startup, never persisted
//! and never logged. Buffers derived from it are zeroed on drop.

use license_core::CoreError;
use zeroize::Zeroize;

const MASTER_KEY_LEN: usize = 32;

/// A 32-byte AES-256-GCM master key. `Drop` zeroes the buffer.
#[derive(Clone)]
pub struct MasterKey([u8; MASTER_KEY_LEN]);

impl MasterKey {
    /// Wrap exactly 32 bytes. Any other length is a `ConfigError`.
    pub fn from_bytes(bytes: [u8; MASTER_KEY_LEN]) -> Result<Self, CoreError> {
        Ok(Self(bytes))
    }

    /// Decode from a base64-std string, validating the decoded length is
    /// exactly 32 bytes.
    pub fn from_base64(s: &str) -> Result<Self, CoreError> {
        let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, s.trim())
            .map_err(|e| CoreError::Config(format!("KMS_MASTER_KEY is not valid base64: {e}")))?;
        let arr: [u8; MASTER_KEY_LEN] = decoded.try_into().map_err(|v: Vec<u8>| {
            CoreError::Config(format!(
                "KMS_MASTER_KEY must decode to exactly {MASTER_KEY_LEN} bytes, got {}",
                v.len()
            ))
        })?;
        Ok(Self(arr))
    }

    /// Borrow the 32 raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey").finish_non_exhaustive()
    }
}
