//! The wrapper contract.

use crate::core::options::Options;
use crate::core::types::{BlobInfo, KeyInfo, WrapperConfig, WrapperType};
use crate::error::{InputError, Result};

/// Uniform contract for a key-management backend.
///
/// Implementations are shared across threads; once `set_config` has
/// succeeded every method may be called concurrently. The same contract is
/// implemented by in-process wrappers and by
/// [`PluginClient`](crate::plugin::PluginClient), which forwards each call
/// to a wrapper running in a subprocess.
pub trait Wrapper: Send + Sync {
    /// Static identifier of the backend kind.
    fn wrapper_type(&self) -> WrapperType;

    /// Resolve options, probe the backend, and populate the current key id.
    ///
    /// Safe to call again to reconfigure. A replacement backend client is
    /// fully built and probed before it becomes visible to other calls.
    fn set_config(&self, opts: &Options) -> Result<WrapperConfig>;

    /// Key id used by the last successful encrypt (or set by `set_config`).
    ///
    /// Local wrappers never perform backend I/O here.
    fn key_id(&self) -> Result<String>;

    /// Encrypt `plaintext`. `None` is rejected; `Some(&[])` is valid.
    fn encrypt(&self, plaintext: Option<&[u8]>, opts: &Options) -> Result<BlobInfo>;

    /// Decrypt a blob produced by `encrypt`.
    fn decrypt(&self, blob: Option<&BlobInfo>, opts: &Options) -> Result<Vec<u8>>;
}

/// Reject a missing plaintext before any backend call.
pub fn require_plaintext(plaintext: Option<&[u8]>) -> Result<&[u8]> {
    plaintext.ok_or_else(|| InputError::MissingPlaintext.into())
}

/// Reject a missing blob, or one without key info, before any backend call.
pub fn require_blob(blob: Option<&BlobInfo>) -> Result<(&BlobInfo, &KeyInfo)> {
    let blob = blob.ok_or(InputError::MissingBlob)?;
    let info = blob.key_info.as_ref().ok_or(InputError::MissingKeyInfo)?;
    Ok((blob, info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_require_plaintext() {
        assert!(matches!(
            require_plaintext(None),
            Err(Error::Input(InputError::MissingPlaintext))
        ));
        assert_eq!(require_plaintext(Some(&[])).unwrap(), &[] as &[u8]);
    }

    #[test]
    fn test_require_blob() {
        assert!(matches!(
            require_blob(None),
            Err(Error::Input(InputError::MissingBlob))
        ));

        let bare = BlobInfo {
            ciphertext: vec![1],
            iv: vec![],
            key_info: None,
        };
        assert!(matches!(
            require_blob(Some(&bare)),
            Err(Error::Input(InputError::MissingKeyInfo))
        ));
    }
}
