//! Test fixtures and constants.

use std::sync::Arc;

use kmswrap::core::cipher::{AeadWrapper, KmsProfile, KmsWrapper};
use kmswrap::core::env::MapEnv;
use kmswrap::testing::MemoryKms;
use kmswrap::{Options, Wrapper};

/// Bytes 0x00..=0x1f, a valid 256-bit root key.
pub const ROOT_KEY_256: &str = "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=";

/// Bytes 0x00..=0x0f, a valid 128-bit root key.
pub const ROOT_KEY_128: &str = "AAECAwQFBgcICQoLDA0ODw==";

/// Key id of the in-memory KMS used across tests.
pub const KMS_KEY: &str = "test-key";

/// Env var the test KMS profile reads the key id from.
pub const KMS_KEY_ENV: &str = "KMSWRAP_TEST_KEY_ID";

/// Payloads that have tripped up envelope code in the past.
pub const AWKWARD_PAYLOADS: &[&[u8]] = &[
    b"",
    b"\0",
    b"hello world",
    "unicode: \u{1F512} caf\u{e9}".as_bytes(),
    &[0xff; 4096],
];

pub fn kms_profile() -> KmsProfile {
    KmsProfile::new("memory", KMS_KEY_ENV).legacy_env("KMSWRAP_TEST_LEGACY_KEY_ID")
}

/// AEAD wrapper configured with [`ROOT_KEY_256`].
pub fn aead_wrapper(key_mode: &str) -> AeadWrapper {
    let w = AeadWrapper::new();
    w.set_config(
        &Options::new()
            .with_config("key", ROOT_KEY_256)
            .with_config("key_mode", key_mode),
    )
    .expect("aead set_config");
    w
}

/// KMS wrapper over `kms`, with an empty environment.
pub fn kms_wrapper(kms: &Arc<MemoryKms>) -> KmsWrapper {
    KmsWrapper::with_client(kms_profile(), kms.clone()).with_env(Arc::new(MapEnv::new()))
}

/// KMS wrapper configured for [`KMS_KEY`].
pub fn configured_kms(kms: &Arc<MemoryKms>) -> KmsWrapper {
    let w = kms_wrapper(kms);
    w.set_config(&Options::new().with_key_id(KMS_KEY))
        .expect("kms set_config");
    w
}
