//! Test assertion helpers.

use std::fmt::Debug;
use std::process::Output;

use kmswrap::error::ErrorKind;
use kmswrap::{Options, Result, Wrapper};

/// Assert a wrapper returns exactly what it encrypted.
pub fn assert_roundtrip(w: &dyn Wrapper, plaintext: &[u8]) {
    let blob = w
        .encrypt(Some(plaintext), &Options::new())
        .expect("encrypt failed");
    assert!(blob.key_info.is_some(), "blob has no key info");
    let out = w.decrypt(Some(&blob), &Options::new()).expect("decrypt failed");
    assert_eq!(out, plaintext);
}

/// Assert a result failed with the given error class.
pub fn assert_kind<T: Debug>(result: &Result<T>, kind: ErrorKind) {
    match result {
        Ok(v) => panic!("expected {:?} error, got Ok({:?})", kind, v),
        Err(e) => assert_eq!(e.kind(), kind, "unexpected error: {}", e),
    }
}

/// Assert a result failed with a transport error.
pub fn assert_transport<T: Debug>(result: &Result<T>) {
    assert_kind(result, ErrorKind::Transport);
}

/// Get stderr as String.
pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

/// Assert that a command output failed with exit status 1.
pub fn assert_exit_one(output: &Output) {
    assert_eq!(
        output.status.code(),
        Some(1),
        "expected exit 1, stderr: {}",
        stderr(output)
    );
}
