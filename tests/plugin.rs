//! Plugin transport tests against the real `kmswrap-plugin` binary.
//!
//! A wrapper behind the plugin channel must be indistinguishable from the
//! same wrapper in-process, and every way the child can fail must come back
//! as a transport error instead of a hang or a host crash.

mod support;

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use kmswrap::error::{Error, ErrorKind, TransportError};
use kmswrap::plugin::PluginState;
use kmswrap::testing::{TestWrapper, TEST_KEY_ID};
use kmswrap::{Options, PluginClient, Wrapper, WrapperType};
use support::*;

// ============================================================================
// Fidelity
// ============================================================================

#[test]
fn test_plugin_matches_in_process() {
    let plugin = start_plugin("test");
    let local = TestWrapper::new(b"foo");

    assert_eq!(plugin.state(), PluginState::Ready);
    assert_eq!(plugin.wrapper_type(), WrapperType::Test);
    assert_eq!(plugin.key_id().unwrap(), TEST_KEY_ID);

    for &payload in AWKWARD_PAYLOADS {
        let remote = plugin.encrypt(Some(payload), &Options::new()).unwrap();
        let here = local.encrypt(Some(payload), &Options::new()).unwrap();
        assert_eq!(remote, here);
        assert_eq!(plugin.decrypt(Some(&here), &Options::new()).unwrap(), payload);
    }
}

#[test]
fn test_set_config_through_plugin() {
    let plugin = start_plugin("test");
    let config = plugin
        .set_config(&Options::new().with_key_id("configured"))
        .unwrap();
    assert_eq!(config.wrapper_type, WrapperType::Test);
    assert_eq!(config.metadata["key_id"], "configured");
    assert_eq!(plugin.key_id().unwrap(), "configured");
}

#[test]
fn test_aead_through_plugin() {
    let plugin = start_plugin("aead");
    assert_eq!(plugin.wrapper_type(), WrapperType::Aead);

    // Not configured yet; the error class survives the boundary.
    assert_kind(
        &plugin.encrypt(Some(b"early"), &Options::new()),
        ErrorKind::Config,
    );

    plugin
        .set_config(
            &Options::new()
                .with_key_id("plugin-root")
                .with_config("key", ROOT_KEY_256),
        )
        .unwrap();
    assert_eq!(plugin.key_id().unwrap(), "plugin-root");

    let aad = Options::new().with_aad(b"ctx".to_vec());
    let blob = plugin.encrypt(Some(b"over the wire"), &aad).unwrap();
    assert_eq!(plugin.decrypt(Some(&blob), &aad).unwrap(), b"over the wire");
    assert_kind(&plugin.decrypt(Some(&blob), &Options::new()), ErrorKind::Cipher);

    // Blobs are portable between the plugin and an in-process wrapper
    // holding the same root key.
    let local = aead_wrapper("wrap");
    local
        .set_config(
            &Options::new()
                .with_key_id("plugin-root")
                .with_config("key", ROOT_KEY_256),
        )
        .unwrap();
    assert_eq!(local.decrypt(Some(&blob), &aad).unwrap(), b"over the wire");
}

#[test]
fn test_kms_through_plugin() {
    let plugin = start_plugin("kms");
    assert_eq!(plugin.wrapper_type(), WrapperType::Kms("memory".into()));

    assert_kind(&plugin.set_config(&Options::new()), ErrorKind::Config);
    assert_kind(
        &plugin.set_config(&Options::new().with_key_id("unknown-key")),
        ErrorKind::Config,
    );

    plugin
        .set_config(&Options::new().with_key_id(KMS_KEY))
        .unwrap();
    assert_eq!(plugin.key_id().unwrap(), "test-key-v1");
    let blob = plugin.encrypt(Some(b"kms payload"), &Options::new()).unwrap();
    assert_eq!(blob.key_info.as_ref().unwrap().key_id, "test-key-v1");
    assert_eq!(plugin.decrypt(Some(&blob), &Options::new()).unwrap(), b"kms payload");
}

#[test]
fn test_absent_input_rejected_locally() {
    let plugin = start_plugin("test");
    assert!(matches!(
        plugin.encrypt(None, &Options::new()),
        Err(Error::Input(_))
    ));
    assert!(matches!(
        plugin.decrypt(None, &Options::new()),
        Err(Error::Input(_))
    ));
    assert_eq!(plugin.state(), PluginState::Ready);
}

#[test]
fn test_concurrent_calls_through_plugin() {
    let plugin = Arc::new(start_plugin("test"));
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let plugin = Arc::clone(&plugin);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for round in 0..25 {
                    let payload = format!("{}-{}", i, round);
                    let blob = plugin
                        .encrypt(Some(payload.as_bytes()), &Options::new())
                        .unwrap();
                    let out = plugin.decrypt(Some(&blob), &Options::new()).unwrap();
                    assert_eq!(out, payload.as_bytes());
                    assert_eq!(plugin.key_id().unwrap(), TEST_KEY_ID);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("worker panicked");
    }
}

// ============================================================================
// Failure handling
// ============================================================================

#[test]
fn test_stalled_call_times_out() {
    let plugin = start_plugin("stall");
    let opts = Options::new().with_timeout(Duration::from_millis(300));

    let started = Instant::now();
    let result = plugin.encrypt(Some(b"never"), &opts);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(matches!(
        result,
        Err(Error::Transport(TransportError::Timeout { ref method, .. })) if method == "encrypt"
    ));

    // The channel is still usable for calls that do complete.
    assert_eq!(plugin.state(), PluginState::Ready);
    assert_eq!(plugin.key_id().unwrap(), TEST_KEY_ID);
    plugin.kill().unwrap();
}

#[test]
fn test_kill_during_call() {
    let plugin = Arc::new(start_plugin("stall"));

    let caller = {
        let plugin = Arc::clone(&plugin);
        thread::spawn(move || {
            let opts = Options::new().with_timeout(Duration::from_secs(60));
            let started = Instant::now();
            let result = plugin.encrypt(Some(b"stuck"), &opts);
            (result, started.elapsed())
        })
    };

    thread::sleep(Duration::from_millis(300));
    plugin.kill().unwrap();

    let (result, elapsed) = caller.join().expect("caller panicked");
    assert_transport(&result);
    assert!(elapsed < Duration::from_secs(30), "call hung for {:?}", elapsed);

    assert_eq!(plugin.state(), PluginState::Terminated);
    assert!(matches!(
        plugin.key_id(),
        Err(Error::Transport(TransportError::NotReady(PluginState::Terminated)))
    ));

    // A fresh process recovers.
    let respawned = start_plugin("test");
    assert_eq!(respawned.key_id().unwrap(), TEST_KEY_ID);
}

#[test]
fn test_crash_mid_call() {
    let plugin = start_plugin("crash");
    assert_eq!(plugin.key_id().unwrap(), TEST_KEY_ID);

    let result = plugin.encrypt(Some(b"boom"), &Options::new());
    assert_transport(&result);

    // The reader thread notices EOF shortly after the waiter is dropped.
    let deadline = Instant::now() + Duration::from_secs(5);
    while plugin.state() != PluginState::Terminated && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(plugin.state(), PluginState::Terminated);
    assert_transport(&plugin.key_id());
}

#[test]
fn test_deadline_holds_when_plugin_stops_reading() {
    // Says hello, then never reads stdin again.
    let mut cmd = std::process::Command::new("sh");
    cmd.arg("-c")
        .arg(r#"echo '{"protocol_version":1,"wrapper_type":"test"}'; exec sleep 20"#);
    let plugin = PluginClient::builder(cmd)
        .handshake_timeout(Duration::from_secs(10))
        .call_timeout(Duration::from_millis(500))
        .start()
        .unwrap();

    // Far larger than a pipe buffer, so the frame can never be fully written.
    let payload = vec![0x5a; 4 << 20];
    let opts = Options::new().with_timeout(Duration::from_millis(500));

    let started = Instant::now();
    let result = plugin.encrypt(Some(&payload), &opts);
    let elapsed = started.elapsed();
    assert!(
        matches!(result, Err(Error::Transport(TransportError::Timeout { .. }))),
        "got {:?}",
        result.map(|_| ())
    );
    assert!(elapsed < Duration::from_secs(5), "call took {:?}", elapsed);

    // Later calls queue behind the stuck frame and still honour their deadline.
    let started = Instant::now();
    assert_transport(&plugin.key_id());
    assert!(started.elapsed() < Duration::from_secs(5));

    let started = Instant::now();
    plugin.close().unwrap();
    assert!(started.elapsed() < Duration::from_secs(10), "close took {:?}", started.elapsed());
    assert_eq!(plugin.state(), PluginState::Terminated);
}

#[test]
fn test_close_is_graceful() {
    let plugin = start_plugin("test");
    assert!(plugin.pid().is_some());
    plugin.close().unwrap();
    assert_eq!(plugin.state(), PluginState::Terminated);
    assert!(plugin.pid().is_none());
    assert_transport(&plugin.key_id());
    // Closing twice is a no-op.
    plugin.close().unwrap();
}

// ============================================================================
// Handshake
// ============================================================================

#[test]
fn test_bad_arguments_fail_handshake() {
    let err = PluginClient::builder(plugin_command("no-such-mode"))
        .handshake_timeout(Duration::from_secs(10))
        .start()
        .unwrap_err();
    assert!(
        matches!(err, Error::Transport(TransportError::Handshake(_))),
        "got {:?}",
        err
    );
}

#[test]
fn test_missing_binary_fails_spawn() {
    let err = PluginClient::start(std::process::Command::new("/nonexistent/kmswrap-plugin"))
        .unwrap_err();
    assert!(matches!(err, Error::Transport(TransportError::Spawn(_))));
}
