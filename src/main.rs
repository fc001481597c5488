//! kmswrap-plugin - Serves a wrapper over stdio for a plugin host.
//!
//! Not meant to be run by hand: without the host's magic cookie it prints
//! an error and exits with status 1.

use std::sync::Arc;
use std::thread;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kmswrap::core::cipher::{AeadWrapper, KmsProfile, KmsWrapper};
use kmswrap::core::constants::LOG_ENV;
use kmswrap::core::options::Options;
use kmswrap::core::types::{BlobInfo, WrapperConfig, WrapperType};
use kmswrap::core::wrapper::Wrapper;
use kmswrap::serve_plugin;
use kmswrap::testing::{MemoryKms, TestWrapper};

#[derive(Parser, Debug)]
#[command(name = "kmswrap-plugin", version, about = "Serve a kmswrap wrapper to a plugin host")]
struct Cli {
    /// Wrapper to serve
    #[arg(value_enum, env = "KMSWRAP_PLUGIN_MODE", default_value = "test")]
    mode: Mode,

    /// Secret for the test wrapper
    #[arg(long, default_value = "foo")]
    secret: String,

    /// Enable debug logging on stderr
    #[arg(short, long)]
    verbose: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    /// Local root-key wrapper; configure with `key`
    Aead,
    /// Deterministic XOR wrapper
    Test,
    /// KMS wrapper over an in-memory backend
    Kms,
    /// Test wrapper whose encrypt never returns
    Stall,
    /// Test wrapper whose encrypt exits the process
    Crash,
}

/// Test wrapper with a broken encrypt, for exercising host-side failure
/// handling.
struct Faulty {
    inner: TestWrapper,
    mode: Mode,
}

impl Wrapper for Faulty {
    fn wrapper_type(&self) -> WrapperType {
        self.inner.wrapper_type()
    }

    fn set_config(&self, opts: &Options) -> kmswrap::Result<WrapperConfig> {
        self.inner.set_config(opts)
    }

    fn key_id(&self) -> kmswrap::Result<String> {
        self.inner.key_id()
    }

    fn encrypt(&self, plaintext: Option<&[u8]>, opts: &Options) -> kmswrap::Result<BlobInfo> {
        match self.mode {
            Mode::Stall => loop {
                thread::park();
            },
            Mode::Crash => std::process::exit(3),
            _ => self.inner.encrypt(plaintext, opts),
        }
    }

    fn decrypt(&self, blob: Option<&BlobInfo>, opts: &Options) -> kmswrap::Result<Vec<u8>> {
        self.inner.decrypt(blob, opts)
    }
}

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("kmswrap=debug")
        } else {
            EnvFilter::new("kmswrap=warn")
        }
    });

    // stdout carries the protocol; logs go to stderr only.
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .without_time(),
        )
        .init();

    let result = match cli.mode {
        Mode::Aead => serve_plugin(AeadWrapper::new()),
        Mode::Test => serve_plugin(TestWrapper::new(cli.secret.as_bytes())),
        Mode::Kms => {
            let profile = KmsProfile::new("memory", "KMSWRAP_TEST_KEY_ID");
            let kms = Arc::new(MemoryKms::new("test-key", "test-key-v1"));
            serve_plugin(KmsWrapper::with_client(profile, kms))
        }
        Mode::Stall | Mode::Crash => serve_plugin(Faulty {
            inner: TestWrapper::new(cli.secret.as_bytes()),
            mode: cli.mode,
        }),
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
