//! Fuzz testing for credential verification.
//!
//! Verification parses attacker-controlled input on every protected request,
//! so it must reject anything that is not a credential it signed, without
//! panicking. Any input that verifies here is a forgery and aborts the run.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! # Install cargo-fuzz (requires nightly)
//! cargo +nightly install cargo-fuzz
//!
//! # Run with a time limit (e.g., 60 seconds)
//! cargo +nightly fuzz run fuzz_verify -- -max_total_time=60
//! ```

#![no_main]

use std::sync::LazyLock;

use libfuzzer_sys::fuzz_target;
use tollgate::auth::{JwtSettings, TokenAuthenticator};

static AUTHENTICATOR: LazyLock<TokenAuthenticator> = LazyLock::new(|| {
    TokenAuthenticator::new(JwtSettings::new("fuzz-issuer", "fuzz-key"))
        .expect("static settings are valid")
});

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    assert!(AUTHENTICATOR.verify(input).is_err(), "forged credential accepted");
    assert!(AUTHENTICATOR.verify_for_refresh(input).is_err());
});
