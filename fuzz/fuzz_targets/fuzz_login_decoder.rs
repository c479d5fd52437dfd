//! Fuzz target: `wire::decode_login`
//!
//! The first two bytes pick the HTTP status, the rest is the body.  A decoded
//! grant must always be complete.
//!
//! cargo fuzz run fuzz_login_decoder

#![no_main]

use libfuzzer_sys::fuzz_target;
use tagmaster::app::ports::HttpResponse;
use tagmaster::app::wire::decode_login;

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }
    let status = 100 + u16::from_le_bytes([data[0], data[1]]) % 500;
    let response = HttpResponse::new(status, &data[2..]);

    if let Ok(grant) = decode_login(&response) {
        assert!(response.is_success(), "grant decoded from HTTP {status}");
        assert!(!grant.device_id.is_empty());
        assert!(!grant.company_id.is_empty());
        assert!(!grant.token.is_empty());
        assert!(grant.token_expires_at > 0);
    }
});
