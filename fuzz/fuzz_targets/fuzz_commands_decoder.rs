//! Fuzz target: `wire::decode_commands` and `wire::decode_scan_reply`
//!
//! Arbitrary poll and scan reply bodies must never panic, and an accepted
//! command batch never contains a blank id or action.
//!
//! cargo fuzz run fuzz_commands_decoder

#![no_main]

use libfuzzer_sys::fuzz_target;
use tagmaster::app::commands::CommandAction;
use tagmaster::app::wire::{decode_commands, decode_scan_reply};

fuzz_target!(|data: &[u8]| {
    if let Ok(commands) = decode_commands(data) {
        for cmd in &commands {
            assert!(!cmd.id.is_empty());
            if let CommandAction::Unsupported(action) = &cmd.action {
                assert!(!action.is_empty());
            }
        }
    }
    let _ = decode_scan_reply(data);
});
