#![no_main]
use libfuzzer_sys::fuzz_target;

use flash_amf::{document, packet};

fuzz_target!(|data: &[u8]| {
    if let Ok(decoded) = packet::read::parse(data) {
        let node = document::from_packet(&decoded);
        let _ = document::to_packet(&node);
    }
});
