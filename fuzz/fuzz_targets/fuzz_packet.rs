#![no_main]
use libfuzzer_sys::fuzz_target;

use flash_amf::packet;

fuzz_target!(|data: &[u8]| {
    if let Ok(decoded) = packet::read::parse(data) {
        let _ = packet::write::write_to_bytes(&decoded, true);
    }
});
