//! Single values are decoded in their own reference scope, the same entry point used for
//! message bodies switched into AMF3
#![no_main]
use libfuzzer_sys::fuzz_target;

use flash_amf::amf3;

fuzz_target!(|data: &[u8]| {
    let _ = amf3::read::AMF3Decoder::default().parse_single_element(data);
});
