#![no_main]
use libfuzzer_sys::fuzz_target;

use flash_amf::amf3::read::AMF3Decoder;

fuzz_target!(|data: &[u8]| {
    let _ = AMF3Decoder::default().parse_string(data);
});
