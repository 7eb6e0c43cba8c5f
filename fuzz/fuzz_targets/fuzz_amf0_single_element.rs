#![no_main]
use libfuzzer_sys::fuzz_target;

use flash_amf::amf0::read::AMF0Decoder;

fuzz_target!(|data: &[u8]| {
    let _ = AMF0Decoder::default().parse_single_element(data);
});
