#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Some(proto) = nadvd::proto::classify(data) {
        let _ = proto.module().decode(data);
    }
});
