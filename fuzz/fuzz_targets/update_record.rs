#![no_main]

use libfuzzer_sys::fuzz_target;
use shoal_wire::UpdateRecord;

fuzz_target!(|data: &[u8]| {
    // Decoding arbitrary bytes must never panic; whatever decodes must
    // survive a re-encode unchanged
    if let Ok(record) = UpdateRecord::decode(data) {
        let encoded = record.encode();
        let again = UpdateRecord::decode(&encoded).expect("re-encoded record decodes");
        assert_eq!(record, again);
    }
});
