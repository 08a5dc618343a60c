#![no_main]

use auditlink_correlation::parser::parse_fields;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // arbitrary field bodies (quoted blocks, nested user messages)
    // must never panic or loop forever
    let fields = parse_fields(data);
    for (key, _value) in fields {
        assert!(!key.is_empty());
    }
});
