#![no_main]

use auditlink_correlation::parser::{KernelAuditParser, LineParser};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let parser = KernelAuditParser::new();

    // must return Ok or Err without crashing or panicking
    let line = String::from_utf8_lossy(data);
    let _ = parser.parse_line(&line);
});
