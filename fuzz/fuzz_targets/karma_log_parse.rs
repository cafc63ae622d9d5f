#![no_main]

use std::path::Path;

use karmabot_karma::{parse_ledger_records, KarmaLedgerError};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let non_blank = raw.lines().filter(|line| !line.trim().is_empty()).count();
    match parse_ledger_records(Path::new("fuzz.csv"), &raw) {
        // Quoted fields may span lines, so records never outnumber lines.
        Ok(records) => assert!(records.len() <= non_blank),
        Err(KarmaLedgerError::Malformed { line, .. }) => {
            assert!(line >= 1 && line <= raw.lines().count())
        }
        Err(other) => panic!("unexpected ledger error: {other}"),
    }
});
