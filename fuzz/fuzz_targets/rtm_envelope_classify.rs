#![no_main]

use karmabot_slack_runtime::{RtmEnvelope, SlackRuntimeError};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data).into_owned();
    match RtmEnvelope::classify(raw.clone()) {
        Ok(envelope) => assert_eq!(envelope.raw, raw),
        Err(error) => {
            assert!(matches!(error, SlackRuntimeError::EnvelopeDecode(_)));
            assert!(error.is_protocol_error());
        }
    }
});
