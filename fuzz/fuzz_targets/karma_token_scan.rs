#![no_main]

use karmabot_karma::{net_delta, scan_karma_tokens, KarmaTarget};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let words = text.split_whitespace().count();
    let tokens = scan_karma_tokens(&text);
    assert!(tokens.len() <= words);

    for token in tokens {
        assert!(!token.deltas.is_empty());
        assert!(net_delta(&token.deltas).unsigned_abs() as usize <= token.deltas.len());
        match &token.target {
            KarmaTarget::Mention(id) => {
                assert_eq!(id.len(), 9);
                assert!(id.starts_with('U'));
            }
            KarmaTarget::Name(name) => {
                assert!(!name.is_empty());
                assert!(!name.chars().any(char::is_whitespace));
            }
        }
    }
});
