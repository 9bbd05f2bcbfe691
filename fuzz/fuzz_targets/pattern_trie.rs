#![no_main]

use libfuzzer_sys::fuzz_target;
use rastro::trie::{parse_patterns, PatternSet};

fuzz_target!(|data: &[u8]| {
    // Arbitrary pattern lists must never panic the parser or the builder
    if let Ok(input) = std::str::from_utf8(data) {
        if let Ok(patterns) = parse_patterns(input) {
            let set = PatternSet::new(patterns.iter().cloned());
            let mut reversed = patterns;
            reversed.reverse();
            let other = PatternSet::new(reversed);

            // Exact lookups of every parsed key agree between insertion orders
            for node in set.snapshot().iter() {
                let key = node.data().key();
                assert_eq!(set.best_match(key), other.best_match(key));
            }
        }
    }
});
