#![no_main]
use arbitrary::Arbitrary;
use iamsim::PatternMatcher;
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct Input {
    pattern: String,
    value: String,
}

fuzz_target!(|input: Input| {
    let matched = PatternMatcher::matches(&input.pattern, &input.value);
    if input.pattern == input.value {
        assert!(matched);
    }
    if input.pattern == "*" {
        assert!(matched);
    }
    let _ = PatternMatcher::matches_ignore_case(&input.pattern, &input.value);
});
