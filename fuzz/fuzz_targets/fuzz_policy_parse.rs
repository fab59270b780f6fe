#![no_main]
use iamsim::Policy;
use libfuzzer_sys::fuzz_target;

// Parsing arbitrary documents must never panic, and anything that parses
// must survive a serialize/parse cycle
fuzz_target!(|data: &[u8]| {
    let json = match std::str::from_utf8(data) {
        Ok(s) => s,
        Err(_) => return,
    };

    if let Ok(policy) = Policy::from_json(json) {
        let rendered = policy.to_json().expect("parsed policy serializes");
        Policy::from_json(&rendered).expect("rendered policy parses");
    }
    let _ = Policy::resource_policy_from_json(json);
});
