//! Fuzz testing for the compact duration parser.
//!
//! `SERVER_*_WINDOW` and `SERVER_SHUTDOWN_TIMEOUT` are parsed from operator
//! input at startup, so the parser must reject garbage with an error rather
//! than panic. Anything it accepts must also survive formatting.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! # Install cargo-fuzz (requires nightly)
//! cargo +nightly install cargo-fuzz
//!
//! # Run with a time limit (e.g., 60 seconds)
//! cargo +nightly fuzz run fuzz_duration -- -max_total_time=60
//! ```

#![no_main]

use libfuzzer_sys::fuzz_target;
use obvious_server::utils::{ceil_secs, format_duration, parse_duration};

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(duration) = parse_duration(s) {
        let formatted = format_duration(duration);
        assert!(!formatted.is_empty());
        let _ = parse_duration(&formatted);
        let _ = ceil_secs(duration);
    }
});
