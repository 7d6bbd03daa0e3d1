#![no_main]

use std::path::Path;

use libfuzzer_sys::fuzz_target;
use procswap::{Compiler, DataCompiler};

fuzz_target!(|data: &[u8]| {
    // Convert bytes to string (lossy to handle invalid UTF-8)
    let content = String::from_utf8_lossy(data);
    let compiler = DataCompiler::new();

    // Compiling may fail but must never panic, whatever the format.
    for name in ["/fuzz/unit.json", "/fuzz/unit.toml", "/fuzz/unit.hot"] {
        if let Err(err) = compiler.compile(Path::new(name), &content) {
            // Reported locations must point inside the input.
            if let Some((line, _)) = err.location() {
                assert!(line >= 1);
                assert!(line <= content.lines().count().max(1) + 1);
            }
        }
    }
});
