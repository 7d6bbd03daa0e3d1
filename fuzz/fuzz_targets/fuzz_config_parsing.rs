#![no_main]

use libfuzzer_sys::fuzz_target;
use procswap::{DataFormat, HotswapConfig};

fuzz_target!(|data: &[u8]| {
    let Ok(content) = std::str::from_utf8(data) else {
        return;
    };

    // Parsing should return Result, never panic
    for format in [DataFormat::Json, DataFormat::Toml] {
        if let Ok(config) = HotswapConfig::from_str_with_format(content, format, "fuzz") {
            // Tags always come out normalised.
            assert!(config.extensions.iter().all(|tag| tag.starts_with('.')));
        }
    }

    // Rendering diagnostics must not panic either.
    if let Err(err) = HotswapConfig::from_str_with_format(content, DataFormat::Toml, "fuzz") {
        let _ = format!("{:?}", procswap::miette::Report::new(err));
    }
});
