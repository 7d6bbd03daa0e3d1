//! Hot reload example demonstrating identity-preserving swaps.
//!
//! This example loads a TOML unit, holds on to its surface, and prints the
//! surface whenever the engine swaps in a new version.
//!
//! # Running
//!
//! ```bash
//! # Run the example (logs go through tracing)
//! RUST_LOG=procswap=debug cargo run --example hot_reload
//!
//! # In another terminal, modify the unit
//! echo 'port = 9090' > /tmp/procswap_example.toml
//! ```

use std::fs;
use std::time::Duration;

use procswap::{ConfigUpdate, DataCompiler, Hotswap, HotswapEvent};
use tracing_subscriber::EnvFilter;

fn main() -> procswap::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let unit_path = std::env::temp_dir().join("procswap_example.toml");
    fs::write(&unit_path, "port = 8080\nhost = \"localhost\"\ndebug = false\n")
        .map_err(|e| miette::miette!("failed to write {}: {e}", unit_path.display()))?;

    println!("Unit file: {}", unit_path.display());
    println!("Modify this file to see hot reload in action!\n");

    let hotswap = Hotswap::builder()
        .compiler(DataCompiler::new())
        .extensions([".toml"])
        .debounce(Duration::from_millis(100))
        .on_error(|err| {
            eprintln!("\n[ERROR] {err}");
            eprintln!("  Previous version is still active");
        })
        .build()?;

    // The same surface is updated in place on every reload.
    let settings = hotswap.require(&unit_path)?;
    println!("Initial: {}", settings.to_value());

    let events = hotswap.subscribe();
    for event in events.iter().take(5) {
        match event {
            HotswapEvent::Change(path) => println!("\n[CHANGE] {}", path.display()),
            HotswapEvent::Swap(_) => {
                println!("[RELOAD] now: {}", settings.to_value());
                println!("  epoch: {}", settings.epoch());
            }
            HotswapEvent::Error(_) => {}
        }
    }

    let config = hotswap.configure(ConfigUpdate::new().watch(false));
    println!("\nStopped watching (watch = {})", config.watch);
    hotswap.shutdown();

    let _ = fs::remove_file(&unit_path);
    Ok(())
}
