//! Performance benchmarks for stable surface access and in-place swaps.
//!
//! Run with: `cargo bench -p procswap`

use std::path::Path;

use procswap::{Accessor, Exports, Module, Surface, UnitRegistry};
use serde_json::json;

fn main() {
    divan::main();
}

fn wide_exports(members: usize) -> Exports {
    (0..members).fold(Exports::object(), |exports, i| {
        exports.with_value(format!("field_{i}"), i)
    })
}

// ============================================================================
// Reads
// ============================================================================

#[divan::bench]
fn get_data_member(bencher: divan::Bencher) {
    let surface = Surface::from_exports(wide_exports(50));
    bencher.bench_local(|| divan::black_box(surface.get(divan::black_box("field_25"))));
}

#[divan::bench]
fn get_accessor_member(bencher: divan::Bencher) {
    let surface = Surface::from_exports(
        Exports::object().with_accessor("now", Accessor::new().getter(|| json!(42))),
    );
    bencher.bench_local(|| divan::black_box(surface.get(divan::black_box("now"))));
}

#[divan::bench]
fn call_callable(bencher: divan::Bencher) {
    let surface = Surface::from_exports(Exports::callable(|args| json!(args.len())));
    let args = [json!(1), json!(2)];
    bencher.bench_local(|| divan::black_box(surface.call(divan::black_box(&args))));
}

#[divan::bench]
fn set_data_member(bencher: divan::Bencher) {
    let surface = Surface::from_exports(wide_exports(50));
    bencher.bench_local(|| surface.set("field_25", json!(7)));
}

// ============================================================================
// Swaps
// ============================================================================

#[divan::bench(args = [1, 10, 100])]
fn replace_contents(bencher: divan::Bencher, members: usize) {
    let surface = Surface::from_exports(wide_exports(members));
    bencher
        .with_inputs(|| wide_exports(members))
        .bench_local_values(|exports| surface.replace(exports).is_ok());
}

#[divan::bench(args = [1, 10, 100])]
fn registry_reload(bencher: divan::Bencher, members: usize) {
    let registry = UnitRegistry::new();
    let path = Path::new("/bench/unit.hot");
    registry
        .first_load(path, Module::new(wide_exports(members)).managed())
        .unwrap();

    bencher
        .with_inputs(|| Module::new(wide_exports(members)).managed())
        .bench_local_values(|module| registry.reload(path, module).is_ok());
}
