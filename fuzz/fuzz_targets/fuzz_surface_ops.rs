#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use procswap::{Exports, Surface, SurfaceKind};
use serde_json::json;

#[derive(Arbitrary, Debug)]
enum Op {
    Get(u8),
    Set(u8, i64),
    Call(u8),
    ReplaceObject(Vec<(u8, i64)>),
    ReplaceCallable,
}

fn name(n: u8) -> String {
    format!("m{}", n % 8)
}

fuzz_target!(|ops: Vec<Op>| {
    let surface = Surface::from_exports(Exports::object());
    let id = surface.id();
    let mut epoch = 0;

    for op in ops {
        match op {
            Op::Get(n) => {
                let _ = surface.get(&name(n));
            }
            Op::Set(n, v) => {
                assert!(surface.set(&name(n), json!(v)).is_ok());
                assert_eq!(surface.get(&name(n)), Some(json!(v)));
            }
            Op::Call(n) => {
                assert!(surface.call(&[json!(n)]).is_err());
            }
            Op::ReplaceObject(members) => {
                let exports = members.into_iter().fold(Exports::object(), |e, (n, v)| {
                    e.with_value(name(n), v)
                });
                assert!(surface.replace(exports).is_ok());
                epoch += 1;
            }
            Op::ReplaceCallable => {
                // A kind change is always refused and never mutates.
                let before = surface.to_value();
                assert!(surface.replace(Exports::callable(|_| json!(null))).is_err());
                assert_eq!(surface.to_value(), before);
            }
        }

        assert_eq!(surface.id(), id);
        assert_eq!(surface.kind(), SurfaceKind::Object);
        assert_eq!(surface.epoch(), epoch);
    }
});
