//! Shared helpers for `prism-wgpu` integration tests.

pub fn require_gpu() -> bool {
    let Ok(raw) = std::env::var("PRISM_REQUIRE_GPU") else {
        return false;
    };

    let v = raw.trim();
    v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes") || v.eq_ignore_ascii_case("on")
}

pub fn skip_or_panic(test_name: &str, reason: &str) {
    if require_gpu() {
        panic!("PRISM_REQUIRE_GPU is enabled but {test_name} cannot run: {reason}");
    }
    eprintln!("skipping {test_name}: {reason}");
}
