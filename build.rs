use std::path::PathBuf;

fn main() {
    let mut target_board: Option<String> = None;

    for (name, _) in std::env::vars() {
        let prefix = "CARGO_FEATURE_TARGET_BOARD_";
        if name.starts_with("CARGO_FEATURE_TARGET_BOARD_") {
            let suffix = name[prefix.len()..].to_string();
            if let Some(previous) = &target_board {
                panic!(
                    "multiple target board features defined (at least {} and {})",
                    show_feature(previous),
                    show_feature(&suffix)
                );
            }

            target_board = Some(suffix);
        }
    }

    // Host builds (tests, tooling) get by without a board; firmware does not.
    let target = std::env::var("TARGET").unwrap_or_default();
    if target.starts_with("thumb") {
        if target_board.is_none() {
            panic!("missing target-board-* feature");
        }

        // Put the linker script somewhere the linker can find it.
        let out = PathBuf::from(std::env::var_os("OUT_DIR").unwrap());
        std::fs::copy("memory.x", out.join("memory.x")).unwrap();
        println!("cargo:rustc-link-search={}", out.display());
    }

    println!("cargo:rerun-if-changed=memory.x");
    println!("cargo:rerun-if-changed=build.rs");
}

fn show_feature(envvar: &str) -> String {
    let mut name = "target-board-".to_string();
    name.push_str(&envvar.to_ascii_lowercase().replace('_', "-"));
    name
}
