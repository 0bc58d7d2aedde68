// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
use anyhow::{bail, Context, Result};
use clap::Parser;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

const TARGET: &str = "thumbv8m.main-none-eabihf";

#[derive(Debug, Parser)]
enum Xtask {
    /// Builds the firmware for one board and copies the ELF out
    Package {
        /// Board name, as in the `target-board-*` feature
        #[arg(long)]
        board: String,
        #[arg(long)]
        out: PathBuf,
    },
}

// borrowed from hubris
fn remap_paths() -> BTreeMap<PathBuf, &'static str> {
    // Panic messages in crates have a long prefix; we'll shorten it using
    // the --remap-path-prefix argument to reduce message size. Local crates
    // become /svi2-glitcher, crates.io becomes /crates.io and git
    // dependencies /git.
    let mut remap_paths = BTreeMap::new();

    if let Ok(home) = std::env::var("CARGO_HOME") {
        let cargo_home = PathBuf::from(home);
        remap_paths.insert(cargo_home.join("git").join("checkouts"), "/git");

        let registry = cargo_home.join("registry").join("src");
        remap_paths.insert(registry.join("github.com-1ecc6299db9ec823"), "/crates.io");
        remap_paths.insert(
            registry.join("index.crates.io-6f17d22bba15001f"),
            "/crates.io",
        );
    }

    if let Ok(dir) = std::env::var("CARGO_MANIFEST_DIR") {
        let mut root = PathBuf::from(dir);
        root.pop();
        remap_paths.insert(root, "/svi2-glitcher");
    }
    remap_paths
}

fn package(board: String, out: PathBuf) -> Result<()> {
    let remap_path_prefix = remap_paths().iter().fold(String::new(), |mut output, r| {
        let _ = write!(output, " --remap-path-prefix={}={}", r.0.display(), r.1);
        output
    });

    let cargo = std::env::var_os("CARGO").unwrap_or_else(|| "cargo".into());
    let mut command = Command::new(cargo);
    command.arg("build");
    command.arg("--release");
    command.arg("--target");
    command.arg(TARGET);
    command.arg("--bin");
    command.arg("svi2-glitcher");
    command.arg("--features");
    command.arg(format!("target-board-{board}"));

    // The linker script has to be named explicitly once RUSTFLAGS is set.
    command.env("RUSTFLAGS", format!("{remap_path_prefix} -C link-arg=-Tlink.x"));

    let status = command
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()?
        .wait()?;

    if !status.success() {
        bail!("build failed: {}", status);
    }

    let elf = PathBuf::from("target")
        .join(TARGET)
        .join("release")
        .join("svi2-glitcher");
    std::fs::copy(&elf, &out)
        .with_context(|| format!("copying {} to {}", elf.display(), out.display()))?;
    Ok(())
}

fn main() -> Result<()> {
    let xtask = Xtask::parse();

    match xtask {
        Xtask::Package { board, out } => {
            package(board, out)?;
        }
    }
    Ok(())
}
