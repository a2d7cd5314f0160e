//! Stamps the binary with a version label: the crate version on a release tag,
//! `dev@<short-hash>` otherwise.

use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    Command::new("git")
        .args(args)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
}

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/");

    let label = if git(&["describe", "--exact-match", "--tags", "HEAD"]).is_some() {
        env!("CARGO_PKG_VERSION").to_string()
    } else {
        match git(&["rev-parse", "--short", "HEAD"]) {
            Some(hash) if !hash.is_empty() => format!("dev@{hash}"),
            _ => "dev@unknown".to_string(),
        }
    };

    println!("cargo:rustc-env=THUMBFIT_VERSION_LABEL={label}");
}
