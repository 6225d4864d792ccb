#![allow(missing_docs)]

fn main() {
    process_version_string();
}

fn process_version_string() {
    let hash = git_short_hash().unwrap_or_else(|| "unknown".into());
    println!("cargo:rustc-env=FCP_BUILD_GIT_HASH={hash}");
    let cargo_version = env!("CARGO_PKG_VERSION");
    println!("cargo:rustc-env=FCP_VERSION_STRING={cargo_version}+g{hash}");
    println!("cargo:rerun-if-changed=../.git/HEAD");
}

fn git_short_hash() -> Option<String> {
    use std::process::Command;
    let args = &["rev-parse", "--short=8", "HEAD"];
    let output = Command::new("git").args(args).output().ok()?;
    let rev = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if rev.is_empty() { None } else { Some(rev) }
}
