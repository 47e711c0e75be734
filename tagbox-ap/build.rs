//! Stamps the binary with a build id for the startup log line

use std::process::Command;

fn git_describe() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--always", "--dirty", "--abbrev=8"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let id = String::from_utf8(output.stdout).ok()?;
    Some(id.trim().to_string()).filter(|id| !id.is_empty())
}

fn main() {
    let source = git_describe().unwrap_or_else(|| "no-git".to_string());
    let profile = std::env::var("PROFILE").unwrap_or_default();
    println!("cargo:rustc-env=TAGBOX_BUILD_ID={}/{}", source, profile);
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=../.git/HEAD");
}
