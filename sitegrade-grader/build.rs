//! Build script for sitegrade-grader
//!
//! Sets `GIT_HASH`, `BUILD_TIMESTAMP` (RFC 3339, UTC) and `BUILD_PROFILE` for
//! the startup banner and `/health`. Source tarballs have no `.git`, so
//! `SITEGRADE_BUILD_HASH` can supply the hash instead.

use std::process::Command;

const HASH_OVERRIDE_VAR: &str = "SITEGRADE_BUILD_HASH";

/// Trimmed stdout of a successful git command
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout).ok().map(|s| s.trim().to_string())
}

fn build_hash() -> String {
    if let Ok(hash) = std::env::var(HASH_OVERRIDE_VAR) {
        if !hash.trim().is_empty() {
            return hash.trim().to_string();
        }
    }

    match git(&["rev-parse", "--short=8", "HEAD"]) {
        Some(hash) => {
            let dirty = git(&["status", "--porcelain", "--untracked-files=no"])
                .is_some_and(|status| !status.is_empty());
            if dirty {
                format!("{}-dirty", hash)
            } else {
                hash
            }
        }
        None => "unknown".to_string(),
    }
}

fn main() {
    let timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let profile = std::env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());

    println!("cargo:rustc-env=GIT_HASH={}", build_hash());
    println!("cargo:rustc-env=BUILD_TIMESTAMP={}", timestamp);
    println!("cargo:rustc-env=BUILD_PROFILE={}", profile);

    println!("cargo:rerun-if-env-changed={}", HASH_OVERRIDE_VAR);
    println!("cargo:rerun-if-changed=catalog/default_layers.toml");
}
