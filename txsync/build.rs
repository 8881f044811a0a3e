//! Build script for txsync
//!
//! Stamps the binary with the values `/health` reports: `GIT_HASH`
//! (suffixed `-dirty` for uncommitted changes), `BUILD_TIMESTAMP` (UTC) and
//! `BUILD_PROFILE`. Source tarballs built outside a checkout can set
//! `TXSYNC_BUILD_HASH` instead.

use std::process::Command;

const HASH_OVERRIDE_ENV: &str = "TXSYNC_BUILD_HASH";

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout)
        .ok()
        .map(|s| s.trim().to_string())
}

fn build_hash() -> String {
    if let Ok(hash) = std::env::var(HASH_OVERRIDE_ENV) {
        if !hash.trim().is_empty() {
            return hash.trim().to_string();
        }
    }

    match git(&["rev-parse", "--short=8", "HEAD"]) {
        Some(hash) => {
            let dirty = git(&["status", "--porcelain", "--untracked-files=no"])
                .map(|status| !status.is_empty())
                .unwrap_or(false);
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
    println!("cargo:rustc-env=GIT_HASH={}", build_hash());
    println!(
        "cargo:rustc-env=BUILD_TIMESTAMP={}",
        chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    );
    println!(
        "cargo:rustc-env=BUILD_PROFILE={}",
        std::env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string())
    );

    // No rerun-if-changed on sources: the stamp is refreshed on every build
    println!("cargo:rerun-if-env-changed={}", HASH_OVERRIDE_ENV);
}
