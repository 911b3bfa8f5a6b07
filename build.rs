use std::process::Command;

/// Run a git command and return its trimmed stdout, if it succeeded with output.
fn git(args: &[&str]) -> Option<String> {
    Command::new("git")
        .args(args)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn main() {
    let commit = git(&["rev-parse", "--short", "HEAD"]).unwrap_or_else(|| "unknown".to_string());
    let release = git(&["describe", "--tags", "--abbrev=0"])
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());
    let built_at = chrono::Utc::now().to_rfc3339();

    println!("cargo:rustc-env=SKYPORT_COMMIT={}", commit);
    println!("cargo:rustc-env=SKYPORT_RELEASE={}", release);
    println!("cargo:rustc-env=SKYPORT_BUILT_AT={}", built_at);

    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs");
}
