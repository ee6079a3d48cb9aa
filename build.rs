use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    if let Some(revision) = git_revision() {
        println!("cargo:rustc-env=PROXYSPEED_BUILD_GIT_HASH={}", revision);
    }
}

/// Short commit hash, suffixed with `-dirty` when the tree has changes.
/// `None` outside a git checkout.
fn git_revision() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--always", "--dirty", "--abbrev=10"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }

    let revision = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!revision.is_empty()).then_some(revision)
}
