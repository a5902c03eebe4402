// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use aibuild::BuildRequest;
use tempfile::TempDir;

/// Policy used by the overlay scenarios: rpi4 and rcar_s4 boards with
/// per-target additions on top of global rules.
pub const BOARD_POLICY: &str = r#"
name: automotive-boards
description: Production board policy
restrictions:
  architectures:
    allow: [aarch64]
  targets:
    allow: [rpi4]
    allow@rcar_s4: [rcar_s4]
  rpms:
    disallow: [telnet]
    disallow@rpi4: [rpi-debug-tools]
  kernel_modules:
    disallow: [fat, nfs]
    disallow@rpi4: [bcm2835-dma]
    disallow@rcar_s4: [ufs-renesas]
  variables:
    force:
      use_debug: false
    force@rcar_s4:
      use_debug: false
      rcar_tuning: true
  sysctl:
    force:
      kernel.panic: 10
  selinux_booleans:
    force:
      container_manage_cgroup: true
  manifest_restrictions:
    disallow:
      properties:
        - experimental
      values:
        image.selinux_mode: [permissive]
  require_simple_manifest: true
"#;

/// Write `content` to `name` inside `dir`, returning the full path
pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

/// Create a scratch directory holding the board policy.
///
/// Returns (TempDir, policy_path) - keep the TempDir alive to prevent cleanup.
pub fn setup_policy() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = write_file(dir.path(), "policy.yml", BOARD_POLICY);
    (dir, path)
}

/// A request that satisfies the board policy for `target`
pub fn board_request(target: &str) -> BuildRequest<'_> {
    BuildRequest {
        mode: "image",
        target,
        distribution: "autosd",
        architecture: "aarch64",
        repositories: &[],
        simple_manifest: true,
    }
}
