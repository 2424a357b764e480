//! Test utilities for envbake-lib.
//!
//! Fixture builders for base artifacts and package indexes.

use std::fs;
use std::path::{Path, PathBuf};

use crate::consts::{ARTIFACT_METADATA_FILENAME, ARTIFACT_ROOTFS_DIR, REQUIRES_FILENAME};
use crate::descriptor::BaseArtifact;

/// Lay out a minimal Python-like base artifact under `root`.
///
/// Every package in `packages` gets a launcher in `/usr/local/bin` and an
/// entry in `artifact.json`. Returns the artifact directory.
pub fn write_base_artifact(root: &Path, base: &BaseArtifact, packages: &[(&str, &str)]) -> PathBuf {
  let dir = root.join(&base.name).join(base.tag());
  let rootfs = dir.join(ARTIFACT_ROOTFS_DIR);

  fs::create_dir_all(rootfs.join("usr/local/bin")).unwrap();
  fs::create_dir_all(rootfs.join("usr/local/lib/site-packages")).unwrap();
  fs::create_dir_all(rootfs.join("etc")).unwrap();
  fs::write(rootfs.join("etc/os-release"), format!("ID={}\nVERSION={}\n", base.name, base.tag())).unwrap();
  fs::write(rootfs.join("usr/local/bin/python3"), "#!/bin/sh\n").unwrap();

  for (name, _) in packages {
    fs::write(rootfs.join("usr/local/bin").join(name), "#!/bin/sh\n").unwrap();
  }

  let packages: serde_json::Map<String, serde_json::Value> = packages
    .iter()
    .map(|(name, version)| (name.to_string(), serde_json::Value::from(*version)))
    .collect();
  fs::write(
    dir.join(ARTIFACT_METADATA_FILENAME),
    serde_json::json!({ "packages": packages }).to_string(),
  )
  .unwrap();

  dir
}

/// Add `name` at `version` to a local package index, depending on `requires`.
pub fn write_index_package(index: &Path, name: &str, version: &str, requires: &[&str]) -> PathBuf {
  let dir = index.join(name).join(version);
  let module = name.replace('-', "_");
  fs::create_dir_all(dir.join(&module)).unwrap();
  fs::write(
    dir.join(&module).join("__init__.py"),
    format!("__version__ = \"{}\"\n", version),
  )
  .unwrap();
  if !requires.is_empty() {
    fs::write(dir.join(REQUIRES_FILENAME), requires.join("\n")).unwrap();
  }
  dir
}
