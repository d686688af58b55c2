//! Common test fixtures for whl-deploy testing

use crate::TestDir;
use anyhow::Result;
use std::path::PathBuf;

/// Creates a small source-code tree under `top`:
///
/// ```text
/// <top>/README
/// <top>/src/main.cc
/// <top>/docs/            (empty)
/// <top>/scripts/run.sh   (0755 on unix)
/// <top>/latest -> scripts/run.sh   (unix only)
/// ```
pub fn create_source_tree(test_dir: &TestDir, top: &str) -> Result<PathBuf> {
    test_dir.create_file(&format!("{top}/README"), b"Apollo source tree\n")?;
    test_dir.create_file(&format!("{top}/src/main.cc"), b"int main() { return 0; }\n")?;
    test_dir.create_dir(&format!("{top}/docs"))?;

    #[cfg(unix)]
    {
        test_dir.create_executable(&format!("{top}/scripts/run.sh"), b"#!/bin/sh\necho run\n")?;
        test_dir.create_symlink(&format!("{top}/latest"), "scripts/run.sh")?;
    }
    #[cfg(not(unix))]
    test_dir.create_file(&format!("{top}/scripts/run.sh"), b"#!/bin/sh\necho run\n")?;

    Ok(test_dir.join(top))
}

/// Creates a map-data tree with a larger binary payload
pub fn create_map_tree(test_dir: &TestDir, top: &str) -> Result<PathBuf> {
    test_dir.create_file(&format!("{top}/sunnyvale/base_map.bin"), &binary_payload(256 * 1024))?;
    test_dir.create_file(&format!("{top}/sunnyvale/routing_map.txt"), b"lane: 1\n")?;
    test_dir.create_file(&format!("{top}/borregas_ave/base_map.txt"), b"lane: 2\n")?;
    Ok(test_dir.join(top))
}

/// Deterministic, poorly compressible bytes
pub fn binary_payload(len: usize) -> Vec<u8> {
    let mut state: u32 = 0x2545_f491;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state & 0xff) as u8
        })
        .collect()
}
