//! Test fixtures - archives, contexts and manifests.

use mlenv_provision::{EnvironmentContext, SetMode};
use std::fs::File;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Minimal PATH so `sh`, `true`, `test` etc. resolve in a clean context.
pub const TEST_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Scratch directory plus a clean context rooted in it.
pub fn create_test_env() -> (TempDir, EnvironmentContext) {
    let dir = TempDir::new().unwrap();
    let mut ctx = EnvironmentContext::new().with_working_dir(dir.path());
    ctx.set("PATH", TEST_PATH, SetMode::Overwrite);
    (dir, ctx)
}

/// Write a tar.gz holding `files` (path, contents) and return its path.
pub fn make_tar_gz(dir: &Path, name: &str, files: &[(&str, &[u8])]) -> PathBuf {
    let path = dir.join(name);
    let file = File::create(&path).unwrap();
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (entry, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, entry, *content).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
    path
}

/// A stand-in for the MuJoCo release archive.
pub fn mujoco_archive(dir: &Path) -> PathBuf {
    make_tar_gz(
        dir,
        "mujoco210-linux-x86_64.tar.gz",
        &[
            ("mujoco210/bin/libmujoco210.so", b"\x7fELF"),
            ("mujoco210/include/mujoco.h", b"/* mujoco */"),
        ],
    )
}

/// Path of a manifest shipped in `recipes/`.
pub fn shipped_recipe(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("recipes")
        .join(format!("{}.toml", name))
}
