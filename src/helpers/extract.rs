//! Archive unpacking for `unpack-archive` steps.
//!
//! Native extraction (no external `tar`/`unzip` needed) for tar, tar.gz,
//! tar.xz, tar.bz2, tar.zst and zip. Entries that would land outside the
//! destination, directly or through a symlink, are rejected.
//!
//! A zero exit is not proof of success: [`verify_expected`] checks that the
//! layout later steps rely on actually exists.

use crate::core::output;
use anyhow::{Context, Result, anyhow, bail};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};

/// Supported archive formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Tar,
    TarGz,
    TarXz,
    TarBz2,
    TarZst,
    Zip,
}

impl Format {
    /// Detect the format from a file name.
    pub fn detect(archive: &Path) -> Option<Self> {
        let name = archive.file_name()?.to_string_lossy().to_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            Some(Self::TarXz)
        } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") {
            Some(Self::TarBz2)
        } else if name.ends_with(".tar.zst") || name.ends_with(".tzst") {
            Some(Self::TarZst)
        } else if name.ends_with(".zip") || name.ends_with(".whl") {
            Some(Self::Zip)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }

    /// Parse an explicit format name as written in a manifest.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "tar" => Some(Self::Tar),
            "tar.gz" | "tgz" => Some(Self::TarGz),
            "tar.xz" | "txz" => Some(Self::TarXz),
            "tar.bz2" | "tbz2" => Some(Self::TarBz2),
            "tar.zst" | "tzst" => Some(Self::TarZst),
            "zip" => Some(Self::Zip),
            _ => None,
        }
    }
}

/// Unpack `archive` into `dest`, then verify every `expect` entry exists.
///
/// `format` overrides detection from the file name.
pub fn unpack(archive: &Path, dest: &Path, format: Option<&str>, expect: &[String]) -> Result<()> {
    let format = match format {
        Some(name) => Format::parse(name).ok_or_else(|| anyhow!("unknown archive format: {}", name))?,
        None => Format::detect(archive)
            .ok_or_else(|| anyhow!("cannot detect archive format: {}", archive.display()))?,
    };

    if !archive.is_file() {
        bail!("archive not found: {}", archive.display());
    }

    std::fs::create_dir_all(dest)
        .with_context(|| format!("cannot create destination directory {}", dest.display()))?;

    let filename = archive
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "archive".to_string());

    let pb = output::spinner(&format!("extracting {}", filename));
    let result = extract_with_format(archive, dest, format);
    pb.finish_and_clear();
    result?;

    verify_expected(dest, expect)?;
    output::detail(&format!("extracted {} to {}", filename, dest.display()));
    Ok(())
}

/// Check that each entry (a relative path or glob pattern) exists under `dest`.
pub fn verify_expected(dest: &Path, expect: &[String]) -> Result<()> {
    let mut missing = Vec::new();

    for entry in expect {
        let full = dest.join(entry);
        let pattern = full.to_string_lossy();
        let found = if pattern.contains(['*', '?', '[']) {
            glob::glob(&pattern)
                .with_context(|| format!("invalid expect pattern '{}'", entry))?
                .any(|p| p.is_ok())
        } else {
            full.exists()
        };
        if !found {
            missing.push(entry.as_str());
        }
    }

    if !missing.is_empty() {
        bail!(
            "expected paths missing after unpack into {}: {}",
            dest.display(),
            missing.join(", ")
        );
    }
    Ok(())
}

fn open(archive: &Path) -> Result<BufReader<File>> {
    let file = File::open(archive).with_context(|| format!("cannot open {}", archive.display()))?;
    Ok(BufReader::new(file))
}

fn extract_with_format(archive: &Path, dest: &Path, format: Format) -> Result<()> {
    match format {
        Format::Tar => extract_tar(open(archive)?, dest),
        Format::TarGz => extract_tar(flate2::read::GzDecoder::new(open(archive)?), dest),
        Format::TarXz => extract_tar(xz2::read::XzDecoder::new(open(archive)?), dest),
        Format::TarBz2 => extract_tar(bzip2::read::BzDecoder::new(open(archive)?), dest),
        Format::TarZst => {
            let decoder =
                zstd::stream::read::Decoder::new(open(archive)?).context("zstd init error")?;
            extract_tar(decoder, dest)
        }
        Format::Zip => extract_zip(archive, dest),
    }
}

/// Lexically normalize a path (no filesystem access).
fn normalize_lexical(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    let mut has_root = false;

    for c in path.components() {
        match c {
            Component::Prefix(p) => {
                out.clear();
                out.push(p.as_os_str());
                has_root = true;
            }
            Component::RootDir => {
                out.push(Component::RootDir.as_os_str());
                has_root = true;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = out
                    .components()
                    .next_back()
                    .is_some_and(|last| matches!(last, Component::Normal(_)));
                if popped {
                    out.pop();
                } else if !has_root {
                    out.push("..");
                }
            }
            Component::Normal(seg) => out.push(seg),
        }
    }

    out
}

/// Reject writes through an existing symlink anywhere under `dest`.
fn ensure_no_symlink_components(dest: &Path, full_path: &Path) -> Result<()> {
    let rel = full_path
        .strip_prefix(dest)
        .map_err(|_| anyhow!("archive path outside destination: {}", full_path.display()))?;

    let mut cur = dest.to_path_buf();
    for comp in rel.components() {
        cur.push(comp);
        if let Ok(md) = std::fs::symlink_metadata(&cur)
            && md.file_type().is_symlink()
        {
            bail!("extraction blocked: symlink in path component: {}", cur.display());
        }
    }

    Ok(())
}

fn ensure_link_target_within_dest(dest: &Path, link_parent: &Path, target: &Path) -> Result<()> {
    if target.has_root() {
        bail!("archive contains unsafe link target (absolute): {}", target.display());
    }

    let candidate = normalize_lexical(&link_parent.join(target));
    if candidate.strip_prefix(normalize_lexical(dest)).is_err() {
        bail!(
            "archive contains unsafe link target (escapes dest): {} -> {}",
            link_parent.display(),
            target.display()
        );
    }

    Ok(())
}

fn extract_tar<R: Read>(reader: R, dest: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(reader);

    for entry in archive.entries().context("tar read error")? {
        let mut entry = entry.context("tar entry error")?;
        let path = entry.path().context("tar path error")?.into_owned();

        if path.has_root() || path.components().any(|c| c == Component::ParentDir) {
            bail!("tar contains unsafe path: {}", path.display());
        }
        if path.as_os_str().is_empty() || path == Path::new(".") {
            continue;
        }

        let full_path = dest.join(&path);
        ensure_no_symlink_components(dest, &full_path)?;

        let entry_type = entry.header().entry_type();
        let link_target = if matches!(entry_type, tar::EntryType::Symlink | tar::EntryType::Link) {
            let target = entry
                .link_name()
                .context("tar link_name error")?
                .ok_or_else(|| anyhow!("tar link without target: {}", path.display()))?
                .into_owned();
            Some(target)
        } else {
            None
        };

        // Symlink targets are relative to the link; hardlink targets to the archive root.
        match (&link_target, entry_type) {
            (Some(target), tar::EntryType::Link) => {
                ensure_link_target_within_dest(dest, dest, target)?
            }
            (Some(target), _) => {
                let link_parent = full_path.parent().unwrap_or(dest);
                ensure_link_target_within_dest(dest, link_parent, target)?
            }
            (None, _) => {}
        }

        if let Some(parent) = full_path.parent() {
            ensure_no_symlink_components(dest, parent)?;
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create directory {}", parent.display()))?;
        }

        if let (Some(target), tar::EntryType::Link) = (&link_target, entry_type) {
            let source = dest.join(target);
            ensure_no_symlink_components(dest, &source)?;
            if std::fs::symlink_metadata(&full_path).is_ok() {
                std::fs::remove_file(&full_path)
                    .with_context(|| format!("cannot replace {}", full_path.display()))?;
            }
            std::fs::hard_link(&source, &full_path).with_context(|| {
                format!("cannot hard link {} to {}", path.display(), target.display())
            })?;
            continue;
        }

        entry
            .unpack(&full_path)
            .with_context(|| format!("unpack error for {}", path.display()))?;
    }

    Ok(())
}

fn extract_zip(archive_path: &Path, dest: &Path) -> Result<()> {
    let file =
        File::open(archive_path).with_context(|| format!("cannot open {}", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(file).context("zip read error")?;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i).context("zip entry error")?;

        let Some(rel) = file.enclosed_name() else {
            bail!("zip contains unsafe path: {}", file.name());
        };
        let outpath = dest.join(rel);

        if file.is_dir() {
            std::fs::create_dir_all(&outpath)
                .with_context(|| format!("cannot create directory {}", outpath.display()))?;
            continue;
        }

        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create directory {}", parent.display()))?;
        }
        let mut outfile = File::create(&outpath)
            .with_context(|| format!("cannot create {}", outpath.display()))?;
        std::io::copy(&mut file, &mut outfile)
            .with_context(|| format!("write error for {}", outpath.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = file.unix_mode() {
                std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode)).ok();
            }
        }
    }

    Ok(())
}
