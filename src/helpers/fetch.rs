//! File download for `fetch-file` steps.
//!
//! Streams the response into `<dest>.part`, hashing as it goes, and renames
//! into place only once the body is complete and the optional SHA-256 matches.
//! A failed or interrupted download never leaves a file at `dest`.
//!
//! `file://` URLs are copied locally, which keeps air-gapped builds and tests
//! off the network.

use crate::core::output;
use anyhow::{Context, Result, bail};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Download `url` to `dest`, returning the number of bytes written.
pub fn fetch(url: &str, dest: &Path, timeout: Duration, sha256: Option<&str>) -> Result<u64> {
    if let Some(parent) = dest.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create directory {}", parent.display()))?;
    }

    let partial = partial_path(dest);
    let result = download_to(url, &partial, timeout);

    let (bytes, digest) = match result {
        Ok(v) => v,
        Err(e) => {
            let _ = std::fs::remove_file(&partial);
            return Err(e);
        }
    };

    if let Some(expected) = sha256 {
        let expected = expected.trim().to_lowercase();
        if digest != expected {
            let _ = std::fs::remove_file(&partial);
            bail!(
                "SHA256 integrity check failed for '{}'\n  expected: {}\n  got:      {}",
                url,
                expected,
                digest
            );
        }
    }

    std::fs::rename(&partial, dest)
        .with_context(|| format!("cannot move download into place at {}", dest.display()))?;

    output::detail(&format!("downloaded {} ({} bytes)", dest.display(), bytes));
    Ok(bytes)
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

fn download_to(url: &str, dest: &Path, timeout: Duration) -> Result<(u64, String)> {
    if let Some(local) = url.strip_prefix("file://") {
        let file = File::open(local).with_context(|| format!("cannot open {}", local))?;
        return copy_hashing(file, dest, None);
    }

    let response = ureq::get(url)
        .timeout(timeout)
        .set("User-Agent", "mlenv-provision")
        .call()
        .map_err(|e| match e {
            ureq::Error::Status(code, _) => anyhow::anyhow!("HTTP {} for {}", code, url),
            other => anyhow::anyhow!("request to {} failed: {}", url, other),
        })?;

    let length = response
        .header("content-length")
        .and_then(|s| s.parse::<u64>().ok());

    copy_hashing(response.into_reader(), dest, length)
}

/// Copy `reader` into a new file at `dest` while computing its SHA-256.
fn copy_hashing(mut reader: impl Read, dest: &Path, length: Option<u64>) -> Result<(u64, String)> {
    let pb = match length {
        Some(len) => output::download_progress(len),
        None => output::spinner("downloading"),
    };

    let mut file =
        File::create(dest).with_context(|| format!("cannot create {}", dest.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    let mut total = 0u64;

    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                pb.finish_and_clear();
                return Err(e).context("read error");
            }
        };
        if let Err(e) = file.write_all(&buffer[..n]) {
            pb.finish_and_clear();
            return Err(e).with_context(|| format!("write error for {}", dest.display()));
        }
        hasher.update(&buffer[..n]);
        total += n as u64;
        pb.set_position(total);
    }
    pb.finish_and_clear();

    file.sync_all()
        .with_context(|| format!("cannot flush {}", dest.display()))?;

    if let Some(expected) = length
        && expected != total
    {
        bail!("truncated download: expected {} bytes, got {}", expected, total);
    }

    Ok((total, hex::encode(hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/tmp/mujoco.tar.gz")),
            PathBuf::from("/tmp/mujoco.tar.gz.part")
        );
    }

    #[test]
    fn test_fetch_file_url_with_checksum() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("empty.bin");
        std::fs::write(&src, b"").unwrap();
        let dest = dir.path().join("out/empty.bin");

        let url = format!("file://{}", src.display());
        let bytes = fetch(&url, &dest, Duration::from_secs(5), Some(EMPTY_SHA256)).unwrap();

        assert_eq!(bytes, 0);
        assert!(dest.exists());
        assert!(!partial_path(&dest).exists());
    }

    #[test]
    fn test_fetch_checksum_mismatch_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("data.bin");
        std::fs::write(&src, b"not empty").unwrap();
        let dest = dir.path().join("data.out");

        let url = format!("file://{}", src.display());
        let err = fetch(&url, &dest, Duration::from_secs(5), Some(EMPTY_SHA256)).unwrap_err();

        assert!(err.to_string().contains("integrity check failed"));
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }

    #[test]
    fn test_fetch_missing_local_file() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("x");
        let result = fetch("file:///definitely/not/here", &dest, Duration::from_secs(5), None);
        assert!(result.is_err());
        assert!(!dest.exists());
    }

    mod mock_tests {
        use super::*;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        #[tokio::test]
        async fn test_fetch_http_success() {
            let mock_server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/patchelf"))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(b"\x7fELF".to_vec()))
                .mount(&mock_server)
                .await;

            let dir = TempDir::new().unwrap();
            let dest = dir.path().join("bin/patchelf");
            let url = format!("{}/patchelf", mock_server.uri());

            let bytes = fetch(&url, &dest, Duration::from_secs(10), None).unwrap();
            assert_eq!(bytes, 4);
            assert_eq!(std::fs::read(&dest).unwrap(), b"\x7fELF");
        }

        #[tokio::test]
        async fn test_fetch_http_404() {
            let mock_server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/missing.tar.gz"))
                .respond_with(ResponseTemplate::new(404))
                .mount(&mock_server)
                .await;

            let dir = TempDir::new().unwrap();
            let dest = dir.path().join("missing.tar.gz");
            let url = format!("{}/missing.tar.gz", mock_server.uri());

            let err = fetch(&url, &dest, Duration::from_secs(10), None).unwrap_err();
            assert!(err.to_string().contains("HTTP 404"));
            assert!(!dest.exists());
        }
    }
}
