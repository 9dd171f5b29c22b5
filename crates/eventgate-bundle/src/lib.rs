//! Trigger bundle loader.
//!
//! A bundle is a gzip-compressed tar archive holding trigger programs,
//! the message-service configuration, and resource template directories.
//! The loader resolves the bundle URL from an index document, verifies a
//! SHA-256 checksum, and extracts the archive into a fresh scratch
//! directory. Extraction is path-traversal protected: every entry must
//! resolve to a descendant of the scratch root.
//!
//! All failures here are startup-fatal for the service; nothing in this
//! crate is recoverable per-message.

use std::fs;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use thiserror::Error;

/// Errors from bundle resolution, download, verification, or extraction.
#[derive(Debug, Error)]
pub enum BundleError {
    #[error("request to {url} failed: {message}")]
    Network { url: String, message: String },
    #[error("unexpected status {status} from {url}")]
    Http { url: String, status: u16 },
    #[error("malformed bundle index: {message}")]
    Index { message: String },
    #[error("checksum mismatch: expected {expected}, archive digest {actual}")]
    Checksum { expected: String, actual: String },
    #[error("checksum verification enabled but no checksum is published for {url}")]
    ChecksumUnavailable { url: String },
    #[error("malformed archive: {message}")]
    Archive { message: String },
    #[error("archive entry '{path}' escapes the extraction root")]
    PathTraversal { path: String },
    #[error("unsupported archive entry type for '{path}'")]
    UnsupportedEntry { path: String },
    #[error("i/o error: {message}")]
    Io { message: String },
}

/// An extracted trigger bundle.
///
/// Holds the scratch directory alive; dropping the bundle removes the
/// directory and everything extracted into it.
#[derive(Debug)]
pub struct Bundle {
    dir: TempDir,
}

impl Bundle {
    /// Root directory of the extracted bundle contents.
    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

/// Download, verify, and extract the trigger bundle named by the index
/// document at `index_url`.
///
/// The index is a YAML mapping with a `triggers:` list of
/// `{url, sha256?}` entries; the last entry's `url` names the bundle
/// archive. With `verify_checksum` the archive digest is compared
/// against the sibling `<url>.sha256` document (falling back to the
/// index entry's inline `sha256`); a mismatch or a missing checksum is
/// fatal.
pub async fn load_bundle(index_url: &str, verify_checksum: bool) -> Result<Bundle, BundleError> {
    let client = reqwest::Client::builder()
        .build()
        .map_err(|e| BundleError::Network {
            url: index_url.to_string(),
            message: e.to_string(),
        })?;

    let index_bytes = fetch(&client, index_url).await?;
    let index: serde_yaml::Value =
        serde_yaml::from_slice(&index_bytes).map_err(|e| BundleError::Index {
            message: e.to_string(),
        })?;
    let entry = bundle_entry(&index)?;

    tracing::info!(url = %entry.url, "downloading trigger bundle");
    let archive = fetch(&client, &entry.url).await?;

    if verify_checksum {
        let expected = expected_checksum(&client, &entry).await?;
        let actual = hex_digest(&archive);
        if !expected.eq_ignore_ascii_case(&actual) {
            return Err(BundleError::Checksum { expected, actual });
        }
    }

    let dir = TempDir::new().map_err(|e| BundleError::Io {
        message: format!("failed to create scratch directory: {e}"),
    })?;
    extract_archive(&archive, dir.path())?;

    tracing::info!(dir = %dir.path().display(), "trigger bundle extracted");
    Ok(Bundle { dir })
}

/// Join `relative` onto `root`, rejecting any path that would resolve
/// outside `root`.
///
/// The check is lexical: `.` components are dropped, `..` components
/// pop previously accepted ones, and a pop past the start of the
/// relative path (or an absolute component) is a traversal error. Also
/// used by the resource-apply path to resolve template directories
/// against the bundle root.
pub fn merge_path(root: &Path, relative: &Path) -> Result<PathBuf, BundleError> {
    let mut accepted: Vec<&std::ffi::OsStr> = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => accepted.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if accepted.pop().is_none() {
                    return Err(BundleError::PathTraversal {
                        path: relative.display().to_string(),
                    });
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(BundleError::PathTraversal {
                    path: relative.display().to_string(),
                });
            }
        }
    }

    let mut merged = root.to_path_buf();
    for part in accepted {
        merged.push(part);
    }
    Ok(merged)
}

/// Decompress and unpack a gzip'd tar archive into `root`.
///
/// Regular files are written with the archive's permission bits and
/// directories are created recursively; every other entry type is
/// rejected, as is any entry whose merged path escapes `root`.
pub fn extract_archive(bytes: &[u8], root: &Path) -> Result<(), BundleError> {
    let decoder = GzDecoder::new(bytes);
    let mut archive = tar::Archive::new(decoder);

    let entries = archive.entries().map_err(|e| BundleError::Archive {
        message: e.to_string(),
    })?;
    for entry in entries {
        let mut entry = entry.map_err(|e| BundleError::Archive {
            message: e.to_string(),
        })?;
        let raw_path = entry
            .path()
            .map_err(|e| BundleError::Archive {
                message: e.to_string(),
            })?
            .into_owned();
        let dest = merge_path(root, &raw_path)?;

        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            fs::create_dir_all(&dest).map_err(|e| BundleError::Io {
                message: format!("failed to create directory {}: {e}", dest.display()),
            })?;
        } else if entry_type.is_file() {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(|e| BundleError::Io {
                    message: format!("failed to create directory {}: {e}", parent.display()),
                })?;
            }
            let mut file = fs::File::create(&dest).map_err(|e| BundleError::Io {
                message: format!("failed to create file {}: {e}", dest.display()),
            })?;
            std::io::copy(&mut entry, &mut file).map_err(|e| BundleError::Io {
                message: format!("failed to write file {}: {e}", dest.display()),
            })?;
            #[cfg(unix)]
            if let Ok(mode) = entry.header().mode() {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&dest, fs::Permissions::from_mode(mode)).map_err(|e| {
                    BundleError::Io {
                        message: format!("failed to set permissions on {}: {e}", dest.display()),
                    }
                })?;
            }
        } else {
            return Err(BundleError::UnsupportedEntry {
                path: raw_path.display().to_string(),
            });
        }
    }
    Ok(())
}

struct BundleEntry {
    url: String,
    sha256: Option<String>,
}

/// Locate the bundle URL in the index document. The index lists one or
/// more trigger archives; the last entry wins.
fn bundle_entry(index: &serde_yaml::Value) -> Result<BundleEntry, BundleError> {
    let triggers = index
        .get("triggers")
        .and_then(|v| v.as_sequence())
        .ok_or_else(|| BundleError::Index {
            message: "index has no 'triggers' list".into(),
        })?;

    let mut found = None;
    for (i, item) in triggers.iter().enumerate() {
        let url = item
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BundleError::Index {
                message: format!("triggers entry {i} has no 'url'"),
            })?;
        let sha256 = item
            .get("sha256")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        found = Some(BundleEntry {
            url: url.to_string(),
            sha256,
        });
    }

    found.ok_or_else(|| BundleError::Index {
        message: "index 'triggers' list is empty".into(),
    })
}

/// Resolve the expected archive digest: the sibling `<url>.sha256`
/// document if it is served, else the inline index value.
async fn expected_checksum(
    client: &reqwest::Client,
    entry: &BundleEntry,
) -> Result<String, BundleError> {
    let sibling = format!("{}.sha256", entry.url);
    match fetch(client, &sibling).await {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(&bytes);
            text.split_whitespace()
                .next()
                .map(str::to_string)
                .ok_or_else(|| BundleError::ChecksumUnavailable {
                    url: entry.url.clone(),
                })
        }
        Err(_) => entry
            .sha256
            .clone()
            .ok_or_else(|| BundleError::ChecksumUnavailable {
                url: entry.url.clone(),
            }),
    }
}

async fn fetch(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, BundleError> {
    let response = client.get(url).send().await.map_err(|e| BundleError::Network {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    let status = response.status();
    if !status.is_success() {
        return Err(BundleError::Http {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    let bytes = response.bytes().await.map_err(|e| BundleError::Network {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    Ok(bytes.to_vec())
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().fold(String::with_capacity(64), |mut s, b| {
        use std::fmt::Write;
        let _ = write!(s, "{b:02x}");
        s
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Build a gzip'd tar archive from (path, contents) pairs. A `None`
    /// contents marks a directory entry.
    fn make_archive(entries: &[(&str, Option<&str>)]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);

        for (name, contents) in entries {
            let mut header = tar::Header::new_gnu();
            // `append_data` rejects `..` components, but tests need to build
            // archives containing them to exercise the traversal guard, so
            // the raw name bytes are written directly into the header.
            let gnu = header.as_gnu_mut().expect("gnu header");
            gnu.name[..name.len()].copy_from_slice(name.as_bytes());
            match contents {
                Some(text) => {
                    header.set_size(text.len() as u64);
                    header.set_mode(0o644);
                    header.set_entry_type(tar::EntryType::Regular);
                    header.set_cksum();
                    builder
                        .append(&header, text.as_bytes())
                        .expect("append file");
                }
                None => {
                    header.set_size(0);
                    header.set_mode(0o755);
                    header.set_entry_type(tar::EntryType::Directory);
                    header.set_cksum();
                    builder
                        .append(&header, std::io::empty())
                        .expect("append dir");
                }
            }
        }

        let encoder = builder.into_inner().expect("finish tar");
        encoder.finish().expect("finish gzip")
    }

    #[test]
    fn test_merge_path_plain() {
        let root = Path::new("/scratch");
        let merged = merge_path(root, Path::new("triggers/main.yaml")).unwrap();
        assert_eq!(merged, PathBuf::from("/scratch/triggers/main.yaml"));
    }

    #[test]
    fn test_merge_path_internal_parent_ok() {
        let root = Path::new("/scratch");
        let merged = merge_path(root, Path::new("a/../b.yaml")).unwrap();
        assert_eq!(merged, PathBuf::from("/scratch/b.yaml"));
    }

    #[test]
    fn test_merge_path_escape_rejected() {
        let root = Path::new("/scratch");
        let err = merge_path(root, Path::new("../evil.yaml")).unwrap_err();
        assert!(matches!(err, BundleError::PathTraversal { .. }));

        let err = merge_path(root, Path::new("a/../../evil.yaml")).unwrap_err();
        assert!(matches!(err, BundleError::PathTraversal { .. }));
    }

    #[test]
    fn test_merge_path_absolute_rejected() {
        let root = Path::new("/scratch");
        let err = merge_path(root, Path::new("/etc/passwd")).unwrap_err();
        assert!(matches!(err, BundleError::PathTraversal { .. }));
    }

    #[test]
    fn test_extract_files_and_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let archive = make_archive(&[
            ("sub", None),
            ("main.yaml", Some("settings: []\n")),
            ("sub/extra.yaml", Some("functions: []\n")),
        ]);

        extract_archive(&archive, dir.path()).unwrap();

        let main = std::fs::read_to_string(dir.path().join("main.yaml")).unwrap();
        assert_eq!(main, "settings: []\n");
        let extra = std::fs::read_to_string(dir.path().join("sub/extra.yaml")).unwrap();
        assert_eq!(extra, "functions: []\n");
    }

    #[test]
    fn test_extract_traversal_rejected() {
        let parent = tempfile::tempdir().unwrap();
        let root = parent.path().join("scratch");
        std::fs::create_dir(&root).unwrap();

        let archive = make_archive(&[("../evil.yaml", Some("boom"))]);
        let err = extract_archive(&archive, &root).unwrap_err();
        assert!(matches!(err, BundleError::PathTraversal { .. }));

        // Nothing may have been written outside the scratch root.
        assert!(!parent.path().join("evil.yaml").exists());
    }

    #[test]
    fn test_extract_symlink_rejected() {
        let dir = tempfile::tempdir().unwrap();

        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let mut header = tar::Header::new_gnu();
        header.set_size(0);
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_cksum();
        builder
            .append_link(&mut header, "link.yaml", "/etc/passwd")
            .unwrap();
        let archive = builder.into_inner().unwrap().finish().unwrap();

        let err = extract_archive(&archive, dir.path()).unwrap_err();
        assert!(matches!(err, BundleError::UnsupportedEntry { .. }));
    }

    #[tokio::test]
    async fn test_load_bundle_end_to_end() {
        let server = MockServer::start().await;
        let archive = make_archive(&[("triggers.yaml", Some("settings: []\n"))]);
        let digest = hex_digest(&archive);

        let index = format!(
            "triggers:\n  - url: {}/bundle.tar.gz\n",
            server.uri()
        );
        Mock::given(method("GET"))
            .and(path("/index.yaml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(index))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/bundle.tar.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(archive.clone()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/bundle.tar.gz.sha256"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(format!("{digest}  bundle.tar.gz\n")),
            )
            .mount(&server)
            .await;

        let bundle = load_bundle(&format!("{}/index.yaml", server.uri()), true)
            .await
            .unwrap();
        assert!(bundle.root().join("triggers.yaml").exists());
    }

    #[tokio::test]
    async fn test_load_bundle_checksum_mismatch() {
        let server = MockServer::start().await;
        let archive = make_archive(&[("triggers.yaml", Some("settings: []\n"))]);

        let index = format!("triggers:\n  - url: {}/bundle.tar.gz\n", server.uri());
        Mock::given(method("GET"))
            .and(path("/index.yaml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(index))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/bundle.tar.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/bundle.tar.gz.sha256"))
            .respond_with(ResponseTemplate::new(200).set_body_string("deadbeef\n"))
            .mount(&server)
            .await;

        let err = load_bundle(&format!("{}/index.yaml", server.uri()), true)
            .await
            .unwrap_err();
        assert!(matches!(err, BundleError::Checksum { .. }));
    }

    #[tokio::test]
    async fn test_load_bundle_inline_checksum_fallback() {
        let server = MockServer::start().await;
        let archive = make_archive(&[("triggers.yaml", Some("settings: []\n"))]);
        let digest = hex_digest(&archive);

        // No sibling .sha256 is served; the index carries the digest.
        let index = format!(
            "triggers:\n  - url: {}/bundle.tar.gz\n    sha256: {digest}\n",
            server.uri()
        );
        Mock::given(method("GET"))
            .and(path("/index.yaml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(index))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/bundle.tar.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
            .mount(&server)
            .await;

        let bundle = load_bundle(&format!("{}/index.yaml", server.uri()), true)
            .await
            .unwrap();
        assert!(bundle.root().join("triggers.yaml").exists());
    }

    #[tokio::test]
    async fn test_load_bundle_skip_verification() {
        let server = MockServer::start().await;
        let archive = make_archive(&[("triggers.yaml", Some("settings: []\n"))]);

        let index = format!("triggers:\n  - url: {}/bundle.tar.gz\n", server.uri());
        Mock::given(method("GET"))
            .and(path("/index.yaml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(index))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/bundle.tar.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
            .mount(&server)
            .await;

        // No checksum anywhere, verification disabled: loads fine.
        let bundle = load_bundle(&format!("{}/index.yaml", server.uri()), false)
            .await
            .unwrap();
        assert!(bundle.root().join("triggers.yaml").exists());
    }

    #[tokio::test]
    async fn test_load_bundle_index_not_found() {
        let server = MockServer::start().await;
        let err = load_bundle(&format!("{}/missing.yaml", server.uri()), false)
            .await
            .unwrap_err();
        assert!(matches!(err, BundleError::Http { status: 404, .. }));
    }
}
