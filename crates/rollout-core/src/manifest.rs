use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use base64::prelude::{Engine as _, BASE64_STANDARD};
use semver::Version;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::version::parse_version;

pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Names that are never hashed and never appear in a manifest's file map.
/// `updateInfo.ini` is the state file of the updater this tool replaced.
pub const RESERVED_FILE_NAMES: [&str; 3] =
    ["manifest.json", "manifest.json.tmp", "updateInfo.ini"];

pub fn is_reserved_name(name: &str) -> bool {
    RESERVED_FILE_NAMES.iter().any(|reserved| *reserved == name)
}

/// Raw SHA-256 digest of a file's bytes. Serialized as standard base64.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHash(pub [u8; 32]);

impl FileHash {
    pub fn to_base64(&self) -> String {
        BASE64_STANDARD.encode(self.0)
    }

    pub fn from_base64(encoded: &str) -> Option<Self> {
        let bytes = BASE64_STANDARD.decode(encoded).ok()?;
        let bytes: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }
}

pub type FileHashes = BTreeMap<String, FileHash>;

/// The update package descriptor at the root of a source tree.
///
/// `version` is `None` only for manifests synthesized from a bare
/// directory; `read_manifest` never returns one without a version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    pub version: Option<Version>,
    pub min_version: Option<Version>,
    pub app_exe: String,
    pub changelog: Option<String>,
    pub files: FileHashes,
}

pub fn hash_file(path: &Path) -> Result<FileHash> {
    let mut file =
        File::open(path).with_context(|| format!("failed to open {} for hashing", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0_u8; 32 * 1024];
    loop {
        let read = file
            .read(&mut buffer)
            .with_context(|| format!("failed to read {} for hashing", path.display()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(FileHash(hasher.finalize().into()))
}

pub fn read_manifest(path: &Path) -> Result<Manifest> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("cannot open manifest: {}", path.display()))?;
    let root: Value = serde_json::from_str(&raw)
        .with_context(|| format!("invalid JSON in manifest: {}", path.display()))?;
    let Value::Object(root) = root else {
        return Err(anyhow!(
            "manifest root is not a JSON object: {}",
            path.display()
        ));
    };

    let version_raw = root
        .get("version")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            anyhow!(
                "manifest missing or invalid 'version' field: {}",
                path.display()
            )
        })?;
    let version = parse_version(version_raw).ok_or_else(|| {
        anyhow!(
            "cannot parse version string '{}' in {}",
            version_raw,
            path.display()
        )
    })?;

    let app_exe = root
        .get("app_exe")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            anyhow!(
                "manifest missing or invalid 'app_exe' field: {}",
                path.display()
            )
        })?
        .to_string();

    let Some(Value::Object(files_value)) = root.get("files") else {
        return Err(anyhow!(
            "manifest missing or invalid 'files' field: {}",
            path.display()
        ));
    };

    // Non-string or unparseable min_version is tolerated and dropped; a
    // parseable one greater than version is a broken package.
    let mut min_version = None;
    if let Some(Value::String(raw_min)) = root.get("min_version") {
        if let Some(parsed) = parse_version(raw_min) {
            if parsed > version {
                return Err(anyhow!(
                    "min_version {} is greater than version {} in {}",
                    parsed,
                    version,
                    path.display()
                ));
            }
            min_version = Some(parsed);
        }
    }

    let changelog = root
        .get("changelog")
        .and_then(Value::as_str)
        .filter(|text| !text.trim().is_empty())
        .map(str::to_string);

    let mut files = FileHashes::new();
    for (rel_path, value) in files_value {
        if !is_safe_relative_path(rel_path) {
            return Err(anyhow!(
                "unsafe file path '{}' in {}",
                rel_path,
                path.display()
            ));
        }
        let Value::String(encoded) = value else {
            return Err(anyhow!(
                "non-string hash for file '{}' in {}",
                rel_path,
                path.display()
            ));
        };
        let hash = FileHash::from_base64(encoded).ok_or_else(|| {
            anyhow!(
                "invalid sha256 value for file '{}' in {}",
                rel_path,
                path.display()
            )
        })?;
        files.insert(rel_path.clone(), hash);
    }

    Ok(Manifest {
        version: Some(version),
        min_version,
        app_exe,
        changelog,
        files,
    })
}

/// Atomic write: serialize to `<path>.tmp`, remove the old manifest,
/// rename the sibling into place. Any failure leaves the prior state.
pub fn write_manifest(path: &Path, manifest: &Manifest) -> Result<()> {
    let mut root = Map::new();
    root.insert(
        "version".to_string(),
        Value::String(
            manifest
                .version
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
        ),
    );
    root.insert("app_exe".to_string(), Value::String(manifest.app_exe.clone()));
    if let Some(min_version) = &manifest.min_version {
        root.insert(
            "min_version".to_string(),
            Value::String(min_version.to_string()),
        );
    }
    if let Some(changelog) = &manifest.changelog {
        root.insert("changelog".to_string(), Value::String(changelog.clone()));
    }

    let mut files_value = Map::new();
    for (rel_path, hash) in &manifest.files {
        files_value.insert(rel_path.clone(), Value::String(hash.to_base64()));
    }
    root.insert("files".to_string(), Value::Object(files_value));

    let payload = serde_json::to_string_pretty(&Value::Object(root))
        .context("failed to serialize manifest")?;

    let tmp_path = tmp_sibling(path);
    if let Err(err) = fs::write(&tmp_path, payload.as_bytes()) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err)
            .with_context(|| format!("cannot write manifest tmp file: {}", tmp_path.display()));
    }

    if path.exists() {
        if let Err(err) = fs::remove_file(path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err)
                .with_context(|| format!("cannot remove old manifest: {}", path.display()));
        }
    }

    fs::rename(&tmp_path, path).with_context(|| {
        format!(
            "cannot rename {} to {}",
            tmp_path.display(),
            path.display()
        )
    })?;
    Ok(())
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Recursively hash a directory tree into a relative-path → sha256 map.
///
/// Reserved names and symlinks are skipped. Files that cannot be opened
/// are skipped too; callers that need to know about them walk the tree
/// themselves (the engine's target scan, the generate flow). Hashing
/// opens files by absolute path; keys are forward-slash relative paths.
pub fn hash_directory(directory: &Path) -> FileHashes {
    hash_directory_until(directory, &|| false)
}

/// `hash_directory`, stopping between entries once `interrupted`
/// reports true. The returned map holds whatever was hashed so far; a
/// cancelled walk over a large tree does not have to run to the end.
pub fn hash_directory_until(directory: &Path, interrupted: &dyn Fn() -> bool) -> FileHashes {
    let mut files = FileHashes::new();
    if !directory.is_dir() {
        return files;
    }

    for entry in WalkDir::new(directory)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
    {
        if interrupted() {
            break;
        }
        if !entry.file_type().is_file() {
            continue;
        }
        if is_reserved_name(&entry.file_name().to_string_lossy()) {
            continue;
        }
        let Ok(hash) = hash_file(entry.path()) else {
            continue;
        };
        if let Some(rel_path) = relative_key(directory, entry.path()) {
            files.insert(rel_path, hash);
        }
    }

    files
}

/// Manifest keys must stay inside the tree they describe: relative,
/// non-empty, no `..` segments, no absolute anchor.
pub fn is_safe_relative_path(rel_path: &str) -> bool {
    let candidate = Path::new(rel_path);
    if rel_path.is_empty() || candidate.is_absolute() {
        return false;
    }
    candidate.components().all(|component| {
        matches!(component, Component::Normal(_) | Component::CurDir)
    })
}

/// Forward-slash relative path of `path` under `root`, or `None` when
/// `path` is not inside `root`.
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .filter_map(|component| match component {
            Component::Normal(value) => Some(value.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
