use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use tempfile::TempDir;
use zip::ZipArchive;

use rollout_core::MANIFEST_FILE_NAME;

const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("rollout/", env!("CARGO_PKG_VERSION"));

/// Human-readable status lines for the log pane.
pub type StatusSink<'a> = dyn FnMut(String) + 'a;

/// `(bytes_received, total_bytes_if_known)` during a transfer.
pub type ByteProgressSink<'a> = dyn FnMut(u64, Option<u64>) + 'a;

/// Fetches an update package URL into a private temp directory and
/// resolves the directory containing `manifest.json`.
///
/// The temp directory lives until `cleanup()` or drop.
#[derive(Default)]
pub struct DownloadHandler {
    temp_dir: Option<TempDir>,
}

impl DownloadHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fetch_and_extract(
        &mut self,
        url: &str,
        status: &mut StatusSink<'_>,
        progress: &mut ByteProgressSink<'_>,
    ) -> Result<PathBuf> {
        let temp_dir = tempfile::Builder::new()
            .prefix("rollout-download-")
            .tempdir()
            .context("failed to create temporary download directory")?;

        status(format!("Downloading: {url}"));
        let file_path = download_with_retry(url, temp_dir.path(), status, progress)?;

        let extract_dir = if has_zip_suffix(&file_path) {
            status("Extracting archive...".to_string());
            let extracted = temp_dir.path().join("extracted");
            fs::create_dir_all(&extracted)
                .context("failed to create extraction directory")?;
            extract_zip(&file_path, &extracted)?;
            extracted
        } else {
            // Not an archive; the downloaded file's directory is the
            // candidate package root.
            temp_dir.path().to_path_buf()
        };

        let root = find_manifest_root(&extract_dir).ok_or_else(|| {
            anyhow!(
                "downloaded content does not contain {MANIFEST_FILE_NAME}; \
                 ensure the archive contains a valid update package"
            )
        })?;

        status(format!("Download ready: {}", root.display()));
        self.temp_dir = Some(temp_dir);
        Ok(root)
    }

    pub fn cleanup(&mut self) {
        if let Some(temp_dir) = self.temp_dir.take() {
            let _ = temp_dir.close();
        }
    }
}

fn has_zip_suffix(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}

pub(crate) fn file_name_from_url(url: &reqwest::Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.last().map(str::to_string))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "download".to_string())
}

pub(crate) fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

pub(crate) fn http_error_message(status: StatusCode) -> String {
    match status.as_u16() {
        403 => "Access denied (HTTP 403). Check credentials or permissions.".to_string(),
        404 => "File not found (HTTP 404). Verify the download URL.".to_string(),
        408 => "Request timed out (HTTP 408).".to_string(),
        429 => "Too many requests (HTTP 429). Try again later.".to_string(),
        500 => "Internal server error (HTTP 500).".to_string(),
        502 => "Bad gateway (HTTP 502).".to_string(),
        503 => "Service unavailable (HTTP 503).".to_string(),
        code => format!("HTTP error {code}."),
    }
}

struct AttemptError {
    transient: bool,
    message: String,
}

fn download_with_retry(
    url: &str,
    dest_dir: &Path,
    status: &mut StatusSink<'_>,
    progress: &mut ByteProgressSink<'_>,
) -> Result<PathBuf> {
    let parsed = reqwest::Url::parse(url).map_err(|err| anyhow!("invalid URL '{url}': {err}"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(anyhow!("unsupported URL scheme '{}'", parsed.scheme()));
    }

    let client = Client::builder()
        .user_agent(USER_AGENT)
        .timeout(TRANSFER_TIMEOUT)
        .build()
        .context("failed to build HTTP client")?;

    let file_name = file_name_from_url(&parsed);
    let dest_path = dest_dir.join(&file_name);

    for attempt in 1..=MAX_ATTEMPTS {
        if attempt > 1 {
            status(format!("Retry {attempt}/{MAX_ATTEMPTS}..."));
            std::thread::sleep(RETRY_DELAY);
        }

        match download_once(&client, parsed.clone(), &dest_path, progress) {
            Ok(bytes) => {
                status(format!("Download complete: {file_name} ({} KB)", bytes / 1024));
                return Ok(dest_path);
            }
            Err(failure) => {
                if failure.transient && attempt < MAX_ATTEMPTS {
                    status(format!("Download failed (transient): {}", failure.message));
                    continue;
                }
                return Err(anyhow!("{}", failure.message));
            }
        }
    }

    Err(anyhow!("download failed after {MAX_ATTEMPTS} attempts"))
}

fn download_once(
    client: &Client,
    url: reqwest::Url,
    dest_path: &Path,
    progress: &mut ByteProgressSink<'_>,
) -> std::result::Result<u64, AttemptError> {
    let mut response = client.get(url).send().map_err(|err| AttemptError {
        transient: err.is_timeout() || err.is_connect(),
        message: if err.is_timeout() {
            format!(
                "Download timed out after {} seconds.",
                TRANSFER_TIMEOUT.as_secs()
            )
        } else {
            format!("Download failed: {err}")
        },
    })?;

    let status = response.status();
    if status != StatusCode::OK {
        return Err(AttemptError {
            transient: is_transient_status(status),
            message: http_error_message(status),
        });
    }

    let total = response.content_length();
    let mut file = File::create(dest_path).map_err(|err| AttemptError {
        transient: false,
        message: format!("Failed to write downloaded file {}: {err}", dest_path.display()),
    })?;

    let mut received = 0_u64;
    let mut buffer = [0_u8; 8192];
    loop {
        let read = response.read(&mut buffer).map_err(|err| AttemptError {
            transient: true,
            message: format!("Download interrupted: {err}"),
        })?;
        if read == 0 {
            break;
        }
        file.write_all(&buffer[..read]).map_err(|err| AttemptError {
            transient: false,
            message: format!("Failed to write downloaded file {}: {err}", dest_path.display()),
        })?;
        received += read as u64;
        progress(received, total);
    }

    Ok(received)
}

pub(crate) fn extract_zip(archive_path: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive_path)
        .with_context(|| format!("failed to open archive: {}", archive_path.display()))?;
    let mut archive = ZipArchive::new(file)
        .with_context(|| format!("failed to read archive: {}", archive_path.display()))?;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .with_context(|| format!("failed reading archive entry {index}"))?;
        let Some(enclosed) = entry.enclosed_name().map(|rel| dest.join(rel)) else {
            continue;
        };

        if entry.is_dir() {
            fs::create_dir_all(&enclosed)
                .with_context(|| format!("failed to create {}", enclosed.display()))?;
            continue;
        }
        if let Some(parent) = enclosed.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut out = File::create(&enclosed)
            .with_context(|| format!("failed to create {}", enclosed.display()))?;
        std::io::copy(&mut entry, &mut out)
            .with_context(|| format!("failed to extract {}", enclosed.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&enclosed, fs::Permissions::from_mode(mode))
                    .with_context(|| format!("failed to set mode on {}", enclosed.display()))?;
            }
        }
    }

    Ok(())
}

/// Locate the directory holding `manifest.json`: the extraction root
/// itself, or one of its immediate subdirectories (archives commonly
/// wrap the payload in a single top-level folder).
pub fn find_manifest_root(dir: &Path) -> Option<PathBuf> {
    if dir.join(MANIFEST_FILE_NAME).is_file() {
        return Some(dir.to_path_buf());
    }

    let mut subdirs: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    subdirs.sort();

    subdirs
        .into_iter()
        .find(|sub| sub.join(MANIFEST_FILE_NAME).is_file())
}
