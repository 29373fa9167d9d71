//! Centralized fetch plumbing for external artifacts.
//!
//! All network retrieval (HTTP downloads, pinned git clones) and archive
//! extraction goes through this module for consistent:
//! - Error handling with full context
//! - Retry logic for transient failures
//! - Resume support for large downloads
//! - Mandatory digest verification hooks

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::time::Duration;

// Re-export for convenience
pub use checksum::verify_sha256;

/// Download configuration options.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Request timeout (default: none, large files take as long as they take)
    pub timeout: Option<Duration>,
    /// Number of retry attempts for transient failures (default: 3)
    pub retries: u32,
    /// Delay between retries (default: 2 seconds, doubles each retry)
    pub retry_delay: Duration,
    /// Whether to show progress (default: true)
    pub show_progress: bool,
    /// Expected file size in bytes (for progress calculation)
    pub expected_size: Option<u64>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            retries: 3,
            retry_delay: Duration::from_secs(2),
            show_progress: true,
            expected_size: None,
        }
    }
}

impl DownloadOptions {
    /// Large file download with expected size.
    pub fn large_file(size_bytes: u64) -> Self {
        Self {
            timeout: None,
            retries: 3,
            retry_delay: Duration::from_secs(5),
            show_progress: true,
            expected_size: Some(size_bytes),
        }
    }
}

/// Progress information for a running download.
#[derive(Debug, Clone)]
pub struct Progress {
    pub downloaded: u64,
    pub total: Option<u64>,
    pub percent: Option<u8>,
}

impl Progress {
    fn new(downloaded: u64, total: Option<u64>) -> Self {
        let percent = total.map(|t| {
            if t > 0 {
                ((downloaded * 100) / t) as u8
            } else {
                0
            }
        });
        Self {
            downloaded,
            total,
            percent,
        }
    }

    /// Format as human-readable string.
    pub fn display(&self) -> String {
        let downloaded_mb = self.downloaded as f64 / (1024.0 * 1024.0);
        match (self.total, self.percent) {
            (Some(total), Some(pct)) => {
                let total_mb = total as f64 / (1024.0 * 1024.0);
                format!("{:.1}/{:.1} MB ({}%)", downloaded_mb, total_mb, pct)
            }
            _ => format!("{:.1} MB", downloaded_mb),
        }
    }
}

// =============================================================================
// HTTP Downloads
// =============================================================================

/// Download a file via HTTP with resume support.
///
/// # Errors
/// Returns detailed error with URL, HTTP status, and retry information.
pub async fn http(url: &str, dest: &Path, options: &DownloadOptions) -> Result<()> {
    let client = reqwest::Client::builder()
        .user_agent("meldbox/0.1")
        .build()
        .context("Failed to create HTTP client")?;

    let mut last_error = None;
    let mut attempt = 0;

    while attempt <= options.retries {
        if attempt > 0 {
            let delay = options.retry_delay * (1 << (attempt - 1).min(4)); // Exponential backoff, max 16x
            if options.show_progress {
                println!("    Retry {}/{} in {:?}...", attempt, options.retries, delay);
            }
            tokio::time::sleep(delay).await;
        }
        attempt += 1;

        match http_attempt(&client, url, dest, options).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                let is_retryable = is_retryable_error(&e);
                if !is_retryable || attempt > options.retries {
                    return Err(e);
                }
                last_error = Some(e);
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| anyhow::anyhow!("Download failed after {} retries", options.retries)))
}

/// Single HTTP download attempt.
async fn http_attempt(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    options: &DownloadOptions,
) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    // Check for partial download to resume
    let mut start_byte = if dest.exists() {
        std::fs::metadata(dest).map(|m| m.len()).unwrap_or(0)
    } else {
        0
    };

    let mut request = client.get(url);
    if let Some(timeout) = options.timeout {
        request = request.timeout(timeout);
    }
    let requested_resume = start_byte > 0;
    if requested_resume {
        request = request.header("Range", format!("bytes={}-", start_byte));
        if options.show_progress {
            println!("    Resuming from {} bytes", start_byte);
        }
    }

    let response = request
        .send()
        .await
        .with_context(|| format!("HTTP request failed: {}", url))?;

    let status = response.status();
    if !status.is_success() && status != reqwest::StatusCode::PARTIAL_CONTENT {
        bail!(
            "HTTP {} for {}: {}",
            status.as_u16(),
            url,
            status.canonical_reason().unwrap_or("Unknown error")
        );
    }

    // If we requested resume but got 200 OK instead of 206 Partial Content,
    // the server doesn't support resume. Start fresh to avoid corruption.
    if requested_resume && status == reqwest::StatusCode::OK {
        if options.show_progress {
            println!("    Server doesn't support resume, starting fresh");
        }
        start_byte = 0;
    }

    let content_length = response.content_length();
    let total_size = content_length
        .map(|len| len + start_byte)
        .or(options.expected_size);

    let file = if start_byte > 0 && status == reqwest::StatusCode::PARTIAL_CONTENT {
        // Only append if server confirmed partial content
        tokio::fs::OpenOptions::new()
            .append(true)
            .open(dest)
            .await
            .with_context(|| format!("Failed to open {} for append", dest.display()))?
    } else {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("Failed to create {}", dest.display()))?
    };
    let mut writer = tokio::io::BufWriter::new(file);

    let mut downloaded = start_byte;
    let mut last_percent = 0u8;
    let mut stream = response.bytes_stream();

    use futures_util::StreamExt;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.with_context(|| format!("Failed to read chunk from {}", url))?;
        writer
            .write_all(&chunk)
            .await
            .with_context(|| format!("Failed to write to {}", dest.display()))?;
        downloaded += chunk.len() as u64;

        if options.show_progress {
            let progress = Progress::new(downloaded, total_size);
            if let Some(pct) = progress.percent {
                if pct > last_percent {
                    print!("\r    {}", progress.display());
                    use std::io::Write;
                    std::io::stdout().flush().ok();
                    last_percent = pct;
                }
            }
        }
    }

    writer
        .flush()
        .await
        .with_context(|| format!("Failed to flush {}", dest.display()))?;

    if options.show_progress {
        println!();
    }

    // Verify downloaded size matches expected (if provided)
    if let Some(expected) = options.expected_size {
        let actual = std::fs::metadata(dest).map(|m| m.len()).unwrap_or(0);
        if actual != expected {
            let _ = std::fs::remove_file(dest);
            bail!(
                "Download incomplete for {}: expected {} bytes, got {} bytes",
                url,
                expected,
                actual
            );
        }
    }

    Ok(())
}

/// Check if an error is likely transient and worth retrying.
fn is_retryable_error(e: &anyhow::Error) -> bool {
    let msg = e.to_string().to_lowercase();
    msg.contains("timeout")
        || msg.contains("connection reset")
        || msg.contains("connection refused")
        || msg.contains("temporarily unavailable")
        || msg.contains("try again")
        || msg.contains("503")
        || msg.contains("502")
        || msg.contains("504")
}

// =============================================================================
// Pinned git clones
// =============================================================================

/// Clone a git repository at an exact tag or branch.
///
/// The clone is shallow (`--depth 1 --branch <ref>`); provisioning never
/// needs history, only the pinned tree.
///
/// # Errors
/// Returns detailed error with git stderr output.
pub async fn git_clone_pinned(url: &str, reference: &str, dest: &Path) -> Result<()> {
    git_clone_pinned_with_timeout(url, reference, dest, Duration::from_secs(600)).await
}

/// Clone a git repository at an exact ref with configurable timeout.
pub async fn git_clone_pinned_with_timeout(
    url: &str,
    reference: &str,
    dest: &Path,
    timeout: Duration,
) -> Result<()> {
    use tokio::process::Command;

    if reference.is_empty() {
        bail!("Refusing to clone {} without a pinned tag or branch", url);
    }

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    // Re-cloning into a non-empty directory fails; clean up broken partial
    // clones, refuse to clobber a valid one.
    if dest.exists() {
        let is_valid_git = dest.join(".git").exists();
        if !is_valid_git {
            tokio::fs::remove_dir_all(dest)
                .await
                .with_context(|| format!("Failed to remove invalid directory {}", dest.display()))?;
        } else {
            bail!(
                "Destination {} already exists and is a git repository. Remove it first.",
                dest.display()
            );
        }
    }

    let mut cmd = Command::new("git");
    cmd.args(["clone", "--depth", "1", "--branch", reference]);
    cmd.arg(url);
    cmd.arg(dest);

    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .with_context(|| format!("git clone timed out after {:?} for {}", timeout, url))?
        .with_context(|| format!("Failed to execute git clone for {}", url))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "git clone failed for {} (ref {})\n  Exit code: {}\n  stderr: {}",
            url,
            reference,
            output.status.code().unwrap_or(-1),
            stderr.trim()
        );
    }

    Ok(())
}

// =============================================================================
// Archive extraction
// =============================================================================

/// Extract a tarball, skipping excluded archive members.
///
/// # Arguments
/// * `archive` - Path to .tar.gz or .tar.xz file
/// * `dest_dir` - Directory to extract into
/// * `strip_components` - Leading path components to strip (like tar --strip-components)
/// * `excludes` - Archive member patterns to skip (matched before stripping)
///
/// # Errors
/// Returns detailed error with tar stderr output.
pub async fn extract_tarball(
    archive: &Path,
    dest_dir: &Path,
    strip_components: u32,
    excludes: &[String],
) -> Result<()> {
    use tokio::process::Command;

    tokio::fs::create_dir_all(dest_dir)
        .await
        .with_context(|| format!("Failed to create directory {}", dest_dir.display()))?;

    // Detect compression from extension
    let archive_str = archive.to_string_lossy();
    let tar_flag = if archive_str.ends_with(".tar.xz") || archive_str.ends_with(".txz") {
        "xJf"
    } else if archive_str.ends_with(".tar.gz") || archive_str.ends_with(".tgz") {
        "xzf"
    } else if archive_str.ends_with(".tar.bz2") || archive_str.ends_with(".tbz2") {
        "xjf"
    } else {
        "xf" // Plain .tar or let tar auto-detect
    };

    let mut cmd = Command::new("tar");
    cmd.arg(tar_flag);
    cmd.arg(archive);
    cmd.arg("-C");
    cmd.arg(dest_dir);
    if strip_components > 0 {
        cmd.arg(format!("--strip-components={}", strip_components));
    }
    for pattern in excludes {
        cmd.arg(format!("--exclude={}", pattern));
    }

    let output = cmd
        .output()
        .await
        .with_context(|| format!("Failed to execute tar for {}", archive.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "tar extraction failed for {}\n  Exit code: {}\n  stderr: {}",
            archive.display(),
            output.status.code().unwrap_or(-1),
            stderr.trim()
        );
    }

    Ok(())
}

// =============================================================================
// Checksum verification
// =============================================================================

pub mod checksum {
    use anyhow::{bail, Context, Result};
    use sha2::{Digest, Sha256};
    use std::io::Read;
    use std::path::Path;

    /// Verify SHA256 checksum of a file.
    ///
    /// # Arguments
    /// * `path` - File to verify
    /// * `expected` - Expected SHA256 hash (hex, case-insensitive)
    /// * `show_progress` - Whether to show progress for large files
    ///
    /// # Errors
    /// Returns detailed error with expected vs actual hash.
    pub fn verify_sha256(path: &Path, expected: &str, show_progress: bool) -> Result<()> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open {} for checksum", path.display()))?;

        let file_size = file
            .metadata()
            .with_context(|| format!("Failed to get metadata for {}", path.display()))?
            .len();

        let mut reader = std::io::BufReader::with_capacity(1024 * 1024, file);
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 1024 * 1024]; // 1MB chunks
        let mut total_read = 0u64;
        let mut last_percent = 0u8;

        loop {
            let bytes_read = reader
                .read(&mut buffer)
                .with_context(|| format!("Failed to read {}", path.display()))?;

            if bytes_read == 0 {
                break;
            }

            hasher.update(&buffer[..bytes_read]);
            total_read += bytes_read as u64;

            // Progress indicator for files > 100MB
            if show_progress && file_size > 100 * 1024 * 1024 {
                let percent = ((total_read * 100) / file_size) as u8;
                if percent >= last_percent + 10 {
                    print!("    Checksum: {}%...", percent);
                    use std::io::Write;
                    std::io::stdout().flush().ok();
                    last_percent = percent;
                }
            }
        }

        if show_progress && file_size > 100 * 1024 * 1024 {
            println!();
        }

        let result = hasher.finalize();
        let actual = format!("{:x}", result);

        if actual != expected.to_lowercase() {
            bail!(
                "Checksum mismatch for {}\n  Expected: {}\n  Actual:   {}",
                path.display(),
                expected,
                actual
            );
        }

        Ok(())
    }
}
