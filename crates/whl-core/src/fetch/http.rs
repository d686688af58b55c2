//! HTTP(S) and FTP downloads

use crate::config::FetchConfig;
use crate::error::{FetchError, IoResultExt};
use indicatif::{ProgressBar, ProgressStyle};
use percent_encoding::percent_decode_str;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION};
use reqwest::Url;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info};

/// Name used when neither the server nor the URL supply one
pub const FALLBACK_FILENAME: &str = "downloaded_artifact";

/// Download `url` into `dir`, returning the written file
pub(crate) fn download(url: &str, dir: &Path, config: &FetchConfig) -> Result<PathBuf, FetchError> {
    if url.starts_with("ftp://") {
        return download_with_curl(url, dir);
    }

    info!("Downloading from {}", url);
    let client = Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(config.timeout_secs.map(Duration::from_secs))
        .build()
        .map_err(|e| network(url, e))?;

    let mut response = client
        .get(url)
        .send()
        .and_then(|response| response.error_for_status())
        .map_err(|e| network(url, e))?;

    let filename = filename_from_headers(response.headers())
        .or_else(|| filename_from_url(url))
        .unwrap_or_else(|| FALLBACK_FILENAME.to_string());
    let target = dir.join(&filename);
    debug!("Saving {} as {:?}", url, target);

    let progress = progress_bar(response.content_length(), &filename, config.show_progress);
    let mut file = File::create(&target).fetch_at(&target)?;
    let mut buffer = vec![0u8; config.chunk_bytes()];
    let mut received: u64 = 0;
    loop {
        let read = match response.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                progress.abandon();
                return Err(network(url, e));
            }
        };
        file.write_all(&buffer[..read]).fetch_at(&target)?;
        received += read as u64;
        progress.inc(read as u64);
    }
    file.flush().fetch_at(&target)?;
    progress.finish_and_clear();

    info!("Download completed: {:?} ({} bytes)", target, received);
    Ok(target)
}

/// FTP goes through curl; reqwest does not speak it
fn download_with_curl(url: &str, dir: &Path) -> Result<PathBuf, FetchError> {
    let curl = which::which("curl").map_err(|_| FetchError::ToolMissing("curl".to_string()))?;
    let filename = filename_from_url(url).unwrap_or_else(|| FALLBACK_FILENAME.to_string());
    let target = dir.join(filename);

    info!("Downloading from {} with curl", url);
    let output = Command::new(curl)
        .args(["--fail", "--silent", "--show-error", "--location", "--output"])
        .arg(&target)
        .arg(url)
        .output()
        .fetch_at(&target)?;

    if !output.status.success() {
        return Err(FetchError::Network {
            url: url.to_string(),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    info!("Download completed: {:?}", target);
    Ok(target)
}

fn network(url: &str, err: impl ToString) -> FetchError {
    FetchError::Network {
        url: url.to_string(),
        reason: err.to_string(),
    }
}

fn progress_bar(total: Option<u64>, filename: &str, enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }

    let bar = match total {
        Some(total) => {
            let bar = ProgressBar::new(total);
            if let Ok(style) = ProgressStyle::default_bar().template(
                "{spinner:.green} {msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})",
            ) {
                bar.set_style(style.progress_chars("=>-"));
            }
            bar
        }
        None => {
            let bar = ProgressBar::new_spinner();
            if let Ok(style) =
                ProgressStyle::default_spinner().template("{spinner:.green} {msg} {bytes}")
            {
                bar.set_style(style);
            }
            bar
        }
    };
    bar.set_message(filename.to_string());
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

fn filename_from_headers(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(CONTENT_DISPOSITION)?.to_str().ok()?;
    filename_from_disposition(value)
}

/// Extract the file name from a `Content-Disposition` value, preferring the
/// RFC 5987 `filename*` form. Only the final path component is kept.
pub fn filename_from_disposition(value: &str) -> Option<String> {
    let mut plain = None;
    let mut extended = None;

    for param in value.split(';').skip(1) {
        let Some((key, raw)) = param.split_once('=') else {
            continue;
        };
        let raw = raw.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                // charset'language'percent-encoded
                let encoded = raw.splitn(3, '\'').nth(2).unwrap_or(raw);
                extended = Some(percent_decode(encoded));
            }
            "filename" => plain = Some(raw.trim_matches('"').to_string()),
            _ => {}
        }
    }

    extended.or(plain).and_then(|name| final_component(&name))
}

/// Last non-empty segment of the URL path
pub fn filename_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.last()?;
    final_component(&percent_decode(segment))
}

fn final_component(name: &str) -> Option<String> {
    let last = name.rsplit(['/', '\\']).next()?.trim();
    match last {
        "" | "." | ".." => None,
        other => Some(other.to_string()),
    }
}

fn percent_decode(input: &str) -> String {
    percent_decode_str(input).decode_utf8_lossy().into_owned()
}
