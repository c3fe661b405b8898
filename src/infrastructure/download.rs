//! Saving response bodies to disk.

use crate::domain::entities::Response;
use crate::domain::errors::{GurlError, Result};
use crate::domain::value_objects::Url;
use futures::TryStreamExt;
use http_body_util::BodyDataStream;
use hyper::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, HeaderMap};
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::LazyLock;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

static CONTENT_RANGE_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^bytes (\d+)-(\d+)/(\d+|\*)$").expect("valid content range regex")
});

static DISPOSITION_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)filename\s*=\s*(?:"([^"]*)"|([^;\s]+))"#).expect("valid filename regex")
});

const FALLBACK_NAME: &str = "index.html";

const PROGRESS_TEMPLATE: &str =
    "{bar:40.green/black} {bytes:>11.green}/{total_bytes:<11.green} {bytes_per_sec:>13.red} eta {eta:.blue}";
const SPINNER_TEMPLATE: &str = "{spinner:.green} {bytes:>11.green} {bytes_per_sec:>13.red}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    /// `None` when the server sent `*`.
    pub total: Option<u64>,
}

impl ContentRange {
    /// Parses `bytes <start>-<end>/<total|*>`. A range that ends before the
    /// total size is rejected.
    pub fn parse(value: &str) -> Result<Self> {
        let invalid = || GurlError::parse(format!("invalid Content-Range {value:?}"));
        let caps = CONTENT_RANGE_VALUE.captures(value.trim()).ok_or_else(invalid)?;
        let start: u64 = caps[1].parse().map_err(|_| invalid())?;
        let end: u64 = caps[2].parse().map_err(|_| invalid())?;
        let total = match &caps[3] {
            "*" => None,
            size => Some(size.parse::<u64>().map_err(|_| invalid())?),
        };

        if start > end {
            return Err(invalid());
        }
        if let Some(total) = total {
            if end + 1 != total {
                return Err(GurlError::parse(format!(
                    "Content-Range stops before the end of the content: {value}"
                )));
            }
        }
        Ok(Self { start, end, total })
    }
}

/// `filename` from a Content-Disposition header, path components removed.
pub fn disposition_filename(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(CONTENT_DISPOSITION)?.to_str().ok()?;
    let caps = DISPOSITION_FILENAME.captures(value)?;
    let raw = caps.get(1).or_else(|| caps.get(2))?.as_str();
    let name = raw.rsplit(['/', '\\']).next()?.trim();
    usable_name(name).then(|| name.to_string())
}

fn usable_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".."
}

/// Name of the file a response is saved to: the Content-Disposition
/// filename, else the last URL path segment, else `index.html`.
pub fn target_name(headers: &HeaderMap, url: &Url) -> String {
    disposition_filename(headers)
        .or_else(|| {
            url.file_name()
                .filter(|name| usable_name(name))
                .map(str::to_string)
        })
        .unwrap_or_else(|| FALLBACK_NAME.to_string())
}

fn progress_bar(headers: &HeaderMap) -> ProgressBar {
    let length = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    match length {
        Some(length) => ProgressBar::new(length).with_style(
            ProgressStyle::with_template(PROGRESS_TEMPLATE)
                .map(|style| style.progress_chars("━╾╴─"))
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        ),
        None => ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template(SPINNER_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        ),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Saved {
    pub path: PathBuf,
    pub bytes: u64,
}

/// Writes response bodies into a directory. Body reads carry no timeout.
#[derive(Debug, Clone)]
pub struct Downloader {
    dir: PathBuf,
    progress: bool,
}

impl Downloader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            progress: false,
        }
    }

    /// Draws a progress bar on stderr while saving.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub async fn save(&self, response: Response, url: &Url) -> Result<Saved> {
        let range = response
            .headers
            .get(CONTENT_RANGE)
            .map(|value| {
                value
                    .to_str()
                    .map_err(|_| GurlError::parse("invalid Content-Range header"))
                    .and_then(ContentRange::parse)
            })
            .transpose()?;

        let path = self.dir.join(target_name(&response.headers, url));
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(range.is_none())
            .open(&path)
            .await
            .map_err(|e| GurlError::resource(&path, e))?;
        if let Some(range) = range {
            debug!(start = range.start, end = range.end, "resuming at range start");
            file.seek(SeekFrom::Start(range.start))
                .await
                .map_err(|e| GurlError::resource(&path, e))?;
        }

        let bar = if self.progress {
            progress_bar(&response.headers)
        } else {
            ProgressBar::hidden()
        };

        let mut chunks = BodyDataStream::new(response.body);
        let mut bytes = 0u64;
        while let Some(chunk) = chunks
            .try_next()
            .await
            .map_err(|e| GurlError::transport(url.as_str(), e))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| GurlError::resource(&path, e))?;
            bytes += chunk.len() as u64;
            bar.inc(chunk.len() as u64);
        }
        file.flush().await.map_err(|e| GurlError::resource(&path, e))?;
        bar.finish_and_clear();

        debug!(path = %path.display(), bytes, "download complete");
        Ok(Saved { path, bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http_body_util::{BodyExt, Full};
    use hyper::header::HeaderValue;
    use hyper::{StatusCode, Version};

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    fn response(headers: HeaderMap, body: &'static [u8]) -> Response {
        Response {
            status: StatusCode::OK,
            version: Version::HTTP_11,
            headers,
            connection: None,
            body: Full::new(Bytes::from_static(body))
                .map_err(|never| match never {})
                .boxed_unsync(),
        }
    }

    #[test]
    fn parses_content_range() {
        assert_eq!(
            ContentRange::parse("bytes 100-199/200").unwrap(),
            ContentRange {
                start: 100,
                end: 199,
                total: Some(200)
            }
        );
        assert_eq!(ContentRange::parse("bytes 0-9/*").unwrap().total, None);
    }

    #[test]
    fn rejects_bad_content_range() {
        for value in ["bytes 100-199/500", "bytes x-1/2", "items 0-1/2", "bytes 9-1/*"] {
            let err = ContentRange::parse(value).unwrap_err();
            assert!(matches!(err, GurlError::Parse(_)), "{value}");
        }
    }

    #[test]
    fn file_name_precedence() {
        let url = Url::normalize("example.com/files/report.pdf").unwrap();
        let with_disposition = headers(&[(
            "content-disposition",
            r#"attachment; filename="../../etc/data.csv""#,
        )]);
        assert_eq!(target_name(&with_disposition, &url), "data.csv");
        assert_eq!(target_name(&HeaderMap::new(), &url), "report.pdf");

        let root = Url::normalize("example.com").unwrap();
        assert_eq!(target_name(&HeaderMap::new(), &root), "index.html");
    }

    #[test]
    fn dot_segments_fall_back_to_index() {
        for raw in ["example.com/a/..", "example.com/a/.", "example.com/../"] {
            let url = Url::normalize(raw).unwrap();
            assert_eq!(target_name(&HeaderMap::new(), &url), "index.html", "{raw}");
        }
    }

    #[tokio::test]
    async fn progress_bar_does_not_change_the_saved_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(dir.path()).with_progress(true);
        let url = Url::normalize("example.com/big.bin").unwrap();

        let saved = downloader
            .save(response(headers(&[("content-length", "7")]), b"payload"), &url)
            .await
            .unwrap();
        assert_eq!(saved.bytes, 7);
        assert_eq!(std::fs::read(&saved.path).unwrap(), b"payload");
        assert_eq!(progress_bar(&headers(&[("content-length", "7")])).length(), Some(7));
        assert_eq!(progress_bar(&HeaderMap::new()).length(), None);
    }

    #[test]
    fn unquoted_disposition_filename() {
        let map = headers(&[("content-disposition", "attachment; filename=out.bin; size=3")]);
        assert_eq!(disposition_filename(&map).as_deref(), Some("out.bin"));
        let inline = headers(&[("content-disposition", "inline")]);
        assert_eq!(disposition_filename(&inline), None);
    }

    #[tokio::test]
    async fn saves_body_to_the_target_file() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(dir.path());
        let url = Url::normalize("example.com/a/data.txt").unwrap();

        let saved = downloader
            .save(response(HeaderMap::new(), b"payload"), &url)
            .await
            .unwrap();
        assert_eq!(saved.path, dir.path().join("data.txt"));
        assert_eq!(saved.bytes, 7);
        assert_eq!(std::fs::read(&saved.path).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn partial_content_is_written_at_the_range_start() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.txt"), b"hello -----").unwrap();
        let downloader = Downloader::new(dir.path());
        let url = Url::normalize("example.com/data.txt").unwrap();

        downloader
            .save(
                response(headers(&[("content-range", "bytes 6-10/11")]), b"world"),
                &url,
            )
            .await
            .unwrap();
        assert_eq!(std::fs::read(dir.path().join("data.txt")).unwrap(), b"hello world");
    }
}
