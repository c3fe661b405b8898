use crate::application::runner::{Exchange, ExchangeHandler};
use crate::domain::entities::{BodyPreview, ConnectionInfo, RequestDump, Response};
use crate::domain::errors::{GurlError, Result};
use crate::infrastructure::download::{Downloader, disposition_filename};
use async_trait::async_trait;
use bytes::Bytes;
use colored::Colorize;
use futures::TryStreamExt;
use http_body_util::BodyDataStream;
use hyper::header::{CONTENT_TYPE, HeaderMap};
use hyper::{StatusCode, Version};
use serde_json::Value;
use std::io::Write;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Which parts of an exchange are printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrintOptions {
    pub request_headers: bool,
    pub request_body: bool,
    pub response_headers: bool,
    pub response_body: bool,
    pub connection: bool,
}

impl PrintOptions {
    pub fn all() -> Self {
        Self {
            request_headers: true,
            request_body: true,
            response_headers: true,
            response_body: true,
            connection: true,
        }
    }

    pub fn body_only() -> Self {
        Self {
            response_body: true,
            ..Default::default()
        }
    }

    /// Everything on a terminal, only the response body when piped.
    pub fn for_terminal(is_tty: bool) -> Self {
        if is_tty { Self::all() } else { Self::body_only() }
    }
}

impl FromStr for PrintOptions {
    type Err = GurlError;

    fn from_str(s: &str) -> Result<Self> {
        let mut options = PrintOptions::default();
        for letter in s.chars() {
            match letter {
                'A' | 'a' => options = PrintOptions::all(),
                'H' => options.request_headers = true,
                'B' => options.request_body = true,
                'h' => options.response_headers = true,
                'b' => options.response_body = true,
                's' => options.connection = true,
                other => {
                    return Err(GurlError::parse(format!(
                        "unknown print option {other:?} in {s:?}, expected any of AaHBhbs"
                    )));
                }
            }
        }
        Ok(options)
    }
}

/// Presentation settings shared by every exchange of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSettings {
    pub print: PrintOptions,
    /// Pretty-print JSON response bodies.
    pub pretty: bool,
    /// Save bodies to disk instead of printing them.
    pub download: bool,
    /// Bound on waiting for each response body chunk; `None` waits forever.
    pub body_timeout: Option<Duration>,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            print: PrintOptions::body_only(),
            pretty: true,
            download: false,
            body_timeout: Some(Duration::from_secs(60)),
        }
    }
}

/// Prints exchanges to stdout, or saves bodies through the downloader.
pub struct ConsoleHandler {
    settings: OutputSettings,
    downloader: Downloader,
}

impl ConsoleHandler {
    pub fn new(settings: OutputSettings, downloader: Downloader) -> Self {
        Self {
            settings,
            downloader,
        }
    }

    fn wants_download(&self, response: &Response) -> bool {
        self.settings.download || disposition_filename(&response.headers).is_some()
    }

    async fn read_body(&self, response: &mut Response, url: &str) -> Result<Bytes> {
        let mut chunks = BodyDataStream::new(&mut response.body);
        let mut body = Vec::new();
        loop {
            let next = chunks.try_next();
            let chunk = match self.settings.body_timeout {
                Some(limit) => tokio::time::timeout(limit, next).await.map_err(|_| {
                    GurlError::transport(url, format!("response body stalled for {limit:?}"))
                })?,
                None => next.await,
            };
            match chunk.map_err(|e| GurlError::transport(url, e))? {
                Some(chunk) => body.extend_from_slice(&chunk),
                None => break,
            }
        }
        Ok(Bytes::from(body))
    }
}

#[async_trait]
impl ExchangeHandler for ConsoleHandler {
    async fn handle(&self, exchange: Exchange) -> Result<()> {
        let Exchange {
            seq,
            request,
            mut response,
        } = exchange;
        let print = self.settings.print;

        let mut head = String::new();
        if print.request_headers {
            head.push_str(&format_request_head(&request));
            head.push('\n');
        }
        if print.request_body {
            if let Some(preview) = format_preview(&request.preview) {
                head.push_str(&preview);
                head.push_str("\n\n");
            }
        }
        if print.connection {
            if let Some(info) = response.connection {
                head.push_str(&format_connection(&info));
                head.push('\n');
            }
        }
        if print.response_headers {
            head.push_str(&format_response_head(
                response.version,
                response.status,
                &response.headers,
            ));
            head.push('\n');
        }
        write_stdout(head.as_bytes())?;

        let url = request.url.as_str();
        if self.wants_download(&response) {
            let saved = self.downloader.save(response, &request.url).await?;
            eprintln!(
                "{}",
                format!("Downloaded {} bytes to {:?}", saved.bytes, saved.path).cyan()
            );
            return Ok(());
        }

        if print.response_body {
            let body = self.read_body(&mut response, &url).await?;
            let text = format_body(&response.headers, &body, self.settings.pretty);
            write_stdout(text.as_bytes())?;
            if !text.ends_with('\n') {
                write_stdout(b"\n")?;
            }
        }
        debug!(?seq, status = %response.status, "exchange printed");
        Ok(())
    }
}

fn write_stdout(bytes: &[u8]) -> Result<()> {
    if bytes.is_empty() {
        return Ok(());
    }
    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(bytes)
        .and_then(|_| stdout.flush())
        .map_err(|e| GurlError::resource("<stdout>", e))
}

/// Request line and headers as sent.
pub fn format_request_head(request: &RequestDump) -> String {
    let raw = request.head();
    let mut lines = raw.split("\r\n").filter(|line| !line.is_empty());
    let mut out = String::new();
    if let Some(request_line) = lines.next() {
        out.push_str(&request_line.bold().to_string());
        out.push('\n');
    }
    for line in lines {
        out.push_str(&format_header_line(line));
        out.push('\n');
    }
    out
}

pub fn format_preview(preview: &BodyPreview) -> Option<String> {
    match preview {
        BodyPreview::Empty => None,
        BodyPreview::Text(text) => Some(text.clone()),
        BodyPreview::Streamed(description) => {
            Some(format!("[{description}]").dimmed().to_string())
        }
    }
}

pub fn format_connection(info: &ConnectionInfo) -> String {
    format!(
        "{} {} -> {}",
        "Conn:".dimmed(),
        info.local,
        info.remote
    )
}

pub fn format_response_head(version: Version, status: StatusCode, headers: &HeaderMap) -> String {
    let status_text = format!(
        "{} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or_default()
    );
    let status_text = if status.is_success() {
        status_text.green()
    } else if status.is_redirection() {
        status_text.yellow()
    } else {
        status_text.red()
    };

    let mut out = format!("{} {}\n", format!("{version:?}").blue(), status_text.bold());
    for (name, value) in headers {
        let line = format!("{}: {}", name, String::from_utf8_lossy(value.as_bytes()));
        out.push_str(&format_header_line(&line));
        out.push('\n');
    }
    out
}

fn format_header_line(line: &str) -> String {
    match line.split_once(':') {
        Some((name, value)) => format!("{}:{}", name.cyan(), value),
        None => line.to_string(),
    }
}

/// Response body text, pretty-printed when it is JSON and `pretty` is set.
pub fn format_body(headers: &HeaderMap, body: &[u8], pretty: bool) -> String {
    let text = String::from_utf8_lossy(body);
    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("json"));
    if !pretty || !is_json {
        return text.into_owned();
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(json) => match serde_json::to_string_pretty(&json) {
            Ok(formatted) => formatted.green().to_string(),
            Err(_) => text.into_owned(),
        },
        Err(_) => text.into_owned(),
    }
}
