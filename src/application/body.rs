//! Request body sources.
//!
//! Exactly one [`BodySource`] is bound to a prepared request. Every send
//! renders it into a fresh streaming body; [`BodySource::next_body`] moves a
//! line-replay source on to its next line and is a no-op for the others.

use crate::application::builders::multipart::MultipartBody;
use crate::application::eval::{Valuer, eval};
use crate::domain::entities::{BodyPreview, RequestBody};
use crate::domain::errors::{GurlError, Result};
use crate::domain::value_objects::{JsonBody, ParamList};
use bytes::Bytes;
use futures::TryStreamExt;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::Frame;
use serde_json::value::RawValue;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

/// Lines the producer may read ahead of the sender.
pub const LINE_BUFFER: usize = 1000;

const HEAD_CHUNK: usize = 8 * 1024;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Outcome of advancing a body source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextBody {
    Ready,
    EndOfInput,
}

/// A body rendered for one send.
pub struct RenderedBody {
    pub body: RequestBody,
    pub preview: BodyPreview,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
}

impl RenderedBody {
    pub fn empty() -> Self {
        Self {
            body: Empty::new().map_err(|never| match never {}).boxed_unsync(),
            preview: BodyPreview::Empty,
            content_type: None,
            content_length: None,
        }
    }

    fn text(text: String, content_type: Option<&str>) -> Self {
        let length = text.len() as u64;
        Self {
            preview: BodyPreview::Text(text.clone()),
            body: full(Bytes::from(text)),
            content_type: content_type.map(str::to_string),
            content_length: Some(length),
        }
    }

    fn binary(bytes: Bytes) -> Self {
        let length = bytes.len() as u64;
        Self {
            preview: BodyPreview::Streamed(format!("{length} bytes of binary data")),
            body: full(bytes),
            content_type: None,
            content_length: Some(length),
        }
    }
}

fn full(bytes: Bytes) -> RequestBody {
    Full::new(bytes).map_err(|never| match never {}).boxed_unsync()
}

/// Streams any async reader as a request body.
pub fn reader_body<R>(reader: R) -> RequestBody
where
    R: AsyncRead + Send + 'static,
{
    StreamBody::new(ReaderStream::new(reader).map_ok(Frame::data)).boxed_unsync()
}

/// Value of one JSON body field before resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonField {
    /// From `key=value`: resolved, then sent as a JSON string.
    Text(String),
    /// From `key:=json`: resolved, checked, then embedded as typed.
    Literal(String),
    /// From `key:=@file`: checked when the request was built.
    Document(JsonBody),
}

/// Bodies re-rendered from a template on every send.
#[derive(Debug, Clone, PartialEq)]
pub enum StaticBody {
    Json(Vec<(String, JsonField)>),
    Form(ParamList),
    Text(String),
}

impl StaticBody {
    fn render(&self, valuer: &Valuer, json_mode: bool) -> Result<RenderedBody> {
        match self {
            StaticBody::Json(fields) => {
                let mut values = Vec::with_capacity(fields.len());
                for (key, field) in fields {
                    let value = match field {
                        JsonField::Text(text) => JsonBody::string(&eval(text, valuer)?),
                        JsonField::Literal(raw) => JsonBody::new(&eval(raw, valuer)?)
                            .map_err(|e| GurlError::parse(format!("field {key}: {e}")))?,
                        JsonField::Document(document) => document.clone(),
                    };
                    values.push((key.as_str(), value));
                }
                let object = JsonBody::from_fields(values.iter().map(|(k, v)| (*k, v)));
                Ok(RenderedBody::text(object.0, Some(JSON_CONTENT_TYPE)))
            }
            StaticBody::Form(params) => {
                let resolved = params
                    .iter()
                    .map(|(k, v)| Ok((k.to_string(), eval(v, valuer)?)))
                    .collect::<Result<ParamList>>()?;
                Ok(RenderedBody::text(
                    resolved.to_query_string(),
                    Some(FORM_CONTENT_TYPE),
                ))
            }
            StaticBody::Text(template) => {
                let content_type = json_mode.then_some(JSON_CONTENT_TYPE);
                Ok(RenderedBody::text(eval(template, valuer)?, content_type))
            }
        }
    }
}

/// A file sent as the whole body, streamed from disk on every send.
#[derive(Debug, Clone, PartialEq)]
pub struct FileBody {
    pub path: PathBuf,
    pub size: u64,
}

impl FileBody {
    /// Opens the file now so a missing file fails before anything is sent.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let size = std::fs::metadata(&path)
            .map_err(|e| GurlError::resource(&path, e))?
            .len();
        Ok(Self { path, size })
    }

    async fn render(&self) -> Result<RenderedBody> {
        let file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| GurlError::resource(&self.path, e))?;
        Ok(RenderedBody {
            body: reader_body(file),
            preview: BodyPreview::Streamed(format!("file {}", self.path.display())),
            content_type: None,
            content_length: Some(self.size),
        })
    }
}

/// Where replayed lines come from.
#[derive(Debug, Clone, PartialEq)]
pub enum LineOrigin {
    /// Piped standard input; `head` holds the bytes already read from it.
    Stdin { head: Bytes },
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
enum LinePayload {
    /// One JSON document, without surrounding whitespace.
    Json(String),
    /// Everything from the first non-JSON line on, byte for byte.
    Raw(Bytes),
}

/// One request per line of NDJSON input, fed by a background producer
/// through a bounded channel.
#[derive(Debug)]
pub struct LineChannelBody {
    origin: LineOrigin,
    rx: Option<mpsc::Receiver<io::Result<Bytes>>>,
    current: Option<LinePayload>,
    delivered: u64,
    finished: bool,
}

impl LineChannelBody {
    pub fn new(origin: LineOrigin) -> Self {
        Self {
            origin,
            rx: None,
            current: None,
            delivered: 0,
            finished: false,
        }
    }

    /// Fails early when the replay file cannot be opened.
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        std::fs::metadata(&path).map_err(|e| GurlError::resource(&path, e))?;
        Ok(Self::new(LineOrigin::File(path)))
    }

    pub fn origin(&self) -> &LineOrigin {
        &self.origin
    }

    fn is_stdin(&self) -> bool {
        matches!(self.origin, LineOrigin::Stdin { .. })
    }

    async fn start(&self) -> Result<mpsc::Receiver<io::Result<Bytes>>> {
        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        match &self.origin {
            LineOrigin::Stdin { head } => {
                let input = io::Cursor::new(head.clone()).chain(tokio::io::stdin());
                tokio::spawn(produce_lines(input, tx));
            }
            LineOrigin::File(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .map_err(|e| GurlError::resource(path, e))?;
                tokio::spawn(produce_lines(file, tx));
            }
        }
        debug!(origin = ?self.origin, "line producer started");
        Ok(rx)
    }

    async fn recv(&mut self) -> Result<Option<Bytes>> {
        let Some(rx) = self.rx.as_mut() else {
            return Ok(None);
        };
        match rx.recv().await {
            Some(Ok(line)) => Ok(Some(line)),
            Some(Err(e)) => Err(match &self.origin {
                LineOrigin::File(path) => GurlError::resource(path, e),
                LineOrigin::Stdin { .. } => GurlError::resource("<stdin>", e),
            }),
            None => Ok(None),
        }
    }

    async fn next_body(&mut self) -> Result<NextBody> {
        if self.finished {
            return Ok(NextBody::EndOfInput);
        }
        if self.rx.is_none() {
            self.rx = Some(self.start().await?);
        }

        loop {
            let Some(line) = self.recv().await? else {
                self.finished = true;
                self.rx = None;
                if self.delivered == 0 && self.is_stdin() {
                    self.current = Some(LinePayload::Raw(Bytes::new()));
                    self.delivered = 1;
                    return Ok(NextBody::Ready);
                }
                self.current = None;
                return Ok(NextBody::EndOfInput);
            };

            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            self.delivered += 1;
            match serde_json::from_slice::<&RawValue>(&line) {
                Ok(document) => self.current = Some(LinePayload::Json(document.get().to_string())),
                Err(e) => {
                    warn!(error = %e, "input line is not JSON, sending the remaining input raw");
                    let mut raw = line.to_vec();
                    while let Some(next) = self.recv().await? {
                        raw.extend_from_slice(&next);
                    }
                    self.finished = true;
                    self.rx = None;
                    self.current = Some(LinePayload::Raw(Bytes::from(raw)));
                }
            }
            return Ok(NextBody::Ready);
        }
    }

    fn render(&self, valuer: &Valuer, json_mode: bool) -> Result<RenderedBody> {
        match &self.current {
            Some(LinePayload::Json(document)) => Ok(RenderedBody::text(
                eval(document, valuer)?,
                Some(JSON_CONTENT_TYPE),
            )),
            Some(LinePayload::Raw(raw)) if raw.is_empty() => Ok(RenderedBody::empty()),
            Some(LinePayload::Raw(raw)) => match std::str::from_utf8(raw) {
                Ok(text) => Ok(RenderedBody::text(
                    eval(text, valuer)?,
                    json_mode.then_some(JSON_CONTENT_TYPE),
                )),
                Err(_) => Ok(RenderedBody::binary(raw.clone())),
            },
            None => Ok(RenderedBody::empty()),
        }
    }
}

/// Sends each line, terminator included, until the input ends or the
/// consumer goes away. The channel bound holds the producer back.
async fn produce_lines<R>(reader: R, tx: mpsc::Sender<io::Result<Bytes>>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    loop {
        let mut line = Vec::new();
        let item = match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => Ok(Bytes::from(line)),
            Err(e) => Err(e),
        };
        let failed = item.is_err();
        if tx.send(item).await.is_err() || failed {
            break;
        }
    }
    debug!("line producer finished");
}

/// Reads the first chunk of piped input; empty when the input ended
/// without data. Waiting longer than `grace` logs a hint and keeps waiting.
pub async fn read_head<R>(reader: &mut R, grace: Duration) -> io::Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; HEAD_CHUNK];
    let n = {
        let read = reader.read(&mut buf);
        tokio::pin!(read);
        match tokio::time::timeout(grace, read.as_mut()).await {
            Ok(n) => n?,
            Err(_) => {
                warn!(waited = ?grace, "waiting for standard input, pass --ignore-stdin to skip it");
                read.await?
            }
        }
    };
    buf.truncate(n);
    Ok(Bytes::from(buf))
}

/// The body bound to one prepared request.
#[derive(Debug)]
pub enum BodySource {
    Empty,
    Static(StaticBody),
    File(FileBody),
    LineChannel(LineChannelBody),
    Multipart(MultipartBody),
}

impl BodySource {
    /// Advances to the next body. Only line replay ever reaches
    /// `EndOfInput`; every other source is reusable and stays `Ready`.
    pub async fn next_body(&mut self) -> Result<NextBody> {
        match self {
            BodySource::LineChannel(lines) => lines.next_body().await,
            _ => Ok(NextBody::Ready),
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, BodySource::LineChannel(_))
    }

    /// Renders the current body for one send, resolving placeholders.
    pub async fn render(&self, valuer: &Valuer, json_mode: bool) -> Result<RenderedBody> {
        match self {
            BodySource::Empty => Ok(RenderedBody::empty()),
            BodySource::Static(body) => body.render(valuer, json_mode),
            BodySource::File(file) => file.render().await,
            BodySource::LineChannel(lines) => lines.render(valuer, json_mode),
            BodySource::Multipart(multipart) => multipart.render(valuer),
        }
    }

    /// A copy usable by another worker. Line replay has a single consumer
    /// and cannot be shared.
    pub fn try_clone(&self) -> Option<BodySource> {
        match self {
            BodySource::Empty => Some(BodySource::Empty),
            BodySource::Static(body) => Some(BodySource::Static(body.clone())),
            BodySource::File(file) => Some(BodySource::File(file.clone())),
            BodySource::Multipart(multipart) => Some(BodySource::Multipart(multipart.clone())),
            BodySource::LineChannel(_) => None,
        }
    }
}
