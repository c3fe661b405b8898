//! `multipart/form-data` bodies streamed through an in-memory pipe.
//!
//! File parts come first, in the order they were given, then the form
//! fields. The producer task copies each file straight from disk into the
//! pipe, so nothing is buffered beyond the pipe's capacity.

use crate::application::body::{RenderedBody, reader_body};
use crate::application::eval::{Valuer, eval};
use crate::domain::entities::BodyPreview;
use crate::domain::errors::{GurlError, Result};
use crate::domain::value_objects::ParamList;
use rand::Rng;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tracing::{debug, warn};

const PIPE_CAPACITY: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct FilePart {
    pub field: String,
    pub path: PathBuf,
    pub size: u64,
}

impl FilePart {
    /// Checks the file up front so a missing upload fails before sending.
    pub fn open(field: impl Into<String>, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let size = std::fs::metadata(&path)
            .map_err(|e| GurlError::resource(&path, e))?
            .len();
        Ok(Self {
            field: field.into(),
            path,
            size,
        })
    }

    fn file_name(&self) -> String {
        display_name(&self.path)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultipartBody {
    files: Vec<FilePart>,
    fields: ParamList,
}

impl MultipartBody {
    pub fn new(files: Vec<FilePart>, fields: ParamList) -> Self {
        Self { files, fields }
    }

    pub fn files(&self) -> &[FilePart] {
        &self.files
    }

    pub fn fields(&self) -> &ParamList {
        &self.fields
    }

    /// Resolves the field values and starts a producer for one send.
    pub fn render(&self, valuer: &Valuer) -> Result<RenderedBody> {
        let boundary = random_boundary();

        let fields = self
            .fields
            .iter()
            .map(|(k, v)| Ok((k.to_string(), eval(v, valuer)?)))
            .collect::<Result<Vec<(String, String)>>>()?;

        let mut writer = PartWriter::new(&boundary);
        let mut length = 0u64;
        for file in &self.files {
            length += writer.file_header(&file.field, &file.file_name()).len() as u64 + file.size;
        }
        for (name, value) in &fields {
            length += writer.field_header(name).len() as u64 + value.len() as u64;
        }
        length += writer.close().len() as u64;

        let (reader, pipe) = tokio::io::duplex(PIPE_CAPACITY);
        tokio::spawn(produce(pipe, boundary.clone(), self.files.clone(), fields));

        let names: Vec<String> = self.files.iter().map(FilePart::file_name).collect();
        Ok(RenderedBody {
            body: reader_body(reader),
            preview: BodyPreview::Streamed(format!("multipart upload of {}", names.join(", "))),
            content_type: Some(format!("multipart/form-data; boundary={boundary}")),
            content_length: Some(length),
        })
    }
}

async fn produce(
    mut pipe: DuplexStream,
    boundary: String,
    files: Vec<FilePart>,
    fields: Vec<(String, String)>,
) {
    if let Err(e) = write_parts(&mut pipe, &boundary, &files, &fields).await {
        // The reader sees a truncated body and the transport reports it.
        warn!(error = %e, "multipart body aborted");
    }
}

async fn write_parts(
    pipe: &mut DuplexStream,
    boundary: &str,
    files: &[FilePart],
    fields: &[(String, String)],
) -> std::io::Result<()> {
    let mut writer = PartWriter::new(boundary);
    for file in files {
        let header = writer.file_header(&file.field, &file.file_name());
        pipe.write_all(header.as_bytes()).await?;
        let mut source = tokio::fs::File::open(&file.path).await?;
        let copied = tokio::io::copy(&mut source, pipe).await?;
        debug!(path = %file.path.display(), bytes = copied, "multipart file part written");
    }
    for (name, value) in fields {
        pipe.write_all(writer.field_header(name).as_bytes()).await?;
        pipe.write_all(value.as_bytes()).await?;
    }
    pipe.write_all(writer.close().as_bytes()).await?;
    pipe.shutdown().await
}

/// Formats part delimiters and headers; the first delimiter has no
/// leading CRLF.
struct PartWriter<'a> {
    boundary: &'a str,
    started: bool,
}

impl<'a> PartWriter<'a> {
    fn new(boundary: &'a str) -> Self {
        Self {
            boundary,
            started: false,
        }
    }

    fn delimiter(&mut self) -> String {
        let lead = if self.started { "\r\n" } else { "" };
        self.started = true;
        format!("{lead}--{}\r\n", self.boundary)
    }

    fn file_header(&mut self, field: &str, file_name: &str) -> String {
        format!(
            "{}Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            self.delimiter(),
            escape_quotes(field),
            escape_quotes(file_name)
        )
    }

    fn field_header(&mut self, name: &str) -> String {
        format!(
            "{}Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
            self.delimiter(),
            escape_quotes(name)
        )
    }

    fn close(&self) -> String {
        let lead = if self.started { "\r\n" } else { "" };
        format!("{lead}--{}--\r\n", self.boundary)
    }
}

fn escape_quotes(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn random_boundary() -> String {
    let bytes: [u8; 30] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Basename sent as the part's `filename`.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
