use crate::domain::errors::{GurlError, Result};
use crate::domain::value_objects::Url;
use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use hyper::header::HeaderMap;
use hyper::{StatusCode, Version};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::str::FromStr;

/// Streaming request body handed to the transport.
pub type RequestBody = UnsyncBoxBody<Bytes, io::Error>;

/// Streaming response body handed back by the transport, already decoded
/// when the server compressed it.
pub type ResponseBody = UnsyncBoxBody<Bytes, io::Error>;

/// HTTP method enum for simplicity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
        }
    }
}

impl FromStr for Method {
    type Err = GurlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "PATCH" => Ok(Method::Patch),
            "HEAD" => Ok(Method::Head),
            "OPTIONS" => Ok(Method::Options),
            other => Err(GurlError::parse(format!("Unsupported HTTP method: '{}'", other))),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the request dump shows in place of the body bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyPreview {
    Empty,
    Text(String),
    /// Streamed from disk or a pipe; only described, never buffered.
    Streamed(String),
}

/// Represents an HTTP request
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: RequestBody,
    pub preview: BodyPreview,
}

impl Request {
    /// Snapshot of everything but the body stream, taken before sending.
    pub fn dump(&self) -> RequestDump {
        RequestDump {
            method: self.method,
            url: self.url.clone(),
            headers: self.headers.clone(),
            preview: self.preview.clone(),
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("preview", &self.preview)
            .finish_non_exhaustive()
    }
}

/// The outgoing request as it was handed to the transport.
#[derive(Debug, Clone)]
pub struct RequestDump {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub preview: BodyPreview,
}

impl RequestDump {
    /// Raw request head, `METHOD /path?query HTTP/1.1` followed by headers.
    pub fn head(&self) -> String {
        let target = self
            .url
            .0
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let mut out = format!("{} {} HTTP/1.1\r\n", self.method, target);

        if !self.headers.contains_key(hyper::header::HOST) {
            if let Some(authority) = self.url.0.authority() {
                out.push_str(&format!("Host: {}\r\n", authority.host()));
            }
        }
        for (name, value) in &self.headers {
            out.push_str(&format!(
                "{}: {}\r\n",
                name,
                String::from_utf8_lossy(value.as_bytes())
            ));
        }
        out
    }
}

/// Addresses of the connection a response arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub local: SocketAddr,
    pub remote: SocketAddr,
}

/// Represents an HTTP response
pub struct Response {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    pub connection: Option<ConnectionInfo>,
    pub body: ResponseBody,
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::{HeaderValue, CONTENT_TYPE, HOST};

    #[test]
    fn method_parses_case_insensitively() {
        assert_eq!("patch".parse::<Method>().unwrap(), Method::Patch);
        assert_eq!("GET".parse::<Method>().unwrap(), Method::Get);
        assert!("FETCH".parse::<Method>().is_err());
    }

    #[test]
    fn dump_head_starts_with_request_line() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let dump = RequestDump {
            method: Method::Post,
            url: Url::normalize("example.com:8080/users?page=2").unwrap(),
            headers,
            preview: BodyPreview::Empty,
        };

        let head = dump.head();
        assert!(head.starts_with("POST /users?page=2 HTTP/1.1\r\n"));
        assert!(head.contains("Host: example.com\r\n"));
        assert!(head.contains("content-type: application/json\r\n"));
    }

    #[test]
    fn dump_head_keeps_explicit_host() {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("api.internal"));
        let dump = RequestDump {
            method: Method::Get,
            url: Url::normalize(":9000").unwrap(),
            headers,
            preview: BodyPreview::Empty,
        };

        let head = dump.head();
        assert!(head.contains("host: api.internal\r\n"));
        assert!(!head.contains("Host: localhost"));
    }
}
