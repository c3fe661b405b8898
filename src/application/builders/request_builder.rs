use crate::application::body::{
    BodySource, FileBody, JsonField, LineChannelBody, LineOrigin, StaticBody,
};
use crate::application::builders::multipart::{FilePart, MultipartBody};
use crate::application::eval::{Valuer, eval};
use crate::domain::entities::{Method, Request};
use crate::domain::errors::{GurlError, Result};
use crate::domain::request_item::{Operator, RequestItem};
use crate::domain::value_objects::{JsonBody, ParamList, Url};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hyper::header::{
    ACCEPT, ACCEPT_ENCODING, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, HOST, HeaderMap,
    HeaderName, HeaderValue, USER_AGENT,
};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the per-request correlation header sent in repeated runs.
pub const CORRELATION_HEADER: &str = "gurl-n";

const LINE_REPLAY_SUFFIX: &str = ":line";

/// Flags that shape how request items are folded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildOptions {
    /// Explicit method; inferred from the items when absent.
    pub method: Option<Method>,
    /// Form mode: urlencoded or multipart instead of JSON.
    pub form: bool,
    /// `-F` uploads, sent as the multipart field `file`.
    pub uploads: Vec<PathBuf>,
    /// `-b` value: literal text, `@file` or `@file:line`.
    pub body: Option<String>,
    /// First bytes of piped standard input; `None` when stdin is a
    /// terminal, ignored, or ended without data.
    pub stdin: Option<Bytes>,
    /// `USER[:PASS]` for basic authorization.
    pub auth: Option<String>,
}

/// Accumulated request state while items are folded in.
#[derive(Debug, Default)]
pub struct PendingRequest {
    queries: ParamList,
    form_params: ParamList,
    json_fields: Vec<(String, JsonField)>,
    headers: Vec<(HeaderName, String)>,
    files: Vec<FilePart>,
    raw_body: Option<BodySource>,
}

impl PendingRequest {
    fn set_json_field(&mut self, key: &str, field: JsonField) {
        match self.json_fields.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = field,
            None => self.json_fields.push((key.to_string(), field)),
        }
    }

    fn set_header(&mut self, name: HeaderName, value: String) {
        match self.headers.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.headers.push((name, value)),
        }
    }

    fn offer_raw_body(&mut self, body: BodySource) {
        if self.raw_body.is_some() {
            warn!("more than one raw body given, keeping the first");
            return;
        }
        self.raw_body = Some(body);
    }
}

/// Everything about a request except the target URL and the body, with
/// values still unresolved.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestTemplate {
    pub method: Method,
    pub json_mode: bool,
    queries: ParamList,
    headers: Vec<(HeaderName, String)>,
    auth: Option<String>,
}

/// A folded request: its template plus the single body source bound to it.
#[derive(Debug)]
pub struct PreparedRequest {
    pub template: RequestTemplate,
    pub body: BodySource,
}

/// Folds request items and flags into a [`PreparedRequest`].
pub struct RequestBuilder {
    options: BuildOptions,
    items: Vec<RequestItem>,
}

impl RequestBuilder {
    pub fn new(options: BuildOptions) -> Self {
        Self {
            options,
            items: Vec::new(),
        }
    }

    pub fn items(mut self, items: impl IntoIterator<Item = RequestItem>) -> Self {
        self.items.extend(items);
        self
    }

    pub fn build(self) -> Result<PreparedRequest> {
        let method = match self.options.method {
            Some(method) => method,
            None => infer_method(&self.items, &self.options),
        };
        debug!(%method, explicit = self.options.method.is_some(), "method decided");

        let has_uploads = !self.options.uploads.is_empty()
            || self
                .items
                .iter()
                .any(|item| item.operator == Operator::FileUpload);

        let mut pending = PendingRequest::default();
        for path in &self.options.uploads {
            pending.files.push(FilePart::open("file", path)?);
        }
        if let Some(body) = &self.options.body {
            pending.offer_raw_body(body_flag_source(body)?);
        }

        for item in &self.items {
            self.fold(&mut pending, item, method, has_uploads)?;
        }

        if let (None, Some(head)) = (&pending.raw_body, &self.options.stdin) {
            pending.raw_body = Some(BodySource::LineChannel(LineChannelBody::new(
                LineOrigin::Stdin { head: head.clone() },
            )));
        }

        let body = self.choose_encoding(&mut pending, method);
        for (key, value) in pending.form_params.iter() {
            pending.queries.set(key, value);
        }

        Ok(PreparedRequest {
            template: RequestTemplate {
                method,
                json_mode: !self.options.form,
                queries: pending.queries,
                headers: pending.headers,
                auth: self.options.auth,
            },
            body,
        })
    }

    fn fold(
        &self,
        pending: &mut PendingRequest,
        item: &RequestItem,
        method: Method,
        has_uploads: bool,
    ) -> Result<()> {
        let form_field = self.options.form || has_uploads;
        match item.routed(form_field || method == Method::Get) {
            Operator::ForceQuery => {
                pending.queries.set(&item.key, read_value(&item.raw_value)?);
            }
            Operator::Query if form_field => {
                pending.form_params.set(&item.key, read_value(&item.raw_value)?);
            }
            Operator::Query => {
                pending.queries.set(&item.key, read_value(&item.raw_value)?);
            }
            Operator::Param => {
                let value = read_value(&item.raw_value)?;
                pending.set_json_field(&item.key, JsonField::Text(value));
            }
            Operator::JsonField if self.options.form => {
                warn!(item = %item, "JSON field ignored in form mode");
            }
            Operator::JsonField => {
                let field = json_field(&item.key, &item.raw_value)?;
                pending.set_json_field(&item.key, field);
            }
            Operator::Header => {
                let name = HeaderName::from_bytes(item.key.as_bytes())
                    .map_err(|e| GurlError::parse(format!("invalid header {item}: {e}")))?;
                if name == HOST {
                    debug!(host = %item.raw_value, "target host overridden");
                }
                pending.set_header(name, item.raw_value.clone());
            }
            Operator::FileUpload => {
                pending.files.push(FilePart::open(&item.key, &item.raw_value)?);
            }
            Operator::RawBody if has_uploads => {
                pending.files.push(FilePart::open("file", &item.raw_value)?);
            }
            Operator::RawBody => {
                pending.offer_raw_body(BodySource::File(FileBody::open(&item.raw_value)?));
            }
        }
        Ok(())
    }

    fn choose_encoding(&self, pending: &mut PendingRequest, method: Method) -> BodySource {
        let raw = pending.raw_body.take();
        let chosen = if !pending.files.is_empty() {
            let fields = std::mem::take(&mut pending.form_params);
            if !pending.json_fields.is_empty() {
                warn!("JSON fields ignored in a multipart upload");
            }
            let multipart = MultipartBody::new(std::mem::take(&mut pending.files), fields);
            debug!(
                files = multipart.files().len(),
                fields = multipart.fields().len(),
                "multipart body"
            );
            BodySource::Multipart(multipart)
        } else if !pending.json_fields.is_empty() && !self.options.form {
            debug!(fields = pending.json_fields.len(), "JSON body");
            BodySource::Static(StaticBody::Json(std::mem::take(&mut pending.json_fields)))
        } else if self.options.form && !pending.form_params.is_empty() && method != Method::Get {
            debug!(params = pending.form_params.len(), "form body");
            BodySource::Static(StaticBody::Form(std::mem::take(&mut pending.form_params)))
        } else {
            return match raw {
                Some(raw) => {
                    debug!(replay = raw.is_replay(), "raw body");
                    raw
                }
                None => BodySource::Empty,
            };
        };

        if let Some(raw) = raw {
            if raw.is_replay() {
                debug!("piped input left unread");
            } else {
                warn!("raw body ignored, request items already define the body");
            }
        }
        chosen
    }
}

/// Method used when none was given explicitly. The first matching rule
/// wins; a `==` item keeps the request a GET even next to data items.
pub fn infer_method(items: &[RequestItem], options: &BuildOptions) -> Method {
    if !options.uploads.is_empty() {
        return Method::Post;
    }
    if items.iter().any(|item| item.operator == Operator::ForceQuery) {
        return Method::Get;
    }
    if items.iter().any(RequestItem::carries_data) {
        return Method::Post;
    }
    if options.body.is_some() || options.stdin.is_some() {
        return Method::Post;
    }
    Method::Get
}

impl RequestTemplate {
    /// Renders one concrete request for `url`, resolving every value and
    /// the body. `seq` is the correlation number for repeated runs.
    pub async fn materialize(
        &self,
        url: &Url,
        body: &BodySource,
        valuer: &Valuer,
        seq: Option<u64>,
    ) -> Result<Request> {
        let (url, userinfo) = url.clone().split_credentials()?;

        let mut queries = ParamList::new();
        for (key, value) in self.queries.iter() {
            queries.set(key, eval(value, valuer)?);
        }
        let url = url.with_query(&queries.to_query_string())?;

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, static_value(concat!("gurl/", env!("CARGO_PKG_VERSION"))));
        headers.insert(ACCEPT_ENCODING, static_value("gzip, deflate"));
        let accept = if self.json_mode && self.method != Method::Get {
            "application/json"
        } else {
            "*/*"
        };
        headers.insert(ACCEPT, static_value(accept));

        if let Some(auth) = self.auth.as_deref().or(userinfo.as_deref()) {
            let credentials = eval(auth, valuer)?;
            let credentials = if credentials.contains(':') {
                credentials
            } else {
                format!("{credentials}:")
            };
            let token = format!("Basic {}", STANDARD.encode(credentials));
            headers.insert(AUTHORIZATION, header_value(&AUTHORIZATION, &token)?);
        }

        let rendered = body.render(valuer, self.json_mode).await?;
        if let Some(content_type) = &rendered.content_type {
            headers.insert(CONTENT_TYPE, header_value(&CONTENT_TYPE, content_type)?);
        }
        if let Some(length) = rendered.content_length {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
        }
        if let Some(n) = seq {
            headers.insert(HeaderName::from_static(CORRELATION_HEADER), HeaderValue::from(n));
        }

        for (name, raw) in &self.headers {
            let value = eval(raw, valuer)?;
            headers.insert(name.clone(), header_value(name, &value)?);
        }

        Ok(Request {
            method: self.method,
            url,
            headers,
            body: rendered.body,
            preview: rendered.preview,
        })
    }
}

fn static_value(value: &'static str) -> HeaderValue {
    HeaderValue::from_static(value)
}

fn header_value(name: &HeaderName, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| GurlError::parse(format!("invalid value for header {name}: {e}")))
}

/// `-b` forms: `@file:line` replays the file line by line, `@file` sends
/// the file contents, anything else is sent as typed.
fn body_flag_source(body: &str) -> Result<BodySource> {
    let Some(target) = body.strip_prefix('@') else {
        return Ok(BodySource::Static(StaticBody::Text(body.to_string())));
    };

    if let Some(path) = target.strip_suffix(LINE_REPLAY_SUFFIX) {
        return Ok(BodySource::LineChannel(LineChannelBody::from_file(path)?));
    }

    let content = read_file(Path::new(target))?;
    Ok(BodySource::Static(StaticBody::Text(content)))
}

/// Values starting with `@` name a file whose contents are the value,
/// sent unchanged.
fn read_value(raw: &str) -> Result<String> {
    match raw.strip_prefix('@') {
        Some(path) => read_file(Path::new(path)),
        None => Ok(raw.to_string()),
    }
}

fn json_field(key: &str, raw: &str) -> Result<JsonField> {
    if let Some(path) = raw.strip_prefix('@') {
        let content = read_file(Path::new(path))?;
        let document = JsonBody::new(&content)
            .map_err(|e| GurlError::parse(format!("{path} for field {key}: {e}")))?;
        return Ok(JsonField::Document(document));
    }

    // Templates are checked once resolved, at send time.
    if !raw.contains("${") {
        JsonBody::new(raw).map_err(|e| GurlError::parse(format!("field {key}: {e}")))?;
    }
    Ok(JsonField::Literal(raw.to_string()))
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| GurlError::resource(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::eval::MapSource;
    use crate::domain::entities::RequestDump;
    use http_body_util::BodyExt;
    use std::io::Write;

    fn items(tokens: &[&str]) -> Vec<RequestItem> {
        tokens
            .iter()
            .map(|t| RequestItem::parse(t).unwrap().unwrap())
            .collect()
    }

    fn build(options: BuildOptions, tokens: &[&str]) -> PreparedRequest {
        RequestBuilder::new(options).items(items(tokens)).build().unwrap()
    }

    fn valuer() -> Valuer {
        Valuer::new(Box::new(MapSource::new(
            [("token".to_string(), "s3cret".to_string())].into(),
        )))
    }

    fn temp_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    async fn send_shape(prepared: &PreparedRequest, url: &str) -> (RequestDump, String) {
        let url = Url::normalize(url).unwrap();
        let request = prepared
            .template
            .materialize(&url, &prepared.body, &valuer(), None)
            .await
            .unwrap();
        let dump = request.dump();
        let bytes = request.body.collect().await.unwrap().to_bytes();
        (dump, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn no_items_is_a_get_without_body() {
        let prepared = build(BuildOptions::default(), &[]);
        assert_eq!(prepared.template.method, Method::Get);
        assert!(matches!(prepared.body, BodySource::Empty));

        let (request, body) = send_shape(&prepared, "example.com/users").await;
        assert_eq!(request.url.as_str(), "http://example.com/users");
        assert_eq!(body, "");
        assert_eq!(request.headers[ACCEPT], "*/*");
        assert!(request.headers[USER_AGENT].to_str().unwrap().starts_with("gurl/"));
    }

    #[tokio::test]
    async fn param_becomes_json_field_and_post() {
        let prepared = build(BuildOptions::default(), &["age=30"]);
        assert_eq!(prepared.template.method, Method::Post);

        let (request, body) = send_shape(&prepared, "example.com/users").await;
        assert_eq!(body, r#"{"age":"30"}"#);
        assert_eq!(request.headers[CONTENT_TYPE], "application/json");
        assert_eq!(request.headers[ACCEPT], "application/json");
        assert_eq!(request.headers[CONTENT_LENGTH], "12");
    }

    #[tokio::test]
    async fn force_query_keeps_get() {
        let prepared = build(BuildOptions::default(), &["q==val"]);
        assert_eq!(prepared.template.method, Method::Get);

        let (request, body) = send_shape(&prepared, "example.com/search").await;
        assert_eq!(request.url.as_str(), "http://example.com/search?q=val");
        assert_eq!(body, "");
    }

    #[test]
    fn uploads_force_post() {
        let upload = temp_file("bytes");
        let options = BuildOptions {
            uploads: vec![upload.path().to_path_buf()],
            ..Default::default()
        };
        let prepared = build(options, &["q==x"]);
        assert_eq!(prepared.template.method, Method::Post);
        assert!(matches!(prepared.body, BodySource::Multipart(_)));
    }

    #[test]
    fn method_inference_order() {
        let options = BuildOptions::default();
        assert_eq!(infer_method(&items(&["a:=1"]), &options), Method::Post);
        assert_eq!(infer_method(&items(&["X-A:1"]), &options), Method::Get);
        assert_eq!(infer_method(&items(&["a==1", "b=2"]), &options), Method::Get);

        let body = BuildOptions {
            body: Some("hi".to_string()),
            ..Default::default()
        };
        assert_eq!(infer_method(&[], &body), Method::Post);

        let piped = BuildOptions {
            stdin: Some(Bytes::from_static(b"{}")),
            ..Default::default()
        };
        assert_eq!(infer_method(&[], &piped), Method::Post);
    }

    #[tokio::test]
    async fn silent_stdin_leaves_a_plain_get() {
        let prepared = build(BuildOptions::default(), &[]);
        assert_eq!(prepared.template.method, Method::Get);
        assert!(matches!(prepared.body, BodySource::Empty));

        let (request, _) = send_shape(&prepared, ":8080/x").await;
        assert_eq!(request.headers[ACCEPT], "*/*");
        assert!(request.headers.get(CORRELATION_HEADER).is_none());
    }

    #[tokio::test]
    async fn big_json_literals_are_sent_verbatim() {
        let prepared = build(
            BuildOptions::default(),
            &["id:=12345678901234567890123", "price:=1.10"],
        );
        let (_, body) = send_shape(&prepared, "example.com").await;
        assert_eq!(body, r#"{"id":12345678901234567890123,"price":1.10}"#);
    }

    #[test]
    fn explicit_method_is_kept() {
        let options = BuildOptions {
            method: Some(Method::Put),
            ..Default::default()
        };
        assert_eq!(build(options, &[]).template.method, Method::Put);
    }

    #[tokio::test]
    async fn get_query_round_trips() {
        let options = BuildOptions {
            method: Some(Method::Get),
            ..Default::default()
        };
        let prepared = build(options, &["q==a b", "lang=en&fr", "page=2"]);

        let (request, _) = send_shape(&prepared, "example.com/search").await;
        let query = request.url.0.query().unwrap().to_string();
        let mut decoded: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        decoded.sort();
        assert_eq!(
            decoded,
            vec![
                ("lang".to_string(), "en&fr".to_string()),
                ("page".to_string(), "2".to_string()),
                ("q".to_string(), "a b".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn form_mode_urlencodes_params_and_drops_json_fields() {
        let options = BuildOptions {
            form: true,
            method: Some(Method::Post),
            ..Default::default()
        };
        let prepared = build(options, &["name=gurl", "n:=1", "v==2"]);

        let (request, body) = send_shape(&prepared, "example.com/submit").await;
        assert_eq!(body, "name=gurl");
        assert_eq!(request.url.as_str(), "http://example.com/submit?v=2");
        assert_eq!(
            request.headers[CONTENT_TYPE],
            "application/x-www-form-urlencoded"
        );
        assert_eq!(request.headers[ACCEPT], "*/*");
    }

    #[test]
    fn two_uploads_and_a_param_make_three_parts() {
        let a = temp_file("a");
        let b = temp_file("b");
        let options = BuildOptions {
            uploads: vec![a.path().to_path_buf()],
            ..Default::default()
        };
        let upload = format!("avatar@{}", b.path().display());
        let prepared = build(options, &[&upload, "title=hello"]);

        let BodySource::Multipart(multipart) = &prepared.body else {
            panic!("expected a multipart body");
        };
        let fields: Vec<_> = multipart.files().iter().map(|f| f.field.as_str()).collect();
        assert_eq!(fields, vec!["file", "avatar"]);
        assert_eq!(multipart.fields().get("title"), Some("hello"));
        assert_eq!(multipart.fields().len(), 1);
    }

    #[test]
    fn missing_upload_fails_the_build() {
        let err = RequestBuilder::new(BuildOptions::default())
            .items(items(&["doc@/no/such/file.pdf"]))
            .build()
            .unwrap_err();
        assert!(matches!(err, GurlError::Resource { .. }));
    }

    #[tokio::test]
    async fn user_headers_override_defaults_case_insensitively() {
        let prepared = build(
            BuildOptions::default(),
            &["accept:text/plain", "X-Token:${token}", "x-token:${token}!", "Host:api.internal"],
        );

        let (request, _) = send_shape(&prepared, "localhost:8080").await;
        assert_eq!(request.headers[ACCEPT], "text/plain");
        assert_eq!(request.headers.get_all("x-token").iter().count(), 1);
        assert_eq!(request.headers["x-token"], "s3cret!");
        assert_eq!(request.headers[HOST], "api.internal");
    }

    #[test]
    fn invalid_json_literal_fails_the_build() {
        let err = RequestBuilder::new(BuildOptions::default())
            .items(items(&["n:={oops"]))
            .build()
            .unwrap_err();
        assert!(matches!(err, GurlError::Parse(_)));
    }

    #[tokio::test]
    async fn json_field_from_file_is_embedded() {
        let file = temp_file(r#"{"tags": ["x", "y"]}"#);
        let token = format!("meta:=@{}", file.path().display());
        let prepared = build(BuildOptions::default(), &["name=gurl", &token]);

        let (_, body) = send_shape(&prepared, "example.com").await;
        assert_eq!(body, r#"{"name":"gurl","meta":{"tags": ["x", "y"]}}"#);
    }

    #[tokio::test]
    async fn body_flag_literal_and_file() {
        let options = BuildOptions {
            body: Some(r#"{"id":"${token}"}"#.to_string()),
            ..Default::default()
        };
        let prepared = build(options, &[]);
        assert_eq!(prepared.template.method, Method::Post);
        let (request, body) = send_shape(&prepared, "example.com").await;
        assert_eq!(body, r#"{"id":"s3cret"}"#);
        assert_eq!(request.headers[CONTENT_TYPE], "application/json");

        let file = temp_file("from file");
        let options = BuildOptions {
            body: Some(format!("@{}", file.path().display())),
            form: true,
            ..Default::default()
        };
        let (request, body) = send_shape(&build(options, &[]), "example.com").await;
        assert_eq!(body, "from file");
        assert!(request.headers.get(CONTENT_TYPE).is_none());
    }

    #[test]
    fn body_flag_line_suffix_replays_the_file() {
        let file = temp_file("{}\n");
        let options = BuildOptions {
            body: Some(format!("@{}:line", file.path().display())),
            ..Default::default()
        };
        let prepared = build(options, &[]);
        let BodySource::LineChannel(lines) = &prepared.body else {
            panic!("expected line replay");
        };
        assert_eq!(lines.origin(), &LineOrigin::File(file.path().to_path_buf()));
    }

    #[test]
    fn body_flag_beats_raw_item_and_stdin() {
        let file = temp_file("item body");
        let raw_item = format!("@{}", file.path().display());
        let options = BuildOptions {
            body: Some("flag body".to_string()),
            stdin: Some(Bytes::from_static(b"piped")),
            ..Default::default()
        };
        let prepared = build(options, &[&raw_item]);
        assert!(matches!(
            prepared.body,
            BodySource::Static(StaticBody::Text(ref text)) if text == "flag body"
        ));
    }

    #[test]
    fn raw_item_streams_the_file_and_stdin_replays_otherwise() {
        let file = temp_file("item body");
        let raw_item = format!("@{}", file.path().display());
        let prepared = build(BuildOptions::default(), &[&raw_item]);
        assert!(matches!(prepared.body, BodySource::File(_)));
        assert_eq!(prepared.template.method, Method::Get);

        let piped = BuildOptions {
            stdin: Some(Bytes::from_static(b"{\"a\":1}\n")),
            ..Default::default()
        };
        let prepared = build(piped, &[]);
        let BodySource::LineChannel(lines) = &prepared.body else {
            panic!("expected stdin replay");
        };
        assert_eq!(
            lines.origin(),
            &LineOrigin::Stdin { head: Bytes::from_static(b"{\"a\":1}\n") }
        );
        assert_eq!(prepared.template.method, Method::Post);
    }

    #[test]
    fn json_fields_win_over_raw_body() {
        let options = BuildOptions {
            body: Some("ignored".to_string()),
            ..Default::default()
        };
        let prepared = build(options, &["a=1"]);
        assert!(matches!(prepared.body, BodySource::Static(StaticBody::Json(_))));
    }

    #[tokio::test]
    async fn auth_and_correlation_headers() {
        let options = BuildOptions {
            auth: Some("bob:${token}".to_string()),
            ..Default::default()
        };
        let prepared = build(options, &[]);
        let url = Url::normalize("example.com").unwrap();
        let request = prepared
            .template
            .materialize(&url, &prepared.body, &valuer(), Some(7))
            .await
            .unwrap();
        let expected = format!("Basic {}", STANDARD.encode("bob:s3cret"));
        assert_eq!(request.headers[AUTHORIZATION], expected.as_str());
        assert_eq!(request.headers[CORRELATION_HEADER], "7");
    }

    #[tokio::test]
    async fn credentials_in_url_become_basic_auth() {
        let prepared = build(BuildOptions::default(), &[]);
        let url = Url::normalize("http://alice:pw@example.com/x").unwrap();
        let request = prepared
            .template
            .materialize(&url, &prepared.body, &valuer(), None)
            .await
            .unwrap();
        assert_eq!(request.url.as_str(), "http://example.com/x");
        let expected = format!("Basic {}", STANDARD.encode("alice:pw"));
        assert_eq!(request.headers[AUTHORIZATION], expected.as_str());
    }

    #[test]
    fn param_values_can_come_from_files_unchanged() {
        let file = temp_file("from-file\n");
        let token = format!("q==@{}", file.path().display());
        let prepared = build(BuildOptions::default(), &[&token]);
        assert_eq!(prepared.template.queries.get("q"), Some("from-file\n"));
    }
}
