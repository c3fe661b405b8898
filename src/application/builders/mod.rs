pub mod multipart;
pub mod request_builder;

pub use request_builder::{BuildOptions, PreparedRequest, RequestBuilder, RequestTemplate};
