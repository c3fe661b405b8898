//! Bandwidth limiting for request and response bodies.

use bytes::Bytes;
use http_body_util::{BodyExt, StreamBody};
use http_body_util::combinators::UnsyncBoxBody;
use std::io;
use std::time::Duration;
use tokio::time::Instant;

/// Paces `body` so that on average at most `bytes_per_sec` bytes pass
/// per second, counted from the first frame.
pub fn throttle(
    body: UnsyncBoxBody<Bytes, io::Error>,
    bytes_per_sec: u64,
) -> UnsyncBoxBody<Bytes, io::Error> {
    let rate = bytes_per_sec.max(1) as f64;
    let frames = futures::stream::unfold(
        (body, None::<Instant>, 0u64),
        move |(mut body, started, sent)| async move {
            let frame = body.frame().await?;
            let started = started.unwrap_or_else(Instant::now);
            let mut sent = sent;
            if let Some(data) = frame.as_ref().ok().and_then(|f| f.data_ref()) {
                sent += data.len() as u64;
                let due = started + Duration::from_secs_f64(sent as f64 / rate);
                tokio::time::sleep_until(due).await;
            }
            Some((frame, (body, Some(started), sent)))
        },
    );
    StreamBody::new(frames).boxed_unsync()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use hyper::body::Frame;

    fn chunks(count: usize, size: usize) -> UnsyncBoxBody<Bytes, io::Error> {
        let frames = (0..count).map(move |_| Ok::<_, io::Error>(Frame::data(Bytes::from(vec![b'x'; size]))));
        StreamBody::new(stream::iter(frames)).boxed_unsync()
    }

    #[tokio::test]
    async fn limited_body_takes_its_share_of_time() {
        let started = Instant::now();
        let body = throttle(chunks(3, 100), 1000).collect().await.unwrap().to_bytes();
        assert_eq!(body.len(), 300);
        assert!(started.elapsed() >= Duration::from_millis(280), "{:?}", started.elapsed());
    }

    #[tokio::test]
    async fn generous_limit_adds_no_delay() {
        let started = Instant::now();
        let body = throttle(chunks(4, 10), 10_000_000).collect().await.unwrap().to_bytes();
        assert_eq!(body.len(), 40);
        assert!(started.elapsed() < Duration::from_millis(200));
    }
}
