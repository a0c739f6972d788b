//! Request body limits.
//!
//! # Responsibilities
//! - Enforce a route's maximum request body size
//!
//! # Design Decisions
//! - Declared Content-Length checked first (early rejection, body unread)
//! - Limited routes read at most `limit` bytes before anything is forwarded,
//!   so an oversized body never reaches the upstream
//! - The write budget bounds the gap between inbound chunks, never the
//!   whole upload
//! - Unlimited routes stream untouched
//! - Return 413 Payload Too Large

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderMap};
use http_body_util::{BodyExt, LengthLimitError, Limited};

use crate::error::ProxyError;
use crate::resilience::timeouts::{elapsed_phase, Phase, TimedBody};

/// Content-Length as declared by the client, if parseable.
pub fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Apply `limit` (0 = unlimited) to `body`.
///
/// Returns the body to forward. For limited routes the body is read
/// completely, bounded by `limit` bytes; the write budget bounds each gap
/// between inbound chunks, not the whole upload.
pub async fn enforce_body_limit(
    headers: &HeaderMap,
    body: Body,
    limit: u64,
    write_timeout: Duration,
) -> Result<Body, ProxyError> {
    if limit == 0 {
        return Ok(body);
    }

    if let Some(declared) = declared_length(headers) {
        if declared > limit {
            tracing::debug!(declared, limit, "Rejecting body by Content-Length");
            return Err(ProxyError::PayloadTooLarge { limit });
        }
    }

    let max = usize::try_from(limit).unwrap_or(usize::MAX);
    let timed = TimedBody::new(body, Phase::Write, write_timeout);
    match Limited::new(timed, max).collect().await {
        Ok(collected) => Ok(Body::from(collected.to_bytes())),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            tracing::debug!(limit, "Rejecting body by observed size");
            Err(ProxyError::PayloadTooLarge { limit })
        }
        Err(e) => match elapsed_phase(&*e) {
            Some(phase) => Err(ProxyError::Timeout { phase }),
            None => Err(ProxyError::BadRequest(e.to_string())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::http::HeaderValue;
    use futures_util::stream;
    use http_body::Frame;
    use http_body_util::StreamBody;
    use std::io;
    use tokio::sync::mpsc;

    type Chunks = mpsc::Sender<Result<Frame<Bytes>, io::Error>>;

    fn streamed() -> (Chunks, Body) {
        let (tx, mut rx) = mpsc::channel(4);
        let body = Body::new(StreamBody::new(stream::poll_fn(move |cx| rx.poll_recv(cx))));
        (tx, body)
    }

    const BUDGET: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn unlimited_passes_body_through() {
        let body = Body::from(vec![0u8; 4096]);
        let out = enforce_body_limit(&HeaderMap::new(), body, 0, BUDGET).await.unwrap();
        assert_eq!(out.collect().await.unwrap().to_bytes().len(), 4096);
    }

    #[tokio::test]
    async fn exactly_at_limit_is_accepted() {
        let out = enforce_body_limit(&HeaderMap::new(), Body::from(vec![1u8; 100]), 100, BUDGET)
            .await
            .unwrap();
        assert_eq!(out.collect().await.unwrap().to_bytes().len(), 100);
    }

    #[tokio::test]
    async fn one_over_limit_is_rejected() {
        let err = enforce_body_limit(&HeaderMap::new(), Body::from(vec![1u8; 101]), 100, BUDGET)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::PayloadTooLarge { limit: 100 }));
    }

    #[tokio::test]
    async fn declared_length_rejects_before_reading() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("5000"));
        // Body is short, the declaration alone decides.
        let err = enforce_body_limit(&headers, Body::from("tiny"), 100, BUDGET).await.unwrap_err();
        assert!(matches!(err, ProxyError::PayloadTooLarge { .. }));
    }

    #[tokio::test]
    async fn slow_steady_upload_fits_per_chunk_budget() {
        let (tx, body) = streamed();
        tokio::spawn(async move {
            for byte in [b"a", b"b", b"c", b"d"] {
                tokio::time::sleep(Duration::from_millis(700)).await;
                let _ = tx.send(Ok(Frame::data(Bytes::from_static(byte)))).await;
            }
        });

        // 2.8 s overall, never more than 0.7 s between chunks.
        let out = enforce_body_limit(&HeaderMap::new(), body, 1024, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(out.collect().await.unwrap().to_bytes(), "abcd");
    }

    #[tokio::test]
    async fn stalled_upload_is_write_timeout() {
        let (tx, body) = streamed();
        tx.send(Ok(Frame::data(Bytes::from_static(b"ab")))).await.unwrap();

        let err = enforce_body_limit(&HeaderMap::new(), body, 1024, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Timeout { phase: Phase::Write }));
        drop(tx);
    }
}
