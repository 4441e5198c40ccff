// Chunked view streaming - length-prefixed JSON frames
use crate::domain::dashboard::DashboardView;
use crate::infrastructure::http_response::brotli;
use axum::body::Body;
use axum::http::{header, Response, StatusCode};
use axum::response::IntoResponse;
use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::Stream;
use futures::StreamExt;
use tokio::sync::watch;

/// Create a chunked streaming response from a stream of views.
pub async fn chunked_view_stream<S>(stream: S, compress: bool) -> Result<Response<Body>, StatusCode>
where
    S: Stream<Item = DashboardView> + Send + 'static,
{
    let byte_stream = stream.then(move |view| async move { serialize_chunk(view, compress).await });

    let body = Body::from_stream(byte_stream);

    // Frames are compressed individually, so no Content-Encoding header.
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::TRANSFER_ENCODING, "chunked")
        .body(body)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Serialize one view to a frame: 4-byte big-endian length, then the payload.
async fn serialize_chunk(view: DashboardView, compress: bool) -> Result<Bytes, std::io::Error> {
    let json = serde_json::to_vec(&view).map_err(std::io::Error::other)?;

    let payload = if compress { brotli(json).await? } else { json };

    let length = payload.len() as u32;
    let mut chunk = BytesMut::with_capacity(4 + payload.len());
    chunk.put_u32(length);
    chunk.put_slice(&payload);

    Ok(chunk.freeze())
}

/// Stream the current view and then every change until the session ends.
pub fn watch_views(
    mut rx: watch::Receiver<DashboardView>,
) -> impl Stream<Item = DashboardView> + Send + 'static {
    async_stream::stream! {
        let current = rx.borrow_and_update().clone();
        yield current;
        while rx.changed().await.is_ok() {
            let next = rx.borrow_and_update().clone();
            yield next;
        }
    }
}

/// Helper to create a streaming response from a view subscription
pub async fn stream_from_watch(
    rx: watch::Receiver<DashboardView>,
    compress: bool,
) -> impl IntoResponse {
    match chunked_view_stream(watch_views(rx), compress).await {
        Ok(response) => response,
        Err(status) => status.into_response(),
    }
}
