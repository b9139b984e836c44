//! HTTP viewer for received frames
//!
//! Serves the latest frame in a [`FrameStore`] to browsers:
//! - `GET /` - a page embedding the stream
//! - `GET /video_feed` - `multipart/x-mixed-replace` MJPEG stream, one part
//!   per new frame sequence
//!
//! Frames are forwarded as they arrived, without re-encoding. Every client
//! polls the store on its own; a slow client simply skips frames.

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use bytes::{BufMut, Bytes, BytesMut};
use futures::Stream;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::store::FrameStore;
use crate::{RelayError, Result};

/// Multipart boundary used on `/video_feed`
pub const BOUNDARY: &str = "frame";

const INDEX_PAGE: &str = "<!DOCTYPE html>\n<html>\n<head><title>camrelay</title></head>\n\
<body>\n<img src=\"/video_feed\" alt=\"live stream\">\n</body>\n</html>\n";

struct WebState {
    store: Arc<FrameStore>,
    poll: Duration,
    cancel: CancellationToken,
}

/// MJPEG-over-HTTP server
pub struct WebServer {
    listener: TcpListener,
    addr: SocketAddr,
}

impl WebServer {
    /// Bind to `addr` (use port 0 for an ephemeral port)
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener =
            TcpListener::bind(addr).await.map_err(|e| RelayError::socket_failed(addr, e))?;
        let addr = listener.local_addr().map_err(|e| RelayError::socket_failed(addr, e))?;
        debug!("Web server bound to {}", addr);
        Ok(Self { listener, addr })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve until cancelled.
    ///
    /// Each stream checks `store` every `poll` for a new frame. Open streams
    /// end on cancellation so shutdown does not wait on connected browsers.
    pub async fn run(
        self,
        store: Arc<FrameStore>,
        poll: Duration,
        cancel: CancellationToken,
    ) -> Result<()> {
        let state = Arc::new(WebState { store, poll, cancel: cancel.clone() });
        let app = router(state);

        info!("Web server listening on http://{}", self.addr);
        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .map_err(|e| RelayError::socket_failed(self.addr, e))?;

        info!("Web server stopped");
        Ok(())
    }
}

fn router(state: Arc<WebState>) -> Router {
    Router::new().route("/", get(index)).route("/video_feed", get(video_feed)).with_state(state)
}

/// GET /
async fn index() -> Html<&'static str> {
    Html(INDEX_PAGE)
}

/// GET /video_feed
async fn video_feed(State(state): State<Arc<WebState>>) -> impl IntoResponse {
    debug!("Stream client connected");
    let parts = frame_parts(Arc::clone(&state.store), state.poll, state.cancel.clone());
    (
        [
            (header::CONTENT_TYPE, format!("multipart/x-mixed-replace; boundary={}", BOUNDARY)),
            (header::CACHE_CONTROL, String::from("no-cache")),
        ],
        Body::from_stream(parts),
    )
}

/// One multipart part per frame sequence seen, until cancelled.
fn frame_parts(
    store: Arc<FrameStore>,
    poll: Duration,
    cancel: CancellationToken,
) -> impl Stream<Item = std::result::Result<Bytes, Infallible>> + Send + 'static {
    let mut ticker = tokio::time::interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    futures::stream::unfold(
        (store, ticker, cancel, 0u64),
        |(store, mut ticker, cancel, mut last_sequence)| async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return None,
                    _ = ticker.tick() => {}
                }

                let Some(frame) = store.snapshot() else { continue };
                if frame.sequence == last_sequence {
                    continue;
                }
                last_sequence = frame.sequence;
                let part = multipart_part(&frame.data);
                return Some((Ok(part), (store, ticker, cancel, last_sequence)));
            }
        },
    )
}

/// Wrap one JPEG in a multipart part.
fn multipart_part(jpeg: &[u8]) -> Bytes {
    let header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY,
        jpeg.len()
    );
    let mut part = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}
