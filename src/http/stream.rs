//! Chunked response body over a [`VirtualStream`] (spec §4.8). Grounded on
//! the teacher's `stream/virtual_file_streamer.rs` `async_stream::try_stream!`
//! read loop, re-targeted at `axum::body::Body::from_stream` and extended
//! with a per-write deadline and a disconnect guard that ends the session's
//! playback accounting when the client goes away mid-stream.

use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use bytes::Bytes;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::archive::VirtualStream;
use crate::session::SessionManager;

const CHUNK_SIZE: usize = 64 * 1024;
const WRITE_DEADLINE: Duration = Duration::from_secs(10 * 60);

struct PlaybackGuard {
    sessions: Arc<SessionManager>,
    session_id: Uuid,
    client_ip: IpAddr,
    cancel: CancellationToken,
}

impl Drop for PlaybackGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
        let sessions = self.sessions.clone();
        let session_id = self.session_id;
        let client_ip = self.client_ip;
        tokio::spawn(async move {
            let _ = sessions.end_playback(session_id, client_ip).await;
        });
    }
}

/// Streams `len` bytes starting at `start` from `stream`, in fixed-size
/// chunks, enforcing a write deadline per chunk. `end_playback` fires when
/// the returned body is dropped, whether the stream finished or the client
/// disconnected early. The returned [`CancellationToken`] fires at the same
/// moment, so a keep-alive monitor spawned alongside the body can stop
/// itself without polling session state.
pub fn body_for_range(
    stream: Arc<VirtualStream>,
    start: u64,
    len: u64,
    sessions: Arc<SessionManager>,
    session_id: Uuid,
    client_ip: IpAddr,
) -> (Body, CancellationToken) {
    let cancel = CancellationToken::new();
    let guard_cancel = cancel.clone();
    let generator: std::pin::Pin<Box<dyn futures::Stream<Item = Result<Bytes, io::Error>> + Send>> =
        Box::pin(async_stream::try_stream! {
        let _guard = PlaybackGuard { sessions, session_id, client_ip, cancel: guard_cancel };

        stream.seek(start).await.map_err(to_io_error)?;
        let mut remaining = len;
        let mut buf = vec![0u8; CHUNK_SIZE];

        while remaining > 0 {
            let want = remaining.min(CHUNK_SIZE as u64) as usize;
            let read = timeout(WRITE_DEADLINE, stream.read(&mut buf[..want]))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "stream write deadline exceeded"))?
                .map_err(to_io_error)?;
            if read == 0 {
                break;
            }
            remaining -= read as u64;
            yield Bytes::copy_from_slice(&buf[..read]);
        }
    });
    (Body::from_stream(generator), cancel)
}

fn to_io_error(err: crate::archive::ArchiveError) -> io::Error {
    io::Error::other(err.to_string())
}
