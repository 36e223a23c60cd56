//! Sequential, seekable reader over a [`SegmentLoader`] (spec §4.4). Tracks
//! `(segment_index, segment_offset, absolute_offset)`, prefetches up to
//! `min(15, total_connections)` segments ahead of the synchronous read, and
//! cancels outstanding prefetch on seek. Grounded on the teacher's
//! `stream/virtual_file_streamer.rs` chunked read-loop shape, re-targeted at
//! the pool-backed loader instead of local file handles.

use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::segment::error::LoaderError;
use crate::segment::loader::SegmentLoader;

const MAX_PREFETCH: usize = 15;

pub struct SequentialReader {
    loader: Arc<SegmentLoader>,
    total_connections: usize,
    absolute_offset: u64,
    current_segment: Option<usize>,
    current_bytes: Option<Bytes>,
    prefetch_scope: CancellationToken,
}

impl SequentialReader {
    pub fn new(loader: Arc<SegmentLoader>, total_connections: usize) -> Self {
        Self {
            loader,
            total_connections,
            absolute_offset: 0,
            current_segment: None,
            current_bytes: None,
            prefetch_scope: CancellationToken::new(),
        }
    }

    pub fn position(&self) -> u64 {
        self.absolute_offset
    }

    fn prefetch_window(&self) -> usize {
        self.total_connections.min(MAX_PREFETCH)
    }

    /// Move the read cursor, cancelling any in-flight prefetch scheduled from
    /// the old position (spec §4.4 "seek cancels prefetch").
    pub async fn seek(&mut self, offset: u64) -> Result<(), LoaderError> {
        self.prefetch_scope.cancel();
        self.prefetch_scope = CancellationToken::new();

        let total = self.loader.total_size().await;
        if offset > total {
            return Err(LoaderError::Eof);
        }
        self.absolute_offset = offset;
        self.current_segment = None;
        self.current_bytes = None;
        Ok(())
    }

    /// Read up to `buf.len()` bytes starting at the current cursor,
    /// synchronously fetching the owning segment if it isn't cached, then
    /// firing prefetch for the following window. Returns `0` at EOF.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, LoaderError> {
        if buf.is_empty() {
            return Ok(0);
        }

        let Some(seg_idx) = self.loader.find_segment_index(self.absolute_offset).await else {
            return Ok(0);
        };

        if self.current_segment != Some(seg_idx) {
            let bytes = self.loader.download_segment(seg_idx as u32).await?;
            self.current_segment = Some(seg_idx);
            self.current_bytes = Some(bytes);
            self.spawn_prefetch(seg_idx);
        }

        let segments_start = self.segment_start(seg_idx).await;
        let seg_len = self.current_bytes.as_ref().expect("populated above").len();
        let seg_off = (self.absolute_offset - segments_start) as usize;
        if seg_off >= seg_len {
            // Estimate drifted short of the real segment; advance past it.
            self.current_segment = None;
            self.current_bytes = None;
            self.absolute_offset = segments_start + seg_len as u64;
            return Box::pin(self.read(buf)).await;
        }

        let seg_bytes = self.current_bytes.as_ref().expect("populated above");
        let n = (seg_bytes.len() - seg_off).min(buf.len());
        buf[..n].copy_from_slice(&seg_bytes[seg_off..seg_off + n]);
        self.absolute_offset += n as u64;

        if seg_off + n >= seg_bytes.len() {
            self.loader.evict_cached_segments_before(seg_idx.saturating_sub(1) as u32);
        }

        Ok(n)
    }

    async fn segment_start(&self, seg_idx: usize) -> u64 {
        self.loader.segment_start_offset(seg_idx).await
    }

    fn spawn_prefetch(&self, current: usize) {
        let window = self.prefetch_window();
        if window == 0 {
            return;
        }
        let loader = self.loader.clone();
        let scope = self.prefetch_scope.clone();
        tokio::spawn(async move {
            for offset in 1..=window {
                if scope.is_cancelled() {
                    return;
                }
                let ordinal = current + offset;
                if ordinal >= loader.segment_count().await {
                    return;
                }
                loader.prewarm_segment(ordinal as u32);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nzb::NzbFile;
    use chrono::Utc;

    fn empty_loader() -> Arc<SegmentLoader> {
        let file = NzbFile::new("subject".into(), "poster".into(), Utc::now());
        SegmentLoader::new(&file, vec![])
    }

    #[tokio::test]
    async fn seek_past_eof_is_rejected() {
        let mut reader = SequentialReader::new(empty_loader(), 4);
        let err = reader.seek(1).await.unwrap_err();
        assert!(matches!(err, LoaderError::Eof));
    }

    #[tokio::test]
    async fn seek_to_zero_on_empty_file_succeeds() {
        let mut reader = SequentialReader::new(empty_loader(), 4);
        reader.seek(0).await.unwrap();
        assert_eq!(reader.position(), 0);
    }

    #[tokio::test]
    async fn read_on_empty_file_returns_zero() {
        let mut reader = SequentialReader::new(empty_loader(), 4);
        let mut buf = [0u8; 16];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
    }
}
