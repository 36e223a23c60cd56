//! Virtual-offset -> article mapping, shared segment cache, and in-flight
//! fetch deduplication (spec §4.4). Grounded on the teacher's
//! `stream/segment_tracker.rs` (DashMap-based registry) for the cache shape,
//! re-plumbed from local-disk segment tracking to pool-backed NNTP fetches.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::nntp::pool::ConnectionPool;
use crate::nzb::NzbFile;
use crate::segment::error::LoaderError;

/// Typical yEnc overhead until the first segment is actually measured.
const DEFAULT_DECODE_RATIO: f64 = 0.975;
const MAX_CONSECUTIVE_FAILURES: u32 = 50;

#[derive(Clone)]
struct SegmentEntry {
    article_id: String,
    subject: String,
    declared_bytes: u64,
    decoded_bytes: u64,
    start_offset: u64,
    exact: bool,
}

type SharedFetch = Shared<BoxFuture<'static, Result<Bytes, LoaderError>>>;

/// One NZB File's segments, exposed as a byte-addressable virtual range.
pub struct SegmentLoader {
    pools: Vec<ConnectionPool>,
    segments: RwLock<Vec<SegmentEntry>>,
    cache: DashMap<u32, Bytes>,
    inflight: Mutex<HashMap<u32, SharedFetch>>,
    ratio_measured: std::sync::atomic::AtomicBool,
    last_measured: std::sync::atomic::AtomicBool,
    consecutive_failures: AtomicU32,
}

impl SegmentLoader {
    pub fn new(file: &NzbFile, pools: Vec<ConnectionPool>) -> Arc<Self> {
        let mut offset = 0u64;
        let segments = file
            .segments
            .iter()
            .map(|seg| {
                let estimate = (seg.bytes as f64 * DEFAULT_DECODE_RATIO) as u64;
                let entry = SegmentEntry {
                    article_id: seg.message_id.clone(),
                    subject: file.subject.clone(),
                    declared_bytes: seg.bytes,
                    decoded_bytes: estimate,
                    start_offset: offset,
                    exact: false,
                };
                offset += estimate;
                entry
            })
            .collect();

        Arc::new(Self {
            pools,
            segments: RwLock::new(segments),
            cache: DashMap::new(),
            inflight: Mutex::new(HashMap::new()),
            ratio_measured: std::sync::atomic::AtomicBool::new(false),
            last_measured: std::sync::atomic::AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
        })
    }

    pub async fn segment_count(&self) -> usize {
        self.segments.read().await.len()
    }

    /// Current best estimate of the decoded file size; exact once the last
    /// segment has been fetched at least once.
    pub async fn total_size(&self) -> u64 {
        let segments = self.segments.read().await;
        match segments.last() {
            Some(last) => last.start_offset + last.decoded_bytes,
            None => 0,
        }
    }

    /// `FindSegmentIndex` from spec §4.4/property 1: the ordinal whose range
    /// contains `offset`, or `None` past EOF.
    pub async fn find_segment_index(&self, offset: u64) -> Option<usize> {
        let segments = self.segments.read().await;
        if segments.is_empty() {
            return None;
        }
        // Binary search on start_offset; ranges are contiguous and sorted.
        let mut lo = 0usize;
        let mut hi = segments.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if segments[mid].start_offset <= offset {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if lo == 0 {
            return None;
        }
        let idx = lo - 1;
        let entry = &segments[idx];
        if offset < entry.start_offset + entry.decoded_bytes {
            Some(idx)
        } else {
            None
        }
    }

    pub async fn segment_start_offset(&self, ordinal: usize) -> u64 {
        self.segments
            .read()
            .await
            .get(ordinal)
            .map(|e| e.start_offset)
            .unwrap_or(0)
    }

    pub fn get_cached_segment(&self, ordinal: u32) -> Option<Bytes> {
        self.cache.get(&ordinal).map(|r| r.clone())
    }

    pub fn evict_cached_segments_before(&self, ordinal: u32) {
        self.cache.retain(|&k, _| k >= ordinal);
    }

    /// Non-blocking request to warm the cache; errors are swallowed.
    pub fn prewarm_segment(self: &Arc<Self>, ordinal: u32) {
        if self.cache.contains_key(&ordinal) {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.download_segment(ordinal).await {
                debug!(ordinal, error = %e, "prewarm failed (ignored)");
            }
        });
    }

    /// At most one network fetch per ordinal at a time; concurrent callers
    /// join the same in-flight future (spec §4.4 property 2).
    pub async fn download_segment(self: &Arc<Self>, ordinal: u32) -> Result<Bytes, LoaderError> {
        if let Some(bytes) = self.get_cached_segment(ordinal) {
            return Ok(bytes);
        }

        let fut = {
            let mut inflight = self.inflight.lock().await;
            if let Some(existing) = inflight.get(&ordinal) {
                existing.clone()
            } else {
                let this = self.clone();
                let boxed: BoxFuture<'static, Result<Bytes, LoaderError>> =
                    Box::pin(async move { this.fetch_segment(ordinal).await });
                let shared = boxed.shared();
                inflight.insert(ordinal, shared.clone());
                shared
            }
        };

        let result = fut.await;
        self.inflight.lock().await.remove(&ordinal);
        result
    }

    async fn fetch_segment(self: &Arc<Self>, ordinal: u32) -> Result<Bytes, LoaderError> {
        if self.pools.is_empty() {
            return Err(LoaderError::NoProviders);
        }

        let mut sorted_pools: Vec<&ConnectionPool> = self.pools.iter().collect();
        sorted_pools.sort_by_key(|p| p.priority());

        let (article_id, subject) = {
            let segments = self.segments.read().await;
            let entry = segments.get(ordinal as usize).ok_or(LoaderError::Eof)?;
            (entry.article_id.clone(), entry.subject.clone())
        };

        let mut last_error: Option<LoaderError> = None;
        for pool in sorted_pools {
            let cancel = tokio_util::sync::CancellationToken::new();
            let mut pooled = match pool.acquire(&cancel).await {
                Ok(client) => client,
                Err(e) => {
                    last_error = Some(LoaderError::NetworkError(e.to_string()));
                    continue;
                }
            };

            match pooled.client_mut().body(&article_id).await {
                Ok(raw) => match crate::nntp::yenc::decode_article(&raw, &subject) {
                    Ok((decoded, _filename)) => {
                        pooled.release().await;
                        let bytes = Bytes::from(decoded);
                        self.record_measurement(ordinal, bytes.len() as u64).await;
                        self.cache.insert(ordinal, bytes.clone());
                        self.consecutive_failures.store(0, Ordering::Relaxed);
                        return Ok(bytes);
                    }
                    Err(e) => {
                        pooled.discard().await;
                        last_error = Some(e.into());
                        continue;
                    }
                },
                Err(e) => {
                    let retryable_elsewhere = !matches!(e, crate::nntp::error::NntpError::NoSuchArticle { .. });
                    if retryable_elsewhere {
                        pooled.discard().await;
                    } else {
                        pooled.release().await;
                    }
                    last_error = Some(e.into());
                    continue;
                }
            }
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= MAX_CONSECUTIVE_FAILURES {
            warn!(ordinal, failures, "too many consecutive segment failures");
            return Err(LoaderError::TooManyFailures);
        }

        Err(last_error.unwrap_or(LoaderError::NoProviders))
    }

    /// Corrects the segment map once a segment's true decoded size is known:
    /// the first segment establishes the decode ratio applied to every
    /// estimate; the last segment's exact size corrects the running total.
    async fn record_measurement(&self, ordinal: u32, decoded_len: u64) {
        let mut segments = self.segments.write().await;
        let last_idx = segments.len().saturating_sub(1);

        if ordinal == 0 && !self.ratio_measured.swap(true, Ordering::SeqCst) {
            let declared = segments[0].declared_bytes.max(1);
            let ratio = decoded_len as f64 / declared as f64;
            segments[0].decoded_bytes = decoded_len;
            segments[0].exact = true;

            let mut offset = decoded_len;
            for entry in segments.iter_mut().skip(1) {
                if !entry.exact {
                    entry.decoded_bytes = (entry.declared_bytes as f64 * ratio) as u64;
                }
                entry.start_offset = offset;
                offset += entry.decoded_bytes;
            }
        } else if ordinal as usize == last_idx && !self.last_measured.swap(true, Ordering::SeqCst) {
            segments[last_idx].decoded_bytes = decoded_len;
            segments[last_idx].exact = true;
        } else if (ordinal as usize) < segments.len() && !segments[ordinal as usize].exact {
            let delta = decoded_len as i64 - segments[ordinal as usize].decoded_bytes as i64;
            segments[ordinal as usize].decoded_bytes = decoded_len;
            segments[ordinal as usize].exact = true;
            if delta != 0 {
                for entry in segments.iter_mut().skip(ordinal as usize + 1) {
                    entry.start_offset = (entry.start_offset as i64 + delta).max(0) as u64;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nzb::{NzbFile, NzbSegment};
    use chrono::Utc;

    fn file_with_segments(sizes: &[u64]) -> NzbFile {
        let mut file = NzbFile::new("subject".into(), "poster".into(), Utc::now());
        for (i, size) in sizes.iter().enumerate() {
            file.add_segment(NzbSegment::new(format!("<seg{i}@x>"), (i + 1) as u32, *size));
        }
        file
    }

    #[tokio::test]
    async fn offsets_are_contiguous_estimates_before_measurement() {
        let file = file_with_segments(&[750_000; 10]);
        let loader = SegmentLoader::new(&file, vec![]);

        for i in 0..10 {
            let idx = loader.find_segment_index(
                loader.segments.read().await[i].start_offset,
            ).await;
            assert_eq!(idx, Some(i));
        }
        assert_eq!(loader.find_segment_index(loader.total_size().await).await, None);
    }

    #[tokio::test]
    async fn eviction_drops_only_earlier_ordinals() {
        let file = file_with_segments(&[100, 100, 100]);
        let loader = SegmentLoader::new(&file, vec![]);
        loader.cache.insert(0, Bytes::from_static(b"a"));
        loader.cache.insert(1, Bytes::from_static(b"b"));
        loader.cache.insert(2, Bytes::from_static(b"c"));

        loader.evict_cached_segments_before(1);

        assert!(loader.get_cached_segment(0).is_none());
        assert!(loader.get_cached_segment(1).is_some());
        assert!(loader.get_cached_segment(2).is_some());
    }

    #[tokio::test]
    async fn download_without_providers_fails_fast() {
        let file = file_with_segments(&[100]);
        let loader = SegmentLoader::new(&file, vec![]);
        let err = loader.download_segment(0).await.unwrap_err();
        assert!(matches!(err, LoaderError::NoProviders));
    }
}
