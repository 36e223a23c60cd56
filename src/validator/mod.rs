//! Availability validator (spec §4.6). Samples a handful of article ids per
//! configured provider and reports a completion ratio, optionally followed
//! by an extended probe that actually downloads and decodes a few of them.
//! No teacher counterpart; grounded directly on the pool built in
//! `nntp::pool` and the sampling/timeout shape the spec describes.

pub mod error;

use std::cmp::Ordering;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::archive::rar;
use crate::nntp::pool::ConnectionPool;
use crate::nntp::yenc;
use crate::nzb::types::{is_rar_file, NzbFile, ReleaseKind};
use crate::validator::error::ValidatorError;

const WALL_TIMEOUT: Duration = Duration::from_secs(30);
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct ProviderResult {
    pub provider: String,
    pub priority: u32,
    pub sampled: usize,
    pub missing: usize,
    pub extended_probe_ok: bool,
}

impl ProviderResult {
    pub fn completion_ratio(&self) -> f64 {
        if self.sampled == 0 {
            0.0
        } else {
            (self.sampled - self.missing) as f64 / self.sampled as f64
        }
    }

    pub fn is_fully_available(&self) -> bool {
        self.missing == 0
    }
}

pub struct Validator {
    pools: Vec<ConnectionPool>,
    sample_size: usize,
    max_concurrent: usize,
}

impl Validator {
    pub fn new(pools: Vec<ConnectionPool>, sample_size: usize, max_concurrent: usize) -> Self {
        Self { pools, sample_size: sample_size.max(2), max_concurrent: max_concurrent.max(1) }
    }

    /// Runs one probe per configured provider, with a wall-clock deadline
    /// that yields whatever results finished rather than failing the whole
    /// batch.
    pub async fn validate_all(&self, file: &NzbFile, kind: ReleaseKind) -> Result<Vec<ProviderResult>, ValidatorError> {
        if self.pools.is_empty() {
            return Err(ValidatorError::NoProviders);
        }
        let sample = build_sample(file, self.sample_size);
        if sample.is_empty() {
            return Err(ValidatorError::NoContentFile);
        }

        let mut probes = FuturesUnordered::new();
        for pool in &self.pools {
            probes.push(self.probe_provider(pool, &sample, kind));
        }

        let mut results = Vec::with_capacity(self.pools.len());
        let deadline = tokio::time::sleep(WALL_TIMEOUT);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                biased;
                next = probes.next() => match next {
                    Some(result) => results.push(result),
                    None => break,
                },
                _ = &mut deadline => {
                    warn!(completed = results.len(), total = self.pools.len(), "validator wall timeout, returning partial results");
                    break;
                }
            }
        }
        Ok(results)
    }

    /// Highest completion ratio wins; ties break by ascending configured
    /// provider priority, never by iteration order.
    pub fn best_provider<'a>(&self, results: &'a [ProviderResult]) -> Option<&'a ProviderResult> {
        results.iter().max_by(|a, b| {
            match a.completion_ratio().partial_cmp(&b.completion_ratio()).unwrap_or(Ordering::Equal) {
                Ordering::Equal => b.priority.cmp(&a.priority),
                other => other,
            }
        })
    }

    async fn probe_provider(&self, pool: &ConnectionPool, sample: &[String], kind: ReleaseKind) -> ProviderResult {
        let outcomes: Vec<bool> = futures::stream::iter(sample.iter().cloned())
            .map(|id| {
                let pool = pool.clone();
                async move { stat_one(&pool, &id).await }
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let missing = outcomes.iter().filter(|ok| !**ok).count();
        let extended_probe_ok = if missing == 0 {
            self.extended_probe(pool, sample, kind).await
        } else {
            false
        };

        ProviderResult {
            provider: pool.provider_name().to_string(),
            priority: pool.priority(),
            sampled: sample.len(),
            missing,
            extended_probe_ok,
        }
    }

    /// Downloads and decodes the first, middle, and last sampled articles.
    /// For a RAR release, also parses the first one's header and confirms
    /// it is stored rather than compressed. A 7z release's compression
    /// method can only be read from the archive's own header (commonly at
    /// the volume tail), which this lightweight sample intentionally does
    /// not download; its extended probe is limited to decode success.
    async fn extended_probe(&self, pool: &ConnectionPool, sample: &[String], kind: ReleaseKind) -> bool {
        if sample.is_empty() {
            return true;
        }
        let picks: Vec<&String> = [sample.first(), sample.get(sample.len() / 2), sample.last()]
            .into_iter()
            .flatten()
            .collect();

        for (i, id) in picks.iter().enumerate() {
            let cancel = CancellationToken::new();
            let mut client = match pool.acquire(&cancel).await {
                Ok(c) => c,
                Err(_) => return false,
            };
            let raw = match client.client_mut().body(id).await {
                Ok(raw) => raw,
                Err(_) => {
                    client.discard().await;
                    return false;
                }
            };
            let decoded = match yenc::decode_article(&raw, id) {
                Ok((decoded, _)) if !decoded.is_empty() => decoded,
                _ => {
                    client.discard().await;
                    return false;
                }
            };
            client.release().await;

            if i == 0 && kind == ReleaseKind::Rar {
                match rar::scan_headers(&decoded) {
                    Ok(headers) => {
                        if !headers.iter().any(|h| h.is_stored() || is_rar_file(&h.name)) {
                            return false;
                        }
                    }
                    Err(_) => return false,
                }
            }
        }
        true
    }
}

async fn stat_one(pool: &ConnectionPool, id: &str) -> bool {
    let mut client = match pool.try_acquire() {
        Some(c) => c,
        None => {
            let cancel = CancellationToken::new();
            let acquire_cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(ACQUIRE_TIMEOUT).await;
                acquire_cancel.cancel();
            });
            match pool.acquire(&cancel).await {
                Ok(c) => c,
                Err(_) => return false,
            }
        }
    };
    match client.client_mut().stat(id).await {
        Ok(exists) => {
            client.release().await;
            exists
        }
        Err(_) => {
            client.discard().await;
            false
        }
    }
}

/// First and last segment, plus `sampleSize - 2` more spread evenly between
/// them.
fn build_sample(file: &NzbFile, sample_size: usize) -> Vec<String> {
    let n = file.segments.len();
    if n == 0 {
        return Vec::new();
    }
    if n <= sample_size {
        return file.segments.iter().map(|s| s.message_id.clone()).collect();
    }

    let mut indices = vec![0usize, n - 1];
    let extra = sample_size.saturating_sub(2);
    for i in 1..=extra {
        indices.push(i * (n - 1) / (extra + 1));
    }
    indices.sort_unstable();
    indices.dedup();
    indices.into_iter().map(|i| file.segments[i].message_id.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn file_with_segments(n: u32) -> NzbFile {
        let mut f = NzbFile::new("s".into(), "p".into(), Utc::now());
        for i in 1..=n {
            f.add_segment(crate::nzb::types::NzbSegment::new(format!("<id{i}>"), i, 1000));
        }
        f
    }

    #[test]
    fn sample_includes_first_and_last_and_is_sorted() {
        let file = file_with_segments(100);
        let sample = build_sample(&file, 6);
        assert_eq!(sample.first(), Some(&"<id1>".to_string()));
        assert_eq!(sample.last(), Some(&"<id100>".to_string()));
        assert!(sample.len() <= 6);
    }

    #[test]
    fn small_file_samples_every_segment() {
        let file = file_with_segments(3);
        let sample = build_sample(&file, 12);
        assert_eq!(sample.len(), 3);
    }

    #[test]
    fn best_provider_breaks_ties_by_ascending_priority() {
        let validator = Validator::new(vec![], 12, 5);
        let results = vec![
            ProviderResult { provider: "b".into(), priority: 5, sampled: 10, missing: 0, extended_probe_ok: true },
            ProviderResult { provider: "a".into(), priority: 1, sampled: 10, missing: 0, extended_probe_ok: true },
        ];
        let best = validator.best_provider(&results).unwrap();
        assert_eq!(best.provider, "a");
    }

    #[test]
    fn best_provider_prefers_higher_completion_ratio() {
        let validator = Validator::new(vec![], 12, 5);
        let results = vec![
            ProviderResult { provider: "low".into(), priority: 0, sampled: 10, missing: 5, extended_probe_ok: false },
            ProviderResult { provider: "high".into(), priority: 9, sampled: 10, missing: 0, extended_probe_ok: true },
        ];
        let best = validator.best_provider(&results).unwrap();
        assert_eq!(best.provider, "high");
    }
}
