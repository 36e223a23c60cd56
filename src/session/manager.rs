//! Session lifecycle (spec §4.7). Grounded on the teacher's
//! `session/mod.rs` shape (`HashMap<Uuid, Arc<Mutex<Session>>>`,
//! `cleanup_sessions`, active-play tracking) with the PAR2/disk-queue fields
//! replaced by the deferred-NZB + blueprint-cache model the spec describes.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::archive::{self, ArchiveBlueprint, ReleaseVolumes};
use crate::nntp::pool::ConnectionPool;
use crate::nzb::{Nzb, NzbFile, NzbParser};
use crate::session::error::SessionError;
use crate::session::indexer::IndexerClient;
use crate::segment::loader::SegmentLoader;
use crate::validator::Validator;

const CLEAN_INTERVAL: Duration = Duration::from_secs(5 * 60);
const NZB_FETCH_TIMEOUT: Duration = Duration::from_secs(60);
/// Mirrors `config::default_validation_sample_size`/`default_max_concurrent_validations`;
/// kept local so realizing a session doesn't need to thread `AppConfig` through.
const VALIDATION_SAMPLE_SIZE: usize = 12;
const MAX_CONCURRENT_VALIDATIONS: usize = 5;

/// Single-flight realization future: concurrent callers for the same session
/// id join this instead of each triggering their own indexer fetch.
type RealizeFuture = Shared<BoxFuture<'static, Result<(), Arc<SessionError>>>>;

fn clone_session_error(err: &SessionError) -> SessionError {
    match err {
        SessionError::NotFound => SessionError::NotFound,
        SessionError::Expired => SessionError::Expired,
        SessionError::Fetch(msg) => SessionError::Fetch(msg.clone()),
        SessionError::Nzb(e) => SessionError::Fetch(e.to_string()),
        SessionError::Archive(e) => SessionError::Archive(e.clone()),
        SessionError::Loader(e) => SessionError::Loader(e.clone()),
    }
}

/// 128-bit id derived from a release's content, stable across re-requests of
/// the same NZB so repeated plays of one release share a session.
pub fn content_id(files: &[NzbFile]) -> Uuid {
    const NAMESPACE: Uuid = Uuid::from_bytes([
        0x6e, 0x7a, 0x62, 0x2d, 0x73, 0x74, 0x72, 0x65, 0x61, 0x6d, 0x65, 0x72, 0x00, 0x00, 0x00, 0x00,
    ]);
    let mut key: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
    key.sort_unstable();
    Uuid::new_v5(&NAMESPACE, key.join("\0").as_bytes())
}

enum SessionState {
    Deferred { download_url: String, indexer: Arc<dyn IndexerClient> },
    Realized { files: Vec<NzbFile>, loaders: Vec<Arc<SegmentLoader>>, blueprint: Option<Arc<ArchiveBlueprint>> },
}

pub struct Session {
    pub id: Uuid,
    cancel: CancellationToken,
    state: Mutex<SessionState>,
    active_plays: AtomicU32,
    client_ips: Mutex<HashMap<IpAddr, Instant>>,
    last_access: Mutex<Instant>,
}

impl Session {
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn touch(&self) {
        *self.last_access.lock().await = Instant::now();
    }

    async fn idle_for(&self) -> Duration {
        self.last_access.lock().await.elapsed()
    }

    async fn is_reapable(&self, ttl: Duration) -> bool {
        self.active_plays.load(Ordering::Relaxed) == 0
            && self.client_ips.lock().await.is_empty()
            && self.idle_for().await > ttl
    }
}

pub struct SessionManager {
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
    pools: Vec<ConnectionPool>,
    ttl: Duration,
    cleaner_cancel: CancellationToken,
    realize_inflight: Mutex<HashMap<Uuid, RealizeFuture>>,
}

impl SessionManager {
    pub fn new(pools: Vec<ConnectionPool>, ttl: Duration) -> Arc<Self> {
        let manager = Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            pools,
            ttl,
            cleaner_cancel: CancellationToken::new(),
            realize_inflight: Mutex::new(HashMap::new()),
        });
        manager.clone().spawn_cleaner();
        manager
    }

    fn spawn_cleaner(self: Arc<Self>) {
        let cancel = self.cleaner_cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(CLEAN_INTERVAL) => {}
                }
                self.reap_expired().await;
            }
        });
    }

    async fn reap_expired(&self) {
        let candidates: Vec<(Uuid, Arc<Session>)> = {
            let sessions = self.sessions.read().await;
            sessions.iter().map(|(id, s)| (*id, s.clone())).collect()
        };

        let mut expired = Vec::new();
        for (id, session) in candidates {
            if session.is_reapable(self.ttl).await {
                expired.push((id, session));
            }
        }

        if expired.is_empty() {
            return;
        }

        let mut sessions = self.sessions.write().await;
        for (id, _) in &expired {
            sessions.remove(id);
        }
        drop(sessions);

        // Cancellation happens outside the session-map lock: a session's own
        // cancel path can itself try to touch the map, so holding the write
        // lock here would deadlock.
        for (id, session) in expired {
            session.cancel.cancel();
            info!(session = %id, "reaped expired session");
        }
    }

    fn build_loaders(&self, files: &[NzbFile]) -> Vec<Arc<SegmentLoader>> {
        files.iter().map(|f| SegmentLoader::new(f, self.pools.clone())).collect()
    }

    pub async fn create_session(&self, nzb: &Nzb) -> Result<Uuid, SessionError> {
        if nzb.files.is_empty() {
            return Err(SessionError::Archive(crate::archive::ArchiveError::NoContentFiles));
        }
        let id = content_id(&nzb.files);
        let loaders = self.build_loaders(&nzb.files);

        let session = Arc::new(Session {
            id,
            cancel: CancellationToken::new(),
            state: Mutex::new(SessionState::Realized { files: nzb.files.clone(), loaders, blueprint: None }),
            active_plays: AtomicU32::new(0),
            client_ips: Mutex::new(HashMap::new()),
            last_access: Mutex::new(Instant::now()),
        });

        self.sessions.write().await.insert(id, session);
        Ok(id)
    }

    pub async fn create_deferred_session(
        &self,
        id: Uuid,
        download_url: String,
        indexer: Arc<dyn IndexerClient>,
    ) -> Result<(), SessionError> {
        let session = Arc::new(Session {
            id,
            cancel: CancellationToken::new(),
            state: Mutex::new(SessionState::Deferred { download_url, indexer }),
            active_plays: AtomicU32::new(0),
            client_ips: Mutex::new(HashMap::new()),
            last_access: Mutex::new(Instant::now()),
        });
        self.sessions.write().await.insert(id, session);
        Ok(())
    }

    async fn session(&self, id: Uuid) -> Result<Arc<Session>, SessionError> {
        self.sessions.read().await.get(&id).cloned().ok_or(SessionError::NotFound)
    }

    /// Realizes a deferred session by downloading and parsing its NZB via the
    /// indexer client it was created with. Concurrent callers for the same
    /// session id join a single in-flight future instead of each triggering
    /// their own indexer fetch (mirrors `SegmentLoader::download_segment`'s
    /// single-flight dedup).
    pub async fn get_or_download_nzb(&self, id: Uuid) -> Result<(), SessionError> {
        let session = self.session(id).await?;

        let (download_url, indexer) = {
            let state = session.state.lock().await;
            match &*state {
                SessionState::Realized { .. } => return Ok(()),
                SessionState::Deferred { download_url, indexer } => (download_url.clone(), indexer.clone()),
            }
        };

        let fut = {
            let mut inflight = self.realize_inflight.lock().await;
            if let Some(existing) = inflight.get(&id) {
                existing.clone()
            } else {
                let session = session.clone();
                let pools = self.pools.clone();
                let boxed: BoxFuture<'static, Result<(), Arc<SessionError>>> = Box::pin(async move {
                    Self::realize_deferred(session, pools, download_url, indexer).await.map_err(Arc::new)
                });
                let shared = boxed.shared();
                inflight.insert(id, shared.clone());
                shared
            }
        };

        let result = fut.await;
        self.realize_inflight.lock().await.remove(&id);
        result.map_err(|e| clone_session_error(&e))
    }

    async fn realize_deferred(
        session: Arc<Session>,
        pools: Vec<ConnectionPool>,
        download_url: String,
        indexer: Arc<dyn IndexerClient>,
    ) -> Result<(), SessionError> {
        let bytes = timeout(NZB_FETCH_TIMEOUT, indexer.download_nzb(&download_url))
            .await
            .map_err(|_| SessionError::Fetch(format!("timed out fetching {download_url}")))??;
        let nzb = NzbParser::parse(bytes.as_slice())?;

        Self::validate_availability(&nzb, &pools).await;

        let loaders: Vec<Arc<SegmentLoader>> =
            nzb.files.iter().map(|f| SegmentLoader::new(f, pools.clone())).collect();

        let mut state = session.state.lock().await;
        if matches!(&*state, SessionState::Realized { .. }) {
            return Ok(());
        }
        *state = SessionState::Realized { files: nzb.files, loaders, blueprint: None };
        Ok(())
    }

    /// Ranks provider availability for the release's largest content file
    /// (spec §4.6) so a failing/incomplete provider shows up in logs before
    /// playback ever hits it. Advisory only: a validation failure never
    /// blocks realizing the session, since the loader's own per-segment
    /// failover already tolerates missing articles on individual providers.
    async fn validate_availability(nzb: &Nzb, pools: &[ConnectionPool]) {
        let Some(primary) = nzb.files.iter().max_by_key(|f| f.size) else {
            return;
        };
        let validator = Validator::new(pools.to_vec(), VALIDATION_SAMPLE_SIZE, MAX_CONCURRENT_VALIDATIONS);
        match validator.validate_all(primary, nzb.archive_kind()).await {
            Ok(results) => match validator.best_provider(&results) {
                Some(best) => info!(
                    provider = %best.provider,
                    completion = best.completion_ratio(),
                    extended_ok = best.extended_probe_ok,
                    "ranked provider availability for session"
                ),
                None => warn!("no provider responded during availability validation"),
            },
            Err(e) => warn!(error = %e, "availability validation skipped"),
        }
    }

    /// Builds (or reuses) this session's archive blueprint.
    pub async fn ensure_blueprint(&self, id: Uuid) -> Result<Arc<ArchiveBlueprint>, SessionError> {
        let session = self.session(id).await?;
        let mut state = session.state.lock().await;
        match &mut *state {
            SessionState::Deferred { .. } => Err(SessionError::NotFound),
            SessionState::Realized { files, loaders, blueprint } => {
                if let Some(existing) = blueprint {
                    return Ok(existing.clone());
                }
                let built = archive::build_blueprint(ReleaseVolumes { files: files.as_slice(), loaders: loaders.as_slice() }).await?;
                let built = Arc::new(built);
                *blueprint = Some(built.clone());
                Ok(built)
            }
        }
    }

    pub async fn loaders(&self, id: Uuid) -> Result<Vec<Arc<SegmentLoader>>, SessionError> {
        let session = self.session(id).await?;
        let state = session.state.lock().await;
        match &*state {
            SessionState::Realized { loaders, .. } => Ok(loaders.clone()),
            SessionState::Deferred { .. } => Err(SessionError::NotFound),
        }
    }

    pub async fn cancellation(&self, id: Uuid) -> Result<CancellationToken, SessionError> {
        Ok(self.session(id).await?.cancellation())
    }

    pub async fn start_playback(&self, id: Uuid, ip: IpAddr) -> Result<(), SessionError> {
        let session = self.session(id).await?;
        session.active_plays.fetch_add(1, Ordering::Relaxed);
        session.client_ips.lock().await.insert(ip, Instant::now());
        session.touch().await;
        Ok(())
    }

    pub async fn end_playback(&self, id: Uuid, ip: IpAddr) -> Result<(), SessionError> {
        let session = self.session(id).await?;
        session.active_plays.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1))).ok();
        session.client_ips.lock().await.remove(&ip);
        session.touch().await;
        Ok(())
    }

    pub async fn keep_alive(&self, id: Uuid, ip: IpAddr) -> Result<(), SessionError> {
        let session = self.session(id).await?;
        session.client_ips.lock().await.insert(ip, Instant::now());
        session.touch().await;
        Ok(())
    }

    /// Non-blocking snapshot: a session currently busy under its own lock is
    /// skipped for this round rather than blocking the caller.
    pub async fn active_session_ids(&self) -> Vec<Uuid> {
        let sessions = self.sessions.read().await;
        sessions
            .iter()
            .filter_map(|(id, session)| session.state.try_lock().ok().map(|_| *id))
            .collect()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub fn shutdown(&self) {
        self.cleaner_cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn file(path: &str) -> NzbFile {
        let mut f = NzbFile::new("subject".into(), "poster".into(), Utc::now());
        f.path = path.into();
        f
    }

    #[test]
    fn content_id_is_stable_and_order_independent() {
        let a = content_id(&[file("a.mkv"), file("b.nfo")]);
        let b = content_id(&[file("b.nfo"), file("a.mkv")]);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn unknown_session_lookup_fails() {
        let manager = SessionManager::new(vec![], Duration::from_secs(1800));
        let err = manager.session(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound));
        manager.shutdown();
    }

    #[tokio::test]
    async fn create_and_playback_lifecycle() {
        let manager = SessionManager::new(vec![], Duration::from_secs(1800));
        let mut nzb = Nzb::new();
        nzb.files.push(file("movie.mp4"));
        let id = manager.create_session(&nzb).await.unwrap();

        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        manager.start_playback(id, ip).await.unwrap();
        assert!(manager.active_session_ids().await.contains(&id));
        manager.end_playback(id, ip).await.unwrap();
        manager.shutdown();
    }
}
