//! Per-user session state
//!
//! A session holds at most one uploaded table and one diagnosis slot. Uploads
//! replace the table wholesale; a failed upload leaves the previous one in place.
//! Sessions nobody has touched for a while are evicted along with their table.

use crate::diagnosis::DiagnosisSlot;
use crate::ingest::{IngestError, LogTable};
use crate::schema::ColumnNames;
use chrono::{DateTime, Utc};
use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Metadata about the table currently loaded
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadInfo {
    pub file_name: Option<String>,
    pub rows: usize,
    pub columns: usize,
    pub uploaded_at: DateTime<Utc>,
}

pub struct Session {
    table: Option<Arc<LogTable>>,
    upload: Option<UploadInfo>,
    diagnosis: DiagnosisSlot,
    last_seen: Instant,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            table: None,
            upload: None,
            diagnosis: DiagnosisSlot::new(),
            last_seen: Instant::now(),
        }
    }
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the session as used now
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_seen.elapsed()
    }

    pub fn table(&self) -> Option<Arc<LogTable>> {
        self.table.clone()
    }

    pub fn upload_info(&self) -> Option<&UploadInfo> {
        self.upload.as_ref()
    }

    /// Swap in a new table. Any diagnosis for the old table is dropped.
    pub fn replace_table(&mut self, table: LogTable, file_name: Option<String>) -> &UploadInfo {
        self.diagnosis.reset();
        let info = UploadInfo {
            file_name,
            rows: table.len(),
            columns: table.headers().len(),
            uploaded_at: Utc::now(),
        };
        self.table = Some(Arc::new(table));
        self.upload.insert(info)
    }

    /// Parse `bytes` and replace the table on success.
    ///
    /// On error the current table is kept.
    pub fn upload(
        &mut self,
        bytes: &[u8],
        file_name: Option<String>,
        names: &ColumnNames,
    ) -> Result<&UploadInfo, IngestError> {
        match LogTable::from_bytes(bytes, names) {
            Ok(table) => {
                info!(file = ?file_name, rows = table.len(), "Table replaced");
                Ok(self.replace_table(table, file_name))
            }
            Err(e) => {
                warn!(file = ?file_name, error = %e, "Upload rejected, keeping previous table");
                Err(e)
            }
        }
    }

    pub fn diagnosis(&self) -> &DiagnosisSlot {
        &self.diagnosis
    }

    pub fn diagnosis_mut(&mut self) -> &mut DiagnosisSlot {
        &mut self.diagnosis
    }
}

/// All live sessions of the HTTP service
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<Uuid, Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.sessions.insert(id, Session::new());
        info!(session = %id, "Session created");
        id
    }

    pub fn remove(&self, id: &Uuid) -> bool {
        self.sessions.remove(id).is_some()
    }

    /// Exclusive access to one session. Do not hold across an await point.
    pub fn get_mut(&self, id: &Uuid) -> Option<RefMut<'_, Uuid, Session>> {
        self.sessions.get_mut(id).map(|mut s| {
            s.touch();
            s
        })
    }

    /// Run `f` against a session, if it exists
    pub fn with<R>(&self, id: &Uuid, f: impl FnOnce(&Session) -> R) -> Option<R> {
        self.get_mut(id).map(|s| f(s.value()))
    }

    /// Drop sessions idle for at least `max_idle`; returns how many went
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut evicted = 0;
        self.sessions.retain(|id, session| {
            let keep = session.idle_for() < max_idle;
            if !keep {
                info!(session = %id, idle_secs = session.idle_for().as_secs(), "Session expired");
                evicted += 1;
            }
            keep
        });
        evicted
    }

    /// Start background eviction of idle sessions
    pub fn start_eviction_task(self: Arc<Self>, max_idle: Duration, every: Duration) {
        tokio::spawn(async move {
            let mut ticker = interval(every);
            loop {
                ticker.tick().await;
                let evicted = self.evict_idle(max_idle);
                debug!(evicted, remaining = self.len(), "Session sweep");
            }
        });
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
