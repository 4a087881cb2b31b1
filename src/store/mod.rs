//! Incident persistence -- durable SQLite layer plus the transient
//! in-process layers (read cache, single-flight leases, cancel flags).
//!
//! The `report_json` column is the source of truth for a record; the
//! summary columns exist for listing and dedup queries. Reads go through
//! the cache and never wait on a writer's lease.

pub mod lease;
pub mod schema;

use crate::model::{Incident, IncidentSummary, Stage, StageTiming};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// Connection pool type.
pub type Pool = R2D2Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct IncidentStore {
    pool: Pool,
    cache: Arc<RwLock<HashMap<String, Incident>>>,
    leases: lease::LeaseMap,
    cancels: Arc<RwLock<HashMap<String, Arc<AtomicBool>>>>,
    ingest_lock: Arc<Mutex<()>>,
}

impl IncidentStore {
    /// Open (or create) the SQLite database and run migrations.
    pub fn open(path: &str) -> Result<IncidentStore> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create data dir {}", parent.display()))?;
            }
        }
        let manager = SqliteConnectionManager::file(path).with_init(|c| {
            c.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
            )
        });
        Self::from_manager(manager, None)
    }

    /// In-memory store for tests and one-shot CLI runs. The pool is capped
    /// at one connection: each in-memory connection is its own database.
    pub fn open_in_memory() -> Result<IncidentStore> {
        Self::from_manager(SqliteConnectionManager::memory(), Some(1))
    }

    fn from_manager(
        manager: SqliteConnectionManager,
        max_size: Option<u32>,
    ) -> Result<IncidentStore> {
        let mut builder = R2D2Pool::builder();
        if let Some(size) = max_size {
            builder = builder.max_size(size);
        }
        let pool = builder
            .build(manager)
            .context("failed to build sqlite pool")?;
        let conn = pool.get()?;
        schema::migrate(&conn)?;
        Ok(IncidentStore {
            pool,
            cache: Arc::new(RwLock::new(HashMap::new())),
            leases: lease::LeaseMap::new(),
            cancels: Arc::new(RwLock::new(HashMap::new())),
            ingest_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn leases(&self) -> &lease::LeaseMap {
        &self.leases
    }

    /// Insert a freshly created incident.
    pub fn create_incident(&self, incident: &Incident) -> Result<()> {
        self.upsert(incident, true)
    }

    /// Atomic ingest: the dedup lookup and the insert run under one lock,
    /// so concurrent ingests of the same key cannot both create a row.
    /// Returns the winning incident and whether this call created it.
    pub fn create_or_collapse(
        &self,
        incident: &Incident,
        window: Duration,
    ) -> Result<(Incident, bool)> {
        let _guard = self.ingest_lock.lock().expect("ingest lock poisoned");
        if let Some(existing) = self.find_recent_duplicate(&incident.dedup_key(), window)? {
            return Ok((existing, false));
        }
        self.upsert(incident, true)?;
        Ok((incident.clone(), true))
    }

    /// Persist the current state of an incident (upsert).
    pub fn save_incident(&self, incident: &Incident) -> Result<()> {
        self.upsert(incident, false)
    }

    fn upsert(&self, incident: &Incident, create: bool) -> Result<()> {
        let report_json =
            serde_json::to_string(incident).context("failed to encode incident report")?;
        let conn = self.pool.get()?;
        let sql = if create {
            "INSERT INTO incidents (
                incident_id, correlation_id, status, incident_type, severity,
                summary, dedup_key, created_at, updated_at, report_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
        } else {
            "INSERT INTO incidents (
                incident_id, correlation_id, status, incident_type, severity,
                summary, dedup_key, created_at, updated_at, report_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(incident_id) DO UPDATE SET
                status = excluded.status,
                severity = excluded.severity,
                summary = excluded.summary,
                updated_at = excluded.updated_at,
                report_json = excluded.report_json"
        };
        conn.execute(
            sql,
            params![
                incident.incident_id,
                incident.correlation_id,
                incident.status.to_string(),
                incident.incident_type.to_string(),
                incident.severity.to_string(),
                incident.summary,
                incident.dedup_key(),
                incident.created_at.to_rfc3339(),
                incident.updated_at.to_rfc3339(),
                report_json,
            ],
        )
        .context("failed to write incident row")?;

        let mut cache = self.cache.write().expect("incident cache poisoned");
        cache.insert(incident.incident_id.clone(), incident.clone());
        Ok(())
    }

    /// Latest committed view of an incident; cache first, then durable row.
    pub fn get_incident(&self, incident_id: &str) -> Result<Option<Incident>> {
        {
            let cache = self.cache.read().expect("incident cache poisoned");
            if let Some(incident) = cache.get(incident_id) {
                return Ok(Some(incident.clone()));
            }
        }
        let conn = self.pool.get()?;
        let row: Option<String> = conn
            .query_row(
                "SELECT report_json FROM incidents WHERE incident_id = ?1",
                params![incident_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })
            .context("failed to read incident row")?;
        match row {
            Some(json) => {
                let incident: Incident =
                    serde_json::from_str(&json).context("failed to decode incident report")?;
                Ok(Some(incident))
            }
            None => Ok(None),
        }
    }

    /// Summaries ordered by last update, newest first.
    pub fn list_incidents(&self) -> Result<Vec<IncidentSummary>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT report_json FROM incidents ORDER BY updated_at DESC, incident_id DESC",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut summaries = Vec::new();
        for row in rows {
            let incident: Incident = serde_json::from_str(&row?)
                .context("failed to decode incident report")?;
            summaries.push(summarize(&incident));
        }
        Ok(summaries)
    }

    /// Duplicate-creation collapse: the newest incident with the same
    /// dedup key created within the window, if any.
    pub fn find_recent_duplicate(
        &self,
        dedup_key: &str,
        window: Duration,
    ) -> Result<Option<Incident>> {
        let cutoff: DateTime<Utc> = Utc::now()
            - ChronoDuration::from_std(window).unwrap_or_else(|_| ChronoDuration::seconds(120));
        let conn = self.pool.get()?;
        let row: Option<String> = conn
            .query_row(
                "SELECT report_json FROM incidents
                 WHERE dedup_key = ?1 AND created_at >= ?2
                 ORDER BY created_at DESC LIMIT 1",
                params![dedup_key, cutoff.to_rfc3339()],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })
            .context("failed to query dedup window")?;
        match row {
            Some(json) => Ok(Some(
                serde_json::from_str(&json).context("failed to decode incident report")?,
            )),
            None => Ok(None),
        }
    }

    /// Request cancellation of a running pipeline. The flag is observed
    /// between stages, never mid network call.
    pub fn request_cancel(&self, incident_id: &str) {
        let mut cancels = self.cancels.write().expect("cancel map poisoned");
        cancels
            .entry(incident_id.to_string())
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .store(true, Ordering::SeqCst);
    }

    pub fn cancel_requested(&self, incident_id: &str) -> bool {
        let cancels = self.cancels.read().expect("cancel map poisoned");
        cancels
            .get(incident_id)
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn clear_cancel(&self, incident_id: &str) {
        let mut cancels = self.cancels.write().expect("cancel map poisoned");
        cancels.remove(incident_id);
    }
}

fn summarize(incident: &Incident) -> IncidentSummary {
    IncidentSummary {
        incident_id: incident.incident_id.clone(),
        correlation_id: incident.correlation_id.clone(),
        status: incident.status,
        incident_type: incident.incident_type,
        severity: incident.severity,
        summary: incident.summary.clone(),
        created_at: incident.created_at,
        updated_at: incident.updated_at,
        time_to_triage_ms: timing_for(&incident.stage_timings, Stage::Triage),
        time_to_investigate_ms: timing_for(&incident.stage_timings, Stage::Investigate),
        time_to_recommend_ms: timing_for(&incident.stage_timings, Stage::Recommend),
    }
}

fn timing_for(timings: &[StageTiming], stage: Stage) -> Option<u64> {
    timings.iter().find(|t| t.stage == stage).map(|t| t.duration_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Evidence, IncidentStatus, IncidentType, Severity, SourceKind};
    use serde_json::json;

    fn incident(namespace: &str) -> Incident {
        Incident::new(
            IncidentType::Crashloop,
            Severity::High,
            "crashing".into(),
            json!({"labels": {"namespace": namespace}}),
            "corr-1".into(),
        )
    }

    #[test]
    fn round_trips_an_incident() {
        let store = IncidentStore::open_in_memory().unwrap();
        let original = incident("ns-a");
        store.create_incident(&original).unwrap();

        let loaded = store.get_incident(&original.incident_id).unwrap().unwrap();
        assert_eq!(loaded.incident_id, original.incident_id);
        assert_eq!(loaded.status, IncidentStatus::Received);
        assert!(store.get_incident("missing").unwrap().is_none());
    }

    #[test]
    fn save_grows_the_record_never_shrinks_it() {
        let store = IncidentStore::open_in_memory().unwrap();
        let mut rec = incident("ns-a");
        store.create_incident(&rec).unwrap();

        rec.evidence.push(Evidence::warning(SourceKind::KubernetesPods, "restarts=3"));
        store.save_incident(&rec).unwrap();
        let first = store.get_incident(&rec.incident_id).unwrap().unwrap();

        rec.evidence.push(Evidence::info(SourceKind::Logs, "log tail"));
        store.save_incident(&rec).unwrap();
        let second = store.get_incident(&rec.incident_id).unwrap().unwrap();

        assert!(second.evidence.len() >= first.evidence.len());
        assert_eq!(second.evidence.len(), 2);
    }

    #[test]
    fn list_orders_by_update_time_descending() {
        let store = IncidentStore::open_in_memory().unwrap();
        let mut a = incident("ns-a");
        a.updated_at = Utc::now() - ChronoDuration::seconds(60);
        a.created_at = a.updated_at;
        let b = incident("ns-b");
        store.create_incident(&a).unwrap();
        store.create_incident(&b).unwrap();

        let listed = store.list_incidents().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].incident_id, b.incident_id);
    }

    #[test]
    fn dedup_finds_recent_same_key_only() {
        let store = IncidentStore::open_in_memory().unwrap();
        let a = incident("ns-a");
        store.create_incident(&a).unwrap();

        let hit = store
            .find_recent_duplicate(&a.dedup_key(), Duration::from_secs(120))
            .unwrap();
        assert_eq!(hit.unwrap().incident_id, a.incident_id);

        let other = incident("ns-b");
        let miss = store
            .find_recent_duplicate(&other.dedup_key(), Duration::from_secs(120))
            .unwrap();
        assert!(miss.is_none());
    }

    #[test]
    fn concurrent_ingest_of_same_key_creates_one_row() {
        let store = IncidentStore::open_in_memory().unwrap();
        let barrier = Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let candidate = incident("ns-a");
                    barrier.wait();
                    store
                        .create_or_collapse(&candidate, Duration::from_secs(120))
                        .unwrap()
                })
            })
            .collect();

        let results: Vec<(Incident, bool)> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        let created = results.iter().filter(|(_, created)| *created).count();
        assert_eq!(created, 1, "exactly one ingest may win the dedup race");

        let winner = &results.iter().find(|(_, created)| *created).unwrap().0;
        for (incident, _) in &results {
            assert_eq!(incident.incident_id, winner.incident_id);
        }
        assert_eq!(store.list_incidents().unwrap().len(), 1);
    }

    #[test]
    fn dedup_window_expires() {
        let store = IncidentStore::open_in_memory().unwrap();
        let mut old = incident("ns-a");
        old.created_at = Utc::now() - ChronoDuration::seconds(600);
        old.updated_at = old.created_at;
        store.create_incident(&old).unwrap();

        let hit = store
            .find_recent_duplicate(&old.dedup_key(), Duration::from_secs(120))
            .unwrap();
        assert!(hit.is_none());
    }

    #[test]
    fn cancel_flags_are_per_incident() {
        let store = IncidentStore::open_in_memory().unwrap();
        assert!(!store.cancel_requested("inc-1"));
        store.request_cancel("inc-1");
        assert!(store.cancel_requested("inc-1"));
        assert!(!store.cancel_requested("inc-2"));
        store.clear_cancel("inc-1");
        assert!(!store.cancel_requested("inc-1"));
    }
}
