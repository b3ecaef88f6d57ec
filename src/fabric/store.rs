//! Durable fabric store backed by `rusqlite` (spec 4.2).
//!
//! Five tables (`phase_states`, `contracts`, `file_claims`, `discoveries`,
//! `pulses`) created with `CREATE TABLE IF NOT EXISTS` on open, mirroring the
//! factory database's migration-on-init pattern. WAL journaling plus a
//! `Mutex<Connection>` give single-writer-many-reader semantics that survive
//! a crash mid-write without corruption.

use super::types::{
    Contract, ContractKind, ContractStatus, Discovery, DiscoveryKind, FabricSnapshot, FileClaim,
    PhaseStatus, Pulse, PulseKind,
};
use crate::errors::QuasarError;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Mutex;

pub struct FabricStore {
    conn: Mutex<Connection>,
}

impl FabricStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("opening fabric store at {}", path.display()))?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init(conn: &Connection) -> Result<()> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS phase_states (
                id    TEXT PRIMARY KEY,
                state TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS contracts (
                producer  TEXT NOT NULL,
                kind      TEXT NOT NULL,
                name      TEXT NOT NULL,
                signature TEXT NOT NULL,
                pkg       TEXT NOT NULL,
                status    TEXT NOT NULL,
                PRIMARY KEY (producer, kind, name)
            );
            CREATE TABLE IF NOT EXISTS file_claims (
                path       TEXT PRIMARY KEY,
                owner      TEXT NOT NULL,
                claimed_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS discoveries (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                kind       TEXT NOT NULL,
                detail     TEXT NOT NULL,
                source     TEXT NOT NULL,
                resolved   INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS pulses (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                kind       TEXT NOT NULL,
                detail     TEXT NOT NULL,
                source     TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_discoveries_resolved ON discoveries(resolved);
            CREATE INDEX IF NOT EXISTS idx_claims_owner ON file_claims(owner);
            CREATE INDEX IF NOT EXISTS idx_contracts_producer ON contracts(producer);
            "#,
        )?;
        Ok(())
    }

    // -- phase states --------------------------------------------------

    pub fn set_phase_state(&self, id: &str, state: PhaseStatus) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO phase_states (id, state) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET state = excluded.state",
            params![id, state.as_str()],
        )?;
        Ok(())
    }

    pub fn get_phase_state(&self, id: &str) -> Result<Option<PhaseStatus>> {
        let conn = self.conn.lock().unwrap();
        let state: Option<String> = conn
            .query_row(
                "SELECT state FROM phase_states WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(state.and_then(|s| PhaseStatus::parse(&s)))
    }

    pub fn all_phase_states(&self) -> Result<std::collections::HashMap<String, PhaseStatus>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id, state FROM phase_states")?;
        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            let state: String = row.get(1)?;
            Ok((id, state))
        })?;
        let mut out = std::collections::HashMap::new();
        for row in rows {
            let (id, state) = row?;
            if let Some(s) = PhaseStatus::parse(&state) {
                out.insert(id, s);
            }
        }
        Ok(out)
    }

    // -- contracts -------------------------------------------------------

    pub fn publish_contract(&self, c: &Contract) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        Self::upsert_contract(&conn, c)
    }

    pub fn publish_contracts(&self, batch: &[Contract]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for c in batch {
            Self::upsert_contract(&tx, c)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn upsert_contract(conn: &Connection, c: &Contract) -> Result<()> {
        conn.execute(
            "INSERT INTO contracts (producer, kind, name, signature, pkg, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(producer, kind, name) DO UPDATE SET
                signature = excluded.signature,
                pkg = excluded.pkg,
                status = excluded.status",
            params![
                c.producer,
                c.kind.as_str(),
                c.name,
                c.signature,
                c.package,
                c.status.as_str()
            ],
        )?;
        Ok(())
    }

    pub fn contracts_for(&self, producer: &str) -> Result<Vec<Contract>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT producer, kind, name, signature, pkg, status FROM contracts WHERE producer = ?1",
        )?;
        let rows = stmt.query_map(params![producer], Self::row_to_contract)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map(|v| v.into_iter().flatten().collect())
            .context("reading contracts")
    }

    pub fn all_contracts(&self) -> Result<Vec<Contract>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT producer, kind, name, signature, pkg, status FROM contracts")?;
        let rows = stmt.query_map([], Self::row_to_contract)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map(|v| v.into_iter().flatten().collect())
            .context("reading contracts")
    }

    fn row_to_contract(row: &rusqlite::Row) -> rusqlite::Result<Option<Contract>> {
        let kind: String = row.get(1)?;
        let status: String = row.get(5)?;
        Ok(match (ContractKind::parse(&kind), ContractStatus::parse(&status)) {
            (Some(kind), Some(status)) => Some(Contract {
                producer: row.get(0)?,
                kind,
                name: row.get(2)?,
                signature: row.get(3)?,
                package: row.get(4)?,
                status,
            }),
            _ => None,
        })
    }

    // -- file claims -----------------------------------------------------

    pub fn claim_file(&self, path: &str, owner: &str) -> Result<(), QuasarError> {
        let conn = self.conn.lock().unwrap();
        let existing: Option<String> = conn
            .query_row(
                "SELECT owner FROM file_claims WHERE path = ?1",
                params![path],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| QuasarError::UnhealableError {
                phase_id: owner.to_string(),
                message: e.to_string(),
            })?;

        if let Some(existing_owner) = existing
            && existing_owner != owner
        {
            return Err(QuasarError::ClaimHeld {
                path: path.to_string(),
                owner: existing_owner,
            });
        }

        conn.execute(
            "INSERT INTO file_claims (path, owner, claimed_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(path) DO UPDATE SET owner = excluded.owner, claimed_at = excluded.claimed_at",
            params![path, owner, Utc::now().to_rfc3339()],
        )
        .map_err(|e| QuasarError::UnhealableError {
            phase_id: owner.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    pub fn release_claims(&self, owner: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM file_claims WHERE owner = ?1", params![owner])?;
        Ok(())
    }

    pub fn release_file_claim(&self, path: &str, owner: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM file_claims WHERE path = ?1 AND owner = ?2",
            params![path, owner],
        )?;
        Ok(())
    }

    pub fn file_owner(&self, path: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT owner FROM file_claims WHERE path = ?1",
                params![path],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn claims_for(&self, owner: &str) -> Result<Vec<FileClaim>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT path, owner, claimed_at FROM file_claims WHERE owner = ?1")?;
        let rows = stmt.query_map(params![owner], Self::row_to_claim)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map(|v| v.into_iter().flatten().collect())
            .context("reading claims")
    }

    pub fn all_claims(&self) -> Result<Vec<FileClaim>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT path, owner, claimed_at FROM file_claims")?;
        let rows = stmt.query_map([], Self::row_to_claim)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map(|v| v.into_iter().flatten().collect())
            .context("reading claims")
    }

    fn row_to_claim(row: &rusqlite::Row) -> rusqlite::Result<Option<FileClaim>> {
        let claimed_at: String = row.get(2)?;
        let Ok(claimed_at) = DateTime::parse_from_rfc3339(&claimed_at) else {
            return Ok(None);
        };
        Ok(Some(FileClaim {
            path: row.get(0)?,
            owner: row.get(1)?,
            claimed_at: claimed_at.with_timezone(&Utc),
        }))
    }

    // -- discoveries -------------------------------------------------------

    pub fn post_discovery(
        &self,
        kind: DiscoveryKind,
        detail: &str,
        source_phase_id: &str,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO discoveries (kind, detail, source, resolved, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![kind.as_str(), detail, source_phase_id, Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn resolve_discovery(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE discoveries SET resolved = 1 WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    pub fn unresolved_discoveries(&self) -> Result<Vec<Discovery>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, kind, detail, source, resolved, created_at FROM discoveries WHERE resolved = 0",
        )?;
        let rows = stmt.query_map([], Self::row_to_discovery)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map(|v| v.into_iter().flatten().collect())
            .context("reading discoveries")
    }

    fn row_to_discovery(row: &rusqlite::Row) -> rusqlite::Result<Option<Discovery>> {
        let kind: String = row.get(1)?;
        let created_at: String = row.get(5)?;
        let (Some(kind), Ok(created_at)) =
            (DiscoveryKind::parse(&kind), DateTime::parse_from_rfc3339(&created_at))
        else {
            return Ok(None);
        };
        let resolved: i64 = row.get(4)?;
        Ok(Some(Discovery {
            id: row.get(0)?,
            kind,
            detail: row.get(2)?,
            source_phase_id: row.get(3)?,
            resolved: resolved != 0,
            created_at: created_at.with_timezone(&Utc),
        }))
    }

    // -- pulses -------------------------------------------------------

    pub fn emit_pulse(&self, kind: PulseKind, detail: &str, source_phase_id: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO pulses (kind, detail, source, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![kind.as_str(), detail, source_phase_id, Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn all_pulses(&self) -> Result<Vec<Pulse>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id, kind, detail, source, created_at FROM pulses")?;
        let rows = stmt.query_map([], |row| {
            let kind: String = row.get(1)?;
            let created_at: String = row.get(4)?;
            Ok((
                row.get::<_, i64>(0)?,
                kind,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                created_at,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, kind, detail, source, created_at) = row?;
            if let (Some(kind), Ok(created_at)) =
                (PulseKind::parse(&kind), DateTime::parse_from_rfc3339(&created_at))
            {
                out.push(Pulse {
                    id,
                    kind,
                    detail,
                    source_phase_id: source,
                    created_at: created_at.with_timezone(&Utc),
                });
            }
        }
        Ok(out)
    }

    /// A consistent read of every table, handed to the Tycho poller so an
    /// admission decision never observes a partial write.
    pub fn snapshot(&self) -> Result<FabricSnapshot> {
        Ok(FabricSnapshot {
            phase_states: self.all_phase_states()?,
            contracts: self.all_contracts()?,
            claims: self.all_claims()?,
            unresolved_discoveries: self.unresolved_discoveries()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> FabricStore {
        FabricStore::open_in_memory().unwrap()
    }

    #[test]
    fn phase_state_roundtrip() {
        let s = store();
        s.set_phase_state("p1", PhaseStatus::Running).unwrap();
        assert_eq!(s.get_phase_state("p1").unwrap(), Some(PhaseStatus::Running));
        s.set_phase_state("p1", PhaseStatus::Done).unwrap();
        assert_eq!(s.get_phase_state("p1").unwrap(), Some(PhaseStatus::Done));
        assert_eq!(s.get_phase_state("missing").unwrap(), None);
    }

    #[test]
    fn contract_upsert_unique_key() {
        let s = store();
        let c = Contract {
            producer: "p1".into(),
            kind: ContractKind::Function,
            name: "foo".into(),
            signature: "fn foo()".into(),
            package: "pkg".into(),
            status: ContractStatus::Fulfilled,
        };
        s.publish_contract(&c).unwrap();
        let mut c2 = c.clone();
        c2.signature = "fn foo() -> i32".into();
        s.publish_contract(&c2).unwrap();
        let all = s.all_contracts().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].signature, "fn foo() -> i32");
    }

    #[test]
    fn claim_file_conflict() {
        let s = store();
        s.claim_file("a.rs", "p1").unwrap();
        let err = s.claim_file("a.rs", "p2").unwrap_err();
        assert!(matches!(err, QuasarError::ClaimHeld { .. }));
        // same owner re-claiming is fine
        s.claim_file("a.rs", "p1").unwrap();
    }

    #[test]
    fn release_claims_for_owner() {
        let s = store();
        s.claim_file("a.rs", "p1").unwrap();
        s.claim_file("b.rs", "p1").unwrap();
        s.release_claims("p1").unwrap();
        assert!(s.claims_for("p1").unwrap().is_empty());
    }

    #[test]
    fn discovery_lifecycle() {
        let s = store();
        let id = s
            .post_discovery(DiscoveryKind::FileConflict, "conflict on a.rs", "p1")
            .unwrap();
        assert_eq!(s.unresolved_discoveries().unwrap().len(), 1);
        s.resolve_discovery(id).unwrap();
        assert!(s.unresolved_discoveries().unwrap().is_empty());
    }

    #[test]
    fn pulse_emit_and_list() {
        let s = store();
        s.emit_pulse(PulseKind::Decision, "picked approach A", "p1")
            .unwrap();
        assert_eq!(s.all_pulses().unwrap().len(), 1);
    }

    #[test]
    fn snapshot_is_consistent_view() {
        let s = store();
        s.set_phase_state("p1", PhaseStatus::Running).unwrap();
        s.claim_file("a.rs", "p1").unwrap();
        let snap = s.snapshot().unwrap();
        assert_eq!(snap.phase_states.get("p1"), Some(&PhaseStatus::Running));
        assert_eq!(snap.claims.len(), 1);
    }
}
