use crate::domain::commitment::LearningCommitment;
use crate::domain::identity::{CommitmentId, RequestId};
use crate::domain::ports::{CasOutcome, CommitmentStore, Document, DocumentStore, SessionStore};
use crate::domain::session::Session;
use crate::domain::teaching_request::TeachingRequest;
use crate::error::{EngineError, EntityKind, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, ErrorKind, IteratorMode,
    OptimisticTransactionDB, Options, Transaction,
};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Column Family for teaching requests.
pub const CF_REQUESTS: &str = "teaching_requests";
/// Column Family for learning commitments.
pub const CF_COMMITMENTS: &str = "learning_commitments";
/// Column Family for sessions.
pub const CF_SESSIONS: &str = "sessions";
/// Index of commitments that are not settled yet, keyed by commitment id.
pub const CF_UNSETTLED_COMMITMENTS: &str = "unsettled_commitments";
/// Index of sessions keyed by commitment id followed by session id.
pub const CF_SESSIONS_BY_COMMITMENT: &str = "sessions_by_commitment";
/// Index of sessions awaiting attendance, keyed by earliest deadline then session id.
pub const CF_AWAITING_ATTENDANCE: &str = "sessions_awaiting_attendance";

const COLUMN_FAMILIES: [&str; 6] = [
    CF_REQUESTS,
    CF_COMMITMENTS,
    CF_SESSIONS,
    CF_UNSETTLED_COMMITMENTS,
    CF_SESSIONS_BY_COMMITMENT,
    CF_AWAITING_ATTENDANCE,
];

fn column_family(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::TeachingRequest => CF_REQUESTS,
        EntityKind::LearningCommitment => CF_COMMITMENTS,
        EntityKind::Session => CF_SESSIONS,
    }
}

fn internal(message: String) -> EngineError {
    EngineError::InternalError(Box::new(std::io::Error::other(message)))
}

impl From<rocksdb::Error> for EngineError {
    fn from(e: rocksdb::Error) -> Self {
        EngineError::InternalError(Box::new(e))
    }
}

fn key_of<I: Into<Uuid>>(id: I) -> [u8; 16] {
    *id.into().as_bytes()
}

/// Big-endian milliseconds, so keys sort by time. Instants before the epoch sort first.
fn time_key(at: DateTime<Utc>) -> [u8; 8] {
    u64::try_from(at.timestamp_millis())
        .unwrap_or(0)
        .to_be_bytes()
}

/// One secondary index key of a document and whether it should exist.
pub struct IndexEntry {
    pub cf: &'static str,
    pub key: Vec<u8>,
    pub present: bool,
}

/// Documents whose secondary index keys are written in the same transaction
/// as the document. Index keys never change over a document's lifetime; only
/// their presence does.
pub trait IndexedDocument: Document {
    fn index_entries(&self) -> Vec<IndexEntry>;
}

impl IndexedDocument for TeachingRequest {
    fn index_entries(&self) -> Vec<IndexEntry> {
        Vec::new()
    }
}

impl IndexedDocument for LearningCommitment {
    fn index_entries(&self) -> Vec<IndexEntry> {
        vec![IndexEntry {
            cf: CF_UNSETTLED_COMMITMENTS,
            key: key_of(self.id).to_vec(),
            present: !self.settled,
        }]
    }
}

impl IndexedDocument for Session {
    fn index_entries(&self) -> Vec<IndexEntry> {
        let id = key_of(self.id);
        vec![
            IndexEntry {
                cf: CF_SESSIONS_BY_COMMITMENT,
                key: [&key_of(self.learning_commitment_id)[..], &id[..]].concat(),
                present: true,
            },
            IndexEntry {
                cf: CF_AWAITING_ATTENDANCE,
                key: [&time_key(self.attendance_window.earliest())[..], &id[..]].concat(),
                present: self.status.awaits_attendance() && !self.is_deleted,
            },
        ]
    }
}

/// A persistent store implementation using RocksDB.
///
/// Each entity kind lives in its own Column Family, keyed by the UUID bytes of
/// its id and stored as JSON. Compare-and-swap runs inside an optimistic
/// transaction, so two processes sharing the database cannot both win. The
/// sweeper's queries read index Column Families maintained in that same
/// transaction instead of scanning every document.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<OptimisticTransactionDB>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the document and index column families exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();

        let db: OptimisticTransactionDB =
            OptimisticTransactionDB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| internal(format!("Column family {name} not found")))
    }

    fn handle(&self, kind: EntityKind) -> Result<&ColumnFamily> {
        self.cf(column_family(kind))
    }

    fn decode<T: Document>(bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes)
            .map_err(|e| internal(format!("Failed to deserialize {}: {}", T::KIND, e)))
    }

    fn fetch<T: Document>(&self, key: &[u8]) -> Result<Option<T>> {
        let cf = self.handle(T::KIND)?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: Document>(&self, keep: impl Fn(&T) -> bool) -> Result<Vec<T>> {
        let cf = self.handle(T::KIND)?;
        let mut documents = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            let doc: T = Self::decode(&value)?;
            if keep(&doc) {
                documents.push(doc);
            }
        }
        Ok(documents)
    }

    /// Walks an index from `from` while `within` holds for the index key and
    /// loads the documents whose ids end each key.
    fn indexed<T: Document>(
        &self,
        index: &str,
        from: &[u8],
        within: impl Fn(&[u8]) -> bool,
    ) -> Result<Vec<T>> {
        let cf = self.cf(index)?;
        let mut documents = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(from, Direction::Forward))
        {
            let (key, _) = item?;
            if !within(&key[..]) {
                break;
            }
            let id = &key[key.len().saturating_sub(16)..];
            if let Some(doc) = self.fetch(id)? {
                documents.push(doc);
            }
        }
        Ok(documents)
    }

    fn write_indexes<T: IndexedDocument>(
        &self,
        txn: &Transaction<'_, OptimisticTransactionDB>,
        doc: &T,
    ) -> Result<()> {
        for entry in doc.index_entries() {
            let cf = self.cf(entry.cf)?;
            if entry.present {
                txn.put_cf(cf, &entry.key, b"")?;
            } else {
                txn.delete_cf(cf, &entry.key)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<T: IndexedDocument> DocumentStore<T> for RocksDBStore {
    async fn insert(&self, doc: T) -> Result<()> {
        let cf = self.handle(T::KIND)?;
        let key = key_of(doc.id());
        let value = serde_json::to_vec(&doc)?;

        let txn = self.db.transaction();
        if txn.get_for_update_cf(cf, key, true)?.is_some() {
            return Err(EngineError::ValidationError(format!(
                "{} {} already exists",
                T::KIND,
                doc.id()
            )));
        }
        txn.put_cf(cf, key, value)?;
        self.write_indexes(&txn, &doc)?;
        txn.commit()?;
        Ok(())
    }

    async fn get(&self, id: T::Id) -> Result<Option<T>> {
        self.fetch(&key_of(id))
    }

    async fn compare_and_swap(&self, mut doc: T, expected_revision: u64) -> Result<CasOutcome<T>> {
        let cf = self.handle(T::KIND)?;
        let key = key_of(doc.id());

        let txn = self.db.transaction();
        let current: T = match txn.get_for_update_cf(cf, key, true)? {
            Some(bytes) => Self::decode(&bytes)?,
            None => return Err(EngineError::not_found(T::KIND, doc.id())),
        };
        if current.revision() != expected_revision {
            return Ok(CasOutcome::Conflict(current));
        }

        doc.set_revision(expected_revision + 1);
        txn.put_cf(cf, key, serde_json::to_vec(&doc)?)?;
        self.write_indexes(&txn, &doc)?;
        match txn.commit() {
            Ok(()) => Ok(CasOutcome::Applied(doc)),
            // Another writer committed between our read and our commit.
            Err(e) if e.kind() == ErrorKind::Busy || e.kind() == ErrorKind::TryAgain => {
                match self.fetch(&key)? {
                    Some(current) => Ok(CasOutcome::Conflict(current)),
                    None => Err(EngineError::not_found(T::KIND, doc.id())),
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CommitmentStore for RocksDBStore {
    async fn find_by_request(&self, request_id: RequestId) -> Result<Option<LearningCommitment>> {
        Ok(self
            .scan::<LearningCommitment>(|c| c.teaching_request_id == request_id)?
            .into_iter()
            .next())
    }

    async fn get_all(&self) -> Result<Vec<LearningCommitment>> {
        let mut all = self.scan::<LearningCommitment>(|_| true)?;
        all.sort_by_key(|c| (c.created_at, c.id));
        Ok(all)
    }

    async fn get_unsettled(&self) -> Result<Vec<LearningCommitment>> {
        let mut unsettled = self
            .indexed::<LearningCommitment>(CF_UNSETTLED_COMMITMENTS, &[], |_| true)?
            .into_iter()
            .filter(|c| !c.settled)
            .collect::<Vec<_>>();
        unsettled.sort_by_key(|c| (c.created_at, c.id));
        Ok(unsettled)
    }
}

#[async_trait]
impl SessionStore for RocksDBStore {
    async fn for_commitment(&self, commitment_id: CommitmentId) -> Result<Vec<Session>> {
        let prefix = key_of(commitment_id);
        let mut sessions = self
            .indexed::<Session>(CF_SESSIONS_BY_COMMITMENT, &prefix, |key| {
                key.starts_with(&prefix)
            })?;
        sessions.sort_by_key(|s| (s.start_time, s.id));
        Ok(sessions)
    }

    async fn due_for_sweep(&self, now: DateTime<Utc>) -> Result<Vec<Session>> {
        let cutoff = time_key(now);
        let mut sessions = self
            .indexed::<Session>(CF_AWAITING_ATTENDANCE, &[], |key| key[..8] <= cutoff[..])?
            .into_iter()
            .filter(|s| {
                s.status.awaits_attendance()
                    && !s.is_deleted
                    && s.attendance_window.earliest() < now
            })
            .collect::<Vec<_>>();
        sessions.sort_by_key(|s| (s.attendance_window.earliest(), s.id));
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::identity::{Party, SessionId};
    use crate::domain::session::NewSession;
    use chrono::{Duration, TimeZone};
    use tempfile::tempdir;

    fn session() -> Session {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap();
        Session::new(
            NewSession {
                id: SessionId::new(),
                learning_commitment_id: CommitmentId::new(),
                start_time: start,
                end_time: start + Duration::hours(1),
                is_trial: true,
            },
            Party::Tutor,
            Duration::minutes(30),
            start - Duration::days(1),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).expect("Failed to open RocksDB");

        assert!(store.db.cf_handle(CF_REQUESTS).is_some());
        assert!(store.db.cf_handle(CF_COMMITMENTS).is_some());
        assert!(store.db.cf_handle(CF_SESSIONS).is_some());
        assert!(store.db.cf_handle(CF_AWAITING_ATTENDANCE).is_some());
    }

    #[tokio::test]
    async fn test_rocksdb_session_cas() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        let s = session();

        DocumentStore::<Session>::insert(&store, s.clone()).await.unwrap();
        let retrieved = DocumentStore::<Session>::get(&store, s.id).await.unwrap().unwrap();
        assert_eq!(retrieved, s);

        let outcome = store.compare_and_swap(s.clone(), 0).await.unwrap();
        assert!(matches!(outcome, CasOutcome::Applied(ref doc) if doc.revision == 1));

        let stale = store.compare_and_swap(s.clone(), 0).await.unwrap();
        assert!(matches!(stale, CasOutcome::Conflict(ref doc) if doc.revision == 1));

        assert_eq!(store.for_commitment(s.learning_commitment_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rocksdb_indexes_follow_document_writes() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        let s = session();
        let other = session();
        DocumentStore::<Session>::insert(&store, s.clone()).await.unwrap();
        DocumentStore::<Session>::insert(&store, other.clone()).await.unwrap();

        let mine = store.for_commitment(s.learning_commitment_id).await.unwrap();
        assert_eq!(mine.iter().map(|d| d.id).collect::<Vec<_>>(), vec![s.id]);

        let before_deadline = Utc.with_ymd_and_hms(2026, 3, 2, 11, 0, 0).unwrap();
        assert!(store.due_for_sweep(before_deadline).await.unwrap().is_empty());
        let noon = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        assert_eq!(store.due_for_sweep(noon).await.unwrap().len(), 2);

        let mut swept = s.clone();
        swept.sweep(noon);
        store.compare_and_swap(swept, 0).await.unwrap();
        let due = store.due_for_sweep(noon).await.unwrap();
        assert_eq!(due.iter().map(|d| d.id).collect::<Vec<_>>(), vec![other.id]);
    }
}
