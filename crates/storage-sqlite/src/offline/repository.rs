//! Repository for the offline cache: record caches, message outbox and sync ledger.

use async_trait::async_trait;
use diesel::dsl::max;
use diesel::prelude::*;
use diesel::r2d2::{self, Pool};
use diesel::result::DatabaseErrorKind;
use diesel::sqlite::SqliteConnection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use plaasjapie_core::cache::{CacheListing, CachedRecord, CorruptRow, OutboxListing};
use plaasjapie_core::clock::{Clock, SystemClock};
use plaasjapie_core::errors::{Error, Result};
use plaasjapie_core::ports::LocalStore;
use plaasjapie_core::records::{EventRecord, MatchRecord, MessagePayload, ProfileRecord};
use plaasjapie_core::sync::{
    NewOutboxMessage, OutboxMessage, SyncEntityType, SyncLedgerEntry, UpsertPolicy,
};

use crate::db::{self, get_connection, write_actor::spawn_writer, WriteHandle};
use crate::errors::StorageError;
use crate::schema::{events, matches, messages, sync_status, user_profiles};

use super::model::{CacheRowDB, EventDB, MatchDB, MessageDB, SyncStatusDB, UserProfileDB};

#[derive(Debug, Clone, Copy)]
enum CacheTable {
    Profiles,
    Matches,
    Events,
}

impl CacheTable {
    fn label(&self) -> &'static str {
        match self {
            CacheTable::Profiles => "user_profiles",
            CacheTable::Matches => "matches",
            CacheTable::Events => "events",
        }
    }
}

fn existing_updated_at(
    conn: &mut SqliteConnection,
    table: CacheTable,
    id_value: &str,
) -> Result<Option<i64>> {
    let stamp = match table {
        CacheTable::Profiles => user_profiles::table
            .find(id_value)
            .select(user_profiles::updated_at)
            .first::<i64>(conn)
            .optional(),
        CacheTable::Matches => matches::table
            .find(id_value)
            .select(matches::updated_at)
            .first::<i64>(conn)
            .optional(),
        CacheTable::Events => events::table
            .find(id_value)
            .select(events::updated_at)
            .first::<i64>(conn)
            .optional(),
    };
    Ok(stamp.map_err(StorageError::from)?)
}

fn write_cache_row(
    conn: &mut SqliteConnection,
    table: CacheTable,
    id_value: String,
    data_value: String,
    stamp: i64,
) -> Result<()> {
    let written = match table {
        CacheTable::Profiles => diesel::insert_into(user_profiles::table)
            .values(&UserProfileDB {
                id: id_value,
                data: data_value.clone(),
                updated_at: stamp,
            })
            .on_conflict(user_profiles::id)
            .do_update()
            .set((
                user_profiles::data.eq(data_value),
                user_profiles::updated_at.eq(stamp),
            ))
            .execute(conn),
        CacheTable::Matches => diesel::insert_into(matches::table)
            .values(&MatchDB {
                id: id_value,
                data: data_value.clone(),
                updated_at: stamp,
            })
            .on_conflict(matches::id)
            .do_update()
            .set((matches::data.eq(data_value), matches::updated_at.eq(stamp)))
            .execute(conn),
        CacheTable::Events => diesel::insert_into(events::table)
            .values(&EventDB {
                id: id_value,
                data: data_value.clone(),
                updated_at: stamp,
            })
            .on_conflict(events::id)
            .do_update()
            .set((events::data.eq(data_value), events::updated_at.eq(stamp)))
            .execute(conn),
    };
    written.map_err(StorageError::from)?;
    Ok(())
}

fn decode_listing<T, R>(table: CacheTable, rows: Vec<R>) -> CacheListing<T>
where
    T: DeserializeOwned,
    R: CacheRowDB,
{
    let mut listing = CacheListing::default();
    for row in rows {
        let (id, data, updated_at) = row.into_parts();
        match serde_json::from_str::<T>(&data) {
            Ok(record) => listing.records.push(CachedRecord {
                id,
                record,
                updated_at,
            }),
            Err(e) => {
                log::warn!(
                    "[OfflineCache] Skipping corrupt {} row '{}': {}",
                    table.label(),
                    id,
                    e
                );
                listing.corrupt_rows.push(CorruptRow {
                    id,
                    reason: e.to_string(),
                });
            }
        }
    }
    listing
}

fn to_outbox_message(row: MessageDB) -> Result<OutboxMessage> {
    let payload: MessagePayload = serde_json::from_str(&row.data)?;
    Ok(OutboxMessage {
        id: row.id,
        match_id: row.match_id,
        sender_id: row.sender_id,
        payload,
        sent: row.is_sent != 0,
        created_at: row.created_at,
        sent_at: row.sent_at,
        remote_id: row.remote_id,
        attempt_count: row.attempt_count,
        last_error: row.last_error,
    })
}

fn validate_new_message(message: &NewOutboxMessage) -> Result<()> {
    if message.id.trim().is_empty() {
        return Err(Error::invalid_record("Outbox message id must not be empty"));
    }
    if message.match_id.trim().is_empty() || message.sender_id.trim().is_empty() {
        return Err(Error::invalid_record(format!(
            "Outbox message '{}' requires match and sender ids",
            message.id
        )));
    }
    message.payload.validate()
}

/// SQLite-backed [`LocalStore`].
pub struct OfflineCacheRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
    writer: WriteHandle,
    clock: Arc<dyn Clock>,
    policy: UpsertPolicy,
}

impl OfflineCacheRepository {
    pub fn new(
        pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
        writer: WriteHandle,
        clock: Arc<dyn Clock>,
        policy: UpsertPolicy,
    ) -> Self {
        Self {
            pool,
            writer,
            clock,
            policy,
        }
    }

    /// Opens (creating if needed) `plaasjapie.db` inside `app_data_dir`.
    ///
    /// Any failure here is reported as `StorageUnavailable`; call [`LocalStore::initialize`]
    /// before use.
    pub fn open(app_data_dir: &str, policy: UpsertPolicy) -> Result<Self> {
        Self::open_with_clock(app_data_dir, policy, Arc::new(SystemClock))
    }

    pub fn open_with_clock(
        app_data_dir: &str,
        policy: UpsertPolicy,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let db_path = db::init(app_data_dir).map_err(as_unavailable)?;
        let pool = db::create_pool(&db_path).map_err(as_unavailable)?;
        let writer = spawn_writer(pool.as_ref().clone());
        Ok(Self::new(pool, writer, clock, policy))
    }

    pub fn policy(&self) -> UpsertPolicy {
        self.policy
    }

    async fn upsert_record<T>(&self, table: CacheTable, id: &str, record: &T) -> Result<()>
    where
        T: Serialize,
    {
        let data_value = serde_json::to_string(record)?;
        let id_value = id.to_string();
        let stamp = self.clock.now_millis();
        let policy = self.policy;

        self.writer
            .exec(move |conn| {
                if policy != UpsertPolicy::Unconditional {
                    let existing = existing_updated_at(conn, table, &id_value)?;
                    if !policy.should_overwrite(existing, stamp) {
                        log::debug!(
                            "[OfflineCache] Keeping newer {} row '{}' ({:?} >= {})",
                            table.label(),
                            id_value,
                            existing,
                            stamp
                        );
                        return Ok(());
                    }
                }
                write_cache_row(conn, table, id_value, data_value, stamp)
            })
            .await
    }

    /// Inserts an outbox row in one transaction. With `remote_id` the row is stored as already
    /// delivered, so it never becomes visible to a replay.
    async fn insert_message(
        &self,
        message: NewOutboxMessage,
        remote_id: Option<String>,
    ) -> Result<OutboxMessage> {
        validate_new_message(&message)?;
        let data_value = serde_json::to_string(&message.payload)?;
        let created_at_value = self.clock.now_millis();
        let sent_at_value = remote_id.as_ref().map(|_| created_at_value);

        self.writer
            .exec(move |conn| {
                let exists = messages::table
                    .find(&message.id)
                    .select(messages::id)
                    .first::<String>(conn)
                    .optional()
                    .map_err(StorageError::from)?
                    .is_some();
                if exists {
                    return Err(Error::DuplicateMessageId(message.id));
                }

                let last_seq = messages::table
                    .select(max(messages::seq))
                    .first::<Option<i64>>(conn)
                    .map_err(StorageError::from)?;

                let row = MessageDB {
                    id: message.id.clone(),
                    match_id: message.match_id.clone(),
                    sender_id: message.sender_id.clone(),
                    data: data_value,
                    is_sent: i32::from(remote_id.is_some()),
                    created_at: created_at_value,
                    seq: last_seq.unwrap_or(0) + 1,
                    sent_at: sent_at_value,
                    remote_id: remote_id.clone(),
                    attempt_count: 0,
                    last_error: None,
                };

                match diesel::insert_into(messages::table).values(&row).execute(conn) {
                    Ok(_) => {}
                    Err(diesel::result::Error::DatabaseError(
                        DatabaseErrorKind::UniqueViolation,
                        _,
                    )) => return Err(Error::DuplicateMessageId(message.id)),
                    Err(e) => return Err(StorageError::from(e).into()),
                }

                Ok(OutboxMessage {
                    id: message.id,
                    match_id: message.match_id,
                    sender_id: message.sender_id,
                    payload: message.payload,
                    sent: remote_id.is_some(),
                    created_at: created_at_value,
                    sent_at: sent_at_value,
                    remote_id,
                    attempt_count: 0,
                    last_error: None,
                })
            })
            .await
    }
}

fn as_unavailable(err: Error) -> Error {
    match err {
        Error::StorageUnavailable(_) => err,
        other => Error::storage_unavailable(other.to_string()),
    }
}

#[async_trait]
impl LocalStore for OfflineCacheRepository {
    async fn initialize(&self) -> Result<()> {
        {
            let mut pooled = get_connection(&self.pool).map_err(as_unavailable)?;
            db::migrate_connection(&mut pooled).map_err(as_unavailable)?;
        }

        self.writer
            .exec(|conn| {
                for entity in SyncEntityType::ALL {
                    diesel::insert_or_ignore_into(sync_status::table)
                        .values(&SyncStatusDB {
                            entity_type: entity.as_str().to_string(),
                            last_sync: 0,
                        })
                        .execute(conn)
                        .map_err(StorageError::from)?;
                }
                Ok(())
            })
            .await
    }

    async fn upsert_profile(&self, id: &str, mut profile: ProfileRecord) -> Result<()> {
        profile.validate(id)?;
        if profile.id.is_empty() {
            profile.id = id.to_string();
        }
        self.upsert_record(CacheTable::Profiles, id, &profile).await
    }

    async fn upsert_match(&self, id: &str, mut record: MatchRecord) -> Result<()> {
        record.validate(id)?;
        if record.id.is_empty() {
            record.id = id.to_string();
        }
        self.upsert_record(CacheTable::Matches, id, &record).await
    }

    async fn upsert_event(&self, id: &str, mut record: EventRecord) -> Result<()> {
        record.validate(id)?;
        if record.id.is_empty() {
            record.id = id.to_string();
        }
        self.upsert_record(CacheTable::Events, id, &record).await
    }

    fn get_profile(&self, id: &str) -> Result<Option<CachedRecord<ProfileRecord>>> {
        let mut conn = get_connection(&self.pool)?;
        let row = user_profiles::table
            .find(id)
            .first::<UserProfileDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;

        row.map(|row| {
            let record = serde_json::from_str::<ProfileRecord>(&row.data)?;
            Ok(CachedRecord {
                id: row.id,
                record,
                updated_at: row.updated_at,
            })
        })
        .transpose()
    }

    fn list_profiles(&self) -> Result<CacheListing<ProfileRecord>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = user_profiles::table
            .order((user_profiles::updated_at.desc(), user_profiles::id.asc()))
            .load::<UserProfileDB>(&mut conn)
            .map_err(StorageError::from)?;
        Ok(decode_listing(CacheTable::Profiles, rows))
    }

    fn list_matches(&self) -> Result<CacheListing<MatchRecord>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = matches::table
            .order((matches::updated_at.desc(), matches::id.asc()))
            .load::<MatchDB>(&mut conn)
            .map_err(StorageError::from)?;
        Ok(decode_listing(CacheTable::Matches, rows))
    }

    fn list_events(&self) -> Result<CacheListing<EventRecord>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = events::table
            .order((events::updated_at.desc(), events::id.asc()))
            .load::<EventDB>(&mut conn)
            .map_err(StorageError::from)?;
        Ok(decode_listing(CacheTable::Events, rows))
    }

    async fn append_outbox_message(&self, message: NewOutboxMessage) -> Result<OutboxMessage> {
        self.insert_message(message, None).await
    }

    async fn append_sent_message(
        &self,
        message: NewOutboxMessage,
        remote_id: String,
    ) -> Result<OutboxMessage> {
        self.insert_message(message, Some(remote_id)).await
    }

    fn list_unsent_messages(&self) -> Result<OutboxListing> {
        let mut conn = get_connection(&self.pool)?;
        let rows = messages::table
            .filter(messages::is_sent.eq(0))
            .order((messages::created_at.asc(), messages::seq.asc()))
            .load::<MessageDB>(&mut conn)
            .map_err(StorageError::from)?;

        let mut listing = OutboxListing::default();
        for row in rows {
            let id = row.id.clone();
            match to_outbox_message(row) {
                Ok(message) => listing.messages.push(message),
                Err(e) => {
                    log::warn!("[OfflineCache] Unsent message '{}' is unreadable: {}", id, e);
                    listing.corrupt_rows.push(CorruptRow {
                        id,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(listing)
    }

    fn list_conversation_messages(&self, match_id: &str) -> Result<Vec<OutboxMessage>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = messages::table
            .filter(messages::match_id.eq(match_id))
            .order((messages::created_at.asc(), messages::seq.asc()))
            .load::<MessageDB>(&mut conn)
            .map_err(StorageError::from)?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id.clone();
                to_outbox_message(row)
                    .map_err(|e| {
                        log::warn!("[OfflineCache] Skipping unreadable message '{}': {}", id, e)
                    })
                    .ok()
            })
            .collect())
    }

    async fn mark_message_sent(&self, id: &str, remote_id: Option<String>) -> Result<bool> {
        let id_value = id.to_string();
        let sent_at_value = self.clock.now_millis();

        self.writer
            .exec(move |conn| {
                let updated = diesel::update(
                    messages::table
                        .filter(messages::id.eq(&id_value))
                        .filter(messages::is_sent.eq(0)),
                )
                .set((
                    messages::is_sent.eq(1),
                    messages::sent_at.eq(Some(sent_at_value)),
                    messages::remote_id.eq(remote_id),
                    messages::last_error.eq::<Option<String>>(None),
                ))
                .execute(conn)
                .map_err(StorageError::from)?;
                Ok(updated > 0)
            })
            .await
    }

    async fn record_send_failure(&self, id: &str, error: String) -> Result<()> {
        let id_value = id.to_string();
        self.writer
            .exec(move |conn| {
                diesel::update(
                    messages::table
                        .filter(messages::id.eq(&id_value))
                        .filter(messages::is_sent.eq(0)),
                )
                .set((
                    messages::attempt_count.eq(messages::attempt_count + 1),
                    messages::last_error.eq(Some(error)),
                ))
                .execute(conn)
                .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    fn get_ledger_timestamp(&self, entity: SyncEntityType) -> Result<i64> {
        let mut conn = get_connection(&self.pool)?;
        let row = sync_status::table
            .find(entity.as_str())
            .select(sync_status::last_sync)
            .first::<i64>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        Ok(row.unwrap_or(0))
    }

    async fn set_ledger_timestamp(&self, entity: SyncEntityType, value: i64) -> Result<()> {
        self.writer
            .exec(move |conn| {
                let row = SyncStatusDB {
                    entity_type: entity.as_str().to_string(),
                    last_sync: value,
                };
                diesel::insert_into(sync_status::table)
                    .values(&row)
                    .on_conflict(sync_status::entity_type)
                    .do_update()
                    .set(sync_status::last_sync.eq(value))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    fn list_ledger(&self) -> Result<Vec<SyncLedgerEntry>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = sync_status::table
            .load::<SyncStatusDB>(&mut conn)
            .map_err(StorageError::from)?;

        Ok(SyncEntityType::ALL
            .iter()
            .map(|entity| SyncLedgerEntry {
                entity: *entity,
                last_sync_at: rows
                    .iter()
                    .find(|row| row.entity_type == entity.as_str())
                    .map(|row| row.last_sync)
                    .unwrap_or(0),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plaasjapie_core::clock::ManualClock;
    use tempfile::tempdir;

    fn setup(policy: UpsertPolicy) -> (tempfile::TempDir, Arc<ManualClock>, OfflineCacheRepository) {
        let dir = tempdir().expect("tempdir");
        let clock = Arc::new(ManualClock::new(1_000));
        let repo =
            OfflineCacheRepository::open_with_clock(&dir.path().to_string_lossy(), policy, clock.clone())
                .expect("open repository");
        (dir, clock, repo)
    }

    fn corrupt_row(repo: &OfflineCacheRepository, sql: &str) {
        let mut conn = get_connection(&repo.pool).expect("conn");
        diesel::sql_query(sql).execute(&mut conn).expect("raw write");
    }

    #[tokio::test]
    async fn newer_only_keeps_row_with_later_stamp() {
        let (_dir, clock, repo) = setup(UpsertPolicy::NewerOnly);
        repo.initialize().await.expect("initialize");

        let mut first = ProfileRecord::new("user-1");
        first.name = Some("Later".to_string());
        clock.set(2_000);
        repo.upsert_profile("user-1", first).await.expect("upsert t2");

        let mut second = ProfileRecord::new("user-1");
        second.name = Some("Earlier".to_string());
        clock.set(1_500);
        repo.upsert_profile("user-1", second).await.expect("upsert t1");

        let stored = repo.get_profile("user-1").expect("get").expect("row");
        assert_eq!(stored.record.name.as_deref(), Some("Later"));
        assert_eq!(stored.updated_at, 2_000);
    }

    #[tokio::test]
    async fn corrupt_cache_rows_do_not_hide_the_rest() {
        let (_dir, clock, repo) = setup(UpsertPolicy::Unconditional);
        repo.initialize().await.expect("initialize");

        clock.set(5_000);
        repo.upsert_event("event-1", EventRecord::new("event-1"))
            .await
            .expect("upsert");
        corrupt_row(
            &repo,
            "INSERT INTO events (id, data, updated_at) VALUES ('event-2', '{not json', 6000)",
        );

        let listing = repo.list_events().expect("list");
        assert_eq!(listing.ids(), vec!["event-1"]);
        assert_eq!(listing.corrupt_rows.len(), 1);
        assert_eq!(listing.corrupt_rows[0].id, "event-2");
    }

    #[tokio::test]
    async fn corrupt_outbox_row_is_reported_separately() {
        let (_dir, _clock, repo) = setup(UpsertPolicy::Unconditional);
        repo.initialize().await.expect("initialize");

        corrupt_row(
            &repo,
            "INSERT INTO messages (id, match_id, sender_id, data, is_sent, created_at, seq, attempt_count) \
             VALUES ('broken', 'match-1', 'user-1', '[]', 0, 10, 1, 0)",
        );
        repo.append_outbox_message(NewOutboxMessage::new(
            "ok",
            "match-1",
            "user-1",
            MessagePayload::text("hallo"),
        ))
        .await
        .expect("append");

        let unsent = repo.list_unsent_messages().expect("unsent");
        assert!(unsent.contains("ok"));
        assert_eq!(unsent.corrupt_rows.len(), 1);
        assert_eq!(unsent.corrupt_rows[0].id, "broken");
    }

    #[tokio::test]
    async fn send_failures_are_counted_without_marking_sent() {
        let (_dir, _clock, repo) = setup(UpsertPolicy::Unconditional);
        repo.initialize().await.expect("initialize");
        repo.append_outbox_message(NewOutboxMessage::new(
            "m-1",
            "match-1",
            "user-1",
            MessagePayload::text("hallo"),
        ))
        .await
        .expect("append");

        repo.record_send_failure("m-1", "HTTP 503".to_string())
            .await
            .expect("record failure");
        repo.record_send_failure("m-1", "timeout".to_string())
            .await
            .expect("record failure");

        let unsent = repo.list_unsent_messages().expect("unsent");
        assert_eq!(unsent.messages.len(), 1);
        assert_eq!(unsent.messages[0].attempt_count, 2);
        assert_eq!(unsent.messages[0].last_error.as_deref(), Some("timeout"));
        assert!(!unsent.messages[0].sent);
    }

    #[tokio::test]
    async fn append_rejects_invalid_messages() {
        let (_dir, _clock, repo) = setup(UpsertPolicy::Unconditional);
        repo.initialize().await.expect("initialize");

        let err = repo
            .append_outbox_message(NewOutboxMessage::new(
                "m-1",
                "",
                "user-1",
                MessagePayload::text("hallo"),
            ))
            .await
            .expect_err("missing match id");
        assert!(matches!(err, Error::InvalidRecord(_)));

        let err = repo
            .upsert_match("match-1", MatchRecord::new("match-2"))
            .await
            .expect_err("mismatched id");
        assert!(matches!(err, Error::InvalidRecord(_)));
    }
}
