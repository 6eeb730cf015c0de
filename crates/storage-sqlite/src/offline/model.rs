//! Database models for the offline cache tables.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Queryable, Identifiable, Insertable, Selectable, Debug, Clone, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::user_profiles)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct UserProfileDB {
    pub id: String,
    pub data: String,
    pub updated_at: i64,
}

#[derive(Queryable, Identifiable, Insertable, Selectable, Debug, Clone, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::matches)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct MatchDB {
    pub id: String,
    pub data: String,
    pub updated_at: i64,
}

#[derive(Queryable, Identifiable, Insertable, Selectable, Debug, Clone, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::events)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EventDB {
    pub id: String,
    pub data: String,
    pub updated_at: i64,
}

#[derive(Queryable, Identifiable, Insertable, Selectable, Debug, Clone, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::messages)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct MessageDB {
    pub id: String,
    pub match_id: String,
    pub sender_id: String,
    pub data: String,
    pub is_sent: i32,
    pub created_at: i64,
    pub seq: i64,
    pub sent_at: Option<i64>,
    pub remote_id: Option<String>,
    pub attempt_count: i32,
    pub last_error: Option<String>,
}

#[derive(Queryable, Identifiable, Insertable, Selectable, Debug, Clone, Serialize, Deserialize)]
#[diesel(primary_key(entity_type))]
#[diesel(table_name = crate::schema::sync_status)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SyncStatusDB {
    pub entity_type: String,
    pub last_sync: i64,
}

/// Columns shared by the three record caches.
pub(crate) trait CacheRowDB {
    fn into_parts(self) -> (String, String, i64);
}

macro_rules! impl_cache_row {
    ($($row:ty),+) => {
        $(impl CacheRowDB for $row {
            fn into_parts(self) -> (String, String, i64) {
                (self.id, self.data, self.updated_at)
            }
        })+
    };
}

impl_cache_row!(UserProfileDB, MatchDB, EventDB);
