use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use rearch::CapsuleHandle;
use sea_orm::{
    ActiveModelTrait,
    ActiveValue::{NotSet, Set},
    ColumnTrait, DbConn, EntityTrait, QueryFilter, QueryOrder,
};
use time::OffsetDateTime;
use tracing::instrument;

use crate::{config::db_conn_capsule, orm::analytics};

pub fn access_log_repository_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn AccessLogRepository> {
    new_access_log_repository(get.as_ref(db_conn_capsule).clone())
}

pub(crate) fn new_access_log_repository(db: DbConn) -> Arc<dyn AccessLogRepository> {
    Arc::new(AccessLogRepositoryImpl { db })
}

/// One successful redirect through a short token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessLogEntry {
    pub short_token: String,
    pub accessed_at: OffsetDateTime,
    pub requester_address: String,
}

impl From<analytics::Model> for AccessLogEntry {
    fn from(
        analytics::Model {
            short_url,
            access_time,
            ip_address,
            ..
        }: analytics::Model,
    ) -> Self {
        Self {
            short_token: short_url,
            accessed_at: access_time,
            requester_address: ip_address,
        }
    }
}

#[async_trait]
pub trait AccessLogRepository: Send + Sync {
    /// Appends `entry`; entries are never updated or deduplicated.
    async fn append_entry(&self, entry: AccessLogEntry) -> anyhow::Result<()>;

    /// Lists every entry for `token` in the order they were appended.
    async fn list_entries(&self, token: &str) -> anyhow::Result<Vec<AccessLogEntry>>;
}

struct AccessLogRepositoryImpl {
    db: DbConn,
}

#[async_trait]
impl AccessLogRepository for AccessLogRepositoryImpl {
    #[instrument(skip(self))]
    async fn append_entry(&self, entry: AccessLogEntry) -> anyhow::Result<()> {
        let to_insert = analytics::ActiveModel {
            id: NotSet,
            short_url: Set(entry.short_token),
            access_time: Set(entry.accessed_at),
            ip_address: Set(entry.requester_address),
        };
        to_insert
            .insert(&self.db)
            .await
            .context("Failed to append access log entry")?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_entries(&self, token: &str) -> anyhow::Result<Vec<AccessLogEntry>> {
        let models = analytics::Entity::find()
            .filter(analytics::Column::ShortUrl.eq(token))
            // NOTE: SQLite keeps access_time as text, which does not sort chronologically
            .order_by_asc(analytics::Column::Id)
            .all(&self.db)
            .await
            .context("Failed to list access log entries")?;
        Ok(models.into_iter().map(AccessLogEntry::from).collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use time::{Duration, macros::datetime};

    use crate::test_support::sqlite_memory_db;

    use super::*;

    fn new_entry(token: &str, accessed_at: OffsetDateTime, address: &str) -> AccessLogEntry {
        AccessLogEntry {
            short_token: token.to_owned(),
            accessed_at,
            requester_address: address.to_owned(),
        }
    }

    async fn new_repo() -> AccessLogRepositoryImpl {
        AccessLogRepositoryImpl {
            db: sqlite_memory_db().await,
        }
    }

    #[tokio::test]
    async fn test_list_entries_empty() {
        let repo = new_repo().await;
        assert!(repo.list_entries("abc1234").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_entries_filters_by_token_in_append_order() {
        let repo = new_repo().await;
        let first = new_entry("abc1234", datetime!(2026-01-01 08:00 UTC), "10.0.0.1");
        let other = new_entry("other00", datetime!(2026-01-01 09:00 UTC), "10.0.0.3");
        let second = new_entry("abc1234", datetime!(2026-01-01 12:00 UTC), "10.0.0.2");

        repo.append_entry(first.clone()).await.unwrap();
        repo.append_entry(other).await.unwrap();
        repo.append_entry(second.clone()).await.unwrap();

        assert_eq!(
            repo.list_entries("abc1234").await.unwrap(),
            vec![first, second]
        );
    }

    #[tokio::test]
    async fn test_list_entries_keeps_order_within_one_second() {
        let repo = new_repo().await;
        let start = datetime!(2026-01-01 12:00 UTC);
        let entries: Vec<_> = [0, 100, 150]
            .into_iter()
            .enumerate()
            .map(|(i, millis)| {
                new_entry(
                    "abc1234",
                    start + Duration::milliseconds(millis),
                    &format!("10.0.0.{i}"),
                )
            })
            .collect();

        for entry in &entries {
            repo.append_entry(entry.clone()).await.unwrap();
        }

        let listed = repo.list_entries("abc1234").await.unwrap();
        let addresses: Vec<_> = listed
            .iter()
            .map(|entry| entry.requester_address.as_str())
            .collect();
        assert_eq!(addresses, ["10.0.0.0", "10.0.0.1", "10.0.0.2"]);
        assert_eq!(listed, entries);
    }

    #[tokio::test]
    async fn test_append_entry_never_deduplicates() {
        let repo = new_repo().await;
        let entry = new_entry("abc1234", datetime!(2026-01-01 12:00 UTC), "10.0.0.1");

        repo.append_entry(entry.clone()).await.unwrap();
        repo.append_entry(entry.clone()).await.unwrap();

        assert_eq!(
            repo.list_entries("abc1234").await.unwrap(),
            vec![entry.clone(), entry]
        );
    }
}
