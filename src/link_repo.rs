use std::{fmt, sync::Arc};

use anyhow::Context;
use async_trait::async_trait;
use rearch::CapsuleHandle;
use sea_orm::{
    ActiveValue::{NotSet, Set},
    ColumnTrait, DbConn, DbErr, EntityTrait, QueryFilter,
    sea_query::OnConflict,
};
use time::OffsetDateTime;
use tracing::{debug, instrument};

use crate::{config::db_conn_capsule, orm::short_url};

pub fn link_repository_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn LinkRepository> {
    new_link_repository(get.as_ref(db_conn_capsule).clone())
}

pub(crate) fn new_link_repository(db: DbConn) -> Arc<dyn LinkRepository> {
    Arc::new(LinkRepositoryImpl { db })
}

/// Fixed-length token identifying a [`Link`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShortToken(String);

impl ShortToken {
    pub const LEN: usize = 7;

    /// Derives the token of `original_url` from a truncated BLAKE3 digest.
    ///
    /// Identical URLs always map to the same token. Different URLs may collide,
    /// and nothing here tries to detect or resolve that.
    #[must_use]
    pub fn derive(original_url: &str) -> Self {
        const BYTES_TO_TAKE: usize = 5;

        let hash = blake3::hash(original_url.as_bytes());
        let mut base62_buf = [0; 16];
        base62_buf[..BYTES_TO_TAKE].copy_from_slice(&hash.as_bytes()[..BYTES_TO_TAKE]);
        let encoded = base62::encode(u128::from_le_bytes(base62_buf));

        // NOTE: '0' is the zero digit of the base62 alphabet, so padding keeps the value
        Self(format!("{encoded:0>width$}", width = Self::LEN))
    }

    pub(crate) const fn from_stored(token: String) -> Self {
        Self(token)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ShortToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Link {
    pub original_url: String,
    pub short_token: ShortToken,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl Link {
    /// A link is still live at exactly `expires_at`; it expires strictly after.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now > self.expires_at
    }
}

impl From<short_url::Model> for Link {
    fn from(
        short_url::Model {
            original_url,
            short_url,
            creation_time,
            expiration_time,
            ..
        }: short_url::Model,
    ) -> Self {
        Self {
            original_url,
            short_token: ShortToken::from_stored(short_url),
            created_at: creation_time,
            expires_at: expiration_time,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyExists,
}

#[async_trait]
pub trait LinkRepository: Send + Sync {
    async fn find_link(&self, token: &str) -> anyhow::Result<Option<Link>>;

    /// Inserts `link` unless its token is already taken, then returns the [`Link`]
    /// stored under that token. An existing link is never overwritten.
    async fn insert_link_if_absent(&self, link: Link) -> anyhow::Result<(Link, InsertOutcome)>;
}

struct LinkRepositoryImpl {
    db: DbConn,
}

#[async_trait]
impl LinkRepository for LinkRepositoryImpl {
    #[instrument(skip(self))]
    async fn find_link(&self, token: &str) -> anyhow::Result<Option<Link>> {
        let model = short_url::Entity::find()
            .filter(short_url::Column::ShortUrl.eq(token))
            .one(&self.db)
            .await
            .context("Failed to look up link by short token")?;
        Ok(model.map(Link::from))
    }

    #[instrument(skip(self))]
    async fn insert_link_if_absent(&self, link: Link) -> anyhow::Result<(Link, InsertOutcome)> {
        let to_insert = short_url::ActiveModel {
            id: NotSet,
            original_url: Set(link.original_url),
            short_url: Set(link.short_token.as_str().to_owned()),
            creation_time: Set(link.created_at),
            expiration_time: Set(link.expires_at),
        };

        // NOTE: the unique constraint on short_url arbitrates concurrent inserts
        let rows_inserted = match short_url::Entity::insert(to_insert)
            .on_conflict(
                OnConflict::column(short_url::Column::ShortUrl)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await
        {
            Ok(rows_inserted) => rows_inserted,
            Err(DbErr::RecordNotInserted) => 0,
            Err(err) => return Err(err).context("Failed to insert link"),
        };

        let outcome = if rows_inserted == 0 {
            debug!(token = %link.short_token, "Short token already taken; keeping stored link");
            InsertOutcome::AlreadyExists
        } else {
            InsertOutcome::Inserted
        };

        let stored = self
            .find_link(link.short_token.as_str())
            .await?
            .with_context(|| format!("Link {} missing right after insert", link.short_token))?;
        Ok((stored, outcome))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use time::{Duration, macros::datetime};

    use crate::test_support::sqlite_memory_db;

    use super::*;

    fn new_link(original_url: &str, token: &str, created_at: OffsetDateTime) -> Link {
        Link {
            original_url: original_url.to_owned(),
            short_token: ShortToken::from_stored(token.to_owned()),
            created_at,
            expires_at: created_at + Duration::hours(24),
        }
    }

    async fn new_repo() -> LinkRepositoryImpl {
        LinkRepositoryImpl {
            db: sqlite_memory_db().await,
        }
    }

    #[test]
    fn test_derive_is_deterministic() {
        let first = ShortToken::derive("https://example.com");
        let second = ShortToken::derive("https://example.com");
        assert_eq!(first, second);
    }

    #[test]
    fn test_derive_has_fixed_length_and_base62_chars() {
        for url in ["https://example.com", "", "a", "https://example.com/a/b?c=d#e"] {
            let token = ShortToken::derive(url);
            assert_eq!(token.as_str().len(), ShortToken::LEN);
            assert!(token.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn test_derive_differs_for_different_urls() {
        assert_ne!(
            ShortToken::derive("https://example.com/a"),
            ShortToken::derive("https://example.com/b")
        );
    }

    #[test]
    fn test_is_expired_at_boundary() {
        let link = new_link("https://example.com", "abc", datetime!(2026-01-01 00:00 UTC));
        assert!(!link.is_expired_at(link.created_at));
        assert!(!link.is_expired_at(link.expires_at));
        assert!(link.is_expired_at(link.expires_at + Duration::nanoseconds(1)));
    }

    #[tokio::test]
    async fn test_find_link_missing() {
        let repo = new_repo().await;
        assert_eq!(repo.find_link("zzzzzz").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_insert_then_find() {
        let repo = new_repo().await;
        let link = new_link("https://example.com", "abc1234", datetime!(2026-01-01 00:00 UTC));

        let (stored, outcome) = repo.insert_link_if_absent(link.clone()).await.unwrap();
        assert_eq!(outcome, InsertOutcome::Inserted);
        assert_eq!(stored, link);
        assert_eq!(repo.find_link("abc1234").await.unwrap(), Some(link));
    }

    #[tokio::test]
    async fn test_insert_duplicate_keeps_first() {
        let repo = new_repo().await;
        let first = new_link("https://example.com", "abc1234", datetime!(2026-01-01 00:00 UTC));
        let mut second = new_link("https://example.com", "abc1234", datetime!(2026-02-01 00:00 UTC));
        second.expires_at = second.created_at + Duration::hours(1);

        repo.insert_link_if_absent(first.clone()).await.unwrap();
        let (stored, outcome) = repo.insert_link_if_absent(second).await.unwrap();

        assert_eq!(outcome, InsertOutcome::AlreadyExists);
        assert_eq!(stored, first);
    }

    #[tokio::test]
    async fn test_insert_colliding_token_does_not_overwrite() {
        let repo = new_repo().await;
        let original = new_link("https://a.example", "collide", datetime!(2026-01-01 00:00 UTC));
        let intruder = new_link("https://b.example", "collide", datetime!(2026-01-02 00:00 UTC));

        repo.insert_link_if_absent(original.clone()).await.unwrap();
        let (stored, outcome) = repo.insert_link_if_absent(intruder).await.unwrap();

        assert_eq!(outcome, InsertOutcome::AlreadyExists);
        assert_eq!(stored.original_url, "https://a.example");
        assert_eq!(repo.find_link("collide").await.unwrap(), Some(original));
    }

    #[tokio::test]
    async fn test_concurrent_inserts_create_one_row() {
        let repo = new_repo().await;
        let link = new_link("https://example.com", "abc1234", datetime!(2026-01-01 00:00 UTC));

        let (a, b) = tokio::join!(
            repo.insert_link_if_absent(link.clone()),
            repo.insert_link_if_absent(link.clone()),
        );
        let mut outcomes = [a.unwrap().1, b.unwrap().1];
        outcomes.sort_by_key(|outcome| *outcome == InsertOutcome::AlreadyExists);

        assert_eq!(
            outcomes,
            [InsertOutcome::Inserted, InsertOutcome::AlreadyExists]
        );
        let rows = short_url::Entity::find().all(&repo.db).await.unwrap();
        assert_eq!(rows.len(), 1);
    }
}
