use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use rearch::CapsuleHandle;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::{debug, instrument};
use url::Url;

use crate::{
    access_log_repo::{AccessLogEntry, AccessLogRepository, access_log_repository_capsule},
    clock::{Clock, clock_capsule},
    config::{default_expiry_hours_capsule, public_base_url_capsule},
    link_repo::{InsertOutcome, Link, LinkRepository, ShortToken, link_repository_capsule},
};

pub fn link_registry_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn LinkRegistry> {
    let link_repo = Arc::clone(get.as_ref(link_repository_capsule));
    let access_log_repo = Arc::clone(get.as_ref(access_log_repository_capsule));
    let clock = Arc::clone(get.as_ref(clock_capsule));
    let public_base_url = get.as_ref(public_base_url_capsule).clone();
    let default_expiry_hours = *get.as_ref(default_expiry_hours_capsule);
    Arc::new(LinkRegistryImpl {
        link_repo,
        access_log_repo,
        clock,
        public_base_url,
        default_expiry_hours,
    })
}

#[derive(Debug)]
pub struct CreatedLink {
    /// The link as stored, which is the earlier one when the token already existed.
    pub link: Link,
    pub short_url: Url,
    pub outcome: InsertOutcome,
}

#[derive(Debug, PartialEq, Eq)]
pub struct LinkAnalytics {
    pub original_url: String,
    pub entries: Vec<AccessLogEntry>,
}

#[async_trait]
pub trait LinkRegistry: Send + Sync {
    /// Shortens `original_url`, expiring it `expiry_hours` from now
    /// (or the configured default when [`None`]).
    async fn create(
        &self,
        original_url: &str,
        expiry_hours: Option<f64>,
    ) -> Result<CreatedLink, CreateLinkError>;

    /// Looks up a live link. Recording the access is up to the caller.
    async fn resolve(&self, short_token: &str) -> Result<Link, ResolveLinkError>;

    async fn get_analytics(&self, short_token: &str) -> Result<LinkAnalytics, AnalyticsError>;
}

#[derive(Debug, Error)]
pub enum CreateLinkError {
    #[error("original URL is required")]
    MissingUrl,
    #[error("expiry_hours must be a positive number of hours within range, got {0}")]
    InvalidExpiryHours(f64),
    #[error("internal/database error: {0}")]
    Internal(anyhow::Error), // NOTE: no #[from] so we have to be explicit
}

#[derive(Debug, Error)]
pub enum ResolveLinkError {
    #[error("short URL not found")]
    NotFound,
    #[error("short URL expired at {expired_at}")]
    Expired { expired_at: OffsetDateTime },
    #[error("internal/database error: {0}")]
    Internal(anyhow::Error),
}

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("short URL not found")]
    NotFound,
    #[error("internal/database error: {0}")]
    Internal(anyhow::Error),
}

struct LinkRegistryImpl {
    link_repo: Arc<dyn LinkRepository>,
    access_log_repo: Arc<dyn AccessLogRepository>,
    clock: Arc<dyn Clock>,
    public_base_url: Url,
    default_expiry_hours: f64,
}

#[async_trait]
impl LinkRegistry for LinkRegistryImpl {
    #[instrument(skip(self))]
    async fn create(
        &self,
        original_url: &str,
        expiry_hours: Option<f64>,
    ) -> Result<CreatedLink, CreateLinkError> {
        if original_url.trim().is_empty() {
            return Err(CreateLinkError::MissingUrl);
        }

        let created_at = self.clock.now();
        let expires_at =
            expiry_after(created_at, expiry_hours.unwrap_or(self.default_expiry_hours))?;

        let (link, outcome) = self
            .link_repo
            .insert_link_if_absent(Link {
                original_url: original_url.to_owned(),
                short_token: ShortToken::derive(original_url),
                created_at,
                expires_at,
            })
            .await
            .map_err(CreateLinkError::Internal)?;

        if outcome == InsertOutcome::AlreadyExists && link.original_url != original_url {
            debug!(
                token = %link.short_token,
                stored_url = %link.original_url,
                "Short token collides with a different URL; keeping stored link"
            );
        }

        let short_url = self
            .public_base_url
            .join(link.short_token.as_str())
            .context("Failed to build short URL")
            .map_err(CreateLinkError::Internal)?;

        Ok(CreatedLink {
            link,
            short_url,
            outcome,
        })
    }

    #[instrument(skip(self))]
    async fn resolve(&self, short_token: &str) -> Result<Link, ResolveLinkError> {
        let link = self
            .link_repo
            .find_link(short_token)
            .await
            .map_err(ResolveLinkError::Internal)?
            .ok_or(ResolveLinkError::NotFound)?;

        if link.is_expired_at(self.clock.now()) {
            return Err(ResolveLinkError::Expired {
                expired_at: link.expires_at,
            });
        }
        Ok(link)
    }

    #[instrument(skip(self))]
    async fn get_analytics(&self, short_token: &str) -> Result<LinkAnalytics, AnalyticsError> {
        // NOTE: link existence gates visibility, even when log entries exist
        let link = self
            .link_repo
            .find_link(short_token)
            .await
            .map_err(AnalyticsError::Internal)?
            .ok_or(AnalyticsError::NotFound)?;

        let entries = self
            .access_log_repo
            .list_entries(short_token)
            .await
            .map_err(AnalyticsError::Internal)?;

        Ok(LinkAnalytics {
            original_url: link.original_url,
            entries,
        })
    }
}

/// Computes `created_at + expiry_hours`, which must land strictly after `created_at`.
fn expiry_after(
    created_at: OffsetDateTime,
    expiry_hours: f64,
) -> Result<OffsetDateTime, CreateLinkError> {
    const SECONDS_PER_HOUR: f64 = 3600.0;

    if !expiry_hours.is_finite() || expiry_hours <= 0.0 {
        return Err(CreateLinkError::InvalidExpiryHours(expiry_hours));
    }

    Duration::checked_seconds_f64(expiry_hours * SECONDS_PER_HOUR)
        .and_then(|expires_in| created_at.checked_add(expires_in))
        .filter(|expires_at| *expires_at > created_at)
        .ok_or(CreateLinkError::InvalidExpiryHours(expiry_hours))
}
