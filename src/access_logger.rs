use std::sync::Arc;

use async_trait::async_trait;
use rearch::CapsuleHandle;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::instrument;

use crate::access_log_repo::{AccessLogEntry, AccessLogRepository, access_log_repository_capsule};

pub fn access_logger_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn AccessLogger> {
    new_access_logger(Arc::clone(get.as_ref(access_log_repository_capsule)))
}

pub(crate) fn new_access_logger(
    access_log_repo: Arc<dyn AccessLogRepository>,
) -> Arc<dyn AccessLogger> {
    Arc::new(AccessLoggerImpl { access_log_repo })
}

/// Records successful redirects. Callers invoke [`AccessLogger::record`] once per
/// successful resolve, and never for missing or expired links.
#[async_trait]
pub trait AccessLogger: Send + Sync {
    async fn record(
        &self,
        short_token: &str,
        accessed_at: OffsetDateTime,
        requester_address: &str,
    ) -> Result<(), RecordAccessError>;
}

#[derive(Debug, Error)]
pub enum RecordAccessError {
    #[error("short token is empty")]
    EmptyToken,
    #[error("internal/database error: {0}")]
    Internal(anyhow::Error),
}

struct AccessLoggerImpl {
    access_log_repo: Arc<dyn AccessLogRepository>,
}

#[async_trait]
impl AccessLogger for AccessLoggerImpl {
    #[instrument(skip(self))]
    async fn record(
        &self,
        short_token: &str,
        accessed_at: OffsetDateTime,
        requester_address: &str,
    ) -> Result<(), RecordAccessError> {
        if short_token.is_empty() {
            return Err(RecordAccessError::EmptyToken);
        }

        self.access_log_repo
            .append_entry(AccessLogEntry {
                short_token: short_token.to_owned(),
                accessed_at,
                requester_address: requester_address.to_owned(),
            })
            .await
            .map_err(RecordAccessError::Internal)
    }
}
