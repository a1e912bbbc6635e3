use anyhow::Context;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;

use crate::link_registry::{CreatedLink, LinkAnalytics};

#[derive(Debug, Deserialize)]
pub struct ShortenPayload {
    pub original_url: Option<String>,
    pub expiry_hours: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ShortenedUrl {
    pub original_url: String,
    pub short_url: String,
    /// Timestamp in ISO-8601 format
    pub expiration_timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Analytics {
    pub original_url: String,
    pub analytics: Vec<Access>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Access {
    /// Timestamp in ISO-8601 format
    pub access_time: String,
    pub ip_address: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Error {
    pub error: String,
    pub error_id: String,
}

impl TryFrom<CreatedLink> for ShortenedUrl {
    type Error = anyhow::Error;

    fn try_from(CreatedLink { link, short_url, .. }: CreatedLink) -> Result<Self, Self::Error> {
        Ok(Self {
            original_url: link.original_url,
            short_url: short_url.into(),
            expiration_timestamp: link
                .expires_at
                .format(&Rfc3339)
                .context("Failed to format expiration timestamp")?,
        })
    }
}

impl TryFrom<LinkAnalytics> for Analytics {
    type Error = anyhow::Error;

    fn try_from(
        LinkAnalytics {
            original_url,
            entries,
        }: LinkAnalytics,
    ) -> Result<Self, Self::Error> {
        let analytics = entries
            .into_iter()
            .map(|entry| -> anyhow::Result<Access> {
                Ok(Access {
                    access_time: entry
                        .accessed_at
                        .format(&Rfc3339)
                        .context("Failed to format access timestamp")?,
                    ip_address: entry.requester_address,
                })
            })
            .collect::<anyhow::Result<_>>()?;
        Ok(Self {
            original_url,
            analytics,
        })
    }
}
