use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::message::message_dto::PartnerProfile;

/// Body of `GET /profile/getname/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileName {
    pub full_name: Option<String>,
    pub avatar: Option<String>,
}

#[async_trait]
pub trait ProfileLookup: Send + Sync + 'static {
    async fn lookup(&self, user_id: &str) -> Result<ProfileName>;
}

/// REST client for the backend's profile endpoint.
#[derive(Clone)]
pub struct ProfileClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ProfileClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url).context("profile API URL is not a valid URL")?;
        if base_url.cannot_be_a_base() {
            bail!("profile API URL cannot carry a path: {}", base_url);
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url })
    }

    /// `{base}/profile/getname/{id}`, with the id as a single encoded segment.
    fn profile_url(&self, user_id: &str) -> Option<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .ok()?
            .pop_if_empty()
            .extend(["profile", "getname", user_id]);
        Some(url)
    }
}

#[async_trait]
impl ProfileLookup for ProfileClient {
    async fn lookup(&self, user_id: &str) -> Result<ProfileName> {
        let failed = |reason: String| AppError::ProfileLookupFailed {
            user_id: user_id.to_string(),
            reason,
        };

        let url = self
            .profile_url(user_id)
            .ok_or_else(|| failed("base URL cannot carry a path".to_string()))?;

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?
            .error_for_status()
            .map_err(|e| failed(e.to_string()))?;

        response
            .json::<ProfileName>()
            .await
            .map_err(|e| failed(e.to_string()))
    }
}

/// Resolves a partner's display profile. Never fails: a lookup error falls
/// back to the raw id as name and no avatar.
pub async fn resolve_partner(
    lookup: &dyn ProfileLookup,
    partner_id: &str,
    media_base_url: &str,
) -> PartnerProfile {
    match lookup.lookup(partner_id).await {
        Ok(profile) => PartnerProfile {
            id: partner_id.to_string(),
            name: profile
                .full_name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| partner_id.to_string()),
            avatar: normalize_media_url(media_base_url, profile.avatar.as_deref()),
        },
        Err(e) => {
            tracing::warn!("Falling back to raw id for partner {}: {}", partner_id, e);
            PartnerProfile {
                id: partner_id.to_string(),
                name: partner_id.to_string(),
                avatar: None,
            }
        }
    }
}

/// Qualifies a relative media path with `base_url`. Values that already
/// carry a URL scheme are returned unchanged; empty values become `None`.
pub fn normalize_media_url(base_url: &str, value: Option<&str>) -> Option<String> {
    let value = value.map(str::trim).filter(|v| !v.is_empty())?;

    if has_url_scheme(value) {
        return Some(value.to_string());
    }

    Some(format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        value.trim_start_matches('/')
    ))
}

fn has_url_scheme(value: &str) -> bool {
    let Some((scheme, _)) = value.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}
