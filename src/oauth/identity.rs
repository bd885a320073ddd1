//! Channel identity lookup used to key stored credentials.

use crate::error::{Error, Result};
use serde::Deserialize;

/// Minimal identity of the authorized account.
#[derive(Clone, Debug, PartialEq)]
pub struct AccountIdentity {
    /// Stable channel id
    pub account_id: String,
    /// Custom URL handle, falling back to the channel title
    pub display_name: Option<String>,
    /// Channel title
    pub label: Option<String>,
}

#[derive(Deserialize)]
struct ChannelListResponse {
    #[serde(default)]
    items: Vec<Channel>,
}

#[derive(Deserialize)]
struct Channel {
    #[serde(default)]
    id: String,
    snippet: Option<ChannelSnippet>,
}

#[derive(Default, Deserialize)]
struct ChannelSnippet {
    title: Option<String>,
    #[serde(rename = "customUrl")]
    custom_url: Option<String>,
}

/// Fetches the authorized user's channel id and display names.
///
/// Returns `Ok(None)` when the provider reports no channel for the
/// account (identity enrichment is then skipped).
pub(crate) async fn fetch_account_identity(
    client: &reqwest::Client,
    api_base_url: &str,
    access_token: &str,
) -> Result<Option<AccountIdentity>> {
    let url = format!(
        "{}/channels?part=snippet&mine=true",
        api_base_url.trim_end_matches('/')
    );

    let response = client.get(&url).bearer_auth(access_token).send().await?;
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read body>".to_string());
        return Err(Error::Upstream { status, body });
    }

    let data: ChannelListResponse = response.json().await?;
    let Some(channel) = data.items.into_iter().next() else {
        return Ok(None);
    };
    if channel.id.is_empty() {
        return Ok(None);
    }

    let snippet = channel.snippet.unwrap_or_default();
    let label = snippet.title.filter(|t| !t.is_empty());
    let display_name = snippet
        .custom_url
        .filter(|u| !u.is_empty())
        .or_else(|| label.clone());

    Ok(Some(AccountIdentity {
        account_id: channel.id,
        display_name,
        label,
    }))
}
