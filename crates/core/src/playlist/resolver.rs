//! Master playlist walking and media playlist selection.

use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Client;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::headers::ForwardHeaders;

use super::repair::repair;
use super::types::MediaPlaylist;
use super::{PlaylistError, ResolverConfig};

/// Resolves a manifest URL to the best playable media playlist.
pub struct PlaylistResolver {
    client: Client,
    config: ResolverConfig,
}

impl PlaylistResolver {
    pub fn new(config: ResolverConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");
        Self { client, config }
    }

    /// Use an externally built client (shared connection pool).
    pub fn with_client(client: Client, config: ResolverConfig) -> Self {
        Self { client, config }
    }

    /// Fetch and resolve `url`, following master playlists down to a
    /// media playlist and running disguised-segment repair on it.
    pub async fn resolve(
        &self,
        url: &Url,
        headers: &ForwardHeaders,
    ) -> Result<MediaPlaylist, PlaylistError> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut fallback: Option<MediaPlaylist> = None;

        let chosen = self
            .resolve_inner(url.clone(), headers, 0, &mut visited, &mut fallback)
            .await?;

        let mut playlist = match chosen.or(fallback) {
            Some(playlist) => playlist,
            None => return Err(PlaylistError::NoPlayableMedia),
        };

        repair(&mut playlist, &self.client, headers, &self.config).await?;
        Ok(playlist)
    }

    /// Walk one playlist URL. Returns a likely-playable media playlist,
    /// or `None` after recording the first parseable candidate in
    /// `fallback`.
    fn resolve_inner<'a>(
        &'a self,
        url: Url,
        headers: &'a ForwardHeaders,
        depth: usize,
        visited: &'a mut HashSet<String>,
        fallback: &'a mut Option<MediaPlaylist>,
    ) -> BoxFuture<'a, Result<Option<MediaPlaylist>, PlaylistError>> {
        async move {
            visited.insert(url.to_string());
            let body = self.fetch_text(&url, headers).await?;

            if MediaPlaylist::is_master(&body) {
                if depth >= self.config.max_depth {
                    warn!(url = %url, depth, "Master playlist recursion cap reached");
                    return Ok(None);
                }

                let mut variants = MediaPlaylist::parse_variants(&url, &body);
                variants.sort_by(|a, b| b.bandwidth.cmp(&a.bandwidth));
                debug!(url = %url, variants = variants.len(), "Following master playlist");

                for variant in variants {
                    if visited.contains(variant.url.as_str()) {
                        continue;
                    }
                    match self
                        .resolve_inner(variant.url.clone(), headers, depth + 1, visited, fallback)
                        .await
                    {
                        Ok(Some(playlist)) => return Ok(Some(playlist)),
                        Ok(None) => {}
                        Err(e) => {
                            debug!(url = %variant.url, error = %e, "Variant fetch failed, trying next");
                        }
                    }
                }
                return Ok(None);
            }

            let playlist = MediaPlaylist::parse(url, &body)?;
            if playlist.likely_playable() {
                return Ok(Some(playlist));
            }
            if fallback.is_none() {
                *fallback = Some(playlist);
            }
            Ok(None)
        }
        .boxed()
    }

    async fn fetch_text(&self, url: &Url, headers: &ForwardHeaders) -> Result<String, PlaylistError> {
        let resp = headers.apply(self.client.get(url.clone())).send().await?;
        if !resp.status().is_success() {
            return Err(PlaylistError::Fetch {
                status: resp.status().as_u16(),
                url: url.to_string(),
            });
        }
        Ok(resp.text().await?)
    }
}
