//! Disguised-segment repair.
//!
//! Some hosts serve MPEG-TS or fMP4 segments under image extensions to
//! slip past content filters. Repair decides whether such a playlist
//! is really media: encrypted playlists are taken at their word (the
//! bytes cannot be probed), otherwise a bounded sample of segments is
//! byte-probed for media magic numbers, with extension substitution as
//! a second chance before disguised lines are filtered out.

use reqwest::Client;
use std::collections::HashMap;
use tracing::{debug, warn};
use url::Url;

use crate::headers::ForwardHeaders;

use super::types::{has_non_media_extension, MediaPlaylist};
use super::{PlaylistError, ResolverConfig};

/// Result of byte-probing a single candidate URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// First bytes carry a known media signature.
    Media,
    /// Bytes were fetched and are not media.
    NotMedia,
    /// The sample could not be fetched; nothing was proven.
    Unavailable,
}

/// Check the leading bytes of a resource for media magic numbers:
/// MPEG-TS sync byte, or an ISO-BMFF box type at offset 4.
pub fn looks_like_media(bytes: &[u8]) -> bool {
    if bytes.first() == Some(&0x47) {
        return true;
    }
    if bytes.len() >= 8 {
        matches!(&bytes[4..8], b"ftyp" | b"moof" | b"styp" | b"sidx" | b"mdat")
    } else {
        false
    }
}

/// Repair `playlist` in place, setting its image-permission flags or
/// rewriting/filtering disguised segment lines.
pub(crate) async fn repair(
    playlist: &mut MediaPlaylist,
    client: &Client,
    headers: &ForwardHeaders,
    config: &ResolverConfig,
) -> Result<(), PlaylistError> {
    let disguised: Vec<(usize, Url)> = playlist
        .disguised_segments()
        .iter()
        .map(|s| (s.line_index, s.url.clone()))
        .collect();
    if disguised.is_empty() {
        return Ok(());
    }

    // Encrypted or init-mapped content cannot be probed; the disguise
    // is assumed intentional and the bytes opaque.
    if playlist.encrypted || !playlist.maps.is_empty() {
        debug!(url = %playlist.url, "Encrypted playlist with image extensions, allowing as opaque");
        playlist.allow_image_segments = true;
        playlist.opaque_image_segments = true;
        return Ok(());
    }

    // Bounded sample of distinct candidates, all sharing the extension
    // of the first disguised segment.
    let original_ext = extension_of(disguised[0].1.path()).unwrap_or_default();
    let mut sample: Vec<Url> = Vec::new();
    for (_, url) in &disguised {
        if sample.len() >= config.probe_sample {
            break;
        }
        if extension_of(url.path()).as_deref() == Some(original_ext.as_str())
            && !sample.contains(url)
        {
            sample.push(url.clone());
        }
    }

    let outcomes = probe_all(client, headers, &sample).await;
    if outcomes.iter().all(|o| *o == ProbeOutcome::Media) {
        debug!(
            url = %playlist.url,
            sampled = sample.len(),
            "Image-extension segments probed as media"
        );
        playlist.allow_image_segments = true;
        return Ok(());
    }

    if outcomes.contains(&ProbeOutcome::NotMedia) {
        // Definitive negatives: try serving the same paths under a
        // different extension before giving up on these lines.
        for fallback in &config.fallback_extensions {
            if *fallback == original_ext {
                continue;
            }
            let substituted: Vec<Url> = sample
                .iter()
                .filter_map(|u| substitute_url_extension(u, &original_ext, fallback))
                .collect();
            if substituted.len() != sample.len() {
                continue;
            }
            let outcomes = probe_all(client, headers, &substituted).await;
            if !outcomes.is_empty() && outcomes.iter().all(|o| *o == ProbeOutcome::Media) {
                debug!(
                    url = %playlist.url,
                    from = %original_ext,
                    to = %fallback,
                    "Extension substitution probed positive"
                );
                apply_substitution(playlist, &original_ext, fallback)?;
                return Ok(());
            }
        }

        warn!(
            url = %playlist.url,
            disguised = disguised.len(),
            "Filtering non-media segment lines out of playlist"
        );
        return filter_disguised(playlist);
    }

    // Probes were inconclusive (unreachable sample); defer rejection to
    // content-type enforcement at fetch time.
    debug!(url = %playlist.url, "Segment probe inconclusive, allowing permissively");
    playlist.allow_image_segments = true;
    Ok(())
}

async fn probe_all(client: &Client, headers: &ForwardHeaders, urls: &[Url]) -> Vec<ProbeOutcome> {
    let mut outcomes = Vec::with_capacity(urls.len());
    for url in urls {
        outcomes.push(probe_url(client, headers, url).await);
    }
    outcomes
}

/// Range-fetch the first 16 bytes of `url` and classify them.
async fn probe_url(client: &Client, headers: &ForwardHeaders, url: &Url) -> ProbeOutcome {
    let req = headers.apply(client.get(url.clone()).header("Range", "bytes=0-15"));
    let resp = match req.send().await {
        Ok(resp) if resp.status().is_success() => resp,
        Ok(resp) => {
            debug!(url = %url, status = %resp.status(), "Probe request rejected");
            return ProbeOutcome::Unavailable;
        }
        Err(e) => {
            debug!(url = %url, error = %e, "Probe request failed");
            return ProbeOutcome::Unavailable;
        }
    };

    match resp.bytes().await {
        Ok(bytes) if looks_like_media(&bytes) => ProbeOutcome::Media,
        Ok(_) => ProbeOutcome::NotMedia,
        Err(_) => ProbeOutcome::Unavailable,
    }
}

/// Rewrite every segment line sharing `from` to carry `to` instead,
/// then reclassify the manifest.
pub(crate) fn apply_substitution(
    playlist: &mut MediaPlaylist,
    from: &str,
    to: &str,
) -> Result<(), PlaylistError> {
    let mut replace: HashMap<usize, String> = HashMap::new();
    for seg in &playlist.segments {
        if extension_of(seg.url.path()).as_deref() == Some(from) {
            let line = &playlist.lines[seg.line_index];
            replace.insert(seg.line_index, substitute_extension(line, from, to));
        }
    }
    let rendered = playlist.render(&replace, &[]);
    reparse_preserving_flags(playlist, &rendered)
}

/// Drop every still-disguised segment line along with its paired
/// `#EXTINF`, failing when nothing playable remains.
pub(crate) fn filter_disguised(playlist: &mut MediaPlaylist) -> Result<(), PlaylistError> {
    let mut drop: Vec<usize> = Vec::new();
    for seg in &playlist.segments {
        if !has_non_media_extension(seg.url.path()) {
            continue;
        }
        drop.push(seg.line_index);
        // The EXTINF immediately above belongs to this segment.
        for i in (0..seg.line_index).rev() {
            let line = playlist.lines[i].trim();
            if line.starts_with("#EXTINF") {
                drop.push(i);
                break;
            }
            if !line.starts_with('#') && !line.is_empty() {
                break;
            }
        }
    }

    let rendered = playlist.render(&HashMap::new(), &drop);
    reparse_preserving_flags(playlist, &rendered)?;
    if playlist.segments.is_empty() {
        return Err(PlaylistError::NoPlayableMedia);
    }
    Ok(())
}

fn reparse_preserving_flags(playlist: &mut MediaPlaylist, body: &str) -> Result<(), PlaylistError> {
    let allow = playlist.allow_image_segments;
    let opaque = playlist.opaque_image_segments;
    *playlist = MediaPlaylist::parse(playlist.url.clone(), body)?;
    playlist.allow_image_segments = allow;
    playlist.opaque_image_segments = opaque;
    Ok(())
}

/// Extension (with dot, lowercased) of a path, if any.
fn extension_of(path: &str) -> Option<String> {
    let dot = path.rfind('.')?;
    if path[dot + 1..].contains('/') || path.len() - dot > 6 {
        return None;
    }
    Some(path[dot..].to_lowercase())
}

/// Replace a trailing `from` extension with `to`, leaving any query
/// string in place.
fn substitute_extension(value: &str, from: &str, to: &str) -> String {
    let (path, query) = match value.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (value, None),
    };
    let lower = path.to_lowercase();
    let new_path = if lower.ends_with(from) {
        format!("{}{}", &path[..path.len() - from.len()], to)
    } else {
        path.to_string()
    };
    match query {
        Some(q) => format!("{}?{}", new_path, q),
        None => new_path,
    }
}

fn substitute_url_extension(url: &Url, from: &str, to: &str) -> Option<Url> {
    let substituted = substitute_extension(url.as_str(), from, to);
    Url::parse(&substituted).ok()
}
