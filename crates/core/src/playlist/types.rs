//! Playlist line classification.
//!
//! Classification is a single immutable pass over the manifest text
//! producing indexed records; rewriting (local paths, proxy URLs,
//! extension substitution) happens as a separate pure pass over those
//! records so key/map/segment roles can never get mixed up mid-edit.

use std::collections::HashMap;
use url::Url;

use super::PlaylistError;

/// Extensions that never belong to a genuine media segment.
pub const NON_MEDIA_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".webp", ".bmp", ".svg", ".ico",
];

/// Role of a classified manifest line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineRole {
    /// A segment URI line.
    Segment,
    /// An `#EXT-X-KEY` directive carrying a URI.
    Key,
    /// An `#EXT-X-MAP` init-segment directive.
    Map,
    /// Any other directive carrying a `URI="..."` attribute, such as
    /// `#EXT-X-PART`, `#EXT-X-PRELOAD-HINT` or `#EXT-X-MEDIA`.
    Aux,
}

/// A manifest line that references a downloadable resource.
#[derive(Debug, Clone)]
pub struct ResourceRef {
    /// Index into [`MediaPlaylist::lines`].
    pub line_index: usize,
    pub role: LineRole,
    /// Absolute resolved URL.
    pub url: Url,
    /// Deterministic local filename, shared across lines resolving to
    /// the same URL.
    pub local_name: String,
}

/// A variant entry from a master playlist.
#[derive(Debug, Clone)]
pub struct Variant {
    pub bandwidth: u64,
    pub url: Url,
}

/// A classified media playlist.
#[derive(Debug, Clone)]
pub struct MediaPlaylist {
    /// URL the playlist was fetched from.
    pub url: Url,
    /// Raw manifest lines, unmodified except by repair passes.
    pub lines: Vec<String>,
    pub segments: Vec<ResourceRef>,
    pub keys: Vec<ResourceRef>,
    pub maps: Vec<ResourceRef>,
    /// Remaining directives with a `URI="..."` attribute. Never
    /// downloaded locally, but rewritten in proxy mode.
    pub aux: Vec<ResourceRef>,
    /// `#EXT-X-ENDLIST` present (VOD).
    pub endlist: bool,
    pub has_byte_range: bool,
    /// `#EXT-X-PART` or `#EXT-X-PRELOAD-HINT` present.
    pub has_partial_segments: bool,
    /// At least one key with `METHOD` != NONE.
    pub encrypted: bool,
    /// A key declared a `KEYFORMAT` other than "identity".
    pub non_identity_keyformat: bool,
    /// Sum of `#EXTINF` durations, seconds.
    pub total_duration: f64,
    /// Set by repair: image-extension segments are really media.
    pub allow_image_segments: bool,
    /// Set by repair: segment bytes are encrypted, do not content-probe.
    pub opaque_image_segments: bool,
}

impl MediaPlaylist {
    /// Classify a manifest body fetched from `url`.
    pub fn parse(url: Url, body: &str) -> Result<Self, PlaylistError> {
        if !looks_like_hls(body) {
            return Err(PlaylistError::NotM3u8 {
                url: url.to_string(),
            });
        }

        let lines: Vec<String> = body.lines().map(|l| l.trim_end().to_string()).collect();
        let mut playlist = Self {
            url: url.clone(),
            lines,
            segments: Vec::new(),
            keys: Vec::new(),
            maps: Vec::new(),
            aux: Vec::new(),
            endlist: false,
            has_byte_range: false,
            has_partial_segments: false,
            encrypted: false,
            non_identity_keyformat: false,
            total_duration: 0.0,
            allow_image_segments: false,
            opaque_image_segments: false,
        };

        // Local names are assigned once per distinct resolved URL, so a
        // key repeated on every segment downloads exactly once.
        let mut assigned: HashMap<String, String> = HashMap::new();
        let mut seg_count = 0usize;
        let mut key_count = 0usize;
        let mut map_count = 0usize;
        let mut aux_count = 0usize;

        for index in 0..playlist.lines.len() {
            let line = playlist.lines[index].clone();
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            if let Some(rest) = trimmed.strip_prefix("#EXTINF:") {
                let duration = rest
                    .split(',')
                    .next()
                    .and_then(|d| d.trim().parse::<f64>().ok())
                    .unwrap_or(0.0);
                playlist.total_duration += duration;
                continue;
            }

            if trimmed.starts_with("#EXT-X-ENDLIST") {
                playlist.endlist = true;
                continue;
            }
            if trimmed.starts_with("#EXT-X-BYTERANGE") {
                playlist.has_byte_range = true;
                continue;
            }
            if trimmed.starts_with("#EXT-X-PART:") || trimmed.starts_with("#EXT-X-PRELOAD-HINT") {
                playlist.has_partial_segments = true;
            }

            if trimmed.starts_with("#EXT-X-KEY") {
                let method = attr_value(trimmed, "METHOD").unwrap_or_default();
                if method.eq_ignore_ascii_case("NONE") {
                    continue;
                }
                playlist.encrypted = true;
                if let Some(format) = attr_value(trimmed, "KEYFORMAT") {
                    if !format.eq_ignore_ascii_case("identity") {
                        playlist.non_identity_keyformat = true;
                    }
                }
                if let Some(uri) = attr_value(trimmed, "URI") {
                    let resolved = url.join(&uri)?;
                    let local_name = assigned
                        .entry(resolved.to_string())
                        .or_insert_with(|| {
                            key_count += 1;
                            format!("key{:02}.bin", key_count)
                        })
                        .clone();
                    playlist.keys.push(ResourceRef {
                        line_index: index,
                        role: LineRole::Key,
                        url: resolved,
                        local_name,
                    });
                }
                continue;
            }

            if trimmed.starts_with("#EXT-X-MAP") {
                if let Some(uri) = attr_value(trimmed, "URI") {
                    let resolved = url.join(&uri)?;
                    let local_name = assigned
                        .entry(resolved.to_string())
                        .or_insert_with(|| {
                            map_count += 1;
                            format!("map{:02}{}", map_count, path_extension(&resolved, ".mp4"))
                        })
                        .clone();
                    playlist.maps.push(ResourceRef {
                        line_index: index,
                        role: LineRole::Map,
                        url: resolved,
                        local_name,
                    });
                }
                continue;
            }

            if trimmed.starts_with('#') {
                // Any remaining directive with a URI attribute still
                // references an upstream resource the proxy must cover.
                if trimmed.starts_with("#EXT-X-") {
                    if let Some(uri) = attr_value(trimmed, "URI") {
                        if let Ok(resolved) = url.join(&uri) {
                            let local_name = assigned
                                .entry(resolved.to_string())
                                .or_insert_with(|| {
                                    aux_count += 1;
                                    format!(
                                        "aux{:02}{}",
                                        aux_count,
                                        path_extension(&resolved, ".bin")
                                    )
                                })
                                .clone();
                            playlist.aux.push(ResourceRef {
                                line_index: index,
                                role: LineRole::Aux,
                                url: resolved,
                                local_name,
                            });
                        }
                    }
                }
                continue;
            }

            // Any other non-comment line is a segment URI.
            let resolved = url.join(trimmed)?;
            let local_name = assigned
                .entry(resolved.to_string())
                .or_insert_with(|| {
                    seg_count += 1;
                    format!("seg{:05}{}", seg_count, path_extension(&resolved, ".ts"))
                })
                .clone();
            playlist.segments.push(ResourceRef {
                line_index: index,
                role: LineRole::Segment,
                url: resolved,
                local_name,
            });
        }

        Ok(playlist)
    }

    /// Whether this body is a master (multi-variant) playlist.
    pub fn is_master(body: &str) -> bool {
        body.contains("#EXT-X-STREAM-INF")
    }

    /// Parse master-playlist variants, resolved against `url`.
    pub fn parse_variants(url: &Url, body: &str) -> Vec<Variant> {
        let mut variants = Vec::new();
        let mut pending_bandwidth: Option<u64> = None;

        for line in body.lines() {
            let trimmed = line.trim();
            if let Some(rest) = trimmed.strip_prefix("#EXT-X-STREAM-INF:") {
                pending_bandwidth = attr_value_raw(rest, "BANDWIDTH")
                    .and_then(|b| b.parse::<u64>().ok())
                    .or(Some(0));
            } else if !trimmed.is_empty() && !trimmed.starts_with('#') {
                if let Some(bandwidth) = pending_bandwidth.take() {
                    if let Ok(resolved) = url.join(trimmed) {
                        variants.push(Variant {
                            bandwidth,
                            url: resolved,
                        });
                    }
                }
            }
        }

        variants
    }

    /// Segment refs whose resolved path carries a non-media extension.
    pub fn disguised_segments(&self) -> Vec<&ResourceRef> {
        self.segments
            .iter()
            .filter(|s| has_non_media_extension(s.url.path()))
            .collect()
    }

    /// Classification used when picking among master-playlist variants:
    /// at least one segment and nothing disguised as an image.
    pub fn likely_playable(&self) -> bool {
        !self.segments.is_empty() && self.disguised_segments().is_empty()
    }

    /// Render the manifest with per-line replacements applied.
    ///
    /// `replace` maps a line index to the replacement for that line's
    /// URI (the whole line for segments, the `URI` attribute value for
    /// key/map directives). `drop` lines are omitted entirely.
    pub fn render(&self, replace: &HashMap<usize, String>, drop: &[usize]) -> String {
        let mut out = String::new();
        for (index, line) in self.lines.iter().enumerate() {
            if drop.contains(&index) {
                continue;
            }
            match replace.get(&index) {
                Some(replacement) if line.trim_start().starts_with('#') => {
                    out.push_str(&replace_uri_attr(line, replacement));
                }
                Some(replacement) => out.push_str(replacement),
                None => out.push_str(line),
            }
            out.push('\n');
        }
        out
    }
}

/// `true` when the path ends in one of [`NON_MEDIA_EXTENSIONS`].
pub fn has_non_media_extension(path: &str) -> bool {
    let lower = path.to_lowercase();
    NON_MEDIA_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Minimal HLS syntax check.
pub fn looks_like_hls(body: &str) -> bool {
    let trimmed = body.trim_start();
    trimmed.starts_with("#EXTM3U") || trimmed.contains("#EXTINF") || trimmed.contains("#EXT-X-")
}

/// Extract a quoted or bare attribute value from a tag line.
pub fn attr_value(line: &str, name: &str) -> Option<String> {
    let rest = line.split_once(':')?.1;
    attr_value_raw(rest, name)
}

fn attr_value_raw(attrs: &str, name: &str) -> Option<String> {
    // Attribute names are uppercase per the HLS spec, so a
    // case-sensitive search keeps byte offsets valid for slicing.
    let pattern = format!("{}=", name.to_uppercase());
    let mut search_from = 0;
    loop {
        let rel = attrs[search_from..].find(&pattern)?;
        let at = search_from + rel;
        // Must be at a boundary, not a suffix of a longer attribute name
        // (BANDWIDTH vs AVERAGE-BANDWIDTH).
        if at > 0 {
            let prev = attrs.as_bytes()[at - 1];
            if prev != b',' && prev != b' ' {
                search_from = at + pattern.len();
                continue;
            }
        }
        let value_start = at + pattern.len();
        let value = &attrs[value_start..];
        return Some(if let Some(stripped) = value.strip_prefix('"') {
            stripped
                .split('"')
                .next()
                .unwrap_or_default()
                .to_string()
        } else {
            value
                .split(',')
                .next()
                .unwrap_or_default()
                .trim()
                .to_string()
        });
    }
}

/// Replace the `URI="..."` attribute value in a directive line.
fn replace_uri_attr(line: &str, new_uri: &str) -> String {
    let Some(at) = line.find("URI=\"") else {
        return line.to_string();
    };
    let value_start = at + 5;
    let Some(value_len) = line[value_start..].find('"') else {
        return line.to_string();
    };
    format!(
        "{}{}{}",
        &line[..value_start],
        new_uri,
        &line[value_start + value_len..]
    )
}

/// File extension of the URL path including the dot, or `default`.
fn path_extension(url: &Url, default: &str) -> String {
    let path = url.path();
    match path.rfind('.') {
        Some(dot) if !path[dot + 1..].contains('/') && path.len() - dot <= 6 => {
            path[dot..].to_lowercase()
        }
        _ => default.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://cdn.example.com/hls/index.m3u8").unwrap()
    }

    const SIMPLE: &str = "#EXTM3U\n\
#EXT-X-VERSION:3\n\
#EXT-X-TARGETDURATION:6\n\
#EXTINF:6.0,\n\
seg0.ts\n\
#EXTINF:5.5,\n\
seg1.ts\n\
#EXT-X-ENDLIST\n";

    #[test]
    fn test_parse_simple_vod() {
        let p = MediaPlaylist::parse(base(), SIMPLE).unwrap();
        assert_eq!(p.segments.len(), 2);
        assert!(p.endlist);
        assert!(!p.encrypted);
        assert!((p.total_duration - 11.5).abs() < 1e-9);
        assert_eq!(
            p.segments[0].url.as_str(),
            "https://cdn.example.com/hls/seg0.ts"
        );
        assert_eq!(p.segments[0].local_name, "seg00001.ts");
    }

    #[test]
    fn test_parse_rejects_non_hls() {
        let err = MediaPlaylist::parse(base(), "<html>not found</html>").unwrap_err();
        assert!(matches!(err, PlaylistError::NotM3u8 { .. }));
    }

    #[test]
    fn test_repeated_key_shares_local_name() {
        let body = "#EXTM3U\n\
#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\",IV=0x1\n\
#EXTINF:4,\n\
a.ts\n\
#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\",IV=0x2\n\
#EXTINF:4,\n\
b.ts\n\
#EXT-X-ENDLIST\n";
        let p = MediaPlaylist::parse(base(), body).unwrap();
        assert_eq!(p.keys.len(), 2);
        assert_eq!(p.keys[0].local_name, p.keys[1].local_name);
        assert!(p.encrypted);
        assert!(!p.non_identity_keyformat);
    }

    #[test]
    fn test_method_none_not_encryption() {
        let body = "#EXTM3U\n#EXT-X-KEY:METHOD=NONE\n#EXTINF:4,\na.ts\n#EXT-X-ENDLIST\n";
        let p = MediaPlaylist::parse(base(), body).unwrap();
        assert!(!p.encrypted);
        assert!(p.keys.is_empty());
    }

    #[test]
    fn test_non_identity_keyformat_flagged() {
        let body = "#EXTM3U\n\
#EXT-X-KEY:METHOD=SAMPLE-AES,URI=\"skd://key\",KEYFORMAT=\"com.apple.streamingkeydelivery\"\n\
#EXTINF:4,\na.ts\n#EXT-X-ENDLIST\n";
        let p = MediaPlaylist::parse(base(), body).unwrap();
        assert!(p.non_identity_keyformat);
    }

    #[test]
    fn test_map_and_byterange_detection() {
        let body = "#EXTM3U\n\
#EXT-X-MAP:URI=\"init.mp4\"\n\
#EXT-X-BYTERANGE:1000@0\n\
#EXTINF:4,\n\
a.m4s\n\
#EXT-X-ENDLIST\n";
        let p = MediaPlaylist::parse(base(), body).unwrap();
        assert_eq!(p.maps.len(), 1);
        assert_eq!(p.maps[0].local_name, "map01.mp4");
        assert!(p.has_byte_range);
    }

    #[test]
    fn test_partial_segment_tags_detected() {
        let body = "#EXTM3U\n#EXT-X-PART:DURATION=1.0,URI=\"p0.ts\"\n#EXTINF:4,\na.ts\n";
        let p = MediaPlaylist::parse(base(), body).unwrap();
        assert!(p.has_partial_segments);
        assert!(!p.endlist);
    }

    #[test]
    fn test_aux_uri_directives_classified() {
        let body = "#EXTM3U\n\
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"a\",URI=\"audio.m3u8\"\n\
#EXT-X-PART:DURATION=1.0,URI=\"p0.ts\"\n\
#EXT-X-PRELOAD-HINT:TYPE=PART,URI=\"p1.ts\"\n\
#EXTINF:4,\na.ts\n";
        let p = MediaPlaylist::parse(base(), body).unwrap();
        assert_eq!(p.aux.len(), 3);
        assert!(p.aux.iter().all(|r| r.role == LineRole::Aux));
        assert_eq!(
            p.aux[0].url.as_str(),
            "https://cdn.example.com/hls/audio.m3u8"
        );
        assert!(p.has_partial_segments);
        // Segment and key bookkeeping is untouched
        assert_eq!(p.segments.len(), 1);
        assert!(p.keys.is_empty());
    }

    #[test]
    fn test_disguised_segments() {
        let body = "#EXTM3U\n#EXTINF:4,\nseg0.jpg\n#EXTINF:4,\nseg1.ts\n#EXT-X-ENDLIST\n";
        let p = MediaPlaylist::parse(base(), body).unwrap();
        let disguised = p.disguised_segments();
        assert_eq!(disguised.len(), 1);
        assert!(disguised[0].url.path().ends_with("seg0.jpg"));
        assert!(!p.likely_playable());
    }

    #[test]
    fn test_parse_variants_sorted_input() {
        let body = "#EXTM3U\n\
#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360\n\
low/index.m3u8\n\
#EXT-X-STREAM-INF:AVERAGE-BANDWIDTH=2400000,BANDWIDTH=2500000\n\
high/index.m3u8\n";
        let variants = MediaPlaylist::parse_variants(&base(), body);
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[0].bandwidth, 800000);
        assert_eq!(variants[1].bandwidth, 2500000);
        assert_eq!(
            variants[1].url.as_str(),
            "https://cdn.example.com/hls/high/index.m3u8"
        );
    }

    #[test]
    fn test_is_master() {
        assert!(MediaPlaylist::is_master(
            "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1\nv.m3u8\n"
        ));
        assert!(!MediaPlaylist::is_master(SIMPLE));
    }

    #[test]
    fn test_render_with_replacements() {
        let p = MediaPlaylist::parse(base(), SIMPLE).unwrap();
        let mut replace = HashMap::new();
        replace.insert(p.segments[0].line_index, "seg00001.ts".to_string());
        replace.insert(p.segments[1].line_index, "seg00002.ts".to_string());
        let out = p.render(&replace, &[]);
        assert!(out.contains("seg00001.ts"));
        assert!(!out.contains("seg0.ts\n"));
        assert!(out.contains("#EXT-X-ENDLIST"));
    }

    #[test]
    fn test_render_replaces_key_uri_attribute() {
        let body = "#EXTM3U\n\
#EXT-X-KEY:METHOD=AES-128,URI=\"https://cdn.example.com/key.bin\",IV=0x1\n\
#EXTINF:4,\na.ts\n#EXT-X-ENDLIST\n";
        let p = MediaPlaylist::parse(base(), body).unwrap();
        let mut replace = HashMap::new();
        replace.insert(p.keys[0].line_index, "key01.bin".to_string());
        let out = p.render(&replace, &[]);
        assert!(out.contains("URI=\"key01.bin\""));
        assert!(out.contains("IV=0x1"));
    }

    #[test]
    fn test_render_drops_lines() {
        let p = MediaPlaylist::parse(base(), SIMPLE).unwrap();
        let drop = vec![p.segments[0].line_index, p.segments[0].line_index - 1];
        let out = p.render(&HashMap::new(), &drop);
        assert!(!out.contains("seg0.ts"));
        assert!(out.contains("seg1.ts"));
        // Its #EXTINF went with it
        assert_eq!(out.matches("#EXTINF").count(), 1);
    }

    #[test]
    fn test_attr_value_quoted_and_bare() {
        let line = "#EXT-X-KEY:METHOD=AES-128,URI=\"k.bin\",KEYFORMAT=\"identity\"";
        assert_eq!(attr_value(line, "METHOD").as_deref(), Some("AES-128"));
        assert_eq!(attr_value(line, "URI").as_deref(), Some("k.bin"));
        assert_eq!(attr_value(line, "KEYFORMAT").as_deref(), Some("identity"));
    }

    #[test]
    fn test_bandwidth_not_confused_with_average() {
        let variants = MediaPlaylist::parse_variants(
            &base(),
            "#EXTM3U\n#EXT-X-STREAM-INF:AVERAGE-BANDWIDTH=100,BANDWIDTH=200\nv.m3u8\n",
        );
        assert_eq!(variants[0].bandwidth, 200);
    }
}
