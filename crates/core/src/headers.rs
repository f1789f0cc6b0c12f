//! Source parameter parsing.
//!
//! Download sources may embed forwarding headers after the URL:
//! `https://host/video.m3u8|referer=https%3A%2F%2Fhost&ua=Agent`.
//! Only a fixed set of headers is recognized; everything else is
//! dropped. Values are percent-decoded and stripped of CR/LF before
//! they ever reach an outgoing request.

use serde::{Deserialize, Serialize};

/// Forwarding headers extracted from a source parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardHeaders {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization: Option<String>,
}

impl ForwardHeaders {
    pub fn is_empty(&self) -> bool {
        self.referer.is_none()
            && self.user_agent.is_none()
            && self.origin.is_none()
            && self.cookie.is_none()
            && self.authorization.is_none()
    }

    /// Header name/value pairs in wire form.
    pub fn pairs(&self) -> Vec<(&'static str, &str)> {
        let mut out = Vec::new();
        if let Some(v) = &self.referer {
            out.push(("Referer", v.as_str()));
        }
        if let Some(v) = &self.user_agent {
            out.push(("User-Agent", v.as_str()));
        }
        if let Some(v) = &self.origin {
            out.push(("Origin", v.as_str()));
        }
        if let Some(v) = &self.cookie {
            out.push(("Cookie", v.as_str()));
        }
        if let Some(v) = &self.authorization {
            out.push(("Authorization", v.as_str()));
        }
        out
    }

    /// Apply the headers to an outgoing reqwest request.
    pub fn apply(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        for (name, value) in self.pairs() {
            req = req.header(name, value);
        }
        req
    }
}

/// Split a raw source parameter into the bare URL and its header block.
///
/// The header block is everything after the first `|`; absent or empty
/// blocks yield default (empty) headers. Unrecognized keys are ignored.
pub fn parse_source_param(raw: &str) -> (String, ForwardHeaders) {
    let raw = raw.trim();
    let Some((url, header_block)) = raw.split_once('|') else {
        return (raw.to_string(), ForwardHeaders::default());
    };

    let mut headers = ForwardHeaders::default();
    for pair in header_block.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let key = urlencoding::decode(key)
            .map(|k| k.to_lowercase())
            .unwrap_or_default();
        let value = match urlencoding::decode(value) {
            Ok(v) => sanitize_value(&v),
            Err(_) => continue,
        };
        if value.is_empty() {
            continue;
        }
        match key.as_str() {
            "referer" | "referrer" => headers.referer = Some(value),
            "user-agent" | "ua" => headers.user_agent = Some(value),
            "origin" => headers.origin = Some(value),
            "cookie" => headers.cookie = Some(value),
            "authorization" => headers.authorization = Some(value),
            _ => {}
        }
    }

    (url.trim().to_string(), headers)
}

/// Strip CR/LF so a decoded value cannot smuggle extra header lines.
fn sanitize_value(value: &str) -> String {
    value
        .chars()
        .filter(|c| *c != '\r' && *c != '\n')
        .collect::<String>()
        .trim()
        .to_string()
}
