//! ffmpeg argument building and capability narrowing.
//!
//! Some ffmpeg builds lack the conditional flags we rely on for HLS
//! sources. Rather than probing up front, the argument set carries a
//! set of optional flag groups and removes exactly the group an
//! "Unrecognized option" error names, bounded by a retry budget.

use crate::headers::ForwardHeaders;

/// Protocols ffmpeg may follow when reading a manifest.
const PROTOCOL_WHITELIST: &str = "file,http,https,tcp,tls,crypto";

/// One removable group of conditional ffmpeg flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagGroup {
    /// `-headers` block with the forwarded request headers.
    CustomHeaders,
    /// `-protocol_whitelist` for manifest inputs.
    ProtocolWhitelist,
    /// `-allowed_extensions ALL` for disguised segment names.
    AllowExtensions,
}

impl FlagGroup {
    /// Map an option name from ffmpeg's error text to its group.
    fn for_option(option: &str) -> Option<FlagGroup> {
        match option {
            "headers" => Some(FlagGroup::CustomHeaders),
            "protocol_whitelist" => Some(FlagGroup::ProtocolWhitelist),
            "allowed_extensions" => Some(FlagGroup::AllowExtensions),
            _ => None,
        }
    }
}

/// Extract the option name from ffmpeg's free-text rejection.
///
/// Isolated here so a change in ffmpeg's error format touches one
/// function.
pub fn parse_unrecognized_option(stderr: &str) -> Option<String> {
    for marker in ["Unrecognized option '", "Unknown option '"] {
        if let Some(start) = stderr.find(marker) {
            let rest = &stderr[start + marker.len()..];
            if let Some(end) = rest.find('\'') {
                let option = rest[..end].trim_start_matches('-');
                if !option.is_empty() {
                    return Some(option.to_string());
                }
            }
        }
    }
    None
}

/// Argument set for one transcode, with removable flag groups.
#[derive(Debug, Clone)]
pub struct TranscodeArgs {
    custom_headers: bool,
    protocol_whitelist: bool,
    allow_extensions: bool,
    narrowing_left: u32,
}

impl TranscodeArgs {
    /// HLS inputs get the full conditional set; direct files only
    /// carry the header block.
    pub fn new(is_hls: bool, narrowing_retries: u32) -> Self {
        Self {
            custom_headers: true,
            protocol_whitelist: is_hls,
            allow_extensions: is_hls,
            narrowing_left: narrowing_retries,
        }
    }

    /// Build the full command line for one ffmpeg run.
    pub fn build(&self, input: &str, output: &str, headers: &ForwardHeaders) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-nostats".to_string(),
            "-progress".to_string(),
            "pipe:1".to_string(),
        ];

        if self.custom_headers && !headers.is_empty() {
            args.extend(["-headers".to_string(), Self::header_block(headers)]);
        }

        if self.protocol_whitelist {
            args.extend([
                "-protocol_whitelist".to_string(),
                PROTOCOL_WHITELIST.to_string(),
            ]);
        }

        if self.allow_extensions {
            args.extend(["-allowed_extensions".to_string(), "ALL".to_string()]);
        }

        args.extend([
            "-i".to_string(),
            input.to_string(),
            "-c".to_string(),
            "copy".to_string(),
            "-y".to_string(),
            output.to_string(),
        ]);

        args
    }

    fn header_block(headers: &ForwardHeaders) -> String {
        let mut block = String::new();
        for (name, value) in headers.pairs() {
            block.push_str(name);
            block.push_str(": ");
            block.push_str(value);
            block.push_str("\r\n");
        }
        block
    }

    /// Remove the flag group named by an ffmpeg rejection. Returns the
    /// removed group, or `None` when the budget is spent or the option
    /// does not map to an enabled group.
    pub fn narrow(&mut self, option: &str) -> Option<FlagGroup> {
        if self.narrowing_left == 0 {
            return None;
        }
        let group = FlagGroup::for_option(option)?;
        let enabled = match group {
            FlagGroup::CustomHeaders => &mut self.custom_headers,
            FlagGroup::ProtocolWhitelist => &mut self.protocol_whitelist,
            FlagGroup::AllowExtensions => &mut self.allow_extensions,
        };
        if !*enabled {
            return None;
        }
        *enabled = false;
        self.narrowing_left -= 1;
        Some(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers() -> ForwardHeaders {
        ForwardHeaders {
            referer: Some("https://example.com".into()),
            user_agent: Some("Mozilla/5.0".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_build_hls_full_set() {
        let args = TranscodeArgs::new(true, 3);
        let argv = args.build("https://h/index.m3u8", "/tmp/out.mp4", &headers());
        assert!(argv.contains(&"-hide_banner".to_string()));
        assert!(argv.contains(&"-progress".to_string()));
        assert!(argv.contains(&"pipe:1".to_string()));
        assert!(argv.contains(&"-nostats".to_string()));
        assert!(argv.contains(&"-headers".to_string()));
        assert!(argv.contains(&"-protocol_whitelist".to_string()));
        assert!(argv.contains(&"-allowed_extensions".to_string()));
        assert_eq!(argv.last(), Some(&"/tmp/out.mp4".to_string()));
    }

    #[test]
    fn test_build_direct_file_skips_hls_flags() {
        let args = TranscodeArgs::new(false, 3);
        let argv = args.build("https://h/video.mp4", "/tmp/out.mp4", &headers());
        assert!(!argv.contains(&"-protocol_whitelist".to_string()));
        assert!(!argv.contains(&"-allowed_extensions".to_string()));
        assert!(argv.contains(&"-headers".to_string()));
    }

    #[test]
    fn test_build_no_headers_skips_header_block() {
        let args = TranscodeArgs::new(true, 3);
        let argv = args.build("https://h/i.m3u8", "/tmp/out.mp4", &ForwardHeaders::default());
        assert!(!argv.contains(&"-headers".to_string()));
    }

    #[test]
    fn test_header_block_crlf_format() {
        let block = TranscodeArgs::header_block(&headers());
        assert!(block.contains("Referer: https://example.com\r\n"));
        assert!(block.contains("User-Agent: Mozilla/5.0\r\n"));
    }

    #[test]
    fn test_parse_unrecognized_option() {
        assert_eq!(
            parse_unrecognized_option("Unrecognized option 'protocol_whitelist'.\nError..."),
            Some("protocol_whitelist".to_string())
        );
        assert_eq!(
            parse_unrecognized_option("Unknown option '-allowed_extensions'"),
            Some("allowed_extensions".to_string())
        );
        assert_eq!(parse_unrecognized_option("Connection refused"), None);
    }

    #[test]
    fn test_narrow_removes_exactly_named_group() {
        let mut args = TranscodeArgs::new(true, 3);
        assert_eq!(
            args.narrow("protocol_whitelist"),
            Some(FlagGroup::ProtocolWhitelist)
        );
        let argv = args.build("in", "out", &headers());
        assert!(!argv.contains(&"-protocol_whitelist".to_string()));
        assert!(argv.contains(&"-allowed_extensions".to_string()));
        assert!(argv.contains(&"-headers".to_string()));
    }

    #[test]
    fn test_narrow_unknown_option() {
        let mut args = TranscodeArgs::new(true, 3);
        assert_eq!(args.narrow("vf"), None);
    }

    #[test]
    fn test_narrow_budget_exhausted() {
        let mut args = TranscodeArgs::new(true, 2);
        assert!(args.narrow("protocol_whitelist").is_some());
        assert!(args.narrow("allowed_extensions").is_some());
        assert_eq!(args.narrow("headers"), None);
    }

    #[test]
    fn test_narrow_already_disabled_group() {
        let mut args = TranscodeArgs::new(false, 3);
        assert_eq!(args.narrow("protocol_whitelist"), None);
    }
}
