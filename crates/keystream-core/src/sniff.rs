//! Content-type detection from leading payload bytes
//!
//! Object stores take the content type as an upload-open parameter, so a
//! stream that wants to declare one has to classify the payload before the
//! upload starts. [`MagicSniffer`] does that from magic numbers first and
//! falls back to textual heuristics.

use std::io::{self, Read};
use tracing::debug;

/// Media type reported for zero-length payloads
pub const EMPTY: &str = "application/x-empty";
/// Media type reported when nothing more specific matches
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Classifies a payload prefix into a media type
pub trait ContentSniffer: Send + Sync {
    fn sniff(&self, prefix: &[u8]) -> String;
}

/// Magic-number table plus text heuristics
#[derive(Debug, Clone, Copy, Default)]
pub struct MagicSniffer;

/// (offset, magic, media type)
const SIGNATURES: &[(usize, &[u8], &str)] = &[
    (0, b"\x89PNG\r\n\x1a\n", "image/png"),
    (0, b"\xFF\xD8\xFF", "image/jpeg"),
    (0, b"GIF87a", "image/gif"),
    (0, b"GIF89a", "image/gif"),
    (0, b"II*\x00", "image/tiff"),
    (0, b"MM\x00*", "image/tiff"),
    (0, b"\x00\x00\x01\x00", "image/vnd.microsoft.icon"),
    (0, b"%PDF-", "application/pdf"),
    (0, b"PK\x03\x04", "application/zip"),
    (0, b"PK\x05\x06", "application/zip"),
    (0, b"\x1F\x8B", "application/gzip"),
    (0, b"\xFD7zXZ\x00", "application/x-xz"),
    (0, b"\x28\xB5\x2F\xFD", "application/zstd"),
    (0, b"7z\xBC\xAF\x27\x1C", "application/x-7z-compressed"),
    (257, b"ustar", "application/x-tar"),
    (0, b"\x7FELF", "application/x-executable"),
    (0, b"\x00asm", "application/wasm"),
    (0, b"OggS", "audio/ogg"),
    (0, b"fLaC", "audio/flac"),
    (4, b"ftyp", "video/mp4"),
];

/// bzip2 block header and end-of-stream markers
const BZIP2_BLOCK: &[u8] = b"\x31\x41\x59\x26\x53\x59";
const BZIP2_EOS: &[u8] = b"\x17\x72\x45\x38\x50\x90";

impl MagicSniffer {
    /// Formats whose magic is short enough to start ordinary text
    fn short_magic(prefix: &[u8]) -> Option<&'static str> {
        if Self::is_bmp(prefix) {
            Some("image/bmp")
        } else if Self::is_bzip2(prefix) {
            Some("application/x-bzip2")
        } else if Self::is_id3(prefix) {
            Some("audio/mpeg")
        } else {
            None
        }
    }

    /// File header is 14 bytes with two reserved words that must be zero
    fn is_bmp(prefix: &[u8]) -> bool {
        prefix.len() >= 14 && prefix.starts_with(b"BM") && prefix[6..10] == [0, 0, 0, 0]
    }

    /// Block size digit, then a block or end-of-stream marker when visible
    fn is_bzip2(prefix: &[u8]) -> bool {
        if prefix.len() < 4 || !prefix.starts_with(b"BZh") || !(b'1'..=b'9').contains(&prefix[3])
        {
            return false;
        }
        if prefix.len() < 10 {
            return true;
        }
        let marker = &prefix[4..10];
        marker == BZIP2_BLOCK || marker == BZIP2_EOS
    }

    /// ID3v2.2-2.4 header with a syncsafe size
    fn is_id3(prefix: &[u8]) -> bool {
        prefix.len() >= 10
            && prefix.starts_with(b"ID3")
            && (2..=4).contains(&prefix[3])
            && prefix[4] != 0xFF
            && prefix[6..10].iter().all(|b| *b < 0x80)
    }

    fn riff(prefix: &[u8]) -> Option<&'static str> {
        if prefix.len() < 12 || &prefix[..4] != b"RIFF" {
            return None;
        }
        match &prefix[8..12] {
            b"WEBP" => Some("image/webp"),
            b"WAVE" => Some("audio/x-wav"),
            b"AVI " => Some("video/x-msvideo"),
            _ => None,
        }
    }

    fn text(prefix: &[u8]) -> Option<&'static str> {
        if prefix.contains(&0) {
            return None;
        }
        // A cut in the middle of a multi-byte sequence is still text.
        let text = match std::str::from_utf8(prefix) {
            Ok(text) => text,
            Err(e) if e.error_len().is_none() => {
                std::str::from_utf8(&prefix[..e.valid_up_to()]).ok()?
            }
            Err(_) => return None,
        };

        let trimmed = text.trim_start_matches('\u{feff}').trim_start();
        let lower: String = trimmed.chars().take(64).collect::<String>().to_lowercase();
        if lower.starts_with("<?xml") {
            Some("text/xml")
        } else if lower.starts_with("<!doctype html") || lower.starts_with("<html") {
            Some("text/html")
        } else if lower.starts_with("<svg") {
            Some("image/svg+xml")
        } else if (trimmed.starts_with('{') || trimmed.starts_with('['))
            && matches!(trimmed.trim_end().chars().last(), Some('}') | Some(']'))
        {
            Some("application/json")
        } else {
            Some("text/plain")
        }
    }
}

impl ContentSniffer for MagicSniffer {
    fn sniff(&self, prefix: &[u8]) -> String {
        if prefix.is_empty() {
            return EMPTY.to_string();
        }

        let detected = SIGNATURES
            .iter()
            .find(|(offset, magic, _)| {
                prefix
                    .get(*offset..*offset + magic.len())
                    .map_or(false, |window| window == *magic)
            })
            .map(|(_, _, mime)| *mime)
            .or_else(|| Self::short_magic(prefix))
            .or_else(|| Self::riff(prefix))
            .or_else(|| Self::text(prefix))
            .unwrap_or(OCTET_STREAM);

        debug!("Sniffed {} from {} byte prefix", detected, prefix.len());
        detected.to_string()
    }
}

/// Read at most `limit` bytes from `reader` and classify them
pub fn sniff_reader<R: Read + ?Sized>(
    sniffer: &dyn ContentSniffer,
    reader: &mut R,
    limit: u64,
) -> io::Result<String> {
    let mut prefix = Vec::new();
    reader.take(limit).read_to_end(&mut prefix)?;
    Ok(sniffer.sniff(&prefix))
}
