//! Content types and container signature checks for produced artifacts

use crate::extractor::MediaType;

/// Content type for a media artifact, from its kind and file extension
pub fn content_type_for(media_type: MediaType, extension: &str) -> &'static str {
    let ext = extension.trim_start_matches('.').to_lowercase();
    match (media_type, ext.as_str()) {
        (MediaType::Video, "webm") => "video/webm",
        (MediaType::Video, "mkv") => "video/x-matroska",
        (MediaType::Video, _) => "video/mp4",
        (MediaType::Audio, "m4a") => "audio/mp4",
        (MediaType::Audio, "ogg" | "opus") => "audio/ogg",
        (MediaType::Audio, _) => "audio/mpeg",
        (MediaType::Image, "png") => "image/png",
        (MediaType::Image, "gif") => "image/gif",
        (MediaType::Image, "webp") => "image/webp",
        (MediaType::Image, _) => "image/jpeg",
    }
}

/// Check the first bytes of an artifact against known container signatures.
///
/// This is a structural sanity check, not full validation: a file that fails
/// here is almost certainly an HTML error page or a truncated write, which
/// the orchestrator treats as a retryable extraction failure.
pub fn has_known_signature(head: &[u8], media_type: MediaType) -> bool {
    match media_type {
        MediaType::Video => is_mp4(head) || is_webm(head),
        MediaType::Audio => is_mp3(head) || is_mp4(head) || is_ogg(head),
        MediaType::Image => is_jpeg(head) || is_png(head) || is_gif(head) || is_webp(head),
    }
}

fn is_mp4(head: &[u8]) -> bool {
    // ISO BMFF: size (4 bytes) then "ftyp"
    head.len() >= 8 && &head[4..8] == b"ftyp"
}

fn is_webm(head: &[u8]) -> bool {
    // EBML header, shared by webm and mkv
    head.starts_with(&[0x1A, 0x45, 0xDF, 0xA3])
}

fn is_mp3(head: &[u8]) -> bool {
    head.starts_with(b"ID3") || (head.len() >= 2 && head[0] == 0xFF && head[1] & 0xE0 == 0xE0)
}

fn is_ogg(head: &[u8]) -> bool {
    head.starts_with(b"OggS")
}

fn is_jpeg(head: &[u8]) -> bool {
    head.starts_with(&[0xFF, 0xD8, 0xFF])
}

fn is_png(head: &[u8]) -> bool {
    head.starts_with(&[0x89, 0x50, 0x4E, 0x47])
}

fn is_gif(head: &[u8]) -> bool {
    head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a")
}

fn is_webp(head: &[u8]) -> bool {
    head.len() >= 12 && &head[0..4] == b"RIFF" && &head[8..12] == b"WEBP"
}
