//! Media type inference
//!
//! Infers a file's media type and MIME type from its name alone.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Media type inferred from a file name's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MediaType {
    Image,
    Video,
    Audio,
    Other,
}

impl MediaType {
    /// True for the types tracked as media (image, video, audio).
    pub fn is_media(self) -> bool {
        !matches!(self, MediaType::Other)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaType::Image => write!(f, "image"),
            MediaType::Video => write!(f, "video"),
            MediaType::Audio => write!(f, "audio"),
            MediaType::Other => write!(f, "other"),
        }
    }
}

const EXTENSIONS: &[(&str, MediaType, &str)] = &[
    ("jpg", MediaType::Image, "image/jpeg"),
    ("jpeg", MediaType::Image, "image/jpeg"),
    ("png", MediaType::Image, "image/png"),
    ("gif", MediaType::Image, "image/gif"),
    ("bmp", MediaType::Image, "image/bmp"),
    ("webp", MediaType::Image, "image/webp"),
    ("heic", MediaType::Image, "image/heic"),
    ("heif", MediaType::Image, "image/heif"),
    ("dng", MediaType::Image, "image/x-adobe-dng"),
    ("cr2", MediaType::Image, "image/x-canon-cr2"),
    ("nef", MediaType::Image, "image/x-nikon-nef"),
    ("arw", MediaType::Image, "image/x-sony-arw"),
    ("mp4", MediaType::Video, "video/mp4"),
    ("m4v", MediaType::Video, "video/x-m4v"),
    ("mkv", MediaType::Video, "video/x-matroska"),
    ("webm", MediaType::Video, "video/webm"),
    ("3gp", MediaType::Video, "video/3gpp"),
    ("3gpp", MediaType::Video, "video/3gpp"),
    ("avi", MediaType::Video, "video/avi"),
    ("mov", MediaType::Video, "video/quicktime"),
    ("mpg", MediaType::Video, "video/mpeg"),
    ("mpeg", MediaType::Video, "video/mpeg"),
    ("ts", MediaType::Video, "video/mp2ts"),
    ("mp3", MediaType::Audio, "audio/mpeg"),
    ("m4a", MediaType::Audio, "audio/mp4"),
    ("aac", MediaType::Audio, "audio/aac"),
    ("ogg", MediaType::Audio, "audio/ogg"),
    ("oga", MediaType::Audio, "audio/ogg"),
    ("opus", MediaType::Audio, "audio/ogg"),
    ("flac", MediaType::Audio, "audio/flac"),
    ("wav", MediaType::Audio, "audio/x-wav"),
    ("amr", MediaType::Audio, "audio/amr"),
    ("mid", MediaType::Audio, "audio/midi"),
    ("midi", MediaType::Audio, "audio/midi"),
    ("wma", MediaType::Audio, "audio/x-ms-wma"),
];

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Lower-cased extension of the last path component, if any.
///
/// A leading dot marks a hidden file, not an extension.
fn extension_of(path: &str) -> Option<String> {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext.to_ascii_lowercase()),
        _ => None,
    }
}

fn lookup(path: &str) -> Option<&'static (&'static str, MediaType, &'static str)> {
    let ext = extension_of(path)?;
    EXTENSIONS.iter().find(|(known, _, _)| *known == ext)
}

/// Infers the media type of `path` from its extension.
pub fn media_type_of(path: &str) -> MediaType {
    lookup(path).map_or(MediaType::Other, |(_, media_type, _)| *media_type)
}

/// Infers the MIME type of `path` from its extension.
pub fn mime_type_of(path: &str) -> &'static str {
    match lookup(path) {
        Some((_, _, mime)) => mime,
        None if path.to_ascii_lowercase().ends_with(".pdf") => "application/pdf",
        None if path.to_ascii_lowercase().ends_with(".txt") => "text/plain",
        None => DEFAULT_MIME_TYPE,
    }
}
