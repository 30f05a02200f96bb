//! Path classification
//!
//! Maps a virtual storage path (`/DCIM/Camera/a.jpg`) to its place in the
//! fixed directory taxonomy and infers its media type from the file name.
//! Classification is pure: it never touches the disk and never fails.

mod media;

use std::fmt;

pub use media::{MediaType, media_type_of, mime_type_of};

/// Default top-level media directories, in canonical spelling.
pub const DEFAULT_DIRECTORIES: [&str; 5] = ["DCIM", "Pictures", "Music", "Movies", "Download"];

/// Root holding the per-package private directories.
pub const RESERVED_ROOT: &str = "Android";
pub const PRIVATE_FILES_ROOT: &str = "data";
pub const PRIVATE_MEDIA_ROOT: &str = "media";

/// Where a path lives in the shared tree.
///
/// The category describes the directory an entry sits in, so a file placed
/// directly under the storage root is `TopLevel` whatever its name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Category {
    Dcim,
    Pictures,
    Music,
    Movies,
    Download,
    AppPrivateFiles(String),
    AppPrivateMedia(String),
    TopLevel,
    Other,
}

impl Category {
    /// True for the five default public media directories.
    pub fn is_default_media_directory(&self) -> bool {
        matches!(
            self,
            Category::Dcim
                | Category::Pictures
                | Category::Music
                | Category::Movies
                | Category::Download
        )
    }

    /// The package owning an app-private category.
    pub fn private_package(&self) -> Option<&str> {
        match self {
            Category::AppPrivateFiles(pkg) | Category::AppPrivateMedia(pkg) => Some(pkg),
            _ => None,
        }
    }

    /// Type conformity table for files placed in this category.
    pub fn accepts(&self, media_type: MediaType) -> bool {
        match self {
            Category::Music => media_type == MediaType::Audio,
            Category::Movies => media_type == MediaType::Video,
            Category::Dcim => matches!(media_type, MediaType::Image | MediaType::Video),
            Category::Download | Category::Pictures => true,
            Category::AppPrivateFiles(_) | Category::AppPrivateMedia(_) => true,
            Category::Other => true,
            Category::TopLevel => false,
        }
    }

    fn default_directory(name: &str) -> Option<Category> {
        let category = match name.to_ascii_lowercase().as_str() {
            "dcim" => Category::Dcim,
            "pictures" => Category::Pictures,
            "music" => Category::Music,
            "movies" => Category::Movies,
            "download" => Category::Download,
            _ => return None,
        };
        Some(category)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Dcim => write!(f, "DCIM"),
            Category::Pictures => write!(f, "Pictures"),
            Category::Music => write!(f, "Music"),
            Category::Movies => write!(f, "Movies"),
            Category::Download => write!(f, "Download"),
            Category::AppPrivateFiles(pkg) => write!(f, "app files of {}", pkg),
            Category::AppPrivateMedia(pkg) => write!(f, "app media of {}", pkg),
            Category::TopLevel => write!(f, "top level"),
            Category::Other => write!(f, "other"),
        }
    }
}

/// Facts derived from a path; computed on demand, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathFacts {
    pub path: String,
    pub category: Category,
    pub media_type: MediaType,
}

fn components(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

/// Classifies a virtual path.
pub fn classify(path: &str) -> PathFacts {
    let parts = components(path);
    let category = match parts.as_slice() {
        [] | [_] => Category::TopLevel,
        [first, rest @ ..] => {
            if let Some(category) = Category::default_directory(first) {
                category
            } else if first.eq_ignore_ascii_case(RESERVED_ROOT) && rest.len() >= 2 {
                let pkg = rest[1].to_string();
                if rest[0].eq_ignore_ascii_case(PRIVATE_FILES_ROOT) {
                    Category::AppPrivateFiles(pkg)
                } else if rest[0].eq_ignore_ascii_case(PRIVATE_MEDIA_ROOT) {
                    Category::AppPrivateMedia(pkg)
                } else {
                    Category::Other
                }
            } else {
                Category::Other
            }
        }
    };

    PathFacts {
        path: path.to_string(),
        category,
        media_type: media_type_of(path),
    }
}

/// True for directories that can never be moved, replaced or removed: the
/// storage root, the default media directories and the reserved roots.
pub fn is_reserved_directory(path: &str) -> bool {
    match components(path).as_slice() {
        [] => true,
        [only] => {
            Category::default_directory(only).is_some() || only.eq_ignore_ascii_case(RESERVED_ROOT)
        }
        [first, second] => {
            first.eq_ignore_ascii_case(RESERVED_ROOT)
                && (second.eq_ignore_ascii_case(PRIVATE_FILES_ROOT)
                    || second.eq_ignore_ascii_case(PRIVATE_MEDIA_ROOT))
        }
        _ => false,
    }
}
