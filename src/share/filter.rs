//! Extension-class filters applied to search requests.

use std::path::Path;

use serde::{Deserialize, Serialize};

const AUDIO: &[&str] = &["aac", "flac", "m4a", "mp3", "wav", "wma", "cue"];
const IMAGE: &[&str] = &["bmp", "gif", "ico", "jpg", "jpeg", "png", "tif", "tiff"];
const VIDEO: &[&str] = &["avi", "mov", "mpe", "mpg", "mpeg", "mkv", "ogg", "wmv", "mp4"];

/// Restricts search matches to one extension class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFilter {
    #[default]
    None,
    Audio,
    Image,
    Video,
}

impl FileFilter {
    /// True when the file name's extension falls in this class.
    /// Comparison is on the lowercased extension; [`FileFilter::None`]
    /// accepts everything.
    pub fn matches(&self, name: &str) -> bool {
        let class = match self {
            FileFilter::None => return true,
            FileFilter::Audio => AUDIO,
            FileFilter::Image => IMAGE,
            FileFilter::Video => VIDEO,
        };
        extension(name)
            .map(|ext| class.contains(&ext.as_str()))
            .unwrap_or(false)
    }
}

fn extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}
