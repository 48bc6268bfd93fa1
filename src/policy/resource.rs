//! File-name based classification shared by all transform policies.

use crate::model::ResourceType;
use regex::Regex;
use std::sync::LazyLock;

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
pub const DEFAULT_TAG: &str = "generic";

static EXTENSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*[^/])(\.[^./]+)$").expect("valid extension pattern"));

/// Split `name` into its stem and extension (with the dot).
///
/// Names without a recognisable extension come back with an empty extension.
pub fn split_at_extension(name: &str) -> (&str, &str) {
    let name = name.trim();
    match EXTENSION.captures(name) {
        Some(captures) => match (captures.get(1), captures.get(2)) {
            (Some(stem), Some(extension)) => (stem.as_str(), extension.as_str()),
            _ => (name, ""),
        },
        None => (name, ""),
    }
}

pub fn resource_type(file_name: &str) -> ResourceType {
    let (_, extension) = split_at_extension(file_name);
    if extension.is_empty() {
        return ResourceType::None;
    }

    match extension.to_lowercase().as_str() {
        ".jpg" | ".jpeg" | ".gif" | ".png" | ".tiff" | ".raw" | ".webp" | ".svg" => {
            ResourceType::Image
        }
        ".aac" | ".m4a" | ".mp3" | ".oga" | ".ogg" | ".wav" | ".flac" => ResourceType::Audio,
        ".mp4" | ".m4v" | ".ogv" | ".webm" | ".mpg" | ".mpeg" | ".mov" | ".avi" | ".mkv" => {
            ResourceType::Video
        }
        ".pdf" => ResourceType::Pdf,
        _ => ResourceType::Unknown,
    }
}

pub fn content_type(file_name: &str) -> String {
    mime_guess::from_path(file_name)
        .first_raw()
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string()
}

/// Free-text tags from a file name.
///
/// The stem is lower-cased and split on `-`, space and `_`. Tokens of two
/// characters or fewer are discarded, then the last survivor is dropped
/// because uploads end their names with a generated id. `owner_id`, when
/// given, is always appended.
pub fn derive_tags(file_name: &str, owner_id: Option<&str>) -> Vec<String> {
    let (stem, _) = split_at_extension(file_name);
    let mut tags: Vec<String> = stem
        .to_lowercase()
        .split(['-', ' ', '_'])
        .map(str::trim)
        .filter(|token| token.chars().count() > 2)
        .map(str::to_string)
        .collect();
    tags.pop();

    if tags.is_empty() {
        tags.push(DEFAULT_TAG.to_string());
    }
    if let Some(owner_id) = owner_id {
        tags.push(owner_id.to_string());
    }
    tags
}

/// Last path segment of an object key.
pub fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Pseudo-objects some tools create to represent folders.
pub fn is_directory_marker(key: &str) -> bool {
    key.ends_with('/') || file_name(key) == "__DIRMARKER__"
}
