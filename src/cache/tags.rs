//! Cache tags.
//!
//! A tag names a piece of content (a collection, a record, a global) that one
//! or more cache entries were computed from. Invalidating the tag drops every
//! entry that carries it.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Bare view tags shared by listing reads.
pub mod names {
    pub const IMAGES: &str = "images";
    pub const GALLERIES: &str = "galleries";
    pub const GALLERIES_LIST_OPTIMIZED: &str = "galleries-list-optimized";
    pub const GALLERIES_PAGINATED: &str = "galleries-paginated";
    pub const GALLERY_BY_SLUG: &str = "gallery-by-slug";
    pub const BLOG_POSTS: &str = "blog-posts";
    pub const BLOG_POSTS_LIST: &str = "blog-posts-list";
    pub const GEAR: &str = "gear";

    pub const GLOBAL_HOME: &str = "home";
    pub const GLOBAL_SETTINGS: &str = "settings";
}

/// Opaque content identifier attached to cache entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// `collection_<name>`
    pub fn collection(name: &str) -> Self {
        Self(format!("collection_{name}"))
    }

    /// `<kind>_<slug-or-id>`, e.g. `gallery_yosemite`.
    pub fn record(kind: &str, id: &str) -> Self {
        Self(format!("{kind}_{id}"))
    }

    /// `global_<name>`
    pub fn global(name: &str) -> Self {
        Self(format!("global_{name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Tag {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Tag {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for Tag {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Tags that exist independently of any particular record.
///
/// Used by the fallback sweep, which must reach CDN-side entries this process
/// never stored itself.
pub fn view_tags() -> Vec<Tag> {
    [
        names::IMAGES,
        names::GALLERIES,
        names::GALLERIES_LIST_OPTIMIZED,
        names::GALLERIES_PAGINATED,
        names::GALLERY_BY_SLUG,
        names::BLOG_POSTS,
        names::BLOG_POSTS_LIST,
        names::GEAR,
    ]
    .into_iter()
    .map(Tag::from)
    .chain([
        Tag::global(names::GLOBAL_HOME),
        Tag::global(names::GLOBAL_SETTINGS),
    ])
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_constructors() {
        assert_eq!(Tag::collection("images").as_str(), "collection_images");
        assert_eq!(Tag::record("gallery", "yosemite").as_str(), "gallery_yosemite");
        assert_eq!(Tag::global("home").as_str(), "global_home");
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&Tag::from("galleries")).expect("serialize tag");
        assert_eq!(json, "\"galleries\"");
    }

    #[test]
    fn view_tags_include_home() {
        let tags = view_tags();
        assert!(tags.contains(&Tag::global("home")));
        assert!(tags.contains(&Tag::from("galleries-paginated")));
    }
}
