//! Mutation to tag cascade table.
//!
//! Listing views denormalize their children (gallery cards embed image counts
//! and cover images, the home page embeds recent galleries and posts), so one
//! mutation fans out to every view that copied the changed record.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::info;

use super::events::{InvalidationEvent, Scope};
use super::tags::{Tag, names};

/// Collections with an explicit cascade rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownCollection {
    Images,
    Galleries,
    BlogPosts,
    Gear,
}

impl KnownCollection {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "images" => Some(Self::Images),
            "galleries" => Some(Self::Galleries),
            "blog-posts" => Some(Self::BlogPosts),
            "gear" => Some(Self::Gear),
            _ => None,
        }
    }

    /// Prefix of record-level tags in this collection.
    pub fn record_kind(self) -> &'static str {
        match self {
            Self::Images => "image",
            Self::Galleries => "gallery",
            Self::BlogPosts => "blog-post",
            Self::Gear => "gear",
        }
    }
}

/// Every tag invalidated by `event`.
pub fn cascade_tags(event: &InvalidationEvent) -> BTreeSet<Tag> {
    let mut tags = BTreeSet::new();
    let doc = event.affected_doc.as_ref();

    match event.scope {
        Scope::Collection => collection_tags(&event.identifier, doc, &mut tags),
        Scope::Global => {
            tags.insert(Tag::global(&event.identifier));
            // Site settings render into the home payload and vice versa.
            if event.identifier == names::GLOBAL_HOME {
                tags.insert(Tag::global(names::GLOBAL_SETTINGS));
            }
        }
    }

    // The home page aggregates every collection.
    tags.insert(Tag::global(names::GLOBAL_HOME));
    tags
}

fn collection_tags(name: &str, doc: Option<&Value>, tags: &mut BTreeSet<Tag>) {
    tags.insert(Tag::collection(name));

    let Some(collection) = KnownCollection::parse(name) else {
        info!(
            collection = name,
            "No cascade rule for collection, invalidating its own tags"
        );
        tags.insert(Tag::from(name));
        if let Some(slug) = doc.and_then(record_id) {
            tags.insert(Tag::record(name, &slug));
        }
        return;
    };

    let record = doc.and_then(record_id);
    if let Some(id) = record.as_deref() {
        tags.insert(Tag::record(collection.record_kind(), id));
    }

    match collection {
        KnownCollection::Images => {
            tags.insert(Tag::from(names::IMAGES));
            // An id-only or unpopulated relation still reaches the listing
            // views; only the per-gallery tag needs a slug.
            if doc.is_some_and(has_gallery) {
                gallery_views(tags);
            }
            if let Some(gallery) = doc.and_then(gallery_slug) {
                tags.insert(Tag::record(KnownCollection::Galleries.record_kind(), &gallery));
            }
        }
        KnownCollection::Galleries => gallery_views(tags),
        KnownCollection::BlogPosts => {
            tags.insert(Tag::from(names::BLOG_POSTS));
            tags.insert(Tag::from(names::BLOG_POSTS_LIST));
        }
        // Whether gear changes should reach images that mention the gear in
        // their technical metadata is undecided; only gear views are dropped.
        KnownCollection::Gear => {
            tags.insert(Tag::from(names::GEAR));
        }
    }
}

fn gallery_views(tags: &mut BTreeSet<Tag>) {
    tags.extend(
        [
            names::GALLERIES,
            names::GALLERIES_LIST_OPTIMIZED,
            names::GALLERIES_PAGINATED,
            names::GALLERY_BY_SLUG,
        ]
        .into_iter()
        .map(Tag::from),
    );
}

/// `slug`, falling back to `id` (string or number).
pub fn record_id(doc: &Value) -> Option<String> {
    non_empty_str(doc.get("slug")).or_else(|| match doc.get("id")? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    })
}

/// Gallery an image belongs to: a populated relation (`{"slug": ..}`) or a
/// bare slug string.
pub fn gallery_slug(doc: &Value) -> Option<String> {
    match doc.get("gallery")? {
        Value::String(slug) if !slug.is_empty() => Some(slug.clone()),
        relation @ Value::Object(_) => non_empty_str(relation.get("slug")),
        _ => None,
    }
}

fn has_gallery(doc: &Value) -> bool {
    match doc.get("gallery") {
        None | Some(Value::Null) => false,
        Some(Value::String(slug)) => !slug.is_empty(),
        Some(_) => true,
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
