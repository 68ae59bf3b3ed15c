//! Cached content reads.
//!
//! Each [`ContentRead`] owns its cache key, its tags and its content class,
//! so the tags an entry is stored under always match what the cascade table
//! invalidates.

use std::collections::BTreeSet;
use std::num::NonZeroU32;
use std::sync::Arc;

use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

use crate::application::repos::{ContentSource, SourceError};
use crate::cache::tags::names;
use crate::cache::{CacheError, Cached, ContentClass, ServerCache, Tag, gallery_slug};

pub const IMAGES: &str = "images";
pub const GALLERIES: &str = "galleries";
pub const BLOG_POSTS: &str = "blog-posts";

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("{what} not found")]
    NotFound { what: String },
    #[error(transparent)]
    Cache(CacheError),
}

impl From<CacheError> for ContentError {
    fn from(err: CacheError) -> Self {
        match err
            .upstream()
            .and_then(|source| source.downcast_ref::<SourceError>())
        {
            Some(SourceError::NotFound { what }) => Self::NotFound { what: what.clone() },
            _ => Self::Cache(err),
        }
    }
}

/// One public read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContentRead {
    Home,
    Stats,
    Galleries,
    GalleriesPage(NonZeroU32),
    Gallery(String),
    Images,
    BlogPosts,
    BlogPost(String),
    Global(String),
}

impl ContentRead {
    pub fn key(&self) -> String {
        match self {
            Self::Home => "home".into(),
            Self::Stats => "stats".into(),
            Self::Galleries => "galleries:list".into(),
            Self::GalleriesPage(page) => format!("galleries:page:{page}"),
            Self::Gallery(slug) => format!("gallery:{slug}"),
            Self::Images => "images:list".into(),
            Self::BlogPosts => "blog-posts:list".into(),
            Self::BlogPost(slug) => format!("blog-post:{slug}"),
            Self::Global(name) => format!("global:{name}"),
        }
    }

    pub fn tags(&self) -> Vec<Tag> {
        match self {
            Self::Home => vec![Tag::global(names::GLOBAL_HOME)],
            Self::Stats => vec![
                Tag::collection(IMAGES),
                Tag::collection(GALLERIES),
                Tag::collection(BLOG_POSTS),
            ],
            Self::Galleries => vec![
                Tag::from(names::GALLERIES),
                Tag::from(names::GALLERIES_LIST_OPTIMIZED),
                Tag::collection(GALLERIES),
            ],
            Self::GalleriesPage(_) => vec![
                Tag::from(names::GALLERIES),
                Tag::from(names::GALLERIES_PAGINATED),
                Tag::collection(GALLERIES),
            ],
            Self::Gallery(slug) => vec![
                Tag::from(names::GALLERY_BY_SLUG),
                Tag::record("gallery", slug),
            ],
            Self::Images => vec![Tag::from(names::IMAGES), Tag::collection(IMAGES)],
            Self::BlogPosts => vec![
                Tag::from(names::BLOG_POSTS),
                Tag::from(names::BLOG_POSTS_LIST),
                Tag::collection(BLOG_POSTS),
            ],
            Self::BlogPost(slug) => vec![
                Tag::from(names::BLOG_POSTS),
                Tag::record("blog-post", slug),
            ],
            Self::Global(name) => vec![Tag::global(name)],
        }
    }

    pub fn class(&self) -> ContentClass {
        match self {
            Self::Stats => ContentClass::Dynamic,
            Self::Home | Self::Global(_) => ContentClass::StaticPage,
            Self::Galleries
            | Self::GalleriesPage(_)
            | Self::Gallery(_)
            | Self::Images
            | Self::BlogPosts
            | Self::BlogPost(_) => ContentClass::SemiStatic,
        }
    }

    /// Reads addressed by a record or global tag, e.g. `gallery_<slug>`.
    fn from_tag(tag: &Tag) -> Option<Self> {
        let raw = tag.as_str();
        if let Some(slug) = raw.strip_prefix("gallery_") {
            return Some(Self::Gallery(slug.to_string()));
        }
        if let Some(slug) = raw.strip_prefix("blog-post_") {
            return Some(Self::BlogPost(slug.to_string()));
        }
        raw.strip_prefix("global_")
            .filter(|name| *name != names::GLOBAL_HOME)
            .map(|name| Self::Global(name.to_string()))
    }
}

pub struct ContentService {
    cache: Arc<ServerCache>,
    source: Arc<dyn ContentSource>,
    page_size: NonZeroU32,
    recent_limit: usize,
}

impl ContentService {
    pub fn new(
        cache: Arc<ServerCache>,
        source: Arc<dyn ContentSource>,
        page_size: NonZeroU32,
        recent_limit: usize,
    ) -> Self {
        Self {
            cache,
            source,
            page_size,
            recent_limit,
        }
    }

    pub fn cache(&self) -> &Arc<ServerCache> {
        &self.cache
    }

    pub async fn read(&self, read: &ContentRead) -> Result<Cached, ContentError> {
        let source = Arc::clone(&self.source);
        let owned = read.clone();
        let page_size = self.page_size;
        let recent_limit = self.recent_limit;

        let cached = self
            .cache
            .cached_entry(&read.key(), read.tags(), read.class(), move || {
                load(source, owned, page_size, recent_limit)
            })
            .await?;
        Ok(cached)
    }

    /// Re-fetch every cacheable read whose tags intersect `tags` (all listing
    /// reads when `tags` is empty). Returns how many reads were refreshed.
    pub async fn warm(&self, tags: &BTreeSet<Tag>) -> usize {
        let mut warmed = 0;
        for read in warm_candidates(tags) {
            if read.class() == ContentClass::Dynamic {
                continue;
            }
            self.cache.invalidate_key(&read.key());
            match self.read(&read).await {
                Ok(_) => warmed += 1,
                Err(err) => warn!(key = %read.key(), error = %err, "Warming read failed"),
            }
        }
        debug!(warmed, "Cache warm complete");
        warmed
    }
}

fn warm_candidates(tags: &BTreeSet<Tag>) -> Vec<ContentRead> {
    let mut reads = vec![
        ContentRead::Home,
        ContentRead::Galleries,
        ContentRead::GalleriesPage(NonZeroU32::MIN),
        ContentRead::Images,
        ContentRead::BlogPosts,
    ];
    if tags.is_empty() {
        return reads;
    }

    reads.extend(tags.iter().filter_map(ContentRead::from_tag));
    reads.retain(|read| read.tags().iter().any(|tag| tags.contains(tag)));
    reads
}

async fn load(
    source: Arc<dyn ContentSource>,
    read: ContentRead,
    page_size: NonZeroU32,
    recent_limit: usize,
) -> Result<Value, SourceError> {
    let source = source.as_ref();
    match read {
        ContentRead::Home => {
            let home = match source.global(names::GLOBAL_HOME).await {
                Ok(doc) => doc,
                Err(SourceError::NotFound { .. }) => Value::Null,
                Err(err) => return Err(err),
            };
            let galleries = gallery_cards(source).await?;
            let posts = sorted_posts(source).await?;
            Ok(json!({
                "home": home,
                "recentGalleries": galleries.into_iter().take(recent_limit).collect::<Vec<_>>(),
                "recentPosts": posts.into_iter().take(recent_limit).collect::<Vec<_>>(),
            }))
        }
        ContentRead::Stats => {
            let images = source.list(IMAGES).await?.len();
            let galleries = source.list(GALLERIES).await?.len();
            let posts = source.list(BLOG_POSTS).await?.len();
            Ok(json!({ "images": images, "galleries": galleries, "posts": posts }))
        }
        ContentRead::Galleries => Ok(json!({ "docs": gallery_cards(source).await? })),
        ContentRead::GalleriesPage(page) => paginate(gallery_cards(source).await?, page, page_size),
        ContentRead::Gallery(slug) => {
            let gallery = source.find(GALLERIES, &slug).await?;
            let images: Vec<Value> = source
                .list(IMAGES)
                .await?
                .into_iter()
                .filter(|image| gallery_slug(image).as_deref() == Some(slug.as_str()))
                .collect();
            Ok(json!({ "gallery": gallery, "images": images }))
        }
        ContentRead::Images => Ok(json!({ "docs": source.list(IMAGES).await? })),
        ContentRead::BlogPosts => Ok(json!({ "docs": sorted_posts(source).await? })),
        ContentRead::BlogPost(slug) => source.find(BLOG_POSTS, &slug).await,
        ContentRead::Global(name) => source.global(&name).await,
    }
}

/// Galleries with their image count and a cover image denormalized in.
async fn gallery_cards(source: &dyn ContentSource) -> Result<Vec<Value>, SourceError> {
    let galleries = source.list(GALLERIES).await?;
    let images = source.list(IMAGES).await?;

    Ok(galleries
        .into_iter()
        .map(|gallery| {
            let Value::Object(mut card) = gallery else {
                return gallery;
            };
            let slug = card.get("slug").and_then(Value::as_str).map(str::to_string);
            let members: Vec<&Value> = images
                .iter()
                .filter(|image| slug.is_some() && gallery_slug(image) == slug)
                .collect();

            card.insert("imageCount".into(), json!(members.len()));
            if !card.contains_key("coverImage")
                && let Some(cover) = members.first()
            {
                card.insert("coverImage".into(), (*cover).clone());
            }
            Value::Object(card)
        })
        .collect())
}

/// Blog posts, newest `publishedAt` first.
async fn sorted_posts(source: &dyn ContentSource) -> Result<Vec<Value>, SourceError> {
    let mut posts = source.list(BLOG_POSTS).await?;
    posts.sort_by(|a, b| {
        let published = |doc: &Value| doc.get("publishedAt").and_then(Value::as_str).map(str::to_string);
        published(b).cmp(&published(a))
    });
    Ok(posts)
}

fn paginate(docs: Vec<Value>, page: NonZeroU32, page_size: NonZeroU32) -> Result<Value, SourceError> {
    let per_page = page_size.get() as usize;
    let total = docs.len();
    let total_pages = total.div_ceil(per_page).max(1);
    let index = page.get() as usize;
    if index > total_pages {
        return Err(SourceError::not_found(format!("galleries page {page}")));
    }

    let slice: Vec<Value> = docs
        .into_iter()
        .skip((index - 1) * per_page)
        .take(per_page)
        .collect();
    Ok(json!({
        "docs": slice,
        "page": index,
        "totalDocs": total,
        "totalPages": total_pages,
        "hasNextPage": index < total_pages,
        "hasPrevPage": index > 1,
    }))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::cache::{CacheStatus, InvalidationEvent, PolicyTable, TagStore, cascade_tags};

    #[derive(Default)]
    struct MemorySource {
        collections: HashMap<String, Vec<Value>>,
        globals: HashMap<String, Value>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ContentSource for MemorySource {
        async fn list(&self, collection: &str) -> Result<Vec<Value>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.collections.get(collection).cloned().unwrap_or_default())
        }

        async fn find(&self, collection: &str, slug: &str) -> Result<Value, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.collections
                .get(collection)
                .and_then(|docs| {
                    docs.iter()
                        .find(|doc| doc.get("slug").and_then(Value::as_str) == Some(slug))
                })
                .cloned()
                .ok_or_else(|| SourceError::not_found(format!("{collection}/{slug}")))
        }

        async fn global(&self, name: &str) -> Result<Value, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.globals
                .get(name)
                .cloned()
                .ok_or_else(|| SourceError::not_found(format!("global {name}")))
        }
    }

    fn source() -> Arc<MemorySource> {
        let mut source = MemorySource::default();
        source.collections.insert(
            GALLERIES.into(),
            vec![
                json!({"slug": "iceland", "title": "Iceland"}),
                json!({"slug": "yosemite", "title": "Yosemite"}),
            ],
        );
        source.collections.insert(
            IMAGES.into(),
            vec![
                json!({"slug": "half-dome", "gallery": {"slug": "yosemite"}}),
                json!({"slug": "el-cap", "gallery": "yosemite"}),
                json!({"slug": "loose"}),
            ],
        );
        source.collections.insert(
            BLOG_POSTS.into(),
            vec![
                json!({"slug": "old", "publishedAt": "2024-01-01T00:00:00Z"}),
                json!({"slug": "new", "publishedAt": "2025-06-01T00:00:00Z"}),
            ],
        );
        source
            .globals
            .insert("home".into(), json!({"hero": "Light & stone"}));
        Arc::new(source)
    }

    fn service(source: &Arc<MemorySource>, page_size: u32) -> ContentService {
        let cache = Arc::new(ServerCache::new(
            Arc::new(TagStore::new()),
            PolicyTable::default(),
            true,
        ));
        let source: Arc<dyn ContentSource> = source.clone();
        ContentService::new(
            cache,
            source,
            NonZeroU32::new(page_size).expect("non-zero"),
            5,
        )
    }

    #[tokio::test]
    async fn gallery_cards_embed_image_counts() {
        let source = source();
        let service = service(&source, 10);

        let cached = service
            .read(&ContentRead::Galleries)
            .await
            .expect("galleries");
        let body: Value = cached.decode().expect("json");
        let docs = body["docs"].as_array().expect("docs array");

        assert_eq!(docs[0]["imageCount"], json!(0));
        assert_eq!(docs[1]["imageCount"], json!(2));
        assert_eq!(docs[1]["coverImage"]["slug"], json!("half-dome"));
    }

    #[tokio::test]
    async fn second_read_is_a_hit() {
        let source = source();
        let service = service(&source, 10);

        let first = service.read(&ContentRead::Images).await.expect("first");
        let calls = source.calls.load(Ordering::SeqCst);
        let second = service.read(&ContentRead::Images).await.expect("second");

        assert_eq!(first.status, CacheStatus::Miss);
        assert_eq!(second.status, CacheStatus::Hit);
        assert_eq!(source.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn missing_record_maps_to_not_found() {
        let source = source();
        let service = service(&source, 10);

        let err = service
            .read(&ContentRead::BlogPost("nope".into()))
            .await
            .expect_err("missing post");
        assert!(matches!(err, ContentError::NotFound { .. }));
    }

    #[tokio::test]
    async fn pages_galleries_and_rejects_pages_past_the_end() {
        let source = source();
        let service = service(&source, 1);

        let page = service
            .read(&ContentRead::GalleriesPage(NonZeroU32::new(2).expect("non-zero")))
            .await
            .expect("page two");
        let body: Value = page.decode().expect("json");
        assert_eq!(body["docs"][0]["slug"], json!("yosemite"));
        assert_eq!(body["totalPages"], json!(2));
        assert_eq!(body["hasNextPage"], json!(false));

        let err = service
            .read(&ContentRead::GalleriesPage(NonZeroU32::new(3).expect("non-zero")))
            .await
            .expect_err("past the end");
        assert!(matches!(err, ContentError::NotFound { .. }));
    }

    #[tokio::test]
    async fn gallery_detail_lists_member_images() {
        let source = source();
        let service = service(&source, 10);

        let cached = service
            .read(&ContentRead::Gallery("yosemite".into()))
            .await
            .expect("gallery");
        let body: Value = cached.decode().expect("json");
        assert_eq!(body["images"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn home_lists_newest_posts_first() {
        let source = source();
        let service = service(&source, 10);

        let body: Value = service
            .read(&ContentRead::Home)
            .await
            .expect("home")
            .decode()
            .expect("json");
        assert_eq!(body["home"]["hero"], json!("Light & stone"));
        assert_eq!(body["recentPosts"][0]["slug"], json!("new"));
    }

    #[test]
    fn read_tags_are_reached_by_their_cascades() {
        let image = cascade_tags(&InvalidationEvent::collection(
            IMAGES,
            Some(json!({"gallery": {"slug": "yosemite"}})),
        ));
        for read in [
            ContentRead::Home,
            ContentRead::Galleries,
            ContentRead::GalleriesPage(NonZeroU32::MIN),
            ContentRead::Gallery("yosemite".into()),
            ContentRead::Images,
        ] {
            assert!(
                read.tags().iter().any(|tag| image.contains(tag)),
                "{read:?} survives an image mutation"
            );
        }

        let post = cascade_tags(&InvalidationEvent::collection(
            BLOG_POSTS,
            Some(json!({"slug": "new"})),
        ));
        assert!(ContentRead::BlogPost("new".into()).tags().iter().any(|tag| post.contains(tag)));
        assert!(ContentRead::BlogPosts.tags().iter().any(|tag| post.contains(tag)));
    }

    #[test]
    fn warm_candidates_follow_tags() {
        let tags = BTreeSet::from([Tag::from("gallery_iceland"), Tag::global("footer")]);
        let reads = warm_candidates(&tags);
        assert!(reads.contains(&ContentRead::Gallery("iceland".into())));
        assert!(reads.contains(&ContentRead::Global("footer".into())));
        assert!(!reads.contains(&ContentRead::Images));

        assert_eq!(warm_candidates(&BTreeSet::new()).len(), 5);
    }

    #[tokio::test]
    async fn warm_refreshes_matching_reads() {
        let source = source();
        let service = service(&source, 10);

        let warmed = service.warm(&BTreeSet::from([Tag::from("images")])).await;
        assert_eq!(warmed, 1);
        let read = service.read(&ContentRead::Images).await.expect("warm entry");
        assert_eq!(read.status, CacheStatus::Hit);
    }
}
