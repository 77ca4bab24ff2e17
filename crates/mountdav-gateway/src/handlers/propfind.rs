//! PROPFIND over the virtual tree and mount contents.
//!
//! Mount directories are listed one level deep whatever the Depth (beyond
//! 0), page by page, until either the item cap or the page ceiling is hit.
//! Hitting a limit appends a 507 response for the collection itself.

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use mountdav_core::{
    BackendError, DirectoryListing, ListingEntry, ListingKey, Mount, ObjectMeta, ObjectStore,
};
use tracing::debug;

use super::{child_path, directory_exists, header_str, DavContext, MountTarget};
use crate::error::{DavError, Result};
use crate::resolver::{VirtualChild, VirtualDirectory};
use crate::xml::{self, Multistatus, PropEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Depth {
    Zero,
    One,
    Infinity,
}

fn parse_depth(headers: &HeaderMap) -> Result<Depth> {
    match header_str(headers, "depth") {
        None => Ok(Depth::Infinity),
        Some("0") => Ok(Depth::Zero),
        Some("1") => Ok(Depth::One),
        Some(v) if v.eq_ignore_ascii_case("infinity") => Ok(Depth::Infinity),
        Some(v) => Err(DavError::BadRequest(format!("invalid Depth header: {}", v))),
    }
}

/// Response entry cap: the configured maximum, lowered by `X-Max-Items`.
fn item_cap(ctx: &DavContext, headers: &HeaderMap) -> usize {
    let configured = ctx.state.settings.propfind_max_items;
    header_str(headers, "x-max-items")
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .map_or(configured, |n| n.min(configured))
}

fn multistatus(collection_href: &str, entries: &[PropEntry], truncated: bool) -> Response {
    let mut doc = Multistatus::new();
    for entry in entries {
        doc.push(entry);
    }
    if truncated {
        doc.push_status(
            collection_href,
            "HTTP/1.1 507 Insufficient Storage",
            &format!("Listing truncated after {} entries", entries.len()),
        );
    }

    let mut response = (
        StatusCode::MULTI_STATUS,
        [(header::CONTENT_TYPE, xml::CONTENT_TYPE)],
        doc.finish(),
    )
        .into_response();
    let headers = response.headers_mut();
    headers.insert("x-item-count", HeaderValue::from(entries.len()));
    if truncated {
        headers.insert("x-truncated", HeaderValue::from_static("true"));
    }
    response
}

/// Most recent update among the mounts at or below `path`.
fn newest_under(mounts: &[Mount], path: &str) -> Option<DateTime<Utc>> {
    let base = if path == "/" {
        "/".to_string()
    } else {
        format!("{}/", path)
    };
    mounts
        .iter()
        .filter(|m| m.mount_path == path || m.mount_path.starts_with(&base))
        .map(|m| m.updated_at)
        .max()
}

fn synthetic_entry(ctx: &DavContext, path: &str) -> PropEntry {
    PropEntry {
        href: ctx.href(path, true),
        display_name: path.rsplit('/').next().unwrap_or("").to_string(),
        is_collection: true,
        content_length: None,
        content_type: None,
        etag: xml::generated_etag(&format!("virtual:{}", path)),
        last_modified: newest_under(&ctx.mounts, path),
        created: None,
    }
}

pub(super) async fn virtual_directory(
    ctx: &DavContext,
    directory: &VirtualDirectory,
    headers: &HeaderMap,
) -> Result<Response> {
    let depth = parse_depth(headers)?;
    let cap = item_cap(ctx, headers);

    let mut entries = vec![synthetic_entry(ctx, &directory.path)];
    let mut truncated = false;
    if depth != Depth::Zero {
        for child in &directory.children {
            if entries.len() >= cap {
                truncated = true;
                break;
            }
            let path = child_path(&directory.path, child.segment());
            entries.push(match child {
                VirtualChild::Directory(_) => synthetic_entry(ctx, &path),
                VirtualChild::Mount(mount) => PropEntry {
                    href: ctx.href(&path, true),
                    display_name: mount.name.clone(),
                    is_collection: true,
                    content_length: None,
                    content_type: None,
                    etag: xml::generated_etag(&format!(
                        "mount:{}:{}",
                        mount.id,
                        mount.updated_at.timestamp()
                    )),
                    last_modified: Some(mount.updated_at),
                    created: Some(mount.created_at),
                },
            });
        }
    }

    let href = ctx.href(&directory.path, true);
    Ok(multistatus(&href, &entries, truncated))
}

fn file_entry(ctx: &DavContext, backend: &str, path: &str, meta: &ObjectMeta) -> PropEntry {
    let name = path.rsplit('/').next().unwrap_or("");
    PropEntry {
        href: ctx.href(path, false),
        display_name: name.to_string(),
        is_collection: false,
        content_length: Some(meta.size),
        content_type: Some(
            meta.content_type
                .clone()
                .filter(|ct| !ct.is_empty())
                .unwrap_or_else(|| ctx.state.content_types.content_type_for(name)),
        ),
        etag: meta
            .etag
            .clone()
            .unwrap_or_else(|| xml::generated_etag(&format!("{}:{}", backend, meta.key))),
        last_modified: meta.last_modified,
        created: None,
    }
}

pub(super) async fn mount_path(
    ctx: &DavContext,
    target: &MountTarget,
    headers: &HeaderMap,
) -> Result<Response> {
    let depth = parse_depth(headers)?;
    let cap = item_cap(ctx, headers);
    let store = target.store.as_ref();

    if !target.is_mount_root() && !ctx.path.collection_hint {
        match store.head(&target.file_key()).await {
            Ok(meta) => {
                let entry = file_entry(ctx, target.backend(), &ctx.path.path, &meta);
                ctx.touch(&target.mount).await;
                return Ok(multistatus(&entry.href, std::slice::from_ref(&entry), false));
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
    }

    let prefix = target.dir_prefix();
    let marker = if target.is_mount_root() {
        None
    } else {
        match store.head(&prefix).await {
            Ok(meta) => Some(meta),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        }
    };
    if marker.is_none() && !directory_exists(store, &prefix).await? {
        return Err(DavError::NotFound(ctx.path.path.clone()));
    }

    let href = ctx.href(&ctx.path.path, true);
    let (display_name, last_modified, created) = if target.is_mount_root() {
        (
            target.mount.name.clone(),
            Some(target.mount.updated_at),
            Some(target.mount.created_at),
        )
    } else {
        (
            ctx.path.name().to_string(),
            marker.as_ref().and_then(|m| m.last_modified),
            None,
        )
    };
    let mut entries = vec![PropEntry {
        href: href.clone(),
        display_name,
        is_collection: true,
        content_length: None,
        content_type: None,
        etag: marker
            .as_ref()
            .and_then(|m| m.etag.clone())
            .unwrap_or_else(|| xml::generated_etag(&format!("{}:{}", target.backend(), prefix))),
        last_modified,
        created,
    }];

    let mut truncated = false;
    if depth != Depth::Zero {
        // The collection itself counts toward the cap.
        let max_children = cap.saturating_sub(1);
        let listing = listing_for(ctx, target, &prefix, max_children).await?;
        truncated = listing.truncated;

        for entry in listing.entries.iter().take(max_children) {
            match entry {
                ListingEntry::Object(meta) => {
                    let Some(name) = meta.key.strip_prefix(prefix.as_str()) else {
                        continue;
                    };
                    let path = child_path(&ctx.path.path, name);
                    entries.push(file_entry(ctx, target.backend(), &path, meta));
                }
                ListingEntry::Prefix(child_prefix) => {
                    let Some(name) = child_prefix
                        .strip_prefix(prefix.as_str())
                        .map(|n| n.trim_end_matches('/'))
                        .filter(|n| !n.is_empty())
                    else {
                        continue;
                    };
                    let path = child_path(&ctx.path.path, name);
                    entries.push(PropEntry {
                        href: ctx.href(&path, true),
                        display_name: name.to_string(),
                        is_collection: true,
                        content_length: None,
                        content_type: None,
                        etag: xml::generated_etag(&format!(
                            "{}:{}",
                            target.backend(),
                            child_prefix
                        )),
                        last_modified: None,
                        created: None,
                    });
                }
            }
        }
    }

    ctx.touch(&target.mount).await;
    Ok(multistatus(&href, &entries, truncated))
}

/// One directory level, from the listing cache when it can answer.
async fn listing_for(
    ctx: &DavContext,
    target: &MountTarget,
    prefix: &str,
    max_entries: usize,
) -> Result<DirectoryListing> {
    let key = ListingKey::new(target.backend(), prefix);
    if let Some(cached) = ctx.state.listing_cache.get(&key).await {
        if let Some(listing) = fit(cached, max_entries) {
            debug!(prefix, entries = listing.entries.len(), "Listing cache hit");
            return Ok(listing);
        }
    }

    let listing = collect(
        target.store.as_ref(),
        prefix,
        max_entries,
        ctx.state.settings.propfind_page_size,
        ctx.state.settings.propfind_page_ceiling,
    )
    .await?;
    ctx.state
        .listing_cache
        .put(key, listing.clone(), target.mount.cache_ttl())
        .await;
    Ok(listing)
}

/// Reuse a cached listing under a possibly different cap. `None` when the
/// cached one stopped short of what the new cap would show.
fn fit(mut listing: DirectoryListing, max_entries: usize) -> Option<DirectoryListing> {
    if listing.entries.len() > max_entries {
        listing.entries.truncate(max_entries);
        listing.truncated = true;
        listing.limit = max_entries;
        return Some(listing);
    }
    if listing.truncated && listing.limit < max_entries {
        return None;
    }
    Some(listing)
}

fn entry_key(entry: &ListingEntry) -> &str {
    match entry {
        ListingEntry::Object(meta) => &meta.key,
        ListingEntry::Prefix(prefix) => prefix,
    }
}

/// List one level under `prefix` in pages of `page_size` keys, stopping
/// after `max_entries` entries or `page_ceiling` backend pages.
async fn collect(
    store: &dyn ObjectStore,
    prefix: &str,
    max_entries: usize,
    page_size: usize,
    page_ceiling: usize,
) -> std::result::Result<DirectoryListing, BackendError> {
    let mut entries = Vec::new();
    let mut token: Option<String> = None;
    let mut pages = 0usize;
    let mut truncated = false;

    loop {
        let page = store
            .list(prefix, Some("/"), token.as_deref(), page_size)
            .await?;
        pages += 1;

        let mut batch: Vec<ListingEntry> = page
            .objects
            .into_iter()
            .filter(|meta| meta.key != prefix)
            .map(ListingEntry::Object)
            .chain(page.common_prefixes.into_iter().map(ListingEntry::Prefix))
            .collect();
        batch.sort_by(|a, b| entry_key(a).cmp(entry_key(b)));
        entries.extend(batch);

        if entries.len() > max_entries {
            entries.truncate(max_entries);
            truncated = true;
            break;
        }
        match page.next_token {
            None => break,
            Some(_) if pages >= page_ceiling => {
                truncated = true;
                break;
            }
            Some(next) => token = Some(next),
        }
    }

    if truncated {
        debug!(prefix, entries = entries.len(), pages, "Listing truncated");
    }
    Ok(DirectoryListing {
        entries,
        truncated,
        limit: max_entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use mountdav_core::MemoryStore;

    async fn store_with(keys: &[&str]) -> MemoryStore {
        let store = MemoryStore::new("memory://test");
        for key in keys {
            store.put(key, Bytes::from_static(b"x"), None).await.unwrap();
        }
        store
    }

    fn names(listing: &DirectoryListing) -> Vec<&str> {
        listing.entries.iter().map(entry_key).collect()
    }

    #[tokio::test]
    async fn test_collect_one_level() {
        let store = store_with(&["d/", "d/a.txt", "d/sub/b.txt", "d/sub/c/d.txt", "e.txt"]).await;
        let listing = collect(&store, "d/", 100, 1000, 10).await.unwrap();
        assert_eq!(names(&listing), vec!["d/a.txt", "d/sub/"]);
        assert!(!listing.truncated);
    }

    #[tokio::test]
    async fn test_collect_caps_entries() {
        let keys: Vec<String> = (0..12).map(|i| format!("p/f{:02}", i)).collect();
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let store = store_with(&refs).await;

        let exact = collect(&store, "p/", 12, 1000, 10).await.unwrap();
        assert_eq!(exact.entries.len(), 12);
        assert!(!exact.truncated);

        let capped = collect(&store, "p/", 5, 1000, 10).await.unwrap();
        assert_eq!(capped.entries.len(), 5);
        assert!(capped.truncated);
        assert_eq!(capped.limit, 5);
    }

    #[tokio::test]
    async fn test_collect_stops_at_page_ceiling() {
        let keys: Vec<String> = (0..12).map(|i| format!("p/f{:02}", i)).collect();
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let store = store_with(&refs).await;

        // Three pages of four cover the directory exactly
        let whole = collect(&store, "p/", 100, 4, 3).await.unwrap();
        assert_eq!(whole.entries.len(), 12);
        assert!(!whole.truncated);

        // Three pages of two leave keys behind even though the cap is far off
        let short = collect(&store, "p/", 100, 2, 3).await.unwrap();
        assert_eq!(names(&short), vec!["p/f00", "p/f01", "p/f02", "p/f03", "p/f04", "p/f05"]);
        assert!(short.truncated);
        assert_eq!(short.limit, 100);
    }

    #[test]
    fn test_parse_depth() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_depth(&headers).unwrap(), Depth::Infinity);
        headers.insert("depth", HeaderValue::from_static("0"));
        assert_eq!(parse_depth(&headers).unwrap(), Depth::Zero);
        headers.insert("depth", HeaderValue::from_static("Infinity"));
        assert_eq!(parse_depth(&headers).unwrap(), Depth::Infinity);
        headers.insert("depth", HeaderValue::from_static("2"));
        assert!(parse_depth(&headers).is_err());
    }

    #[test]
    fn test_fit_cached_listing() {
        let listing = |n: usize, truncated: bool, limit: usize| DirectoryListing {
            entries: (0..n)
                .map(|i| ListingEntry::Prefix(format!("p{}/", i)))
                .collect(),
            truncated,
            limit,
        };

        // Complete listing answers any cap
        let full = fit(listing(3, false, 100), 10).unwrap();
        assert_eq!(full.entries.len(), 3);
        assert!(!full.truncated);

        // Bigger cached listing is cut down
        let cut = fit(listing(8, false, 100), 5).unwrap();
        assert_eq!(cut.entries.len(), 5);
        assert!(cut.truncated);

        // Truncated under a smaller cap cannot answer a bigger one
        assert!(fit(listing(5, true, 5), 10).is_none());
        assert!(fit(listing(5, true, 5), 5).is_some());
    }
}
