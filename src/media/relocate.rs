// src/media/relocate.rs

//! Rewrites stored media references once the downloaded assets have been
//! uploaded somewhere else. The upload step produces a manifest mapping
//! each local or upstream reference to its hosted URL. Post media and the
//! images of trophies, awards, users and voxspheres are covered.

use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;

use crate::error::{IngestError, IngestResult};
use crate::models::media::MediaContent;
use crate::store::{ImageColumn, PersistenceGateway};

pub type AssetManifest = HashMap<String, String>;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RelocationReport {
    pub contents_scanned: usize,
    pub contents_updated: usize,
    pub variants_updated: usize,
    /// Trophy, award, avatar, banner and logo URLs.
    pub images_updated: usize,
}

pub async fn load_manifest(path: &Path) -> IngestResult<AssetManifest> {
    let raw = tokio::fs::read_to_string(path).await?;
    serde_json::from_str(&raw).map_err(|e| IngestError::MalformedRecord {
        kind: "asset manifest",
        reason: e.to_string(),
    })
}

fn rewrite_link(link: &mut String, manifest: &AssetManifest) -> bool {
    match manifest.get(link.as_str()) {
        Some(hosted) if hosted != link => {
            *link = hosted.clone();
            true
        }
        _ => false,
    }
}

/// Applies the manifest to one media content row. Returns whether anything changed.
///
/// Gallery tuples keep their original URL; only the local half is replaced.
pub fn rewrite_content(content: &mut MediaContent, manifest: &AssetManifest) -> bool {
    let mut changed = false;
    changed |= rewrite_link(&mut content.image_link, manifest);
    changed |= rewrite_link(&mut content.gif_link, manifest);
    changed |= rewrite_link(&mut content.video_link, manifest);

    for entry in content.gallery.0.iter_mut() {
        changed |= rewrite_link(&mut entry.0, manifest);
    }
    for item in content.sub_items.0.iter_mut() {
        changed |= rewrite_link(&mut item.local_ref, manifest);
    }
    changed
}

pub async fn relocate_assets(
    store: &dyn PersistenceGateway,
    manifest: &AssetManifest,
) -> IngestResult<RelocationReport> {
    let mut report = RelocationReport::default();

    for mut content in store.media_contents().await? {
        report.contents_scanned += 1;
        if rewrite_content(&mut content, manifest) {
            store.update_media_content(&content).await?;
            report.contents_updated += 1;
        }
    }

    for variant in store.media_variants().await? {
        if let Some(hosted) = manifest.get(&variant.url) {
            store.update_variant_url(variant.id, hosted).await?;
            report.variants_updated += 1;
        }
    }

    for column in ImageColumn::ALL {
        for (id, url) in store.entity_images(column).await? {
            if let Some(hosted) = manifest.get(&url).filter(|hosted| **hosted != url) {
                store.update_entity_image(column, id, hosted).await?;
                report.images_updated += 1;
            }
        }
        tracing::debug!(%column, "entity images relocated");
    }

    tracing::info!(
        scanned = report.contents_scanned,
        contents = report.contents_updated,
        variants = report.variants_updated,
        images = report.images_updated,
        "Asset relocation finished."
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::media::{GalleryEntry, MediaKind, SubItemResult};
    use sqlx::types::Json;

    fn content() -> MediaContent {
        MediaContent {
            id: 1,
            post_id: 1,
            media_type: "gallery".to_string(),
            original_link: "https://i.redd.it/a.png".to_string(),
            image_link: String::new(),
            gif_link: String::new(),
            video_link: String::new(),
            gallery: Json(vec![
                GalleryEntry("/media/a.webp".into(), "https://i.redd.it/a.png".into()),
                GalleryEntry("NA".into(), "https://i.redd.it/b.png".into()),
            ]),
            sub_items: Json(vec![SubItemResult {
                kind: MediaKind::Gif,
                local_ref: "/media/c.gif".into(),
                original_link: "https://i.redd.it/c.gif".into(),
            }]),
        }
    }

    #[test]
    fn test_rewrite_gallery_keeps_unmapped_entries() {
        let manifest = AssetManifest::from([(
            "/media/a.webp".to_string(),
            "https://cdn.example.com/a.webp".to_string(),
        )]);
        let mut content = content();

        assert!(rewrite_content(&mut content, &manifest));
        assert_eq!(content.gallery.0[0].0, "https://cdn.example.com/a.webp");
        assert_eq!(content.gallery.0[0].1, "https://i.redd.it/a.png");
        assert_eq!(content.gallery.0[1].0, "NA");
        assert_eq!(content.sub_items.0[0].local_ref, "/media/c.gif");
    }

    #[test]
    fn test_rewrite_reports_no_change() {
        let mut content = content();
        assert!(!rewrite_content(&mut content, &AssetManifest::new()));
    }

    #[test]
    fn test_rewrite_links() {
        let manifest = AssetManifest::from([(
            "/media/v.mp4".to_string(),
            "https://cdn.example.com/v.mp4".to_string(),
        )]);
        let mut content = content();
        content.video_link = "/media/v.mp4".to_string();

        assert!(rewrite_content(&mut content, &manifest));
        assert_eq!(content.video_link, "https://cdn.example.com/v.mp4");
    }
}
