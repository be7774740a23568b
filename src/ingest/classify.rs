// src/ingest/classify.rs

//! Decides which assets of a post get downloaded and how the results are
//! laid out in its media content row.

use crate::error::{IngestError, IngestResult};
use crate::ingest::dump::{GalleryItem, PostRecord, Resolution, VideoSource, decode};
use crate::media::fetcher::FetchedMedia;
use crate::media::selector::select_variant;
use crate::models::media::{GalleryEntry, MediaKind, MediaType, MediaVariant, SubItemResult};
use crate::store::records::NewMediaContent;

/// One asset to download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchJob {
    /// How the asset is fetched.
    pub kind: MediaKind,
    /// The slot the result lands in. Differs from `kind` when an image
    /// resolution list only carries a gif/mp4 source.
    pub declared: MediaKind,
    pub url: String,
}

/// Everything needed to build a post's media content once the jobs ran.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlan {
    pub media_type: MediaType,
    /// In source order; results must be handed back in the same order.
    pub jobs: Vec<FetchJob>,
    pub variants: Vec<MediaVariant>,
}

#[derive(Debug, serde::Deserialize)]
struct MultiItem {
    #[serde(rename = "type")]
    media_type: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Returns `None` when the post carries no media to attach.
///
/// Media is only attached to link posts whose declared type is image,
/// gif, video, gallery or multi.
pub fn classify(post: &PostRecord, target_height: Option<i32>) -> IngestResult<Option<MediaPlan>> {
    if !post.link_type {
        return Ok(None);
    }
    let Some(content) = &post.media_content else {
        return Ok(None);
    };
    let Some(media_type) = MediaType::parse(&content.media_type) else {
        return Ok(None);
    };

    let plan = match media_type {
        MediaType::Image | MediaType::Gif => {
            let resolutions: Vec<Resolution> = decode("media resolution list", &content.data)?;
            let declared = if media_type == MediaType::Gif { MediaKind::Gif } else { MediaKind::Image };
            MediaPlan {
                media_type,
                jobs: vec![resolution_job(&resolutions, declared, target_height)?],
                variants: variants_of(&resolutions, None),
            }
        }
        MediaType::Video => {
            let source: VideoSource = decode("video source", &content.data)?;
            MediaPlan {
                media_type,
                jobs: vec![video_job(&source)?],
                variants: Vec::new(),
            }
        }
        MediaType::Gallery => {
            let items: Vec<GalleryItem> = decode("gallery", &content.data)?;
            let mut jobs = Vec::with_capacity(items.len());
            let mut variants = Vec::new();
            for (index, item) in items.iter().enumerate() {
                jobs.push(resolution_job(&item.pics, MediaKind::Image, target_height)?);
                variants.extend(variants_of(&item.pics, Some(index as i32)));
            }
            MediaPlan {
                media_type,
                jobs,
                variants,
            }
        }
        MediaType::Multi => {
            let items: Vec<MultiItem> = decode("multi media list", &content.data)?;
            let mut jobs = Vec::with_capacity(items.len());
            for item in &items {
                let job = match item.media_type.as_str() {
                    "video" => video_job(&decode("video source", &item.data)?)?,
                    "image" => resolution_job(
                        &decode::<Vec<Resolution>>("media resolution list", &item.data)?,
                        MediaKind::Image,
                        target_height,
                    )?,
                    "gif" => resolution_job(
                        &decode::<Vec<Resolution>>("media resolution list", &item.data)?,
                        MediaKind::Gif,
                        target_height,
                    )?,
                    other => {
                        tracing::debug!(media_type = other, "ignoring multi sub-item");
                        continue;
                    }
                };
                jobs.push(job);
            }
            MediaPlan {
                media_type,
                jobs,
                variants: Vec::new(),
            }
        }
        MediaType::Link | MediaType::Text => return Ok(None),
    };

    Ok(Some(plan))
}

/// The type stored on the post row.
pub fn post_media_type(post: &PostRecord, plan: Option<&MediaPlan>) -> MediaType {
    if let Some(plan) = plan {
        return plan.media_type;
    }
    match post.media_content.as_ref().map(|c| c.media_type.as_str()) {
        Some("link") => MediaType::Link,
        _ => MediaType::Text,
    }
}

/// Builds the media content row from the fetch results, which must be in job order.
pub fn assemble(plan: &MediaPlan, fetched: Vec<FetchedMedia>) -> NewMediaContent {
    let mut content = NewMediaContent {
        media_type: plan.media_type,
        original_link: plan.jobs.last().map(|job| job.url.clone()).unwrap_or_default(),
        image_link: String::new(),
        gif_link: String::new(),
        video_link: String::new(),
        gallery: Vec::new(),
        sub_items: Vec::new(),
    };

    for (job, result) in plan.jobs.iter().zip(fetched) {
        let local_ref = result.local_ref.into_string();
        match plan.media_type {
            MediaType::Gallery => content.gallery.push(GalleryEntry(local_ref, job.url.clone())),
            MediaType::Multi => {
                set_slot(&mut content, job.declared, local_ref.clone());
                content.sub_items.push(SubItemResult {
                    kind: job.declared,
                    local_ref,
                    original_link: job.url.clone(),
                });
            }
            _ => set_slot(&mut content, job.declared, local_ref),
        }
    }

    content
}

fn set_slot(content: &mut NewMediaContent, kind: MediaKind, local_ref: String) {
    match kind {
        MediaKind::Image => content.image_link = local_ref,
        MediaKind::Gif => content.gif_link = local_ref,
        MediaKind::Video => content.video_link = local_ref,
    }
}

fn video_job(source: &VideoSource) -> IngestResult<FetchJob> {
    let url = source.preferred_url().ok_or_else(|| IngestError::MalformedRecord {
        kind: "video source",
        reason: "neither hls_url nor dash_url is set".to_string(),
    })?;
    Ok(FetchJob {
        kind: MediaKind::Video,
        declared: MediaKind::Video,
        url: url.to_string(),
    })
}

fn resolution_job(
    resolutions: &[Resolution],
    declared: MediaKind,
    target_height: Option<i32>,
) -> IngestResult<FetchJob> {
    let (kind, url) = pick_resolution(resolutions, target_height).ok_or_else(|| IngestError::MalformedRecord {
        kind: "media resolution list",
        reason: "no resolution carries a source url".to_string(),
    })?;
    let kind = if declared == MediaKind::Gif { MediaKind::Gif } else { kind };
    Ok(FetchJob { kind, declared, url })
}

/// The rendition to download: the best fit for `target_height` when one
/// is configured, otherwise the last (largest) entry.
fn pick_resolution(resolutions: &[Resolution], target_height: Option<i32>) -> Option<(MediaKind, String)> {
    if let Some(target) = target_height {
        let sized = variants_of(resolutions, None);
        if let Some(chosen) = select_variant(&sized, target) {
            return resolutions.iter().find_map(|r| {
                r.source()
                    .filter(|(_, url)| *url == chosen.url)
                    .map(|(kind, url)| (kind, url.to_string()))
            });
        }
    }

    resolutions
        .iter()
        .rev()
        .find_map(|r| r.source())
        .map(|(kind, url)| (kind, url.to_string()))
}

/// Renditions with known dimensions, sorted by height with duplicate heights dropped.
fn variants_of(resolutions: &[Resolution], order_index: Option<i32>) -> Vec<MediaVariant> {
    let mut variants: Vec<MediaVariant> = resolutions
        .iter()
        .filter_map(|r| {
            let (_, url) = r.source()?;
            let height = r.height.filter(|h| *h > 0)?;
            let width = r.width.filter(|w| *w > 0)?;
            Some(MediaVariant {
                url: url.to_string(),
                height,
                width,
                order_index,
            })
        })
        .collect();
    variants.sort_by_key(|v| v.height);
    variants.dedup_by_key(|v| v.height);
    variants
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::fetcher::LocalRef;
    use serde_json::{Value, json};

    fn post(link_type: bool, media: Value) -> PostRecord {
        serde_json::from_value(json!({
            "title": "t",
            "link_type": link_type,
            "media_content": media,
        }))
        .unwrap()
    }

    fn stored(path: &str) -> FetchedMedia {
        FetchedMedia {
            local_ref: LocalRef::Stored(path.to_string()),
            was_resized: false,
        }
    }

    fn image_list() -> Value {
        json!([
            {"url": "https://i/s.png", "height": 108, "width": 100},
            {"url": "https://i/m.png", "height": 320, "width": 300},
            {"url": "https://i/l.png", "height": 960, "width": 900}
        ])
    }

    #[test]
    fn test_non_link_post_gets_no_media() {
        let post = post(false, json!({"type": "image", "data": image_list()}));
        assert_eq!(classify(&post, None).unwrap(), None);
        assert_eq!(post_media_type(&post, None), MediaType::Text);
    }

    #[test]
    fn test_link_type_without_media_type() {
        let post = post(true, json!({"type": "link", "data": {}}));
        assert_eq!(classify(&post, None).unwrap(), None);
        assert_eq!(post_media_type(&post, None), MediaType::Link);
    }

    #[test]
    fn test_image_downloads_largest_by_default() {
        let plan = classify(&post(true, json!({"type": "image", "data": image_list()})), None)
            .unwrap()
            .unwrap();
        assert_eq!(plan.jobs[0].url, "https://i/l.png");
        assert_eq!(plan.jobs[0].kind, MediaKind::Image);
        assert_eq!(plan.variants.len(), 3);
    }

    #[test]
    fn test_image_honours_target_height() {
        let plan = classify(&post(true, json!({"type": "image", "data": image_list()})), Some(200))
            .unwrap()
            .unwrap();
        assert_eq!(plan.jobs[0].url, "https://i/m.png");
    }

    #[test]
    fn test_image_with_gif_source_is_fetched_as_gif() {
        let plan = classify(
            &post(true, json!({"type": "image", "data": [{"mp4": "https://i/a.mp4"}]})),
            None,
        )
        .unwrap()
        .unwrap();
        assert_eq!(plan.jobs[0].kind, MediaKind::Gif);
        assert_eq!(plan.jobs[0].declared, MediaKind::Image);

        let content = assemble(&plan, vec![stored("/m/a.mp4")]);
        assert_eq!(content.image_link, "/m/a.mp4");
    }

    #[test]
    fn test_video_prefers_hls_and_records_fetched_link() {
        let plan = classify(
            &post(true, json!({"type": "video", "data": {"dash_url": "https://v/d.mpd"}})),
            None,
        )
        .unwrap()
        .unwrap();
        let content = assemble(&plan, vec![stored("/m/v.mp4")]);
        assert_eq!(content.original_link, "https://v/d.mpd");
        assert_eq!(content.video_link, "/m/v.mp4");
    }

    #[test]
    fn test_gallery_tuples_and_variants() {
        let plan = classify(
            &post(
                true,
                json!({"type": "gallery", "data": [
                    {"id": "a", "pics": [{"u": "https://g/a1", "y": 100, "x": 100}, {"u": "https://g/a2", "y": 200, "x": 200}]},
                    {"id": "b", "pics": [{"u": "https://g/b1", "y": 150, "x": 150}]}
                ]}),
            ),
            None,
        )
        .unwrap()
        .unwrap();

        assert_eq!(plan.variants.iter().filter(|v| v.order_index == Some(1)).count(), 1);

        let content = assemble(
            &plan,
            vec![
                stored("/m/a.webp"),
                FetchedMedia {
                    local_ref: LocalRef::Unavailable,
                    was_resized: false,
                },
            ],
        );
        assert_eq!(
            content.gallery,
            vec![
                GalleryEntry("/m/a.webp".into(), "https://g/a2".into()),
                GalleryEntry("NA".into(), "https://g/b1".into()),
            ]
        );
        assert_eq!(content.original_link, "https://g/b1");
    }

    #[test]
    fn test_multi_keeps_each_sub_item() {
        let plan = classify(
            &post(
                true,
                json!({"type": "multi", "data": [
                    {"type": "image", "data": image_list()},
                    {"type": "text", "data": {}},
                    {"type": "gif", "data": [{"url": "https://i/x.gif"}]},
                    {"type": "video", "data": {"hls_url": "https://v/h.m3u8"}}
                ]}),
            ),
            None,
        )
        .unwrap()
        .unwrap();
        assert_eq!(plan.jobs.len(), 3);

        let content = assemble(
            &plan,
            vec![stored("/m/1.webp"), stored("/m/2.gif"), stored("/m/3.mp4")],
        );
        let kinds: Vec<_> = content.sub_items.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![MediaKind::Image, MediaKind::Gif, MediaKind::Video]);
        assert_eq!(content.sub_items[1].original_link, "https://i/x.gif");
        assert_eq!(content.original_link, "https://v/h.m3u8");
        assert_eq!(content.gif_link, "/m/2.gif");
    }

    #[test]
    fn test_image_without_source_is_malformed() {
        let err = classify(&post(true, json!({"type": "image", "data": [{"height": 10}]})), None).unwrap_err();
        assert!(matches!(err, IngestError::MalformedRecord { .. }));
    }
}
