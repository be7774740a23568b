// src/media/selector.rs

//! Viewport-fit asset selection.
//!
//! Every logical image is stored in several resolutions. The client sends
//! its viewport height and gets back the smallest rendition that still
//! covers it, or the tallest one when nothing is tall enough.

use std::collections::BTreeMap;

use crate::models::media::{MediaType, MediaVariant};

/// Variants of one gallery picture, sorted by height ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryGroup {
    pub order_index: i32,
    pub variants: Vec<MediaVariant>,
}

/// Lower-bound search for the first variant with `height >= target_height`.
///
/// `variants` must be sorted by height ascending. Falls back to the last
/// (tallest) variant when none qualifies, so a non-empty input always
/// yields a variant. Returns `None` only for an empty slice.
pub fn select_variant(variants: &[MediaVariant], target_height: i32) -> Option<&MediaVariant> {
    match variants.len() {
        0 => return None,
        1 => return variants.first(),
        _ => {}
    }

    let mut low = 0;
    let mut high = variants.len();
    while low < high {
        let mid = low + (high - low) / 2;
        if variants[mid].height >= target_height {
            high = mid;
        } else {
            low = mid + 1;
        }
    }

    variants.get(low).or_else(|| variants.last())
}

/// Groups gallery variants by `order_index` and sorts each group by height.
///
/// Variants without an `order_index` are treated as group 0.
pub fn group_gallery(variants: &[MediaVariant]) -> Vec<GalleryGroup> {
    let mut groups: BTreeMap<i32, Vec<MediaVariant>> = BTreeMap::new();
    for variant in variants {
        groups
            .entry(variant.order_index.unwrap_or(0))
            .or_default()
            .push(variant.clone());
    }

    groups
        .into_iter()
        .map(|(order_index, mut variants)| {
            variants.sort_by_key(|v| v.height);
            GalleryGroup {
                order_index,
                variants,
            }
        })
        .collect()
}

/// Picks one variant per gallery group, preserving group order.
pub fn select_gallery(variants: &[MediaVariant], target_height: i32) -> Vec<MediaVariant> {
    group_gallery(variants)
        .iter()
        .filter_map(|group| select_variant(&group.variants, target_height).cloned())
        .collect()
}

/// Selection for a whole post: one variant per picture for galleries,
/// a single variant otherwise.
pub fn select_for_post(media_type: &str, mut variants: Vec<MediaVariant>, target_height: i32) -> Vec<MediaVariant> {
    if media_type == MediaType::Gallery.as_str() {
        return select_gallery(&variants, target_height);
    }
    variants.sort_by_key(|v| v.height);
    select_variant(&variants, target_height).cloned().into_iter().collect()
}
