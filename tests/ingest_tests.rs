// tests/ingest_tests.rs

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use voxpopuli::error::{IngestError, IngestResult};
use voxpopuli::ingest::comments::CommentTreeBuilder;
use voxpopuli::ingest::dump::CommentRecord;
use voxpopuli::ingest::{Dataset, DatasetLinker, IngestOptions, IngestReport, Stage};
use voxpopuli::media::fetcher::{FetchedMedia, LocalRef, MediaFetcher};
use voxpopuli::media::relocate::{AssetManifest, relocate_assets};
use voxpopuli::models::media::{MediaContent, MediaKind, StoredVariant};
use voxpopuli::store::memory::{MemoryState, PostRow};
use voxpopuli::store::records::{NewAward, NewComment, NewPost, NewTrophy, NewUser, NewVoxsphere};
use voxpopuli::store::{EntityKind, ImageColumn, MemoryStore, PersistenceGateway};

/// Fetcher double: `forbidden` URLs are refused, `broken` URLs make the
/// tooling fail, anything else lands under /media.
#[derive(Default)]
struct StubFetcher {
    calls: Mutex<Vec<(MediaKind, String)>>,
}

impl StubFetcher {
    fn calls(&self) -> Vec<(MediaKind, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaFetcher for StubFetcher {
    async fn fetch(&self, kind: MediaKind, url: &str) -> IngestResult<FetchedMedia> {
        self.calls.lock().unwrap().push((kind, url.to_string()));
        if url.contains("broken") {
            return Err(IngestError::MediaFetchFailed {
                url: url.to_string(),
                reason: "tool crashed".to_string(),
            });
        }
        let local_ref = if url.contains("forbidden") {
            LocalRef::Unavailable
        } else {
            let name = url.rsplit('/').next().unwrap_or_default();
            LocalRef::Stored(format!("/media/{name}"))
        };
        Ok(FetchedMedia {
            local_ref,
            was_resized: false,
        })
    }
}

fn image_list(prefix: &str) -> Value {
    json!([
        {"url": format!("https://i.redd.it/{prefix}-s.png"), "height": 108, "width": 108},
        {"url": format!("https://i.redd.it/{prefix}-l.png"), "height": 640, "width": 640}
    ])
}

fn comments() -> Value {
    json!([
        {
            "author": "alice",
            "comment": "first",
            "comment_html": "<p>first</p><script>x()</script>",
            "comment_ups": 5,
            "parent_comment_id": "isParent",
            "replies": [
                {
                    "author": "bob",
                    "comment": "reply",
                    "parent_comment_id": "t1_a",
                    "replies": [
                        {"author": "ghost", "comment": "deep", "parent_comment_id": "t1_b", "replies": []}
                    ]
                }
            ]
        },
        {"author": "bob", "comment": "second", "parent_comment_id": "isParent", "replies": []}
    ])
}

fn posts() -> Value {
    json!([
        {
            "id": "p1",
            "title": "Image post",
            "author": "alice",
            "subreddit": "rust",
            "category": "Technology",
            "link_type": true,
            "ups": -3,
            "awards": [{"title": "Gold"}, {"title": "Missing"}],
            "postflair": "Discussion",
            "postflaircolor": "#00ff00",
            "media_content": {"type": "image", "data": image_list("p1")},
            "comments": comments()
        },
        {
            "id": "p2",
            "title": "Self post with stray media",
            "author": "bob",
            "subreddit": "games",
            "link_type": false,
            "media_content": {"type": "image", "data": image_list("p2")}
        },
        {
            "id": "p3",
            "title": "Multi post",
            "author": "nobody",
            "link_type": true,
            "media_content": {"type": "multi", "data": [
                {"type": "gif", "data": [{"url": "https://i.redd.it/m1.gif"}]},
                {"type": "video", "data": {"hls_url": "https://v.redd.it/m2/HLSPlaylist.m3u8", "dash_url": "https://v.redd.it/m2/DASH.mpd"}}
            ]}
        },
        {
            "id": "p4",
            "title": "Gallery post",
            "link_type": true,
            "media_content": {"type": "gallery", "data": [
                {"id": "a", "pics": [{"u": "https://i.redd.it/g1.png", "y": 100, "x": 100}]},
                {"id": "b", "pics": [{"u": "https://i.redd.it/forbidden-g2.png", "y": 200, "x": 200}]}
            ]}
        }
    ])
}

fn dataset_with_posts(posts: Value) -> Dataset {
    Dataset::from_values(
        json!([
            {"title": "Verified Email ", "image_link": "ve.png"},
            {"title": "Five-Year Club"}
        ]),
        json!([{"title": "Gold", "image_link": "gold.png"}]),
        json!({
            "Technology": [{
                "id": "t5_1",
                "title": "r/rust",
                "moderators": [["alice", "t2_a"]],
                "rules": [{"rule_title": "Be kind", "rule_desc": "Always."}],
                "flairs": [{"text": "Discussion", "color": "#00ff00"}, {"text": "Help", "color": "#ff0000"}]
            }],
            "Gaming": [{"id": "t5_2", "title": "r/games"}]
        }),
        json!({
            "alice": {
                "id": "t2_a",
                "username": "alice",
                "trophies": [{"title": "Verified Email"}],
                "subreddits_member": [["t5_1", "rust"], ["t5_2", "games"]]
            },
            "bob": {
                "id": "t2_b",
                "username": "bob",
                "trophies": [{"title": "Unknown Trophy"}],
                "subreddits_member": [["t5_1", "rust"]]
            }
        }),
        posts,
    )
    .unwrap()
}

fn dataset() -> Dataset {
    dataset_with_posts(posts())
}

async fn ingest(
    store: &MemoryStore,
    dataset: &Dataset,
    options: IngestOptions,
) -> IngestResult<IngestReport> {
    let fetcher = StubFetcher::default();
    DatasetLinker::new(store, &fetcher, options).run(dataset).await
}

fn post<'a>(state: &'a MemoryState, title: &str) -> &'a PostRow {
    state.posts.iter().find(|p| p.record.title == title).unwrap()
}

fn voxsphere_id(state: &MemoryState, name: &str) -> i64 {
    state.voxspheres.iter().find(|v| v.record.name == name).unwrap().id
}

#[tokio::test]
async fn links_reference_entities() {
    let store = MemoryStore::new();
    let report = ingest(&store, &dataset(), IngestOptions::default()).await.unwrap();
    let state = store.snapshot().await;

    assert!(report.is_clean(), "{:?}", report.failures);
    assert_eq!(report.stats(Stage::Trophies).created, 2);
    assert_eq!(state.trophies[0].1.title, "Verified Email");
    assert_eq!(state.topics.len(), 2);
    assert_eq!(state.voxspheres.len(), 2);
    assert_eq!(state.flairs.len(), 2);

    let rust_id = voxsphere_id(&state, "rust");
    let games_id = voxsphere_id(&state, "games");
    let (_, alice) = state.users.iter().find(|(_, u)| u.username == "alice").unwrap();
    assert_eq!(alice.trophy_ids.len(), 1);
    assert_eq!(alice.member_of, vec![rust_id, games_id]);
    assert_eq!(alice.moderator_of, vec![rust_id]);
    assert!(alice.email.ends_with("@voxpopuli.invalid"));

    let (_, bob) = state.users.iter().find(|(_, u)| u.username == "bob").unwrap();
    assert!(bob.trophy_ids.is_empty());
    assert!(bob.moderator_of.is_empty());
    assert_eq!(report.unresolved_count("trophy"), 1);
}

#[tokio::test]
async fn resolves_post_relations_and_flair() {
    let store = MemoryStore::new();
    let report = ingest(&store, &dataset(), IngestOptions::default()).await.unwrap();
    let state = store.snapshot().await;

    let p1 = post(&state, "Image post");
    assert_eq!(p1.record.voxsphere_id, Some(voxsphere_id(&state, "rust")));
    assert!(p1.record.author_id.is_some());
    assert!(p1.record.topic_id.is_some());
    assert_eq!(p1.record.award_ids.len(), 1);
    assert_eq!(p1.record.ups, -3);
    let flair = state.flairs.iter().find(|f| f.flair.title == "Discussion").unwrap();
    assert_eq!(p1.flair_id, Some(flair.id));

    let p3 = post(&state, "Multi post");
    assert_eq!(p3.record.author_id, None);
    assert_eq!(report.unresolved_count("award"), 1);
    assert_eq!(report.unresolved_count("user"), 1);
}

#[tokio::test]
async fn member_counts_match_listing_users() {
    let store = MemoryStore::new();
    ingest(&store, &dataset(), IngestOptions::default()).await.unwrap();
    let state = store.snapshot().await;

    let rust = state.voxspheres.iter().find(|v| v.record.name == "rust").unwrap();
    let games = state.voxspheres.iter().find(|v| v.record.name == "games").unwrap();
    assert_eq!((rust.total_members, rust.total_members_human.as_str()), (2, "2"));
    assert_eq!((games.total_members, games.total_members_human.as_str()), (1, "1"));
}

#[tokio::test]
async fn builds_comment_forest() {
    let store = MemoryStore::new();
    let report = ingest(&store, &dataset(), IngestOptions::default()).await.unwrap();
    let state = store.snapshot().await;

    let p1 = post(&state, "Image post");
    let comments: Vec<_> = state.comments.iter().filter(|c| c.record.post_id == p1.id).collect();
    assert_eq!(comments.len(), 4);
    assert_eq!(report.comments_written, 4);
    // Four inserts plus one update for each of the two comments with replies.
    assert_eq!(state.comment_writes, 6);

    let by_text = |text: &str| comments.iter().find(|c| c.record.comment == text).unwrap();
    let first = by_text("first");
    let reply = by_text("reply");
    let deep = by_text("deep");
    let second = by_text("second");

    assert_eq!(first.record.parent_id, None);
    assert_eq!(second.record.parent_id, None);
    assert_eq!(reply.record.parent_id, Some(first.id));
    assert_eq!(deep.record.parent_id, Some(reply.id));
    assert_eq!(first.reply_count, 1);
    assert_eq!(second.reply_count, 0);
    assert_eq!(first.record.comment_html, "<p>first</p>");
    assert_eq!(deep.record.author_id, None);
    assert_eq!(report.unresolved_count("comment author"), 1);
}

#[tokio::test]
async fn comment_forest_is_reproducible() {
    let records: Vec<CommentRecord> = serde_json::from_value(comments()).unwrap();

    let mut shapes = Vec::new();
    for _ in 0..2 {
        let store = MemoryStore::new();
        let dataset = dataset_with_posts(json!([{"id": "p", "title": "t"}]));
        ingest(&store, &dataset, IngestOptions::default()).await.unwrap();
        let post_id = store.snapshot().await.posts[0].id;

        let (roots, tally) = CommentTreeBuilder::new(&store).build(post_id, &records).await.unwrap();
        assert_eq!(roots.len(), 2);
        assert_eq!(tally.comments, 4);
        assert_eq!(tally.writes, 6);

        let state = store.snapshot().await;
        let index_of = |id: i64| state.comments.iter().position(|c| c.id == id);
        let shape: Vec<(String, Option<usize>)> = state
            .comments
            .iter()
            .map(|c| (c.record.comment.clone(), c.record.parent_id.and_then(index_of)))
            .collect();
        shapes.push(shape);
    }

    assert_eq!(shapes[0], shapes[1]);
}

#[tokio::test]
async fn non_link_posts_get_no_media() {
    let store = MemoryStore::new();
    let fetcher = StubFetcher::default();
    DatasetLinker::new(&store, &fetcher, IngestOptions::default())
        .run(&dataset())
        .await
        .unwrap();
    let state = store.snapshot().await;

    let p2 = post(&state, "Self post with stray media");
    assert!(p2.record.media_content.is_none());
    assert!(state.media_contents.iter().all(|c| c.post_id != p2.id));
    assert!(fetcher.calls().iter().all(|(_, url)| !url.contains("p2-")));
}

#[tokio::test]
async fn image_downloads_largest_rendition_and_keeps_variants() {
    let store = MemoryStore::new();
    let fetcher = StubFetcher::default();
    DatasetLinker::new(&store, &fetcher, IngestOptions::default())
        .run(&dataset())
        .await
        .unwrap();
    let state = store.snapshot().await;

    let p1 = post(&state, "Image post");
    let content = state.media_contents.iter().find(|c| c.post_id == p1.id).unwrap();
    assert_eq!(content.media_type, "image");
    assert_eq!(content.image_link, "/media/p1-l.png");
    assert_eq!(content.original_link, "https://i.redd.it/p1-l.png");
    assert_eq!(state.variants.iter().filter(|v| v.post_id == p1.id).count(), 2);
    assert!(fetcher.calls().contains(&(MediaKind::Image, "https://i.redd.it/p1-l.png".to_string())));
}

#[tokio::test]
async fn target_height_picks_fitting_rendition() {
    let store = MemoryStore::new();
    let options = IngestOptions {
        target_height: Some(100),
        ..IngestOptions::default()
    };
    ingest(&store, &dataset(), options).await.unwrap();
    let state = store.snapshot().await;

    let p1 = post(&state, "Image post");
    let content = state.media_contents.iter().find(|c| c.post_id == p1.id).unwrap();
    assert_eq!(content.image_link, "/media/p1-s.png");
}

#[tokio::test]
async fn multi_post_keeps_each_sub_item() {
    let store = MemoryStore::new();
    ingest(&store, &dataset(), IngestOptions::default()).await.unwrap();
    let state = store.snapshot().await;

    let p3 = post(&state, "Multi post");
    let content = state.media_contents.iter().find(|c| c.post_id == p3.id).unwrap();
    assert_eq!(content.media_type, "multi");

    let items = &content.sub_items.0;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].kind, MediaKind::Gif);
    assert_eq!(items[0].local_ref, "/media/m1.gif");
    assert_eq!(items[1].kind, MediaKind::Video);
    assert_eq!(items[1].original_link, "https://v.redd.it/m2/HLSPlaylist.m3u8");
    assert_eq!(content.original_link, "https://v.redd.it/m2/HLSPlaylist.m3u8");
}

#[tokio::test]
async fn refused_download_is_stored_as_unavailable() {
    let store = MemoryStore::new();
    let report = ingest(&store, &dataset(), IngestOptions::default()).await.unwrap();
    let state = store.snapshot().await;

    let p4 = post(&state, "Gallery post");
    let content = state.media_contents.iter().find(|c| c.post_id == p4.id).unwrap();
    let gallery = &content.gallery.0;
    assert_eq!(gallery.len(), 2);
    assert_eq!(gallery[0].0, "/media/g1.png");
    assert_eq!(gallery[1].0, "NA");
    assert_eq!(gallery[1].1, "https://i.redd.it/forbidden-g2.png");
    assert_eq!(report.media_unavailable, 1);

    let orders: Vec<_> = state
        .variants
        .iter()
        .filter(|v| v.post_id == p4.id)
        .map(|v| v.variant.order_index)
        .collect();
    assert_eq!(orders, vec![Some(0), Some(1)]);
}

fn posts_with_failure() -> Value {
    json!([
        {"id": "ok-1", "title": "before"},
        {
            "id": "bad",
            "title": "broken media",
            "link_type": true,
            "media_content": {"type": "image", "data": [{"url": "https://i.redd.it/broken.png"}]}
        },
        {"id": "malformed", "title": 42},
        {"id": "ok-2", "title": "after"}
    ])
}

#[tokio::test]
async fn failing_records_do_not_stop_the_stage() {
    let store = MemoryStore::new();
    let report = ingest(&store, &dataset_with_posts(posts_with_failure()), IngestOptions::default())
        .await
        .unwrap();
    let state = store.snapshot().await;

    let titles: Vec<_> = state.posts.iter().map(|p| p.record.title.as_str()).collect();
    assert_eq!(titles, vec!["before", "after"]);

    let stats = report.stats(Stage::Posts);
    assert_eq!((stats.created, stats.failed), (2, 2));
    let keys: Vec<_> = report.failures.iter().map(|f| f.key.as_str()).collect();
    assert_eq!(keys, vec!["bad", "index:2"]);
    // Later stages still ran.
    assert_eq!(report.stats(Stage::MemberCounts).created, 2);
}

#[tokio::test]
async fn fail_fast_aborts_on_first_failure() {
    let store = MemoryStore::new();
    let options = IngestOptions {
        fail_fast: true,
        ..IngestOptions::default()
    };
    let err = ingest(&store, &dataset_with_posts(posts_with_failure()), options)
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::MediaFetchFailed { .. }));

    let state = store.snapshot().await;
    assert_eq!(state.posts.len(), 1);
    assert_eq!(state.voxspheres.iter().map(|v| v.total_members).sum::<i64>(), 0);
}

#[tokio::test]
async fn rerun_resumes_after_checkpoints() {
    let store = MemoryStore::new();
    ingest(&store, &dataset(), IngestOptions::default()).await.unwrap();
    let first = store.snapshot().await;
    assert_eq!(first.checkpoints.get(&EntityKind::Post).map(String::as_str), Some("p4"));

    let report = ingest(&store, &dataset(), IngestOptions::default()).await.unwrap();
    let second = store.snapshot().await;

    assert_eq!(second.posts.len(), first.posts.len());
    assert_eq!(second.users.len(), first.users.len());
    assert_eq!(second.trophies.len(), first.trophies.len());
    assert_eq!(report.stats(Stage::Posts).skipped, 4);
    assert_eq!(report.stats(Stage::Posts).created, 0);
    assert_eq!(report.stats(Stage::Trophies).skipped, 2);
}

#[tokio::test]
async fn resume_skips_up_to_checkpoint() {
    let store = MemoryStore::new();
    store.save_checkpoint(EntityKind::Post, "p2").await.unwrap();

    let report = ingest(&store, &dataset(), IngestOptions::default()).await.unwrap();
    let state = store.snapshot().await;

    let titles: Vec<_> = state.posts.iter().map(|p| p.record.title.as_str()).collect();
    assert_eq!(titles, vec!["Multi post", "Gallery post"]);
    assert_eq!(report.stats(Stage::Posts).skipped, 2);
}

#[tokio::test]
async fn relocation_rewrites_local_references() {
    let store = MemoryStore::new();
    ingest(&store, &dataset(), IngestOptions::default()).await.unwrap();

    let manifest = AssetManifest::from([
        ("/media/g1.png".to_string(), "https://cdn.example.com/g1.png".to_string()),
        ("/media/m1.gif".to_string(), "https://cdn.example.com/m1.gif".to_string()),
        ("https://i.redd.it/p1-s.png".to_string(), "https://cdn.example.com/p1-s.png".to_string()),
    ]);
    let report = relocate_assets(&store, &manifest).await.unwrap();
    assert_eq!(report.contents_updated, 2);
    assert_eq!(report.variants_updated, 1);

    let state = store.snapshot().await;
    let gallery_post = post(&state, "Gallery post");
    let gallery = state.media_contents.iter().find(|c| c.post_id == gallery_post.id).unwrap();
    assert_eq!(gallery.gallery.0[0].0, "https://cdn.example.com/g1.png");
    assert_eq!(gallery.gallery.0[1].0, "NA");
    assert!(state.variants.iter().any(|v| v.variant.url == "https://cdn.example.com/p1-s.png"));
}

#[tokio::test]
async fn loads_dump_directory_with_missing_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("users.json"),
        r#"{"alice": {"id": "t2_a", "username": "alice"}}"#,
    )
    .unwrap();
    std::fs::write(dir.path().join("posts.json"), r#"[{"id": 17, "title": "numeric id"}]"#).unwrap();

    let dataset = Dataset::load(dir.path()).await.unwrap();
    assert!(dataset.trophies.is_empty());
    assert!(dataset.voxspheres.is_empty());
    assert_eq!(dataset.users.len(), 1);

    let store = MemoryStore::new();
    ingest(&store, &dataset, IngestOptions::default()).await.unwrap();
    let state = store.snapshot().await;
    assert_eq!(state.checkpoints.get(&EntityKind::Post).map(String::as_str), Some("17"));
}

#[tokio::test]
async fn unreadable_dump_is_malformed() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("posts.json"), "not json").unwrap();

    let err = Dataset::load(dir.path()).await.unwrap_err();
    assert!(matches!(err, IngestError::MalformedRecord { kind: "dump file", .. }));
}

#[tokio::test]
async fn object_dumps_are_linked_in_file_order() {
    let users: Value = serde_json::from_str(
        r#"{"zed": {"id": "t2_z", "username": "zed"}, "amy": {"id": "t2_a", "username": "amy"}}"#,
    )
    .unwrap();
    let subreddits: Value = serde_json::from_str(
        r#"{"Zoology": [{"id": "t5_z", "title": "r/animals"}], "Art": [{"id": "t5_a", "title": "r/painting"}]}"#,
    )
    .unwrap();
    let dataset = Dataset::from_values(json!([]), json!([]), subreddits, users, json!([])).unwrap();

    let store = MemoryStore::new();
    ingest(&store, &dataset, IngestOptions::default()).await.unwrap();
    let state = store.snapshot().await;

    let users: Vec<_> = state.users.iter().map(|(_, u)| u.username.as_str()).collect();
    let topics: Vec<_> = state.topics.iter().map(|(_, t)| t.as_str()).collect();
    assert_eq!(users, vec!["zed", "amy"]);
    assert_eq!(topics, vec!["Zoology", "Art"]);
    assert_eq!(state.checkpoints.get(&EntityKind::User).map(String::as_str), Some("amy"));
    assert_eq!(state.checkpoints.get(&EntityKind::Voxsphere).map(String::as_str), Some("painting"));
}

#[tokio::test]
async fn relocation_rewrites_entity_images() {
    let dataset = Dataset::from_values(
        json!([{"title": "Verified Email", "image_link": "https://redditstatic.com/ve.png"}]),
        json!([{"title": "Gold", "image_link": "https://redditstatic.com/gold.png"}]),
        json!({"Technology": [{
            "id": "t5_1",
            "title": "r/rust",
            "logoUrl": "https://styles.redditmedia.com/rust-logo.png",
            "bannerUrl": "https://styles.redditmedia.com/unmapped.png"
        }]}),
        json!([{
            "id": "t2_a",
            "username": "alice",
            "avatar_img": "https://styles.redditmedia.com/alice.png",
            "banner_img": ""
        }]),
        json!([]),
    )
    .unwrap();
    let store = MemoryStore::new();
    ingest(&store, &dataset, IngestOptions::default()).await.unwrap();

    let manifest: AssetManifest = [
        ("https://redditstatic.com/ve.png", "https://ik.example.com/trophies/ve.png"),
        ("https://redditstatic.com/gold.png", "https://ik.example.com/awards/gold.png"),
        ("https://styles.redditmedia.com/rust-logo.png", "https://ik.example.com/logos/rust.png"),
        ("https://styles.redditmedia.com/alice.png", "https://ik.example.com/avatars/alice.png"),
    ]
    .into_iter()
    .map(|(from, to)| (from.to_string(), to.to_string()))
    .collect();
    let report = relocate_assets(&store, &manifest).await.unwrap();
    assert_eq!(report.images_updated, 4);

    let state = store.snapshot().await;
    assert_eq!(
        state.trophies[0].1.image_link.as_deref(),
        Some("https://ik.example.com/trophies/ve.png")
    );
    assert_eq!(state.awards[0].1.image_link.as_deref(), Some("https://ik.example.com/awards/gold.png"));
    assert_eq!(
        state.users[0].1.avatar_img.as_deref(),
        Some("https://ik.example.com/avatars/alice.png")
    );
    assert_eq!(state.users[0].1.banner_img.as_deref(), Some(""));
    let rust = &state.voxspheres[0].record;
    assert_eq!(rust.logo_url.as_deref(), Some("https://ik.example.com/logos/rust.png"));
    assert_eq!(rust.banner_url.as_deref(), Some("https://styles.redditmedia.com/unmapped.png"));

    // A second pass finds nothing left to move.
    let again = relocate_assets(&store, &manifest).await.unwrap();
    assert_eq!(again.images_updated, 0);
    assert_eq!(
        store.entity_images(ImageColumn::UserBanner).await.unwrap(),
        Vec::<(i64, String)>::new()
    );
}

#[tokio::test]
async fn unknown_checkpoint_does_not_duplicate_posts() {
    let store = MemoryStore::new();
    ingest(&store, &dataset(), IngestOptions::default()).await.unwrap();
    let first = store.snapshot().await;

    store.save_checkpoint(EntityKind::Post, "no-longer-in-dump").await.unwrap();
    let report = ingest(&store, &dataset(), IngestOptions::default()).await.unwrap();
    let second = store.snapshot().await;

    assert_eq!(second.posts.len(), first.posts.len());
    assert_eq!(second.comments.len(), first.comments.len());
    assert_eq!(report.stats(Stage::Posts).skipped, 4);
    assert_eq!(report.stats(Stage::Posts).created, 0);
}

/// Memory store whose comment inserts fail for one comment text.
struct FailingComments {
    inner: MemoryStore,
    fail_on: &'static str,
}

#[async_trait]
impl PersistenceGateway for FailingComments {
    async fn find_id(&self, kind: EntityKind, key: &str) -> IngestResult<Option<i64>> {
        self.inner.find_id(kind, key).await
    }
    async fn create_trophies(&self, trophies: &[NewTrophy]) -> IngestResult<u64> {
        self.inner.create_trophies(trophies).await
    }
    async fn create_awards(&self, awards: &[NewAward]) -> IngestResult<u64> {
        self.inner.create_awards(awards).await
    }
    async fn find_or_create_topic(&self, title: &str) -> IngestResult<i64> {
        self.inner.find_or_create_topic(title).await
    }
    async fn create_voxsphere(&self, voxsphere: &NewVoxsphere) -> IngestResult<i64> {
        self.inner.create_voxsphere(voxsphere).await
    }
    async fn create_user(&self, user: &NewUser) -> IngestResult<i64> {
        self.inner.create_user(user).await
    }
    async fn find_flair(&self, voxsphere_id: i64, title: &str, color_hex: Option<&str>) -> IngestResult<Option<i64>> {
        self.inner.find_flair(voxsphere_id, title, color_hex).await
    }
    async fn create_post(&self, post: &NewPost) -> IngestResult<i64> {
        self.inner.create_post(post).await
    }
    async fn set_post_flair(&self, post_id: i64, flair_id: i64) -> IngestResult<()> {
        self.inner.set_post_flair(post_id, flair_id).await
    }
    async fn create_comment(&self, comment: &NewComment) -> IngestResult<i64> {
        if comment.comment == self.fail_on {
            return Err(IngestError::Persistence("connection reset".to_string()));
        }
        self.inner.create_comment(comment).await
    }
    async fn attach_replies(&self, parent_id: i64, child_ids: &[i64]) -> IngestResult<()> {
        self.inner.attach_replies(parent_id, child_ids).await
    }
    async fn attach_comments(&self, post_id: i64, comment_ids: &[i64]) -> IngestResult<()> {
        self.inner.attach_comments(post_id, comment_ids).await
    }
    async fn update_member_count(&self, name: &str, total: i64, human: &str) -> IngestResult<bool> {
        self.inner.update_member_count(name, total, human).await
    }
    async fn checkpoint(&self, kind: EntityKind) -> IngestResult<Option<String>> {
        self.inner.checkpoint(kind).await
    }
    async fn save_checkpoint(&self, kind: EntityKind, key: &str) -> IngestResult<()> {
        self.inner.save_checkpoint(kind, key).await
    }
    async fn media_contents(&self) -> IngestResult<Vec<MediaContent>> {
        self.inner.media_contents().await
    }
    async fn update_media_content(&self, content: &MediaContent) -> IngestResult<()> {
        self.inner.update_media_content(content).await
    }
    async fn media_variants(&self) -> IngestResult<Vec<StoredVariant>> {
        self.inner.media_variants().await
    }
    async fn update_variant_url(&self, id: i64, url: &str) -> IngestResult<()> {
        self.inner.update_variant_url(id, url).await
    }
    async fn entity_images(&self, column: ImageColumn) -> IngestResult<Vec<(i64, String)>> {
        self.inner.entity_images(column).await
    }
    async fn update_entity_image(&self, column: ImageColumn, id: i64, url: &str) -> IngestResult<()> {
        self.inner.update_entity_image(column, id, url).await
    }
    async fn delete_post(&self, post_id: i64) -> IngestResult<()> {
        self.inner.delete_post(post_id).await
    }
}

#[tokio::test]
async fn failed_comment_forest_leaves_no_orphan_post() {
    let store = FailingComments {
        inner: MemoryStore::new(),
        fail_on: "deep",
    };
    let fetcher = StubFetcher::default();
    let report = DatasetLinker::new(&store, &fetcher, IngestOptions::default())
        .run(&dataset())
        .await
        .unwrap();

    let keys: Vec<_> = report.failures.iter().map(|f| f.key.as_str()).collect();
    assert_eq!(keys, vec!["p1"]);

    let state = store.inner.snapshot().await;
    assert!(state.posts.iter().all(|p| p.record.title != "Image post"));
    assert!(state.comments.is_empty());
    assert_eq!(state.posts.len(), 3);
    assert_eq!(state.media_contents.len(), 2);

    // Once the store recovers, a rerun writes the post exactly once.
    let healthy = FailingComments {
        inner: MemoryStore::with_state(state),
        fail_on: "",
    };
    healthy.save_checkpoint(EntityKind::Post, "missing").await.unwrap();
    DatasetLinker::new(&healthy, &fetcher, IngestOptions::default())
        .run(&dataset())
        .await
        .unwrap();
    let state = healthy.inner.snapshot().await;
    assert_eq!(state.posts.iter().filter(|p| p.record.title == "Image post").count(), 1);
    assert_eq!(state.posts.len(), 4);
    assert_eq!(state.comments.len(), 4);
}

/// Completes fetches in reverse order: earlier jobs sleep longer.
#[derive(Default)]
struct ReverseFetcher {
    completed: Mutex<Vec<String>>,
}

#[async_trait]
impl MediaFetcher for ReverseFetcher {
    async fn fetch(&self, _kind: MediaKind, url: &str) -> IngestResult<FetchedMedia> {
        let delay: u64 = url
            .rsplit('/')
            .next()
            .and_then(|name| name.split('.').next())
            .and_then(|stem| stem.rsplit('-').next())
            .and_then(|ms| ms.parse().ok())
            .unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        self.completed.lock().unwrap().push(url.to_string());
        Ok(FetchedMedia {
            local_ref: LocalRef::Stored(format!("/media/{delay}")),
            was_resized: false,
        })
    }
}

#[tokio::test]
async fn out_of_order_fetches_keep_source_order() {
    let posts = json!([
        {
            "id": "g",
            "title": "Gallery",
            "link_type": true,
            "media_content": {"type": "gallery", "data": [
                {"pics": [{"u": "https://i.redd.it/g-90.png", "y": 10, "x": 10}]},
                {"pics": [{"u": "https://i.redd.it/g-60.png", "y": 10, "x": 10}]},
                {"pics": [{"u": "https://i.redd.it/g-30.png", "y": 10, "x": 10}]},
                {"pics": [{"u": "https://i.redd.it/g-0.png", "y": 10, "x": 10}]}
            ]}
        },
        {
            "id": "m",
            "title": "Multi",
            "link_type": true,
            "media_content": {"type": "multi", "data": [
                {"type": "image", "data": [{"url": "https://i.redd.it/m-80.png"}]},
                {"type": "gif", "data": [{"url": "https://i.redd.it/m-40.gif"}]},
                {"type": "image", "data": [{"url": "https://i.redd.it/m-0.png"}]}
            ]}
        }
    ]);
    let store = MemoryStore::new();
    let fetcher = ReverseFetcher::default();
    DatasetLinker::new(&store, &fetcher, IngestOptions::default())
        .run(&dataset_with_posts(posts))
        .await
        .unwrap();

    let completed = fetcher.completed.lock().unwrap().clone();
    assert_eq!(completed[0], "https://i.redd.it/g-0.png");
    assert_eq!(completed[4], "https://i.redd.it/m-0.png");

    let state = store.snapshot().await;
    let gallery = state.media_contents.iter().find(|c| c.media_type == "gallery").unwrap();
    let locals: Vec<_> = gallery.gallery.0.iter().map(|e| e.0.as_str()).collect();
    let originals: Vec<_> = gallery.gallery.0.iter().map(|e| e.1.as_str()).collect();
    assert_eq!(locals, vec!["/media/90", "/media/60", "/media/30", "/media/0"]);
    assert_eq!(
        originals,
        vec![
            "https://i.redd.it/g-90.png",
            "https://i.redd.it/g-60.png",
            "https://i.redd.it/g-30.png",
            "https://i.redd.it/g-0.png"
        ]
    );

    let multi = state.media_contents.iter().find(|c| c.media_type == "multi").unwrap();
    let items: Vec<_> = multi
        .sub_items
        .0
        .iter()
        .map(|i| (i.kind, i.local_ref.as_str()))
        .collect();
    assert_eq!(
        items,
        vec![
            (MediaKind::Image, "/media/80"),
            (MediaKind::Gif, "/media/40"),
            (MediaKind::Image, "/media/0")
        ]
    );
}
