// src/ingest/comments.rs

use futures::future::{BoxFuture, FutureExt};

use crate::error::IngestResult;
use crate::ingest::dump::CommentRecord;
use crate::store::records::NewComment;
use crate::store::{EntityKind, PersistenceGateway};
use crate::utils::html::clean_html;

/// Counters collected while building one post's comment forest.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TreeTally {
    /// Inserts plus reply updates.
    pub writes: usize,
    pub comments: usize,
    pub unresolved_authors: usize,
}

/// Persists a nested comment dump depth-first, in source order.
///
/// Each comment is inserted before its replies; once the replies exist the
/// parent is updated with their ids. A comment is top-level when it carries
/// the `isParent` sentinel or sits at the root of the dump.
pub struct CommentTreeBuilder<'a> {
    store: &'a dyn PersistenceGateway,
}

impl<'a> CommentTreeBuilder<'a> {
    pub fn new(store: &'a dyn PersistenceGateway) -> Self {
        Self { store }
    }

    /// Returns the ids of the top-level comments.
    pub async fn build(&self, post_id: i64, comments: &[CommentRecord]) -> IngestResult<(Vec<i64>, TreeTally)> {
        let mut tally = TreeTally::default();
        let ids = self.build_level(post_id, None, comments, &mut tally).await?;
        Ok((ids, tally))
    }

    fn build_level<'b>(
        &'b self,
        post_id: i64,
        parent_id: Option<i64>,
        comments: &'b [CommentRecord],
        tally: &'b mut TreeTally,
    ) -> BoxFuture<'b, IngestResult<Vec<i64>>> {
        async move {
            let mut ids = Vec::with_capacity(comments.len());

            for record in comments {
                let author_id = match record.author.as_deref() {
                    Some(username) => {
                        let id = self.store.find_id(EntityKind::User, username).await?;
                        if id.is_none() {
                            tally.unresolved_authors += 1;
                        }
                        id
                    }
                    None => None,
                };

                let parent = if record.is_top_level() { None } else { parent_id };
                let id = self
                    .store
                    .create_comment(&NewComment {
                        post_id,
                        author_id,
                        parent_id: parent,
                        comment: record.comment.clone(),
                        comment_html: clean_html(&record.comment_html),
                        ups: record.comment_ups,
                        created_at_unix: record.created_utc,
                    })
                    .await?;
                tally.writes += 1;
                tally.comments += 1;

                let children = self.build_level(post_id, Some(id), &record.replies, tally).await?;
                if !children.is_empty() {
                    self.store.attach_replies(id, &children).await?;
                    tally.writes += 1;
                }

                ids.push(id);
            }

            Ok(ids)
        }
        .boxed()
    }
}
