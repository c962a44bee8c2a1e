//! Core data model.
//!
//! Payloads are what travels through the queues; records are what a
//! successful processor run leaves behind in table storage.

use serde::{Deserialize, Serialize};

use crate::storage::TableRow;

/// Table holding one row per post.
pub const POST_TABLE: &str = "PostData";

/// Table holding one row per comment, partitioned by post.
pub const COMMENT_TABLE: &str = "PostDataComments";

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// An uploaded file carried inline in a create-post message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageFile {
    pub file_name: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

impl ImageFile {
    /// Extension of the original file name including the dot, or "" if none.
    pub fn extension(&self) -> String {
        std::path::Path::new(&self.file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{ext}"))
            .unwrap_or_default()
    }
}

/// Body of a create-post message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePostPayload {
    pub id: String,
    pub image_caption: String,
    pub image_file: ImageFile,
}

/// Body of a create-comment message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommentPayload {
    pub post_id: String,
    pub comments: String,
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Persisted post: partitioned by blob name, keyed by post id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    pub partition_key: String,
    pub row_key: String,
    pub image_caption: String,
}

impl PostRecord {
    pub fn to_row(&self) -> TableRow {
        TableRow {
            table: POST_TABLE,
            partition_key: self.partition_key.clone(),
            row_key: self.row_key.clone(),
            properties: serde_json::json!({ "imageCaption": self.image_caption }),
        }
    }
}

/// Persisted comment: partitioned by post id, keyed by a generated id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentRecord {
    pub partition_key: String,
    pub row_key: String,
    pub comments: String,
}

impl CommentRecord {
    pub fn to_row(&self) -> TableRow {
        TableRow {
            table: COMMENT_TABLE,
            partition_key: self.partition_key.clone(),
            row_key: self.row_key.clone(),
            properties: serde_json::json!({ "comments": self.comments }),
        }
    }
}
