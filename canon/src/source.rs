//! Canon loading.
//!
//! Canon is read fresh for every request through the [`CanonSource`]
//! trait. The file-backed source reads one YAML (or JSON) document per
//! card from a directory; the in-memory source is used by tests and by
//! callers that already hold the records.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::types::{CanonRecord, CanonSide, Orientation};

/// Error types for canon loading.
#[derive(Debug, thiserror::Error)]
pub enum CanonError {
    /// No canon exists for the card
    #[error("Canon not found for card: {0}")]
    NotFound(String),

    /// Canon exists but carries no usable content
    #[error("Canon is empty for card {card_id} ({orientation})")]
    Empty {
        card_id: String,
        orientation: Orientation,
    },

    /// Canon is a placeholder that has not been written yet
    #[error("Canon not yet authored for card: {0}")]
    NotAuthored(String),

    /// Canon document exists but has no content at all
    #[error("Canon document is blank for card: {0}")]
    BlankDocument(String),

    /// Canon document could not be decoded
    #[error("Failed to parse canon for {card_id}: {message}")]
    Parse { card_id: String, message: String },

    /// Underlying read failed
    #[error("I/O error reading canon: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait for resolving a card identity to its canon record.
#[async_trait]
pub trait CanonSource: Send + Sync {
    /// Load the full record for a card.
    async fn load(&self, card_id: &str) -> Result<CanonRecord, CanonError>;
}

/// Load the side of a card's canon matching `orientation`.
///
/// Missing, unauthored, and empty canon are all precondition failures;
/// nothing is defaulted.
pub async fn load_side(
    source: &dyn CanonSource,
    card_id: &str,
    orientation: Orientation,
) -> Result<CanonSide, CanonError> {
    let record = source.load(card_id).await?;

    if !record.is_authored() {
        return Err(CanonError::NotAuthored(card_id.to_string()));
    }

    let side = record.side(orientation);
    if side.is_empty() {
        return Err(CanonError::Empty {
            card_id: card_id.to_string(),
            orientation,
        });
    }

    tracing::debug!(
        card_id = %card_id,
        orientation = %orientation,
        themes = side.themes.len(),
        core = side.core.len(),
        "Loaded canon"
    );

    Ok(side.clone())
}

/// Canon stored as one document per card in a directory.
///
/// Looks for `<card_id>.yaml`, `<card_id>.yml`, then `<card_id>.json`.
pub struct FileCanonSource {
    root: PathBuf,
}

impl FileCanonSource {
    /// Create a source rooted at a directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn candidates(&self, card_id: &str) -> [(PathBuf, DocFormat); 3] {
        [
            (self.root.join(format!("{}.yaml", card_id)), DocFormat::Yaml),
            (self.root.join(format!("{}.yml", card_id)), DocFormat::Yaml),
            (self.root.join(format!("{}.json", card_id)), DocFormat::Json),
        ]
    }
}

#[derive(Debug, Clone, Copy)]
enum DocFormat {
    Yaml,
    Json,
}

/// Card ids become file names; anything that could escape the root is rejected.
fn is_safe_card_id(card_id: &str) -> bool {
    !card_id.is_empty()
        && card_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[async_trait]
impl CanonSource for FileCanonSource {
    async fn load(&self, card_id: &str) -> Result<CanonRecord, CanonError> {
        if !is_safe_card_id(card_id) {
            return Err(CanonError::NotFound(card_id.to_string()));
        }

        for (path, format) in self.candidates(card_id) {
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(CanonError::Io(e)),
            };

            if content.trim().is_empty() {
                return Err(CanonError::BlankDocument(card_id.to_string()));
            }

            let parsed = match format {
                DocFormat::Yaml => {
                    serde_yaml::from_str::<CanonRecord>(&content).map_err(|e| e.to_string())
                }
                DocFormat::Json => {
                    serde_json::from_str::<CanonRecord>(&content).map_err(|e| e.to_string())
                }
            };

            let mut record = parsed.map_err(|message| CanonError::Parse {
                card_id: card_id.to_string(),
                message,
            })?;

            if record.card_id.is_empty() {
                record.card_id = card_id.to_string();
            }

            tracing::debug!(path = %path.display(), "Read canon document");
            return Ok(record);
        }

        Err(CanonError::NotFound(card_id.to_string()))
    }
}

/// In-memory canon, keyed by card id.
pub struct InMemoryCanonSource {
    records: Arc<RwLock<HashMap<String, CanonRecord>>>,
}

impl InMemoryCanonSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a source holding the given records.
    pub fn with_records(records: impl IntoIterator<Item = CanonRecord>) -> Self {
        let map = records
            .into_iter()
            .map(|r| (r.card_id.clone(), r))
            .collect();
        Self {
            records: Arc::new(RwLock::new(map)),
        }
    }

    /// Insert or replace a record.
    pub async fn insert(&self, record: CanonRecord) {
        let mut records = self.records.write().await;
        records.insert(record.card_id.clone(), record);
    }
}

impl Default for InMemoryCanonSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CanonSource for InMemoryCanonSource {
    async fn load(&self, card_id: &str) -> Result<CanonRecord, CanonError> {
        let records = self.records.read().await;
        records
            .get(card_id)
            .cloned()
            .ok_or_else(|| CanonError::NotFound(card_id.to_string()))
    }
}
