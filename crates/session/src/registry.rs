use std::collections::HashSet;

use chrono::Local;

use agrichat_transport::{RagTransport, TransportResult, UploadReceipt};

/// Separator between the server-assigned id and the display name in raw
/// listing entries (`<internalId>_<filename>`).
pub const RAW_NAME_SEPARATOR: char = '_';

/// One uploaded file as known to this client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Server-assigned identifier, stable for the file's lifetime.
    pub internal_id: String,
    /// Display name shown to the user.
    pub filename: String,
    /// Client-local date the entry was created or refreshed; the server
    /// exposes no timestamp of its own.
    pub upload_date: String,
    /// Indexing-size hint from the upload receipt, when the server gave one.
    pub chunks: Option<u32>,
}

impl Document {
    fn from_receipt(receipt: &UploadReceipt) -> Self {
        Self {
            internal_id: receipt.internal_id.clone(),
            filename: receipt.filename.clone(),
            upload_date: local_date_string(),
            chunks: receipt
                .indexing_summary
                .as_deref()
                .and_then(chunks_from_summary),
        }
    }
}

/// Ordered collection of uploaded documents, keyed by internal id.
///
/// Contents are the last successful listing adjusted by subsequent
/// successful upload/delete calls in issue order. A monotonic version
/// counter lets a listing that raced a later mutation be discarded instead
/// of clobbering fresher optimistic state.
#[derive(Debug, Default)]
pub struct DocumentRegistry {
    documents: Vec<Document>,
    version: u64,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn get(&self, internal_id: &str) -> Option<&Document> {
        self.documents
            .iter()
            .find(|document| document.internal_id == internal_id)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Version snapshot taken before a listing round-trip; pass it back to
    /// [`Self::apply_listing`] so a stale result can be recognized.
    pub fn snapshot(&self) -> u64 {
        self.version
    }

    /// Replaces the registry with a parsed listing. Returns false (and
    /// leaves the registry untouched) when a mutation landed after the
    /// snapshot was taken, meaning the listing predates current state.
    pub fn apply_listing(&mut self, raw_names: &[String], snapshot: u64) -> bool {
        if self.version != snapshot {
            tracing::warn!(
                snapshot,
                version = self.version,
                "discarding stale document listing"
            );
            return false;
        }

        self.documents = parse_listing(raw_names);
        self.version = self.version.saturating_add(1);
        true
    }

    /// Degrades a failed listing to an empty registry (best-effort read
    /// semantics), honoring the same staleness guard as a success.
    pub fn apply_listing_failure(&mut self, snapshot: u64) {
        if self.version != snapshot {
            return;
        }
        self.documents.clear();
        self.version = self.version.saturating_add(1);
    }

    /// Full refresh round-trip. Transport failure is logged and degrades to
    /// an empty registry; it is never surfaced as an error.
    pub async fn refresh(&mut self, transport: &dyn RagTransport) {
        let snapshot = self.snapshot();
        match transport.list_documents().await {
            Ok(raw_names) => {
                self.apply_listing(&raw_names, snapshot);
            }
            Err(error) => {
                tracing::warn!(error = %error, "document listing failed; clearing registry");
                self.apply_listing_failure(snapshot);
            }
        }
    }

    /// Uploads a file and optimistically appends the resulting entry,
    /// avoiding a full listing round-trip. On failure the registry is
    /// unchanged and the error propagates.
    pub async fn upload(
        &mut self,
        transport: &dyn RagTransport,
        file_bytes: Vec<u8>,
        filename: &str,
    ) -> TransportResult<Document> {
        let receipt = transport
            .upload_document(file_bytes, filename.to_string())
            .await?;

        let document = Document::from_receipt(&receipt);
        let existing = self
            .documents
            .iter()
            .position(|entry| entry.internal_id == document.internal_id);
        match existing {
            // Re-upload of a known id refreshes the entry in place.
            Some(index) => self.documents[index] = document.clone(),
            None => self.documents.push(document.clone()),
        }
        self.version = self.version.saturating_add(1);
        Ok(document)
    }

    /// Deletes by internal id and removes the matching entry. On failure the
    /// registry is unchanged and the error propagates.
    pub async fn delete(
        &mut self,
        transport: &dyn RagTransport,
        internal_id: &str,
    ) -> TransportResult<()> {
        transport.delete_document(internal_id.to_string()).await?;

        self.documents
            .retain(|document| document.internal_id != internal_id);
        self.version = self.version.saturating_add(1);
        Ok(())
    }
}

/// Splits raw composite names into documents, skipping entries with no
/// separator and duplicated ids (first occurrence wins).
fn parse_listing(raw_names: &[String]) -> Vec<Document> {
    let mut seen = HashSet::new();
    let mut documents = Vec::with_capacity(raw_names.len());

    for raw in raw_names {
        let Some((internal_id, filename)) = raw.split_once(RAW_NAME_SEPARATOR) else {
            tracing::warn!(raw_name = %raw, "skipping listing entry without id separator");
            continue;
        };

        if internal_id.is_empty() || !seen.insert(internal_id.to_string()) {
            tracing::warn!(raw_name = %raw, "skipping listing entry with empty or duplicate id");
            continue;
        }

        documents.push(Document {
            internal_id: internal_id.to_string(),
            filename: filename.to_string(),
            upload_date: local_date_string(),
            chunks: None,
        });
    }

    documents
}

/// Leading integer of an indexing summary such as `"12 chunks indexed"`.
fn chunks_from_summary(summary: &str) -> Option<u32> {
    let digits: String = summary
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

fn local_date_string() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::{ScriptedChat, ScriptedTransport};
    use agrichat_transport::{TransportError, UploadReceipt};

    fn unavailable(reason: &str) -> TransportError {
        TransportError::Unavailable {
            stage: "test",
            reason: reason.to_string(),
        }
    }

    #[test]
    fn raw_names_split_on_first_separator() {
        let raw = vec!["abc123_report.pdf".to_string()];
        let documents = parse_listing(&raw);

        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].internal_id, "abc123");
        assert_eq!(documents[0].filename, "report.pdf");
    }

    #[test]
    fn filename_keeps_separators_after_the_first() {
        let raw = vec!["id9_soil_health_2024.pdf".to_string()];
        let documents = parse_listing(&raw);

        assert_eq!(documents[0].internal_id, "id9");
        assert_eq!(documents[0].filename, "soil_health_2024.pdf");
    }

    #[test]
    fn malformed_entries_are_skipped_not_fatal() {
        let raw = vec![
            "ok1_a.pdf".to_string(),
            "no-separator".to_string(),
            "_nameless.pdf".to_string(),
            "ok1_duplicate.pdf".to_string(),
            "ok2_b.pdf".to_string(),
        ];
        let documents = parse_listing(&raw);

        let ids: Vec<&str> = documents
            .iter()
            .map(|document| document.internal_id.as_str())
            .collect();
        assert_eq!(ids, vec!["ok1", "ok2"]);
    }

    #[test]
    fn chunk_hint_parses_a_leading_integer() {
        assert_eq!(chunks_from_summary("12 chunks indexed"), Some(12));
        assert_eq!(chunks_from_summary("  7"), Some(7));
        assert_eq!(chunks_from_summary("indexed fine"), None);
    }

    #[tokio::test]
    async fn refresh_replaces_contents() {
        let transport = ScriptedTransport::new();
        transport.push_listing(Ok(vec![
            "a1_one.pdf".to_string(),
            "b2_two.pdf".to_string(),
        ]));

        let mut registry = DocumentRegistry::new();
        registry.refresh(&transport).await;

        assert_eq!(registry.len(), 2);
        assert!(registry.get("a1").is_some());
        assert!(registry.get("b2").is_some());
    }

    #[tokio::test]
    async fn refresh_failure_degrades_to_empty() {
        let transport = ScriptedTransport::new();
        transport.push_listing(Ok(vec!["a1_one.pdf".to_string()]));
        transport.push_listing(Err(unavailable("listing down")));

        let mut registry = DocumentRegistry::new();
        registry.refresh(&transport).await;
        assert_eq!(registry.len(), 1);

        registry.refresh(&transport).await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn upload_appends_optimistically() {
        let transport = ScriptedTransport::new();
        transport.push_upload(Ok(UploadReceipt {
            internal_id: "c3".to_string(),
            filename: "three.pdf".to_string(),
            indexing_summary: Some("5 chunks indexed".to_string()),
        }));

        let mut registry = DocumentRegistry::new();
        let document = registry
            .upload(&transport, b"%PDF".to_vec(), "three.pdf")
            .await
            .expect("scripted upload succeeds");

        assert_eq!(document.internal_id, "c3");
        assert_eq!(document.chunks, Some(5));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn upload_failure_leaves_registry_unchanged() {
        let transport = ScriptedTransport::new();
        transport.push_upload(Err(unavailable("disk full")));

        let mut registry = DocumentRegistry::new();
        let outcome = registry
            .upload(&transport, b"%PDF".to_vec(), "three.pdf")
            .await;

        assert!(outcome.is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn delete_removes_only_the_matching_id() {
        let transport = ScriptedTransport::new();
        transport.push_listing(Ok(vec![
            "a1_report.pdf".to_string(),
            "b2_report.pdf".to_string(),
        ]));
        transport.push_delete(Ok(()));

        let mut registry = DocumentRegistry::new();
        registry.refresh(&transport).await;

        registry
            .delete(&transport, "a1")
            .await
            .expect("scripted delete succeeds");

        // Display-name collision must not matter; only the id does.
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.documents()[0].internal_id, "b2");
        assert_eq!(registry.documents()[0].filename, "report.pdf");
    }

    #[tokio::test]
    async fn delete_failure_leaves_registry_unchanged() {
        let transport = ScriptedTransport::new();
        transport.push_listing(Ok(vec!["a1_report.pdf".to_string()]));
        transport.push_delete(Err(unavailable("locked")));

        let mut registry = DocumentRegistry::new();
        registry.refresh(&transport).await;

        assert!(registry.delete(&transport, "a1").await.is_err());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn upload_then_refresh_converges_by_id_set() {
        let transport = ScriptedTransport::new();
        transport.push_upload(Ok(UploadReceipt {
            internal_id: "c3".to_string(),
            filename: "three.pdf".to_string(),
            indexing_summary: None,
        }));
        // The server already reflects the upload in the next listing.
        transport.push_listing(Ok(vec!["c3_three.pdf".to_string()]));

        let mut registry = DocumentRegistry::new();
        registry
            .upload(&transport, b"%PDF".to_vec(), "three.pdf")
            .await
            .expect("scripted upload succeeds");

        let optimistic_ids: Vec<String> = registry
            .documents()
            .iter()
            .map(|document| document.internal_id.clone())
            .collect();

        registry.refresh(&transport).await;

        let refreshed_ids: Vec<String> = registry
            .documents()
            .iter()
            .map(|document| document.internal_id.clone())
            .collect();
        assert_eq!(optimistic_ids, refreshed_ids);
    }

    #[test]
    fn stale_listing_is_discarded_after_a_later_mutation() {
        let mut registry = DocumentRegistry::new();
        let snapshot = registry.snapshot();

        // An optimistic mutation lands while the listing is in flight.
        registry.documents.push(Document {
            internal_id: "fresh".to_string(),
            filename: "fresh.pdf".to_string(),
            upload_date: local_date_string(),
            chunks: None,
        });
        registry.version = registry.version.saturating_add(1);

        let applied = registry.apply_listing(&["old_entry.pdf".to_string()], snapshot);
        assert!(!applied);
        assert_eq!(registry.documents()[0].internal_id, "fresh");

        // A stale failure must not clear fresher state either.
        registry.apply_listing_failure(snapshot);
        assert_eq!(registry.len(), 1);
    }

    // Keep the scripted chat variant exercised from this module too, so the
    // registry tests double as a smoke check of the shared fixture.
    #[tokio::test]
    async fn scripted_chat_is_independent_of_document_calls() {
        let transport = ScriptedTransport::new();
        transport.push_chat(ScriptedChat::Fragments(vec!["ok".to_string()]));
        transport.push_listing(Ok(vec![]));

        let mut registry = DocumentRegistry::new();
        registry.refresh(&transport).await;
        assert!(registry.is_empty());
    }
}
