//! Publishing generated files to a knowledge collection
//!
//! Each file moves through upload → server-side processing → attachment.
//! Once every file is attached the collection is linked back into the chat
//! so the UI shows it next to the first user message.
//!
//! All three waits share [`RetryPolicy`]: endpoint fallback on 404/405,
//! fixed-interval processing polls, and jittered attach retries.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use serde_json::Value;

use crate::artifacts::ArtifactStore;
use crate::config::ArtifactsConfig;
use crate::error::{
    is_endpoint_fallthrough, is_transient_attach_error, preview, Error, Result,
};
use crate::extract::extract_remote_id;
use crate::normalize::normalize_chat;
use crate::retry::RetryPolicy;
use crate::service::ChatService;
use crate::types::{
    merge_file_entry, ArtifactFile, ChatSnapshot, FileEntry, FileStage, FileStatus,
    KnowledgeCollection, MessageTable,
};

/// Characters of reply kept when an id is missing
const ID_PREVIEW_CHARS: usize = 300;

/// Knobs for the publish pipeline
#[derive(Debug, Clone)]
pub struct PublisherOptions {
    pub upload_endpoints: Vec<String>,
    pub knowledge_endpoints: Vec<String>,
    pub processing_interval: Duration,
    pub processing_deadline: Duration,
    pub attach_max_attempts: u32,
    pub attach_backoff_min: Duration,
    pub attach_backoff_max: Duration,
}

impl PublisherOptions {
    pub fn from_config(config: &ArtifactsConfig) -> Self {
        Self {
            upload_endpoints: config.upload_endpoints.clone(),
            knowledge_endpoints: config.knowledge_endpoints.clone(),
            processing_interval: Duration::from_secs(config.processing_interval_secs),
            processing_deadline: Duration::from_secs(config.processing_deadline_secs),
            attach_max_attempts: config.attach_max_attempts,
            attach_backoff_min: Duration::from_millis(400),
            attach_backoff_max: Duration::from_millis(800),
        }
    }
}

impl Default for PublisherOptions {
    fn default() -> Self {
        Self::from_config(&ArtifactsConfig::default())
    }
}

/// Publishing statistics
#[derive(Debug, Default, Clone)]
pub struct PublishStats {
    pub files_uploaded: usize,
    pub files_attached: usize,
    /// Attach calls made, retries included
    pub attach_attempts: u32,
    /// Attach calls skipped because the file was already a member
    pub attach_skipped: usize,
}

/// Outcome of a full publish run
#[derive(Debug, Clone)]
pub struct PublishReport {
    pub collection: KnowledgeCollection,
    pub files: Vec<ArtifactFile>,
    /// Chat as persisted with the collection linked
    pub chat: ChatSnapshot,
}

/// Drives files through the knowledge pipeline
pub struct ArtifactPublisher<'a, S: ChatService + ?Sized> {
    service: &'a S,
    options: PublisherOptions,
    stats: PublishStats,
}

impl<'a, S: ChatService + ?Sized> ArtifactPublisher<'a, S> {
    pub fn new(service: &'a S, options: PublisherOptions) -> Self {
        Self {
            service,
            options,
            stats: PublishStats::default(),
        }
    }

    /// Get current publishing statistics
    pub fn stats(&self) -> &PublishStats {
        &self.stats
    }

    /// Uploads, processes, collects, attaches, and links `paths`
    ///
    /// Any failure aborts the run. Files already uploaded and a collection
    /// already created stay on the server.
    pub async fn publish(
        &mut self,
        chat_id: &str,
        paths: Vec<PathBuf>,
        name: &str,
        description: &str,
        store: &ArtifactStore,
    ) -> Result<PublishReport> {
        let mut files: Vec<ArtifactFile> = paths.into_iter().map(ArtifactFile::new).collect();

        for file in files.iter_mut() {
            if let Err(e) = self.upload_and_process(file).await {
                file.stage = FileStage::Failed;
                return Err(e);
            }
        }

        let mut collection = self.create_collection(name, description).await?;

        for file in files.iter_mut() {
            let Some(file_id) = file.remote_id.clone() else {
                continue;
            };
            if let Err(e) = self.attach(&mut collection, &file_id).await {
                file.stage = FileStage::Failed;
                return Err(e);
            }
            file.stage = FileStage::Attached;
        }

        match self.service.fetch_knowledge(&collection.id).await {
            Ok(details) => {
                if let Err(e) = store.write_knowledge_diagnostic(&collection.id, &details) {
                    tracing::warn!(error = %e, "Failed to save knowledge snapshot");
                }
            }
            Err(e) => tracing::debug!(error = %e, "Knowledge lookup failed"),
        }

        let chat = self.link_to_chat(chat_id, &collection).await?;

        Ok(PublishReport {
            collection,
            files,
            chat,
        })
    }

    async fn upload_and_process(&mut self, file: &mut ArtifactFile) -> Result<()> {
        file.stage = FileStage::Uploading;
        let file_id = self.upload(file).await?;
        file.remote_id = Some(file_id.clone());

        file.stage = FileStage::Processing;
        self.wait_processed(&file_id).await?;
        file.status = FileStatus::Completed;
        Ok(())
    }

    /// Uploads one file, falling through endpoints that answer 404/405
    pub async fn upload(&mut self, file: &ArtifactFile) -> Result<String> {
        let service = self.service;
        let endpoints = &self.options.upload_endpoints;

        let reply = RetryPolicy::endpoint_fallback(endpoints.len())
            .run("file upload", is_endpoint_fallthrough, |attempt| {
                let endpoint = endpoints.get(attempt as usize).cloned();
                async move {
                    let endpoint = endpoint
                        .ok_or_else(|| Error::Config("no upload endpoint configured".to_string()))?;
                    service.upload_file(&endpoint, file).await
                }
            })
            .await?;

        let file_id = extract_remote_id(&reply).ok_or_else(|| Error::MissingId {
            what: "file".to_string(),
            preview: preview(&reply, ID_PREVIEW_CHARS),
        })?;

        self.stats.files_uploaded += 1;
        tracing::info!(
            file = %file.file_name(),
            file_id = %file_id,
            "Uploaded artifact"
        );
        Ok(file_id)
    }

    /// Polls processing status until completed; returns file details
    pub async fn wait_processed(&self, file_id: &str) -> Result<Value> {
        let service = self.service;
        let policy =
            RetryPolicy::poll_until(self.options.processing_interval, self.options.processing_deadline);

        policy
            .run(
                "file processing",
                |e| matches!(e, Error::NotReady(_)),
                |_| async move {
                    match service.file_status(file_id).await? {
                        FileStatus::Completed => Ok(()),
                        FileStatus::Failed => Err(Error::ProcessingFailed {
                            file_id: file_id.to_string(),
                        }),
                        status => {
                            tracing::debug!(file_id = %file_id, status = ?status, "File still processing");
                            Err(Error::NotReady(format!("file {}", file_id)))
                        }
                    }
                },
            )
            .await?;

        tracing::info!(file_id = %file_id, "File processed");
        service.file_details(file_id).await
    }

    /// Creates the collection, falling through endpoints that answer 404/405
    pub async fn create_collection(&self, name: &str, description: &str) -> Result<KnowledgeCollection> {
        let service = self.service;
        let endpoints = &self.options.knowledge_endpoints;

        let reply = RetryPolicy::endpoint_fallback(endpoints.len())
            .run("knowledge creation", is_endpoint_fallthrough, |attempt| {
                let endpoint = endpoints.get(attempt as usize).cloned();
                async move {
                    let endpoint = endpoint.ok_or_else(|| {
                        Error::Config("no knowledge endpoint configured".to_string())
                    })?;
                    service.create_knowledge(&endpoint, name, description).await
                }
            })
            .await?;

        let id = extract_remote_id(&reply).ok_or_else(|| Error::MissingId {
            what: "knowledge".to_string(),
            preview: preview(&reply, ID_PREVIEW_CHARS),
        })?;

        tracing::info!(knowledge_id = %id, name = %name, "Created knowledge collection");
        Ok(KnowledgeCollection {
            id,
            name: name.to_string(),
            description: Some(description.to_string()),
            file_ids: Vec::new(),
        })
    }

    /// Attaches a processed file, retrying transient statuses
    ///
    /// Before every retry the collection is checked for the file so a
    /// duplicate attach is never sent for a file the server already took.
    pub async fn attach(&mut self, collection: &mut KnowledgeCollection, file_id: &str) -> Result<()> {
        if collection.file_ids.iter().any(|id| id == file_id) {
            return Ok(());
        }

        let service = self.service;
        let knowledge_id = collection.id.clone();
        let policy = RetryPolicy::jittered(
            self.options.attach_max_attempts,
            self.options.attach_backoff_min,
            self.options.attach_backoff_max,
        );

        let calls = AtomicU32::new(0);
        let skipped = AtomicBool::new(false);
        let result = policy
            .run("file attach", is_transient_attach_error, |attempt| {
                let knowledge_id = knowledge_id.as_str();
                let calls = &calls;
                let skipped = &skipped;
                async move {
                    if attempt > 0 && knowledge_has_file(service, knowledge_id, file_id).await {
                        skipped.store(true, Ordering::SeqCst);
                        return Ok(());
                    }
                    calls.fetch_add(1, Ordering::SeqCst);
                    service.attach_file(knowledge_id, file_id).await.map(|_| ())
                }
            })
            .await;

        let calls = calls.load(Ordering::SeqCst);
        self.stats.attach_attempts += calls;
        result?;

        if skipped.load(Ordering::SeqCst) {
            self.stats.attach_skipped += 1;
            tracing::info!(file_id = %file_id, "File already in collection; skipped attach");
        }
        collection.file_ids.push(file_id.to_string());
        self.stats.files_attached += 1;
        tracing::info!(
            knowledge_id = %collection.id,
            file_id = %file_id,
            attempts = calls,
            "Attached file to collection"
        );
        Ok(())
    }

    /// Links the collection into the stored chat
    pub async fn link_to_chat(&self, chat_id: &str, collection: &KnowledgeCollection) -> Result<ChatSnapshot> {
        let raw = self.service.fetch_chat(chat_id).await?;
        let snapshot = normalize_chat(&raw)?;
        let linked = link_collection(&snapshot, collection);
        self.service.replace_chat(chat_id, &linked).await?;
        tracing::info!(chat_id = %chat_id, knowledge_id = %collection.id, "Linked collection to chat");
        Ok(linked)
    }
}

/// Adds the collection to the chat, its knowledge ids, and the first user
/// message in both views; entries are deduplicated by id
pub fn link_collection(snapshot: &ChatSnapshot, collection: &KnowledgeCollection) -> ChatSnapshot {
    let mut linked = snapshot.clone();
    let entry = FileEntry::collection(collection);

    merge_file_entry(&mut linked.files, &entry);
    if !linked.knowledge_ids.contains(&collection.id) {
        linked.knowledge_ids.push(collection.id.clone());
    }

    if let Some(first_user) = linked.first_user_message_id() {
        let mut table = MessageTable::from_snapshot(&linked);
        if let Some(message) = table.get_mut(&first_user) {
            merge_file_entry(message.files.get_or_insert_with(Vec::new), &entry);
        }
        table.write_into(&mut linked);
    }

    linked
}

/// Whether the collection already lists `file_id`; lookup errors read as no
async fn knowledge_has_file<S: ChatService + ?Sized>(service: &S, knowledge_id: &str, file_id: &str) -> bool {
    match service.fetch_knowledge(knowledge_id).await {
        Ok(body) => collection_file_ids(&body).iter().any(|id| id == file_id),
        Err(e) => {
            tracing::debug!(error = %e, "Membership check failed; attaching anyway");
            false
        }
    }
}

/// File ids listed by a collection reply, whichever layout it uses
fn collection_file_ids(body: &Value) -> Vec<String> {
    let scopes = [Some(body), body.get("data")];
    let mut ids = Vec::new();

    for scope in scopes.into_iter().flatten() {
        if let Some(files) = scope.get("files").and_then(Value::as_array) {
            ids.extend(
                files
                    .iter()
                    .filter_map(|f| f.get("id").and_then(Value::as_str))
                    .map(str::to_string),
            );
        }
        if let Some(file_ids) = scope.get("file_ids").and_then(Value::as_array) {
            ids.extend(file_ids.iter().filter_map(Value::as_str).map(str::to_string));
        }
    }
    ids
}
