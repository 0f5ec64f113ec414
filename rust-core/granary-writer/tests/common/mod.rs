// SPDX-License-Identifier: PMPL-1.0-or-later
//! Shared harness for writer integration tests.
//!
//! Wires a [`GranuleWriter`] to the in-memory stores through thin wrappers
//! that fail on demand, so each saga step can be broken independently.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use prometheus::Registry;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use granary_model::{
    FileRecord, Granule, GranuleFile, GranuleNotification, GranulePayload, GranuleRecord,
    GranuleStatus, Reference, ReferenceKind,
};
use granary_store::{
    ChannelNotifier, InMemoryBackend, InMemoryPrimaryStore, IndexStore, KvDocumentMirror,
    KvSearchIndex, MirrorStore, Notifier, PrimaryStore, PrimaryTransaction, PublishedMessage,
    StoreError,
};
use granary_writer::{
    GranuleWriter, MessageGranule, WorkflowContext, WorkflowMessage, WriterConfig,
};

pub const COLLECTION: &str = "MOD09GQ___006";
pub const OTHER_COLLECTION: &str = "MOD09GQ___007";
pub const EXECUTION_ARN: &str = "arn:aws:states:us-east-1:123:execution:IngestGranule:e1";
pub const EXECUTION_URL: &str = "https://console.aws.amazon.com/states/home#/executions/e1";
pub const OTHER_ARN: &str = "arn:aws:states:us-east-1:123:execution:IngestGranule:e2";
pub const OTHER_URL: &str = "https://console.aws.amazon.com/states/home#/executions/e2";
pub const PROVIDER: &str = "s3-provider";
pub const TOPIC: &str = "granule-notifications";
pub const INDEX: &str = "granules";
pub const WORKFLOW_START: i64 = 1_700_000_000_000;

fn injected(what: &str) -> StoreError {
    StoreError::Unavailable(format!("injected {what} failure"))
}

/// Switches for every injectable failure.
#[derive(Debug, Default)]
pub struct Faults {
    pub mirror_put: AtomicBool,
    pub mirror_delete: AtomicBool,
    pub index_upsert: AtomicBool,
    pub index_delete: AtomicBool,
    pub publish: AtomicBool,
    pub commit: AtomicBool,
}

impl Faults {
    pub fn set(flag: &AtomicBool) {
        flag.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        for flag in [
            &self.mirror_put,
            &self.mirror_delete,
            &self.index_upsert,
            &self.index_delete,
            &self.publish,
            &self.commit,
        ] {
            flag.store(false, Ordering::SeqCst);
        }
    }

    fn hit(flag: &AtomicBool) -> bool {
        flag.load(Ordering::SeqCst)
    }
}

pub struct FaultyMirror {
    inner: KvDocumentMirror<InMemoryBackend>,
    faults: Arc<Faults>,
}

#[async_trait]
impl MirrorStore for FaultyMirror {
    async fn get(&self, granule_id: &str) -> Result<Option<Granule>, StoreError> {
        self.inner.get(granule_id).await
    }

    async fn put(&self, granule: &Granule) -> Result<(), StoreError> {
        if Faults::hit(&self.faults.mirror_put) {
            return Err(injected("mirror put"));
        }
        self.inner.put(granule).await
    }

    async fn delete(&self, granule_id: &str) -> Result<bool, StoreError> {
        if Faults::hit(&self.faults.mirror_delete) {
            return Err(injected("mirror delete"));
        }
        self.inner.delete(granule_id).await
    }
}

pub struct FaultyIndex {
    inner: KvSearchIndex<InMemoryBackend>,
    faults: Arc<Faults>,
}

#[async_trait]
impl IndexStore for FaultyIndex {
    async fn get(
        &self,
        index: &str,
        granule_id: &str,
        collection_id: &str,
    ) -> Result<Option<Granule>, StoreError> {
        self.inner.get(index, granule_id, collection_id).await
    }

    async fn upsert(&self, index: &str, granule: &Granule) -> Result<(), StoreError> {
        if Faults::hit(&self.faults.index_upsert) {
            return Err(injected("index upsert"));
        }
        self.inner.upsert(index, granule).await
    }

    async fn delete(
        &self,
        index: &str,
        granule_id: &str,
        collection_id: &str,
    ) -> Result<bool, StoreError> {
        if Faults::hit(&self.faults.index_delete) {
            return Err(injected("index delete"));
        }
        self.inner.delete(index, granule_id, collection_id).await
    }
}

pub struct FaultyNotifier {
    inner: ChannelNotifier,
    faults: Arc<Faults>,
}

#[async_trait]
impl Notifier for FaultyNotifier {
    async fn publish(
        &self,
        topic: &str,
        notification: &GranuleNotification,
    ) -> Result<(), StoreError> {
        if Faults::hit(&self.faults.publish) {
            return Err(injected("publish"));
        }
        self.inner.publish(topic, notification).await
    }
}

/// Primary store whose transactions can be made to fail at commit.
pub struct FaultyPrimary {
    inner: InMemoryPrimaryStore,
    faults: Arc<Faults>,
}

struct FaultyTransaction {
    inner: Box<dyn PrimaryTransaction>,
    faults: Arc<Faults>,
}

#[async_trait]
impl PrimaryStore for FaultyPrimary {
    async fn begin(&self) -> Result<Box<dyn PrimaryTransaction>, StoreError> {
        Ok(Box::new(FaultyTransaction {
            inner: self.inner.begin().await?,
            faults: Arc::clone(&self.faults),
        }))
    }

    async fn lookup(&self, reference: &Reference) -> Result<Option<i64>, StoreError> {
        self.inner.lookup(reference).await
    }

    async fn describe(
        &self,
        kind: ReferenceKind,
        cumulus_id: i64,
    ) -> Result<Option<String>, StoreError> {
        self.inner.describe(kind, cumulus_id).await
    }

    async fn get_granule(
        &self,
        granule_id: &str,
        collection_cumulus_id: i64,
    ) -> Result<Option<GranuleRecord>, StoreError> {
        self.inner.get_granule(granule_id, collection_cumulus_id).await
    }

    async fn granules_by_granule_id(
        &self,
        granule_id: &str,
    ) -> Result<Vec<GranuleRecord>, StoreError> {
        self.inner.granules_by_granule_id(granule_id).await
    }

    async fn files_for_granule(
        &self,
        granule_cumulus_id: i64,
    ) -> Result<Vec<FileRecord>, StoreError> {
        self.inner.files_for_granule(granule_cumulus_id).await
    }

    async fn executions_for_granule(
        &self,
        granule_cumulus_id: i64,
    ) -> Result<Vec<i64>, StoreError> {
        self.inner.executions_for_granule(granule_cumulus_id).await
    }
}

#[async_trait]
impl PrimaryTransaction for FaultyTransaction {
    fn id(&self) -> Uuid {
        self.inner.id()
    }

    async fn lock_granule(&mut self, granule_id: &str) -> Result<(), StoreError> {
        self.inner.lock_granule(granule_id).await
    }

    async fn get_granule(
        &mut self,
        granule_id: &str,
        collection_cumulus_id: i64,
    ) -> Result<Option<GranuleRecord>, StoreError> {
        self.inner.get_granule(granule_id, collection_cumulus_id).await
    }

    async fn granules_by_granule_id(
        &mut self,
        granule_id: &str,
    ) -> Result<Vec<GranuleRecord>, StoreError> {
        self.inner.granules_by_granule_id(granule_id).await
    }

    async fn upsert_granule(&mut self, record: &GranuleRecord) -> Result<i64, StoreError> {
        self.inner.upsert_granule(record).await
    }

    async fn files_for_granule(
        &mut self,
        granule_cumulus_id: i64,
    ) -> Result<Vec<FileRecord>, StoreError> {
        self.inner.files_for_granule(granule_cumulus_id).await
    }

    async fn upsert_file(&mut self, file: &FileRecord) -> Result<i64, StoreError> {
        self.inner.upsert_file(file).await
    }

    async fn delete_file(&mut self, file_cumulus_id: i64) -> Result<(), StoreError> {
        self.inner.delete_file(file_cumulus_id).await
    }

    async fn link_execution(
        &mut self,
        granule_cumulus_id: i64,
        execution_cumulus_id: i64,
    ) -> Result<(), StoreError> {
        self.inner
            .link_execution(granule_cumulus_id, execution_cumulus_id)
            .await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        if Faults::hit(&self.faults.commit) {
            self.inner.rollback().await?;
            return Err(injected("commit"));
        }
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.rollback().await
    }
}

pub struct Harness {
    pub writer: GranuleWriter,
    pub primary: InMemoryPrimaryStore,
    pub faults: Arc<Faults>,
    pub registry: Registry,
    mirror: Arc<FaultyMirror>,
    index: Arc<FaultyIndex>,
    messages: Mutex<UnboundedReceiver<PublishedMessage>>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(WriterConfig::new(TOPIC, INDEX)).await
    }

    pub async fn with_config(config: WriterConfig) -> Self {
        let primary = InMemoryPrimaryStore::new();
        primary.register_collection("MOD09GQ", "006").await;
        primary.register_collection("MOD09GQ", "007").await;
        primary.register_execution(EXECUTION_ARN, EXECUTION_URL).await;
        primary.register_execution(OTHER_ARN, OTHER_URL).await;
        primary.register_provider(PROVIDER).await;

        let faults = Arc::new(Faults::default());
        let backend = InMemoryBackend::new();
        let mirror = Arc::new(FaultyMirror {
            inner: KvDocumentMirror::new(backend.clone()),
            faults: Arc::clone(&faults),
        });
        let index = Arc::new(FaultyIndex {
            inner: KvSearchIndex::new(backend),
            faults: Arc::clone(&faults),
        });
        let (channel, receiver) = ChannelNotifier::new();
        let notifier = Arc::new(FaultyNotifier {
            inner: channel,
            faults: Arc::clone(&faults),
        });
        let faulty_primary = Arc::new(FaultyPrimary {
            inner: primary.clone(),
            faults: Arc::clone(&faults),
        });

        let registry = Registry::new();
        let writer = GranuleWriter::new(
            config,
            faulty_primary,
            mirror.clone(),
            index.clone(),
            notifier,
        )
        .unwrap()
        .with_metrics(&registry)
        .unwrap();

        Self {
            writer,
            primary,
            faults,
            registry,
            mirror,
            index,
            messages: Mutex::new(receiver),
        }
    }

    pub async fn mirror_doc(&self, granule_id: &str) -> Option<Granule> {
        self.mirror.get(granule_id).await.unwrap()
    }

    pub async fn index_doc(&self, granule_id: &str, collection_id: &str) -> Option<Granule> {
        self.index.get(INDEX, granule_id, collection_id).await.unwrap()
    }

    pub async fn mirror_count(&self) -> usize {
        self.mirror.inner.all().await.unwrap().len()
    }

    pub async fn index_count(&self) -> usize {
        self.index.inner.all(INDEX).await.unwrap().len()
    }

    /// Canonical record from the primary store, if the granule exists.
    pub async fn primary_doc(&self, granule_id: &str, collection_id: &str) -> Option<Granule> {
        self.writer.read_granule(granule_id, collection_id).await.ok()
    }

    /// All three stores hold the same canonical record.
    pub async fn assert_consistent(&self, granule_id: &str, collection_id: &str) -> Granule {
        let primary = self
            .primary_doc(granule_id, collection_id)
            .await
            .expect("granule missing from primary store");
        assert_eq!(self.mirror_doc(granule_id).await.as_ref(), Some(&primary));
        assert_eq!(
            self.index_doc(granule_id, collection_id).await.as_ref(),
            Some(&primary)
        );
        primary
    }

    /// Notifications published since the last call.
    pub fn notifications(&self) -> Vec<GranuleNotification> {
        let mut receiver = self.messages.lock().unwrap();
        let mut out = Vec::new();
        while let Ok(message) = receiver.try_recv() {
            assert_eq!(message.topic, TOPIC);
            out.push(message.notification().unwrap());
        }
        out
    }
}

pub fn file(key: &str, size: u64) -> GranuleFile {
    GranuleFile::new("protected", key)
        .with_size(size)
        .with_checksum("md5", &format!("{key}-md5"))
}

pub fn granule(granule_id: &str, status: GranuleStatus) -> GranulePayload {
    GranulePayload::new(granule_id, COLLECTION).with_status(status)
}

pub fn context(status: GranuleStatus) -> WorkflowContext {
    WorkflowContext {
        execution: Some(EXECUTION_URL.to_string()),
        execution_arn: Some(EXECUTION_ARN.to_string()),
        provider: Some(PROVIDER.to_string()),
        workflow_start_time: Some(WORKFLOW_START),
        status: Some(status),
        ..Default::default()
    }
}

pub fn message(granules: Vec<GranulePayload>, context: WorkflowContext) -> WorkflowMessage {
    WorkflowMessage {
        granules: granules.into_iter().map(MessageGranule::from).collect(),
        context,
    }
}
