//! Scan coordination: task lifecycle, worker dispatch, and sequential
//! application of scan results to the index.
//!
//! The coordinator owns the task registry and is the only writer to the
//! index store. Workers run in their own tasks and relay results over one
//! bounded channel; the coordinator applies them in arrival order, so a
//! slow or failing endpoint can never corrupt another endpoint's records.
//! Every running worker holds a cancellation token derived from the
//! coordinator's shutdown token.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::adapter::{adapter_for, EndpointAdapter};
use crate::error::ScanError;
use crate::models::{DocumentRecord, Endpoint, ScanResult, Task, TaskKind, TaskState};
use crate::scan::{spawn_scan, ScanDriver};
use crate::store::IndexStore;
use crate::tasks::TaskRegistry;

/// Outcome of one completed scan task.
#[derive(Debug, Clone)]
pub struct ScanSummary {
    pub task_id: u64,
    pub endpoint_name: String,
    pub added: u64,
    pub updated: u64,
    pub removed: u64,
    pub messages: Vec<String>,
}

impl ScanSummary {
    fn new(task_id: u64, endpoint_name: &str) -> Self {
        Self {
            task_id,
            endpoint_name: endpoint_name.to_string(),
            added: 0,
            updated: 0,
            removed: 0,
            messages: Vec::new(),
        }
    }
}

pub struct Coordinator {
    registry: TaskRegistry,
    store: Arc<dyn IndexStore>,
    tx: mpsc::Sender<ScanResult>,
    rx: mpsc::Receiver<ScanResult>,
    shutdown: CancellationToken,
    active: HashMap<u64, CancellationToken>,
    summaries: HashMap<u64, ScanSummary>,
    finished: Vec<ScanSummary>,
}

impl Coordinator {
    pub fn new(store: Arc<dyn IndexStore>, channel_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(channel_capacity);
        Self {
            registry: TaskRegistry::new(),
            store,
            tx,
            rx,
            shutdown: CancellationToken::new(),
            active: HashMap::new(),
            summaries: HashMap::new(),
            finished: Vec::new(),
        }
    }

    /// Token cancelled to stop every running worker (e.g. on Ctrl-C).
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn store(&self) -> Arc<dyn IndexStore> {
        self.store.clone()
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.registry.iter().cloned().collect()
    }

    /// Request a scan of `endpoint`, building the adapter from the
    /// endpoint's kind. If a scan of the same endpoint and kind is already
    /// running, its task id is returned and no new work starts.
    pub fn start_scan(&mut self, endpoint: &Endpoint, owner: &str) -> Result<u64, ScanError> {
        if let Some(existing) = self.registry.find(&endpoint.name, TaskKind::ScanEndpoint) {
            return Ok(existing.id);
        }
        let adapter = adapter_for(endpoint)?;
        Ok(self.start_scan_with(endpoint, owner, adapter))
    }

    /// Like [`start_scan`](Self::start_scan) but with a caller-supplied
    /// adapter.
    pub fn start_scan_with(
        &mut self,
        endpoint: &Endpoint,
        owner: &str,
        adapter: Box<dyn EndpointAdapter>,
    ) -> u64 {
        if let Some(existing) = self.registry.find(&endpoint.name, TaskKind::ScanEndpoint) {
            return existing.id;
        }

        let mut task = self
            .registry
            .create_task(&endpoint.name, owner, TaskKind::ScanEndpoint);
        task.state = TaskState::InProgress;
        task.started = Some(Utc::now());
        self.registry.set(task.clone());

        let cancel = self.shutdown.child_token();
        self.active.insert(task.id, cancel.clone());
        self.summaries
            .insert(task.id, ScanSummary::new(task.id, &endpoint.name));

        info!(task_id = task.id, endpoint = %endpoint.name, "scan started");
        spawn_scan(ScanDriver::new(
            task.id,
            endpoint.clone(),
            adapter,
            self.store.clone(),
            self.tx.clone(),
            cancel,
        ));
        task.id
    }

    /// Signal the workers scanning `endpoint_name` to stop.
    pub fn cancel_endpoint(&mut self, endpoint_name: &str) {
        let ids: Vec<u64> = self
            .registry
            .iter()
            .filter(|t| t.endpoint_name == endpoint_name)
            .map(|t| t.id)
            .collect();
        for id in ids {
            if let Some(token) = self.active.get(&id) {
                token.cancel();
            }
        }
    }

    /// Remove an endpoint and everything indexed from it.
    ///
    /// Refused while the owner still has a task against the endpoint; the
    /// caller cancels first and retries.
    pub async fn remove_endpoint(&mut self, name: &str, owner: &str) -> Result<(), ScanError> {
        if !self.registry.empty(owner, Some(name)) {
            return Err(ScanError::Validation(format!(
                "a scan of endpoint '{}' is still active",
                name
            )));
        }

        let documents = self
            .store
            .list_documents(name)
            .await
            .map_err(|e| ScanError::Internal(e.to_string()))?;
        for document in documents {
            self.store
                .remove_document(&document.uuid)
                .await
                .map_err(|e| ScanError::Internal(e.to_string()))?;
        }
        self.store
            .remove_endpoint(name)
            .await
            .map_err(|e| ScanError::Internal(e.to_string()))?;
        Ok(())
    }

    /// Apply results until every started scan has ended, then return the
    /// per-task summaries.
    pub async fn run_until_idle(&mut self) -> Vec<ScanSummary> {
        while !self.active.is_empty() {
            let Some(result) = self.rx.recv().await else {
                break;
            };
            self.apply(result).await;
        }
        std::mem::take(&mut self.finished)
    }

    /// Apply one scan result to the index. Failed writes are reported on
    /// the task's summary; the task still reaches its end.
    async fn apply(&mut self, result: ScanResult) {
        let task_id = result.task_id();
        match result {
            ScanResult::Add { record, .. } => match self.write_record(&record).await {
                Ok(()) => self.bump(task_id, |s| s.added += 1),
                Err(err) => self.report_write_failure(task_id, &record.document.uuid, err),
            },
            ScanResult::Update { record, .. } => match self.write_record(&record).await {
                Ok(()) => self.bump(task_id, |s| s.updated += 1),
                Err(err) => self.report_write_failure(task_id, &record.document.uuid, err),
            },
            ScanResult::Remove { document, .. } => {
                match self.store.remove_document(&document.uuid).await {
                    Ok(()) => self.bump(task_id, |s| s.removed += 1),
                    Err(err) => self.report_write_failure(task_id, &document.uuid, err),
                }
            }
            ScanResult::End { task_id, messages } => self.finish(task_id, messages),
        }
    }

    async fn write_record(&self, record: &DocumentRecord) -> anyhow::Result<()> {
        self.store.put_document(&record.document).await?;
        self.store
            .replace_elements(&record.document.uuid, &record.elements)
            .await
    }

    fn bump(&mut self, task_id: u64, update: impl FnOnce(&mut ScanSummary)) {
        if let Some(summary) = self.summaries.get_mut(&task_id) {
            update(summary);
        }
    }

    fn report_write_failure(&mut self, task_id: u64, uuid: &str, err: anyhow::Error) {
        error!(task_id, uuid, %err, "index write failed");
        self.bump(task_id, |s| {
            s.messages.push(format!("index write failed for {}: {}", uuid, err))
        });
    }

    fn finish(&mut self, task_id: u64, messages: Vec<String>) {
        if let Some(task) = self.registry.get(task_id) {
            let mut task = task.clone();
            task.ended = Some(Utc::now());
            self.registry.set(task);
        }
        self.registry.delete(task_id);
        self.active.remove(&task_id);

        let mut summary = self
            .summaries
            .remove(&task_id)
            .unwrap_or_else(|| ScanSummary::new(task_id, ""));
        summary.messages.extend(messages);
        info!(task_id, endpoint = %summary.endpoint_name,
              added = summary.added, updated = summary.updated, removed = summary.removed,
              "scan ended");
        self.finished.push(summary);
    }
}
