//! Per-endpoint scanning state machine.
//!
//! A driver runs one scan to completion: it opens the endpoint's adapter,
//! pages through the remote listing one page at a time, builds each
//! labeled document, classifies it against the index by content hash
//! (`Add` for an unknown uuid, `Update` for a changed hash, nothing for an
//! unchanged one), detects documents that disappeared from the listing,
//! and always disconnects before emitting the single terminal `End`
//! result.
//!
//! ```text
//! Created ──▶ Open ──▶ Paging ──▶ Closing ──▶ Closed
//!               │         │          ▲
//!               └──▶ Error ┴─────────┘
//! ```
//!
//! The driver never writes to the index; it only reads stored hashes and
//! streams results to the coordinator, which is the single writer.
//! Cancellation is observed between pages and between documents; a
//! cancelled scan skips the removal diff (the listing is incomplete) but
//! still disconnects and emits `End`.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::adapter::EndpointAdapter;
use crate::models::{Endpoint, ScanResult};
use crate::store::IndexStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriverState {
    Created,
    Open,
    Paging,
    Error,
    Closing,
    Closed,
}

pub struct ScanDriver {
    task_id: u64,
    endpoint: Endpoint,
    adapter: Box<dyn EndpointAdapter>,
    store: Arc<dyn IndexStore>,
    tx: mpsc::Sender<ScanResult>,
    cancel: CancellationToken,
    state: DriverState,
}

impl ScanDriver {
    pub fn new(
        task_id: u64,
        endpoint: Endpoint,
        adapter: Box<dyn EndpointAdapter>,
        store: Arc<dyn IndexStore>,
        tx: mpsc::Sender<ScanResult>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            task_id,
            endpoint,
            adapter,
            store,
            tx,
            cancel,
            state: DriverState::Created,
        }
    }

    fn transition(&mut self, next: DriverState) {
        debug!(task_id = self.task_id, endpoint = %self.endpoint.name,
               from = ?self.state, to = ?next, "scan state");
        self.state = next;
    }

    async fn emit(&self, result: ScanResult) {
        // A closed receiver means the coordinator no longer wants results.
        let _ = self.tx.send(result).await;
    }

    /// Run the scan to its terminal state. Consumes the driver; exactly
    /// one `End` result is emitted on every path.
    pub async fn run(mut self) {
        let mut messages: Vec<String> = Vec::new();

        self.transition(DriverState::Open);
        match self.adapter.open().await {
            Ok(()) => {
                self.transition(DriverState::Paging);
                if let Err(failure) = self.page_all(&mut messages).await {
                    messages.push(failure);
                    self.transition(DriverState::Error);
                }
            }
            Err(err) => {
                messages.push(err.to_string());
                self.transition(DriverState::Error);
            }
        }

        self.transition(DriverState::Closing);
        if let Err(err) = self.adapter.close().await {
            messages.push(format!("disconnect failed: {}", err));
        }
        self.transition(DriverState::Closed);

        self.emit(ScanResult::End {
            task_id: self.task_id,
            messages,
        })
        .await;
    }

    /// Page through the listing and classify each document. Returns the
    /// fatal failure message, if any; per-document failures only append to
    /// `messages`.
    async fn page_all(&mut self, messages: &mut Vec<String>) -> Result<(), String> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut cursor: Option<String> = None;
        let mut cancelled = false;

        loop {
            if self.cancel.is_cancelled() {
                messages.push("scan cancelled".to_string());
                cancelled = true;
                break;
            }

            let page = self
                .adapter
                .next_page(cursor.take())
                .await
                .map_err(|e| e.to_string())?;

            for label in &page.result {
                if self.cancel.is_cancelled() {
                    messages.push("scan cancelled".to_string());
                    cancelled = true;
                    break;
                }
                match self.adapter.create_document(label).await {
                    Ok(record) => {
                        seen.insert(record.document.uuid.clone());
                        match self.store.get_document(&record.document.uuid).await {
                            Ok(Some(existing))
                                if existing.content_hash == record.document.content_hash =>
                            {
                                // Unchanged; no result, no index write.
                            }
                            Ok(Some(_)) => {
                                self.emit(ScanResult::Update {
                                    task_id: self.task_id,
                                    endpoint: self.endpoint.clone(),
                                    record,
                                })
                                .await;
                            }
                            Ok(None) => {
                                self.emit(ScanResult::Add {
                                    task_id: self.task_id,
                                    endpoint: self.endpoint.clone(),
                                    record,
                                })
                                .await;
                            }
                            Err(err) => {
                                messages.push(format!(
                                    "index lookup failed for {}: {}",
                                    record.document.uuid, err
                                ));
                            }
                        }
                    }
                    Err(err) => {
                        messages.push(format!("skipped {}: {}", label.id_short, err));
                    }
                }
            }
            if cancelled {
                break;
            }

            cursor = page.cursor().map(str::to_string);
            if cursor.is_none() {
                break;
            }
        }

        // Only a complete listing can prove a document is gone.
        if !cancelled {
            match self.store.list_documents(&self.endpoint.name).await {
                Ok(stored) => {
                    for document in stored {
                        if !seen.contains(&document.uuid) {
                            self.emit(ScanResult::Remove {
                                task_id: self.task_id,
                                endpoint: self.endpoint.clone(),
                                document,
                            })
                            .await;
                        }
                    }
                }
                Err(err) => {
                    messages.push(format!("removal diff skipped: {}", err));
                }
            }
        }

        Ok(())
    }
}

/// Dispatch a driver onto its own task: the scan worker. The worker owns
/// the adapter for the duration of the scan and relays every result over
/// the coordinator's channel.
pub fn spawn_scan(driver: ScanDriver) -> JoinHandle<()> {
    tokio::spawn(driver.run())
}
