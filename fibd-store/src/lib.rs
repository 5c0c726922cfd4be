//
// Copyright (c) The Fibd Core Contributors
//
// SPDX-License-Identifier: MIT
//

mod error;

use std::collections::BTreeMap;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;

use fibd_utils::backoff::ExponentialBackoff;
use fibd_utils::task::{Task, TimeoutTask};
use fibd_utils::{Receiver, Responder, UnboundedSender};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

pub use crate::error::Error;

// Mode bits of the on-disk snapshot.
const SNAPSHOT_FILE_MODE: u32 = 0o666;

// Persistent store configuration.
#[derive(Clone, Debug)]
pub struct Config {
    // Path of the on-disk snapshot.
    pub file_path: PathBuf,
    // Initial save coalescing window. When both backoff values are zero,
    // every mutation is flushed synchronously before it is acknowledged.
    pub save_initial_backoff: Duration,
    // Maximum save coalescing window.
    pub save_max_backoff: Duration,
    // Log mutations without touching the disk.
    pub dryrun: bool,
}

// Store request.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum StoreRequest {
    Store { key: String, data: String },
    Load { key: String },
    Erase { key: String },
}

// Store reply.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct StoreResponse {
    pub key: String,
    pub success: bool,
    pub data: Option<String>,
}

// Request envelope carrying the reply channel.
#[derive(Debug)]
pub struct StoreQueryMsg {
    pub request: StoreRequest,
    pub responder: Responder<StoreResponse>,
}

// Persistent string-to-string store.
//
// The in-memory map is authoritative; the disk copy is written behind,
// coalesced through an exponential backoff window, using atomic file
// replacement so the snapshot is never torn.
#[derive(Debug)]
pub struct PersistentStore {
    config: Config,
    db: BTreeMap<String, String>,
    save_backoff: Option<ExponentialBackoff>,
    save_timer: Option<TimeoutTask>,
    save_timer_tx: UnboundedSender<()>,
    num_disk_writes: u64,
}

// ===== impl PersistentStore =====

impl PersistentStore {
    pub fn new(
        config: Config,
        save_timer_tx: UnboundedSender<()>,
    ) -> PersistentStore {
        let save_backoff = (!config.save_initial_backoff.is_zero()
            || !config.save_max_backoff.is_zero())
        .then(|| {
            ExponentialBackoff::new(
                config.save_initial_backoff,
                config.save_max_backoff,
            )
        });

        let mut store = PersistentStore {
            config,
            db: Default::default(),
            save_backoff,
            save_timer: None,
            save_timer_tx,
            num_disk_writes: 0,
        };

        // Load the initial database. On failure, report the error and
        // continue with an empty database.
        if let Err(error) = store.load_from_disk() {
            error.log();
        }

        store
    }

    // Processes a single client request, scheduling a flush for mutations.
    pub fn process_request(&mut self, request: StoreRequest) -> StoreResponse {
        let (response, mutated) = match request {
            StoreRequest::Store { key, data } => {
                self.db.insert(key.clone(), data);
                (
                    StoreResponse {
                        key,
                        success: true,
                        data: None,
                    },
                    true,
                )
            }
            StoreRequest::Load { key } => {
                let data = self.db.get(&key).cloned();
                (
                    StoreResponse {
                        key,
                        success: data.is_some(),
                        data,
                    },
                    false,
                )
            }
            StoreRequest::Erase { key } => {
                let removed = self.db.remove(&key).is_some();
                (
                    StoreResponse {
                        key,
                        success: removed,
                        data: None,
                    },
                    true,
                )
            }
        };

        if response.success && mutated {
            match &self.save_backoff {
                // Durability is best-effort and asynchronous: the mutation
                // rides the next coalesced flush.
                Some(backoff) => {
                    let timeout = backoff.time_remaining();
                    if self.save_timer.is_none() {
                        self.schedule_save(timeout);
                    }
                }
                // Synchronous mode: block until the snapshot hits the disk.
                None => {
                    if let Err(error) = self.save_to_disk() {
                        error.log();
                    }
                }
            }
        }

        response
    }

    // Handles an expired save timer.
    pub fn process_save_timeout(&mut self) {
        self.save_timer = None;

        match self.save_to_disk() {
            Ok(()) => {
                if let Some(backoff) = &mut self.save_backoff {
                    backoff.report_success();
                }
            }
            Err(error) => {
                error.log();
                if let Some(backoff) = &mut self.save_backoff {
                    backoff.report_error();
                    let retry = backoff.time_remaining();
                    self.schedule_save(retry);
                }
            }
        }
    }

    fn schedule_save(&mut self, timeout: Duration) {
        let save_timer_tx = self.save_timer_tx.clone();
        self.save_timer = Some(TimeoutTask::new(timeout, move || async move {
            let _ = save_timer_tx.send(());
        }));
    }

    // Writes the full snapshot atomically (temp file + rename), so the disk
    // copy is always either the previous or the new snapshot.
    pub fn save_to_disk(&mut self) -> Result<(), Error> {
        let data =
            serde_json::to_vec(&self.db).map_err(Error::ParseError)?;

        if self.config.dryrun {
            debug!("skipping database write in dryrun mode");
            return Ok(());
        }

        debug!(path = %self.config.file_path.display(), "updating database on disk");
        let dir = self
            .config
            .file_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::Path::new("."));
        let mut file = tempfile::NamedTempFile::new_in(dir)
            .map_err(Error::DiskWriteError)?;
        file.write_all(&data).map_err(Error::DiskWriteError)?;
        file.as_file()
            .set_permissions(std::fs::Permissions::from_mode(
                SNAPSHOT_FILE_MODE,
            ))
            .map_err(Error::DiskWriteError)?;
        file.persist(&self.config.file_path)
            .map_err(|error| Error::DiskWriteError(error.error))?;

        self.num_disk_writes += 1;
        Ok(())
    }

    fn load_from_disk(&mut self) -> Result<(), Error> {
        let data = match std::fs::read(&self.config.file_path) {
            Ok(data) => data,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    path = %self.config.file_path.display(),
                    "snapshot file doesn't exist, starting with empty database"
                );
                return Ok(());
            }
            Err(error) => return Err(Error::DiskReadError(error)),
        };

        self.db = serde_json::from_slice(&data).map_err(Error::ParseError)?;
        Ok(())
    }

    pub fn num_disk_writes(&self) -> u64 {
        self.num_disk_writes
    }
}

// ===== global functions =====

// Starts the persistent store event loop, serving requests until the query
// channel closes. A final flush runs before the loop exits.
pub fn start(config: Config, mut query_rx: Receiver<StoreQueryMsg>) -> Task<()> {
    Task::spawn(async move {
        let (save_timer_tx, mut save_timer_rx) = mpsc::unbounded_channel();
        let mut store = PersistentStore::new(config, save_timer_tx);

        loop {
            tokio::select! {
                msg = query_rx.recv() => match msg {
                    Some(msg) => {
                        let response = store.process_request(msg.request);
                        let _ = msg.responder.send(response);
                    }
                    None => break,
                },
                Some(_) = save_timer_rx.recv() => {
                    store.process_save_timeout();
                }
            }
        }

        if let Err(error) = store.save_to_disk() {
            error.log();
        }
    })
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    fn sync_config(dir: &tempfile::TempDir) -> Config {
        Config {
            file_path: dir.path().join("store.json"),
            save_initial_backoff: Duration::ZERO,
            save_max_backoff: Duration::ZERO,
            dryrun: false,
        }
    }

    fn sync_store(config: Config) -> PersistentStore {
        let (save_timer_tx, _save_timer_rx) = mpsc::unbounded_channel();
        PersistentStore::new(config, save_timer_tx)
    }

    fn store(store: &mut PersistentStore, key: &str, data: &str) {
        let response = store.process_request(StoreRequest::Store {
            key: key.to_owned(),
            data: data.to_owned(),
        });
        assert!(response.success);
    }

    fn load(store: &mut PersistentStore, key: &str) -> StoreResponse {
        store.process_request(StoreRequest::Load {
            key: key.to_owned(),
        })
    }

    #[tokio::test]
    async fn store_load_erase_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = sync_store(sync_config(&dir));

        store(&mut db, "node-name", "spine-1");
        let response = load(&mut db, "node-name");
        assert!(response.success);
        assert_eq!(response.data.as_deref(), Some("spine-1"));

        let response = db.process_request(StoreRequest::Erase {
            key: "node-name".to_owned(),
        });
        assert!(response.success);
        let response = load(&mut db, "node-name");
        assert!(!response.success);
        assert_eq!(response.data, None);
    }

    #[tokio::test]
    async fn erase_missing_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = sync_store(sync_config(&dir));

        let response = db.process_request(StoreRequest::Erase {
            key: "missing".to_owned(),
        });
        assert!(!response.success);
    }

    #[tokio::test]
    async fn snapshot_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = sync_config(&dir);

        let mut db = sync_store(config.clone());
        store(&mut db, "key-a", "value-a");
        store(&mut db, "key-b", "value-b");
        assert_eq!(db.num_disk_writes(), 2);
        drop(db);

        let mut db = sync_store(config);
        let response = load(&mut db, "key-a");
        assert!(response.success);
        assert_eq!(response.data.as_deref(), Some("value-a"));
        let response = load(&mut db, "key-b");
        assert_eq!(response.data.as_deref(), Some("value-b"));
    }

    #[tokio::test]
    async fn missing_snapshot_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = sync_store(sync_config(&dir));
        assert!(!load(&mut db, "anything").success);
    }

    #[tokio::test]
    async fn corrupt_snapshot_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = sync_config(&dir);
        std::fs::write(&config.file_path, b"{not json").unwrap();

        let mut db = sync_store(config);
        assert!(!load(&mut db, "anything").success);

        // A new mutation replaces the corrupt snapshot wholesale.
        store(&mut db, "fresh", "start");
        drop(db);
        let mut db = sync_store(sync_config(&dir));
        assert!(load(&mut db, "fresh").success);
    }

    #[tokio::test]
    async fn debounced_flush_coalesces_mutations() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            file_path: dir.path().join("store.json"),
            save_initial_backoff: Duration::from_millis(10),
            save_max_backoff: Duration::from_millis(100),
            dryrun: false,
        };

        let (query_tx, query_rx) = mpsc::channel(4);
        let _store = start(config.clone(), query_rx);

        for (key, data) in [("a", "1"), ("b", "2"), ("c", "3")] {
            let (responder, response_rx) = tokio::sync::oneshot::channel();
            query_tx
                .send(StoreQueryMsg {
                    request: StoreRequest::Store {
                        key: key.to_owned(),
                        data: data.to_owned(),
                    },
                    responder,
                })
                .await
                .unwrap();
            assert!(response_rx.await.unwrap().success);
        }

        // All three mutations ride the same flush.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let mut db = sync_store(config);
        assert!(load(&mut db, "a").success);
        assert!(load(&mut db, "b").success);
        assert!(load(&mut db, "c").success);
    }
}
