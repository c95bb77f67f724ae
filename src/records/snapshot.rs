//! Snapshot file format and the background writer.
//!
//! The file is one pretty-printed JSON document, `{ "users": {..}, "tickets": {..} }`,
//! keyed by record id. It is always written in full to a sibling temp file
//! and renamed over the previous snapshot.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Notify};

use super::{read, StoreError, Tables};
use crate::model::{Ticket, User};

#[derive(Serialize)]
struct SnapshotRef<'a> {
    users: BTreeMap<&'a str, &'a User>,
    tickets: BTreeMap<&'a str, &'a Ticket>,
}

#[derive(Deserialize, Default)]
struct SnapshotFile {
    #[serde(default)]
    users: HashMap<String, User>,
    #[serde(default)]
    tickets: HashMap<String, Ticket>,
}

/// Read the tables back from `path`. A missing file yields empty tables.
pub(crate) async fn load(path: &Path) -> Result<Tables, StoreError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(
                target: "ticketgate::records",
                path = %path.display(),
                "no snapshot found; starting with empty tables"
            );
            return Ok(Tables::default());
        }
        Err(err) => return Err(err.into()),
    };
    let file: SnapshotFile = serde_json::from_slice(&bytes)?;
    Ok(Tables { users: file.users.into(), tickets: file.tickets.into() })
}

/// Serialize the current tables. Holds both read locks only while encoding.
pub(crate) fn encode(tables: &Tables) -> Result<Vec<u8>, StoreError> {
    let users = read(&tables.users);
    let tickets = read(&tables.tickets);
    let snapshot = SnapshotRef {
        users: users.iter().map(|(id, u)| (id.as_str(), u)).collect(),
        tickets: tickets.iter().map(|(id, t)| (id.as_str(), t)).collect(),
    };
    Ok(serde_json::to_vec_pretty(&snapshot)?)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = temp_path(path);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn write_snapshot(tables: &Tables, path: &Path) -> Result<(), StoreError> {
    let bytes = encode(tables)?;
    write_atomic(path, &bytes).await?;
    tracing::debug!(
        target: "ticketgate::records",
        path = %path.display(),
        bytes = bytes.len(),
        "snapshot written"
    );
    Ok(())
}

enum Command {
    Flush(oneshot::Sender<Result<(), StoreError>>),
    Shutdown(oneshot::Sender<Result<(), StoreError>>),
}

/// Handle to the background snapshot worker.
#[derive(Debug)]
pub(crate) struct Snapshotter {
    dirty: Arc<Notify>,
    control: mpsc::Sender<Command>,
    path: PathBuf,
}

impl Snapshotter {
    pub(crate) fn spawn(tables: Arc<Tables>, path: PathBuf) -> Self {
        let dirty = Arc::new(Notify::new());
        let (control, rx) = mpsc::channel(8);
        tokio::spawn(run(tables, path.clone(), Arc::clone(&dirty), rx));
        Self { dirty, control, path }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Request a snapshot. Requests made while one is pending coalesce.
    pub(crate) fn mark_dirty(&self) {
        self.dirty.notify_one();
    }

    pub(crate) async fn flush(&self) -> Result<(), StoreError> {
        self.request(Command::Flush).await
    }

    pub(crate) async fn shutdown(&self) -> Result<(), StoreError> {
        self.request(Command::Shutdown).await
    }

    async fn request(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<(), StoreError>>) -> Command,
    ) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.control.send(make(tx)).await.map_err(|_| StoreError::Closed)?;
        rx.await.map_err(|_| StoreError::Closed)?
    }
}

async fn run(
    tables: Arc<Tables>,
    path: PathBuf,
    dirty: Arc<Notify>,
    mut control: mpsc::Receiver<Command>,
) {
    loop {
        tokio::select! {
            _ = dirty.notified() => {
                if let Err(err) = write_snapshot(&tables, &path).await {
                    tracing::error!(
                        target: "ticketgate::records",
                        path = %path.display(),
                        error = %err,
                        "background snapshot failed"
                    );
                }
            }
            command = control.recv() => match command {
                Some(Command::Flush(reply)) => {
                    let _ = reply.send(write_snapshot(&tables, &path).await);
                }
                Some(Command::Shutdown(reply)) => {
                    let _ = reply.send(write_snapshot(&tables, &path).await);
                    break;
                }
                None => {
                    if let Err(err) = write_snapshot(&tables, &path).await {
                        tracing::error!(
                            target: "ticketgate::records",
                            path = %path.display(),
                            error = %err,
                            "final snapshot failed"
                        );
                    }
                    break;
                }
            }
        }
    }
    tracing::debug!(target: "ticketgate::records", path = %path.display(), "snapshot worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_file_is_a_sibling() {
        let tmp = temp_path(Path::new("/var/lib/tg/database.json"));
        assert_eq!(tmp, PathBuf::from("/var/lib/tg/database.json.tmp"));
    }

    #[test]
    fn empty_tables_encode_both_keys() {
        let bytes = encode(&Tables::default()).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(json["users"].as_object().unwrap().is_empty());
        assert!(json["tickets"].as_object().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let tables = load(&dir.path().join("absent.json")).await.unwrap();
        assert!(read(&tables.users).is_empty());
    }

    #[tokio::test]
    async fn garbage_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();
        assert!(matches!(load(&path).await, Err(StoreError::Codec(_))));
    }
}
