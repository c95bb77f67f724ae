//! Concurrency-safe user and ticket tables with background snapshots.
//!
//! The two tables are guarded by independent `RwLock`s. Every successful
//! write marks the store dirty; a background [`snapshot`] worker picks that up
//! and rewrites the whole snapshot file. Request paths never wait on disk.
//! A burst of writes collapses into as few snapshot writes as the worker can
//! keep up with, and the last one always reflects the latest state.
//!
//! Lock order when both tables are needed: users, then tickets.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use crate::ident::decode_ticket_number;
use crate::model::{Ticket, User};

pub mod snapshot;
use snapshot::Snapshotter;

/// The unique user field a registration collided on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictField {
    NationalId,
    Email,
    Phone,
}

impl fmt::Display for ConflictField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConflictField::NationalId => "national id",
            ConflictField::Email => "email",
            ConflictField::Phone => "phone",
        };
        f.write_str(name)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("{0} already registered")]
    Conflict(ConflictField),
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot encoding failed: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("snapshot worker has stopped")]
    Closed,
}

#[derive(Debug, Default)]
pub(crate) struct Tables {
    pub(crate) users: RwLock<HashMap<String, User>>,
    pub(crate) tickets: RwLock<HashMap<String, Ticket>>,
}

/// In-memory record tables, optionally mirrored to a snapshot file.
#[derive(Debug)]
pub struct RecordStore {
    tables: Arc<Tables>,
    snapshots: Option<Snapshotter>,
}

impl RecordStore {
    /// Tables with no persistence at all.
    pub fn in_memory() -> Self {
        Self { tables: Arc::new(Tables::default()), snapshots: None }
    }

    /// Load `path` (a missing file means empty tables) and start the snapshot worker.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the file exists but cannot be read or parsed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let tables = Arc::new(snapshot::load(&path).await?);
        tracing::info!(
            target: "ticketgate::records",
            path = %path.display(),
            users = read(&tables.users).len(),
            tickets = read(&tables.tickets).len(),
            "record store opened"
        );
        let snapshots = Snapshotter::spawn(Arc::clone(&tables), path);
        Ok(Self { tables, snapshots: Some(snapshots) })
    }

    /// Snapshot file path, when persistent.
    pub fn path(&self) -> Option<&Path> {
        self.snapshots.as_ref().map(Snapshotter::path)
    }

    fn schedule_snapshot(&self) {
        if let Some(snapshots) = &self.snapshots {
            snapshots.mark_dirty();
        }
    }

    pub fn get_user(&self, id: &str) -> Option<User> {
        read(&self.tables.users).get(id).cloned()
    }

    pub fn find_user_by_national_id(&self, national_id: &str) -> Option<User> {
        read(&self.tables.users).values().find(|u| u.national_id == national_id).cloned()
    }

    /// Find a user whose email or phone equals `identifier`.
    pub fn find_user_by_email_or_phone(&self, identifier: &str) -> Option<User> {
        read(&self.tables.users)
            .values()
            .find(|u| u.email == identifier || u.phone == identifier)
            .cloned()
    }

    /// Insert or replace a user without uniqueness checks.
    pub fn put_user(&self, user: User) {
        write(&self.tables.users).insert(user.id.clone(), user);
        self.schedule_snapshot();
    }

    /// Insert `user` unless its national id, email or phone is already taken.
    ///
    /// The check and the insert happen under one write lock, so of two
    /// concurrent registrations sharing a unique field exactly one wins.
    /// Email and phone are each checked against both fields of existing users.
    pub fn insert_user_unique(&self, user: User) -> Result<(), StoreError> {
        {
            let mut users = write(&self.tables.users);
            if let Some(field) = users.values().find_map(|existing| conflict(existing, &user)) {
                return Err(StoreError::Conflict(field));
            }
            users.insert(user.id.clone(), user);
        }
        self.schedule_snapshot();
        Ok(())
    }

    pub fn get_ticket(&self, id: &str) -> Option<Ticket> {
        read(&self.tables.tickets).get(id).cloned()
    }

    pub fn put_ticket(&self, ticket: Ticket) {
        write(&self.tables.tickets).insert(ticket.id.clone(), ticket);
        self.schedule_snapshot();
    }

    /// Tickets owned by `user_id`, oldest first.
    pub fn tickets_for_user(&self, user_id: &str) -> Vec<Ticket> {
        let mut tickets: Vec<Ticket> =
            read(&self.tables.tickets).values().filter(|t| t.user_id == user_id).cloned().collect();
        tickets.sort_by(|a, b| {
            a.created_at.cmp(&b.created_at).then_with(|| a.ticket_number.cmp(&b.ticket_number))
        });
        tickets
    }

    pub fn user_count(&self) -> usize {
        read(&self.tables.users).len()
    }

    pub fn ticket_count(&self) -> usize {
        read(&self.tables.tickets).len()
    }

    /// Highest sequence value among stored ticket numbers, or 0.
    pub fn highest_ticket_sequence(&self) -> u64 {
        read(&self.tables.tickets)
            .values()
            .filter_map(|t| decode_ticket_number(&t.ticket_number))
            .max()
            .unwrap_or(0)
    }

    /// Write a snapshot now and wait for it. No-op for in-memory stores.
    pub async fn flush(&self) -> Result<(), StoreError> {
        match &self.snapshots {
            Some(snapshots) => snapshots.flush().await,
            None => Ok(()),
        }
    }

    /// Stop the snapshot worker after a final write. Later writes stay in memory only.
    pub async fn shutdown(&self) -> Result<(), StoreError> {
        match &self.snapshots {
            Some(snapshots) => snapshots.shutdown().await,
            None => Ok(()),
        }
    }
}

fn conflict(existing: &User, candidate: &User) -> Option<ConflictField> {
    let taken = |value: &str| existing.email == value || existing.phone == value;
    if existing.national_id == candidate.national_id {
        Some(ConflictField::NationalId)
    } else if taken(&candidate.email) {
        Some(ConflictField::Email)
    } else if taken(&candidate.phone) {
        Some(ConflictField::Phone)
    } else {
        None
    }
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
