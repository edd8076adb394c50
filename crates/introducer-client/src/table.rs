//! Announcement table: the latest known announcement per index.
//!
//! The table never shrinks. There is no withdraw message in the protocol, so
//! an index once seen stays until the process exits; only its value changes.
//! Each index remembers the order it was first seen in so replays to late
//! subscribers follow arrival order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use introducer_core::{AnnouncementIndex, AnnouncementRecord};

#[derive(Debug, Clone)]
pub struct AnnouncementEntry {
    pub announcement: Arc<AnnouncementRecord>,
    /// Verifying key token, `None` for unsigned announcements.
    pub verifying_key: Option<String>,
    pub received_at: SystemTime,
    /// Position of the index in first-seen order.
    pub sequence: u64,
}

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    New,
    Updated,
    Duplicate,
}

#[derive(Clone, Default)]
pub struct AnnouncementTable {
    entries: Arc<DashMap<AnnouncementIndex, AnnouncementEntry>>,
    next_sequence: Arc<AtomicU64>,
}

impl AnnouncementTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, index: &AnnouncementIndex) -> Option<AnnouncementEntry> {
        self.entries.get(index).map(|e| e.value().clone())
    }

    /// Store `announcement` at `index` unless an identical record is already
    /// there. A duplicate leaves the stored entry, timestamp included, alone.
    pub fn upsert(
        &self,
        index: AnnouncementIndex,
        announcement: Arc<AnnouncementRecord>,
        verifying_key: Option<String>,
    ) -> UpsertOutcome {
        match self.entries.entry(index) {
            Entry::Occupied(mut occupied) => {
                if *occupied.get().announcement == *announcement {
                    return UpsertOutcome::Duplicate;
                }
                let sequence = occupied.get().sequence;
                occupied.insert(AnnouncementEntry {
                    announcement,
                    verifying_key,
                    received_at: SystemTime::now(),
                    sequence,
                });
                UpsertOutcome::Updated
            }
            Entry::Vacant(vacant) => {
                let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
                vacant.insert(AnnouncementEntry {
                    announcement,
                    verifying_key,
                    received_at: SystemTime::now(),
                    sequence,
                });
                UpsertOutcome::New
            }
        }
    }

    /// Every entry for `service_name`, in first-seen order.
    pub fn matching(&self, service_name: &str) -> Vec<(AnnouncementIndex, AnnouncementEntry)> {
        let mut found: Vec<_> = self
            .entries
            .iter()
            .filter(|e| e.key().service_name == service_name)
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        found.sort_by_key(|(_, entry)| entry.sequence);
        found
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in first-seen order.
    pub fn snapshot(&self) -> Vec<(AnnouncementIndex, AnnouncementEntry)> {
        let mut all: Vec<_> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        all.sort_by_key(|(_, entry)| entry.sequence);
        all
    }
}
