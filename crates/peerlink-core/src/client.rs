//! Server-side bookkeeping for connected peers.

use serde::{Deserialize, Serialize};

use crate::event::ClientId;

/// One connected remote peer, as seen by the server session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecord {
    /// Connection-local id assigned by the endpoint.
    pub id: ClientId,
    /// Identity the client announced via `core.sync.update_client_data`.
    pub synced_id: Option<String>,
    /// Remote socket address, when known.
    pub address: Option<String>,
}

impl ClientRecord {
    #[must_use]
    pub const fn new(id: ClientId, address: Option<String>) -> Self {
        Self {
            id,
            synced_id: None,
            address,
        }
    }
}

/// Ordered set of client records, in connection order.
#[derive(Debug, Clone, Default)]
pub struct ClientRegistry {
    records: Vec<ClientRecord>,
}

impl ClientRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record, replacing any existing one with the same id.
    pub fn insert(&mut self, record: ClientRecord) {
        if let Some(existing) = self.records.iter_mut().find(|r| r.id == record.id) {
            *existing = record;
        } else {
            self.records.push(record);
        }
    }

    pub fn remove(&mut self, id: ClientId) -> Option<ClientRecord> {
        let index = self.records.iter().position(|r| r.id == id)?;
        Some(self.records.remove(index))
    }

    #[must_use]
    pub fn get(&self, id: ClientId) -> Option<&ClientRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Find a client by the identity it announced.
    #[must_use]
    pub fn find_synced(&self, synced_id: &str) -> Option<&ClientRecord> {
        self.records
            .iter()
            .find(|r| r.synced_id.as_deref() == Some(synced_id))
    }

    /// Record the identity a client announced. Returns false if the client is unknown.
    pub fn sync(&mut self, id: ClientId, synced_id: impl Into<String>) -> bool {
        match self.records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                record.synced_id = Some(synced_id.into());
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn records(&self) -> &[ClientRecord] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
