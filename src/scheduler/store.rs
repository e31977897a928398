use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;

use super::{error::SchedulerError, session::SessionKey, session::Slot};

/// Slots of one session, locked as a whole so operations on the same
/// session are serialised.
pub type Session = Arc<Mutex<Vec<Slot>>>;

/// All the sessions tracked by the running process.
/// Nothing is persisted and nothing is cleaned up in the background.
#[derive(Debug, Default)]
pub struct SessionStore {
    data: HashMap<SessionKey, Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, key: SessionKey, slots: Vec<Slot>) -> Result<Session, SchedulerError> {
        if self.data.contains_key(&key) {
            return Err(SchedulerError::SessionExists { key });
        }

        let session = Arc::new(Mutex::new(slots));
        self.data.insert(key, session.clone());

        Ok(session)
    }

    pub fn get(&self, key: &SessionKey) -> Result<Session, SchedulerError> {
        self.data
            .get(key)
            .cloned()
            .ok_or_else(|| SchedulerError::SessionNotFound { key: key.clone() })
    }

    /// Removes a session; returns whether it was there.
    pub fn delete(&mut self, key: &SessionKey) -> bool {
        self.data.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }
}
