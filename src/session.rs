use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{
    db::Identity,
    error::{ChatError, Result},
};

/// An authenticated caller, handed explicitly to every chat operation.
///
/// Clones share one validity flag: signing out through any clone invalidates all of
/// them, including the ones held by open subscriptions.
#[derive(Debug, Clone)]
pub struct Session {
    user_id: Identity,
    valid: Arc<AtomicBool>,
}

impl Session {
    pub fn new(user_id: Identity) -> Self {
        Self {
            user_id,
            valid: Arc::new(AtomicBool::new(true)),
        }
    }

    /// The caller's identity, or `Unauthorized` once the session is signed out.
    pub fn identity(&self) -> Result<Identity> {
        if self.is_valid() {
            Ok(self.user_id)
        } else {
            Err(ChatError::Unauthorized)
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn sign_out(&self) {
        self.valid.store(false, Ordering::Release);
    }
}
