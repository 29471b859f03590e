use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use anyhow::{Result, bail};

use crate::RenderError;

/// Shared flag telling a running render to stop at the next job boundary.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    parent: Option<Box<CancelToken>>,
}

impl CancelToken {
    /// Creates a token which has not been cancelled yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a token which is cancelled together with this one, but can also be cancelled on
    /// its own without affecting this one.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            flag: Arc::default(),
            parent: Some(Box::new(self.clone())),
        }
    }

    /// Requests every holder of this token to stop.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Check whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
            || self.parent.as_ref().is_some_and(|parent| parent.is_cancelled())
    }

    /// Fails with [`RenderError::Interrupted`] once cancellation has been requested.
    ///
    /// # Errors
    ///
    /// Returns an error if the token has been cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            bail!(RenderError::Interrupted);
        }
        Ok(())
    }
}
