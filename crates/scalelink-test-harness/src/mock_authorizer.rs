//! Mock authorization collaborator.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use scalelink_core::error::{Error, Result};
use scalelink_core::transport::{Authorizer, Channel};

use crate::mock_channel::MockChannel;

#[derive(Default)]
struct AuthState {
    authorized: Vec<MockChannel>,
    pending: VecDeque<MockChannel>,
    requests: usize,
    list_calls: usize,
    fail_listing: bool,
}

/// An [`Authorizer`] over [`MockChannel`]s.
///
/// Authorized channels are listed in insertion order. Pending channels are
/// granted one per [`request_authorization()`](Authorizer::request_authorization).
/// Clones share state.
#[derive(Clone, Default)]
pub struct MockAuthorizer {
    state: Arc<Mutex<AuthState>>,
}

impl MockAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, AuthState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add an already-authorized channel.
    pub fn with_authorized(self, channel: MockChannel) -> Self {
        self.lock().authorized.push(channel);
        self
    }

    /// Authorize a channel on a running authorizer, as a hot-plugged
    /// device the host already granted would appear.
    pub fn plug_in(&self, channel: MockChannel) {
        self.lock().authorized.push(channel);
    }

    /// Add a channel that becomes authorized on the next request.
    pub fn with_pending(self, channel: MockChannel) -> Self {
        self.lock().pending.push_back(channel);
        self
    }

    /// Make `list_authorized()` fail.
    pub fn fail_listing(&self, on: bool) {
        self.lock().fail_listing = on;
    }

    /// Number of `request_authorization()` calls so far.
    pub fn request_count(&self) -> usize {
        self.lock().requests
    }

    pub fn list_count(&self) -> usize {
        self.lock().list_calls
    }
}

#[async_trait]
impl Authorizer for MockAuthorizer {
    async fn list_authorized(&mut self) -> Result<Vec<Box<dyn Channel>>> {
        let mut s = self.lock();
        s.list_calls += 1;
        if s.fail_listing {
            return Err(Error::Authorization("listing failed".into()));
        }
        Ok(s
            .authorized
            .iter()
            .map(|c| Box::new(c.clone()) as Box<dyn Channel>)
            .collect())
    }

    async fn request_authorization(&mut self) -> Result<Option<Box<dyn Channel>>> {
        let mut s = self.lock();
        s.requests += 1;
        match s.pending.pop_front() {
            Some(channel) => {
                s.authorized.push(channel.clone());
                Ok(Some(Box::new(channel)))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn grants_pending_on_request() {
        let mut auth = MockAuthorizer::new().with_pending(MockChannel::new("COM4"));
        assert!(auth.list_authorized().await.unwrap().is_empty());

        let granted = auth.request_authorization().await.unwrap().unwrap();
        assert_eq!(granted.id().as_str(), "COM4");
        assert_eq!(auth.request_count(), 1);

        let listed = auth.list_authorized().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(auth.request_authorization().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn listing_failure() {
        let mut auth = MockAuthorizer::new().with_authorized(MockChannel::new("COM1"));
        auth.fail_listing(true);
        assert!(matches!(
            auth.list_authorized().await,
            Err(Error::Authorization(_))
        ));
        assert_eq!(auth.list_count(), 1);
    }
}
