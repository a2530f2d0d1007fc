//! Transport used while signed out: every call fails with an `AUTH`-class
//! error so the sync engine's retry classification routes it straight to
//! "needs reauth" instead of spinning on retryable backoff.

use async_trait::async_trait;

use notewire_core::errors::Result;
use notewire_core::transport::{PullRequest, PullResponse, PushRequest, PushResponse, Transport};
use notewire_core::CoreError;

/// A `Transport` that never reaches a network. Installed when there is no
/// signed-in session; capture and local reads keep working, sync does not.
pub struct DisabledTransport {
    message: String,
}

impl DisabledTransport {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl Default for DisabledTransport {
    fn default() -> Self {
        Self::new("signed out")
    }
}

#[async_trait]
impl Transport for DisabledTransport {
    async fn push(&self, _request: PushRequest) -> Result<PushResponse> {
        Err(CoreError::auth(self.message.clone()))
    }

    async fn pull(&self, _request: PullRequest) -> Result<PullResponse> {
        Err(CoreError::auth(self.message.clone()))
    }

    async fn upload_blob(&self, _workspace_id: &str, _hash: &str, _content_type: &str, _bytes: Vec<u8>) -> Result<()> {
        Err(CoreError::auth(self.message.clone()))
    }

    async fn download_blob(&self, _workspace_id: &str, _hash: &str) -> Result<Vec<u8>> {
        Err(CoreError::auth(self.message.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_call_fails_with_auth_class() {
        let transport = DisabledTransport::default();
        let err = transport
            .pull(PullRequest {
                workspace_id: "ws-1".into(),
                user_id: "user-1".into(),
                device_id: "device-a".into(),
                cursor: 0,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, notewire_core::SyncErrorCode::Auth);
    }
}
