//! Outbound email, used by `sendTask` to deliver approval requests with
//! embedded webhook links.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::error::AdapterError;

#[async_trait]
pub trait EmailAdapter: Send + Sync {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), AdapterError>;
}

/// Records every send instead of delivering it; used by tests and the
/// out-of-the-box demo deployment.
#[derive(Default)]
pub struct MockEmailAdapter {
    sent: Mutex<Vec<(String, String, String)>>,
}

impl MockEmailAdapter {
    pub fn sent(&self) -> Vec<(String, String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailAdapter for MockEmailAdapter {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), AdapterError> {
        tracing::info!(to, subject, "mock email sent");
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string(), body.to_string()));
        Ok(())
    }
}
