//! Authentication seam
//!
//! Credential checking is an external concern; the bridge only advertises the
//! available methods and forwards `authenticate` calls.

use agent_client_protocol as acp;
use async_trait::async_trait;

use crate::types::Result;

/// External credential check
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Auth methods to advertise in the initialize response
    fn methods(&self) -> Vec<acp::AuthMethod>;

    /// Validate the client's chosen method
    async fn authenticate(&self, method_id: &str) -> Result<()>;
}

/// Authenticator for deployments where the controller needs no credentials
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAuth;

#[async_trait]
impl Authenticator for NoAuth {
    fn methods(&self) -> Vec<acp::AuthMethod> {
        Vec::new()
    }

    async fn authenticate(&self, method_id: &str) -> Result<()> {
        tracing::debug!(method_id, "Authenticate accepted, no credentials required");
        Ok(())
    }
}
