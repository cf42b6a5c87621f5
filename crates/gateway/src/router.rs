use async_trait::async_trait;

use crate::state::ConnectionHandle;

/// Resolves a user id to the connections currently registered under it.
///
/// Unknown and offline users resolve to an empty set; delivering to an
/// empty set is a silent no-op.
#[async_trait]
pub trait ChannelRouter: Send + Sync {
    async fn resolve(&self, user_id: &str) -> Vec<ConnectionHandle>;
}
