use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::ids::{InvitationId, PeerRef};

/// Point-to-point session with at most one partner.
#[async_trait]
pub trait SessionPort: Send + Sync {
    /// Invite `peer` carrying the context token. The outcome arrives as
    /// `SessionChanged` events; no answer within `timeout` means `NotConnected`.
    async fn invite(&self, peer: &PeerRef, context: Vec<u8>, timeout: Duration) -> Result<()>;

    async fn respond_invitation(&self, invitation: InvitationId, accept: bool) -> Result<()>;

    /// Leave the current session, if any.
    async fn disconnect(&self) -> Result<()>;
}
