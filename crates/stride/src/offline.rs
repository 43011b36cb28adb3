//! Remote provider for local-only commands.

use async_trait::async_trait;
use stride_sync::{
    MirrorPatch, OwnerDocument, RemoteDocuments, RemoteError, RemoteResource, RemoteResult,
};

/// A remote that is never reachable. Reconciliation through it falls back
/// to cached data, which is all the CLI needs.
#[derive(Debug, Default)]
pub struct OfflineRemote;

#[async_trait]
impl RemoteDocuments for OfflineRemote {
    async fn owner_document(&self, _owner_id: &str) -> RemoteResult<Option<OwnerDocument>> {
        Err(unavailable())
    }

    async fn resource(&self, _resource_id: &str) -> RemoteResult<Option<RemoteResource>> {
        Err(unavailable())
    }

    async fn update_owner(&self, _owner_id: &str, _patch: MirrorPatch) -> RemoteResult<()> {
        Err(unavailable())
    }
}

fn unavailable() -> RemoteError {
    RemoteError::Unavailable("no remote configured".to_string())
}
