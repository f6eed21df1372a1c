use std::collections::HashMap;

use nucleus_domain::{ComponentName, Deployment};
use nucleus_store::StoreLayout;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::deployment::DeploymentPhase;
use crate::error::AgentError;

/// Persisted across a bootstrap-triggered device restart (§4.7, §9, §12).
/// Written just before `PlatformAdapter` is asked to restart the device;
/// read back at the next startup to resume the deployment at `APPLYING`
/// instead of re-running DependencyResolver from scratch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuationRecord {
    pub deployment_id: String,
    pub phase: DeploymentPhase,
    pub document_sha256: String,
    pub resolved_versions: HashMap<ComponentName, semver::Version>,
    /// The deployment document itself, so resume can rebuild the config
    /// merge document and re-derive the orchestrator plan without asking
    /// the cloud control plane to resend it.
    pub deployment: Deployment,
}

impl ContinuationRecord {
    pub fn document_digest(document_bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(document_bytes);
        format!("{:x}", hasher.finalize())
    }

    /// Whether `document_bytes` is the same deployment document this record
    /// was written for (§9's startup hash-match check).
    pub fn matches_document(&self, document_bytes: &[u8]) -> bool {
        self.document_sha256 == Self::document_digest(document_bytes)
    }
}

pub async fn write_continuation_record(layout: &StoreLayout, record: &ContinuationRecord) -> Result<(), AgentError> {
    let bytes = serde_json::to_vec_pretty(record)
        .map_err(|e| AgentError::DeploymentDocumentInvalid(e.to_string()))?;
    nucleus_store::write_atomic(&layout.continuation_record_path(), &bytes)
        .await
        .map_err(AgentError::from)
}

/// Reads back a pending continuation record, if one was left by an
/// interrupted deployment. Absence is the common case, not an error.
pub async fn read_continuation_record(layout: &StoreLayout) -> Option<ContinuationRecord> {
    let bytes = tokio::fs::read(layout.continuation_record_path()).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}

pub async fn clear_continuation_record(layout: &StoreLayout) {
    let _ = tokio::fs::remove_file(layout.continuation_record_path()).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn continuation_record_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        let record = ContinuationRecord {
            deployment_id: "dep-1".to_string(),
            phase: DeploymentPhase::Applying,
            document_sha256: ContinuationRecord::document_digest(b"{}"),
            resolved_versions: HashMap::new(),
            deployment: Deployment {
                id: "dep-1".to_string(),
                timestamp: 1,
                group_name: "default".to_string(),
                packages: vec![],
                policies: nucleus_domain::Policies::default(),
            },
        };
        write_continuation_record(&layout, &record).await.unwrap();

        let read_back = read_continuation_record(&layout).await.unwrap();
        assert_eq!(read_back, record);
        assert!(read_back.matches_document(b"{}"));

        clear_continuation_record(&layout).await;
        assert!(read_continuation_record(&layout).await.is_none());
    }
}
