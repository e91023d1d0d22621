//! Face-merge coordination.
//!
//! [`MergeCoordinator`] validates merge inputs and then routes the vendor
//! call through a [`DedupRegistry`] keyed by the content hash of the
//! `(face, base)` pair, so identical concurrent requests cost one vendor
//! call.

use std::sync::Arc;

use bytes::Bytes;
use synth_core::hashing::merge_key;
use synth_core::merge_input::validate_merge_image;
use synth_vendor::{MergedImage, VendorClient, VendorError};

use crate::dedup::{DedupAborted, DedupRegistry};

/// Why a merge produced no result. Cloneable so joined callers share it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    /// Input rejected before any vendor call.
    #[error("Merge input rejected: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Vendor(#[from] VendorError),

    #[error(transparent)]
    Aborted(#[from] DedupAborted),
}

impl MergeError {
    /// Permanent failures should not be retried with the same inputs.
    pub fn is_permanent(&self) -> bool {
        match self {
            MergeError::InvalidInput(_) => true,
            MergeError::Vendor(e) => !e.is_transient(),
            MergeError::Aborted(_) => false,
        }
    }
}

pub struct MergeCoordinator {
    vendor: Arc<dyn VendorClient>,
    locks: DedupRegistry<MergedImage, MergeError>,
    max_payload_bytes: usize,
}

impl MergeCoordinator {
    pub fn new(vendor: Arc<dyn VendorClient>, max_payload_bytes: usize) -> Self {
        Self {
            vendor,
            locks: DedupRegistry::new(),
            max_payload_bytes,
        }
    }

    /// Merge `face` onto `base`, keyed by their content hash.
    pub async fn merge(&self, face: Bytes, base: Bytes) -> Result<MergedImage, MergeError> {
        let key = merge_key(&face, &base);
        self.merge_or_join(&key, face, base).await
    }

    /// Perform the merge for `key`, or await the identical merge already in
    /// flight. Invalid inputs fail before the lock is consulted.
    pub async fn merge_or_join(
        &self,
        key: &str,
        face: Bytes,
        base: Bytes,
    ) -> Result<MergedImage, MergeError> {
        validate_merge_image("face", &face, self.max_payload_bytes)
            .map_err(|e| MergeError::InvalidInput(e.to_string()))?;
        validate_merge_image("base", &base, self.max_payload_bytes)
            .map_err(|e| MergeError::InvalidInput(e.to_string()))?;

        let vendor = Arc::clone(&self.vendor);
        let result = self
            .locks
            .run_or_join(key, move || async move {
                vendor.merge_faces(face, base).await.map_err(MergeError::from)
            })
            .await;

        if let Err(e) = &result {
            tracing::warn!(merge_key = %key, error = %e, "Face merge failed");
        }
        result
    }

    /// Number of distinct merges currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.locks.in_flight_count()
    }
}
