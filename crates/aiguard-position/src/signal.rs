//! Signal service seam.

use aiguard_core::{CallError, Signal};
use async_trait::async_trait;

/// Produces trading signals for an asset pair.
///
/// `Ok(None)` means the service had no opinion.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignalGenerator: Send + Sync {
    async fn generate_detailed_signal(&self, asset_pair: &str)
        -> Result<Option<Signal>, CallError>;
}
