//! IASP Workflow Library
//!
//! The application core behind the gateway and the registration worker:
//! - Credit ledger and per-target summary
//! - Submission gate
//! - Insertion and document management
//! - Document assembly (principal document and merged bundle)
//! - Protocol registration with the external registry, and the catch-up job
//! - Commission review overlay

pub mod assembly;
pub mod catalog;
pub mod documents;
pub mod gate;
pub mod insertion;
pub mod ledger;
pub mod notify;
pub mod registration;
pub mod registry;
pub mod review;

pub use assembly::{AssembledBundle, DocumentRenderer, SummaryPageRenderer};
pub use gate::{SubmissionOutcome, SubmissionStatus};
pub use ledger::{compute_total_credits, declared_credits_by_target, LedgerSnapshot, TargetCredits};
pub use notify::{HttpRelayNotifier, LogNotifier, Notifier};
pub use registration::{CatchUpReport, RegistrationOutcome, SkipReason};
pub use registry::{HttpRegistryClient, RegistryClient};

use iasp_common::config::{RegistryConfig, StorageConfig};
use iasp_common::{ApplicationStore, FileStorage};
use std::sync::Arc;

/// Collaborators shared by every workflow operation
#[derive(Clone)]
pub struct Workflow {
    pub store: Arc<dyn ApplicationStore>,
    pub storage: FileStorage,
    pub renderer: Arc<dyn DocumentRenderer>,
    pub registry: Arc<dyn RegistryClient>,
    pub notifier: Arc<dyn Notifier>,
    pub storage_config: StorageConfig,
    pub registry_config: RegistryConfig,
}

impl Workflow {
    /// Wires the default renderer; storage is rooted at the configured media root
    pub fn new(
        store: Arc<dyn ApplicationStore>,
        registry: Arc<dyn RegistryClient>,
        notifier: Arc<dyn Notifier>,
        storage_config: StorageConfig,
        registry_config: RegistryConfig,
    ) -> Self {
        Self {
            store,
            storage: FileStorage::new(storage_config.media_root.clone()),
            renderer: Arc::new(SummaryPageRenderer),
            registry,
            notifier,
            storage_config,
            registry_config,
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn DocumentRenderer>) -> Self {
        self.renderer = renderer;
        self
    }
}
