//! Pluggable strategy roles that together decide how one document type is
//! bootstrapped, addressed, and written.

pub mod alias;
pub mod document_ingest;
pub mod provisioning;
pub mod rollover;

use std::sync::Arc;

use alias::AliasStrategy;
use document_ingest::DocumentIngestStrategy;
use provisioning::ProvisioningStrategy;
use rollover::RolloverConditions;

use crate::bootstrap::{BootstrapMethod, BootstrapStep};

/// The five strategy roles bundled for one `TypeContext<D>`.
pub struct IngestStrategy<D> {
    pub document_ingest: Box<dyn DocumentIngestStrategy<D>>,
    pub provisioning: Arc<dyn ProvisioningStrategy>,
    pub alias: Arc<dyn AliasStrategy>,
    pub rollover_conditions: Option<RolloverConditions>,
    pub bootstrap_steps: Vec<Box<dyn BootstrapStep>>,
    pub bootstrap_method: BootstrapMethod,
}

impl<D> IngestStrategy<D> {
    pub fn new(
        document_ingest: Box<dyn DocumentIngestStrategy<D>>,
        provisioning: Arc<dyn ProvisioningStrategy>,
        alias: Arc<dyn AliasStrategy>,
    ) -> Self {
        Self {
            document_ingest,
            provisioning,
            alias,
            rollover_conditions: None,
            bootstrap_steps: Vec::new(),
            bootstrap_method: BootstrapMethod::Failure,
        }
    }

    pub fn with_rollover(mut self, conditions: RolloverConditions) -> Self {
        self.rollover_conditions = Some(conditions);
        self
    }

    pub fn with_bootstrap_steps(mut self, steps: Vec<Box<dyn BootstrapStep>>) -> Self {
        self.bootstrap_steps = steps;
        self
    }

    pub fn with_bootstrap_method(mut self, method: BootstrapMethod) -> Self {
        self.bootstrap_method = method;
        self
    }
}
