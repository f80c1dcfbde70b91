//! Layout Planner
//!
//! Runs the planning pipeline for one deployment: claim tree assembly,
//! validation, size resolution and conversion to a flat scheme.

use crate::claims::{resolve_sizes, validate, ClaimTree, ClaimTreeBuilder};
use crate::config::PlannerConfig;
use crate::deployment::Deployment;
use crate::error::Result;
use crate::hardware::discovery::identity::DeviceResolver;
use crate::scheme::{convert, StorageScheme};
use tracing::info;

/// Output of planning
#[derive(Debug, Clone)]
pub struct Plan {
    /// Size-resolved claim tree
    pub tree: ClaimTree,
    /// Flat scheme derived from the tree
    pub scheme: StorageScheme,
}

pub struct Planner<'a> {
    config: &'a PlannerConfig,
    resolver: &'a DeviceResolver,
}

impl<'a> Planner<'a> {
    pub fn new(config: &'a PlannerConfig, resolver: &'a DeviceResolver) -> Self {
        Self { config, resolver }
    }

    pub async fn plan(&self, deployment: &Deployment) -> Result<Plan> {
        let mut tree = ClaimTreeBuilder::new(self.config, self.resolver)
            .build(deployment)
            .await?;
        validate(&tree)?;
        resolve_sizes(&mut tree, self.config)?;
        let scheme = convert(&tree, self.config)?;

        info!(
            "Planned {} partition tables and {} filesystems",
            scheme.parteds.len(),
            scheme.fss.len()
        );
        Ok(Plan { tree, scheme })
    }
}
