//! Bootstrap initializers producing seed resources.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::graph::ResourceGraph;
use crate::id::ResourceKey;

/// Free-form parameters handed to an initializer.
pub type InitializerParameters = serde_json::Value;

/// A bootstrap procedure run by the manager.
///
/// Returns the root resources it produced; the manager persists them together
/// with everything reachable from them.
#[async_trait]
pub trait ResourceInitializer: Send + Sync {
    /// Unique name used for registration and on-demand execution.
    fn name(&self) -> &str;

    async fn execute(
        &self,
        ctx: &InitializerContext,
        parameters: &InitializerParameters,
    ) -> Result<Vec<ResourceKey>>;
}

/// What an initializer gets to work with.
///
/// Resources created through [`create`](Self::create) are tracked, so the
/// manager can remove them again if the initializer fails or is cancelled.
#[derive(Debug)]
pub struct InitializerContext {
    graph: Arc<ResourceGraph>,
    cancellation: CancellationToken,
    created: Mutex<Vec<ResourceKey>>,
}

impl InitializerContext {
    pub(crate) fn new(graph: Arc<ResourceGraph>, cancellation: CancellationToken) -> Self {
        Self {
            graph,
            cancellation,
            created: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn graph(&self) -> &ResourceGraph {
        &self.graph
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Fail with [`Error::Cancelled`] once cancellation was requested.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancellation.is_cancelled() {
            return Err(Error::Cancelled {
                operation: "initializer",
            });
        }
        Ok(())
    }

    /// Instantiate a blank resource of type `tag`.
    pub fn create(&self, tag: &str) -> Result<ResourceKey> {
        self.check_cancelled()?;
        let key = self.graph.instantiate(tag)?;
        self.created.lock().push(key);
        Ok(key)
    }

    pub(crate) fn take_created(&self) -> Vec<ResourceKey> {
        std::mem::take(&mut *self.created.lock())
    }
}
