//! Handle to a plugin hosted elsewhere on the core.

use rmpv::Value;

use crate::api::call::ApiRun;
use crate::api::core::Core;
use crate::api::error::ApiError;
use crate::api::result::RunResult;

/// An addressable remote plugin, identified by its plugin id
#[derive(Debug, Clone)]
pub struct RemotePlugin {
    id: String,
    core: Core,
}

impl RemotePlugin {
    pub fn new(id: impl Into<String>, core: &Core) -> Self {
        Self {
            id: id.into(),
            core: core.clone(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Invoke a function on the remote plugin.
    ///
    /// Returns immediately with the result slot; await it for the outcome.
    pub async fn run(&self, function: &str, arguments: Vec<Value>) -> Result<RunResult, ApiError> {
        let call = ApiRun::new(&self.id, function, arguments)?;
        self.core.send_run(call).await
    }
}
