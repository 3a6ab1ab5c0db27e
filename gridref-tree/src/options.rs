use std::collections::BTreeMap;
#[cfg(feature = "rayon")]
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Options forwarded untouched to the aggregation engine, e.g. credentials for remote resources.
pub type RemoteOptions = BTreeMap<String, Value>;

/// The [`ExecutionMode`] describes how per-node aggregations are executed.
/// There is one task per hierarchy node that received fragments.
#[derive(Debug, Clone, Default)]
pub enum ExecutionMode {
    /// Aggregate nodes one after the other on the calling thread.
    #[default]
    Inline,
    /// Aggregate nodes on the global Rayon thread pool.
    #[cfg(feature = "rayon")]
    Rayon,
    /// Aggregate nodes on a provided Rayon thread pool.
    #[cfg(feature = "rayon")]
    RayonThreadPool(Arc<rayon::ThreadPool>),
}

/// Options for building a merged manifest from reference fragments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeOptions {
    /// Dimensions every node is concatenated along, outermost first.
    concat_dims: Vec<String>,
    /// Dimensions asserted identical across the members of every node.
    identical_dims: Vec<String>,
    remote_options: RemoteOptions,
    #[serde(skip)]
    execution_mode: ExecutionMode,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            concat_dims: vec!["time".to_string(), "step".to_string()],
            identical_dims: vec!["longitude".to_string(), "latitude".to_string()],
            remote_options: RemoteOptions::new(),
            execution_mode: ExecutionMode::default(),
        }
    }
}

impl TreeOptions {
    /// Configure the default concat dimensions.
    pub fn with_concat_dims<S: Into<String>>(mut self, dims: impl IntoIterator<Item = S>) -> Self {
        self.concat_dims = dims.into_iter().map(Into::into).collect();
        self
    }

    /// Configure the default identical dimensions.
    pub fn with_identical_dims<S: Into<String>>(mut self, dims: impl IntoIterator<Item = S>) -> Self {
        self.identical_dims = dims.into_iter().map(Into::into).collect();
        self
    }

    /// Configure the options passed through to the aggregation engine.
    pub fn with_remote_options(mut self, remote_options: RemoteOptions) -> Self {
        self.remote_options = remote_options;
        self
    }

    /// Configure how node aggregations are scheduled.
    pub fn with_execution_mode(mut self, execution_mode: ExecutionMode) -> Self {
        self.execution_mode = execution_mode;
        self
    }

    pub fn concat_dims(&self) -> &[String] {
        &self.concat_dims
    }

    pub fn identical_dims(&self) -> &[String] {
        &self.identical_dims
    }

    pub fn remote_options(&self) -> &RemoteOptions {
        &self.remote_options
    }

    pub fn execution_mode(&self) -> &ExecutionMode {
        &self.execution_mode
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn defaults() {
        let options = TreeOptions::default();
        assert_eq!(options.concat_dims(), ["time", "step"]);
        assert_eq!(options.identical_dims(), ["longitude", "latitude"]);
        assert!(options.remote_options().is_empty());
        assert!(matches!(options.execution_mode(), ExecutionMode::Inline));
    }

    #[test]
    fn deserialize_partial_options() {
        let options: TreeOptions = serde_json::from_value(json!({
            "concat_dims": ["time", "step", "valid_time"],
            "remote_options": {"anon": true}
        }))
        .unwrap();
        assert_eq!(options.concat_dims(), ["time", "step", "valid_time"]);
        assert_eq!(options.identical_dims(), ["longitude", "latitude"]);
        assert_eq!(options.remote_options()["anon"], json!(true));
    }
}
