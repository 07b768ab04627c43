// Engine Configuration
// YAML-loadable settings for plan execution and channel instrumentation

use crate::error::EngineResult;
use crate::execution::executor::ExecutorConfig;
use crate::platform::{
    FullInstrumentation, InstrumentationStrategy, NoInstrumentation, OutboundInstrumentation,
};

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which channels report measured cardinalities
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentationMode {
    None,
    #[default]
    Outbound,
    Full,
}

impl InstrumentationMode {
    pub fn strategy(self) -> Box<dyn InstrumentationStrategy> {
        match self {
            InstrumentationMode::None => Box::new(NoInstrumentation),
            InstrumentationMode::Outbound => Box::new(OutboundInstrumentation),
            InstrumentationMode::Full => Box::new(FullInstrumentation),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub executor: ExecutorConfig,
    pub instrumentation: InstrumentationMode,
}

impl EngineConfig {
    pub fn from_yaml_str(content: &str) -> EngineResult<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }
}
