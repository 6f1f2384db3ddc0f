use serde::{Deserialize, Serialize};

use crate::mem::DEFAULT_UNIT_SIZE;

/// Options of a reconstruction session. Loadable from JSON; missing fields take their defaults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// When cleared every step is a no-op and the crash state is reported unchanged.
    pub enabled: bool,

    /// Address granularity of the memory overlay in bytes, between 1 and 8.
    pub unit_size: usize,

    /// Width in bytes assumed for a store whose access width is not known.
    pub default_access_bytes: usize,

    /// Name of the function being reconstructed, used in diagnostics.
    pub function_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            unit_size: DEFAULT_UNIT_SIZE,
            default_access_bytes: DEFAULT_UNIT_SIZE,
            function_name: String::new(),
        }
    }
}

impl SessionConfig {
    pub fn for_function(name: impl Into<String>) -> Self {
        Self {
            function_name: name.into(),
            ..Default::default()
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}
