use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::types::RuntimeKind;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub kind: RuntimeKind,
    /// Root of the portable R installation (`bin/Rscript` lives below it).
    pub r_home: PathBuf,
    /// Executable for [`RuntimeKind::Command`].
    pub executable: Option<PathBuf>,
    /// Argument template for [`RuntimeKind::Command`]; `{port}`, `{host}` and
    /// `{app_dir}` are substituted at launch.
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Exposed to the app as `options(app.version = ...)`.
    pub app_version: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            kind: RuntimeKind::Shiny,
            r_home: super::default_asset_dir().join("r_lang"),
            executable: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
