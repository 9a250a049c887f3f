use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tether_types::{TetherError, TetherResult};

use crate::config::{RuntimeKind, SupervisorConfig};

/// Everything needed to invoke the managed server, minus the port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerRuntime {
    pub executable: PathBuf,
    /// Argument templates, see [`render_template`].
    pub args: Vec<String>,
    pub application_directory: PathBuf,
    pub env: BTreeMap<String, String>,
}

impl ServerRuntime {
    pub fn render_args(&self, host: &str, port: u16) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| render_template(arg, host, port, &self.application_directory))
            .collect()
    }
}

/// Substitute `{port}`, `{host}` and `{app_dir}` (forward slashes) in `template`.
pub fn render_template(template: &str, host: &str, port: u16, app_dir: &Path) -> String {
    template
        .replace("{port}", &port.to_string())
        .replace("{host}", host)
        .replace("{app_dir}", &to_posix(app_dir))
}

pub fn to_posix(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn escape_r_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

pub trait RuntimeResolver: Send + Sync {
    fn resolve(&self) -> TetherResult<ServerRuntime>;
}

/// Portable R installation serving a Shiny app directory.
#[derive(Clone, Debug)]
pub struct ShinyRuntime {
    r_home: PathBuf,
    app_dir: PathBuf,
    app_version: String,
    extra_env: BTreeMap<String, String>,
}

impl ShinyRuntime {
    pub fn new(r_home: impl Into<PathBuf>, app_dir: impl Into<PathBuf>) -> Self {
        Self {
            r_home: r_home.into(),
            app_dir: app_dir.into(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            extra_env: BTreeMap::new(),
        }
    }

    pub fn with_app_version(mut self, version: impl Into<String>) -> Self {
        self.app_version = version.into();
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.extra_env = env;
        self
    }

    pub fn rscript_path(&self) -> PathBuf {
        if cfg!(windows) {
            self.r_home.join("bin").join("x64").join("Rscript.exe")
        } else {
            self.r_home.join("bin").join("Rscript")
        }
    }

    fn run_expression(&self) -> String {
        format!(
            "options(app.version='{}')\nshiny::runApp('{}', host='{{host}}', port={{port}})",
            escape_r_string(&self.app_version),
            escape_r_string(&to_posix(&self.app_dir))
        )
    }
}

impl RuntimeResolver for ShinyRuntime {
    fn resolve(&self) -> TetherResult<ServerRuntime> {
        let rscript = self.rscript_path();
        if !rscript.is_file() {
            return Err(TetherError::LaunchFailure(format!(
                "Rscript executable missing: {}",
                rscript.display()
            )));
        }
        if !self.app_dir.is_dir() {
            return Err(TetherError::LaunchFailure(format!(
                "Shiny app directory missing: {}",
                self.app_dir.display()
            )));
        }

        let r_home = self.r_home.to_string_lossy().into_owned();
        let bin_dir = rscript.parent().unwrap_or(&self.r_home).to_path_buf();
        let mut path_entries = vec![bin_dir];
        if let Some(existing) = std::env::var_os("PATH") {
            path_entries.extend(std::env::split_paths(&existing));
        }
        let path = std::env::join_paths(path_entries)
            .map_err(|e| TetherError::LaunchFailure(format!("Invalid PATH entry: {}", e)))?;

        let mut env = BTreeMap::new();
        env.insert("RHOME".to_string(), r_home.clone());
        env.insert("R_HOME_DIR".to_string(), r_home);
        env.insert("PATH".to_string(), path.to_string_lossy().into_owned());

        let library = self.r_home.join("library");
        if library.is_dir() {
            let library = library.to_string_lossy().into_owned();
            for key in ["R_LIBS", "R_LIBS_USER", "R_LIBS_SITE"] {
                env.insert(key.to_string(), library.clone());
            }
        }
        env.extend(self.extra_env.clone());

        Ok(ServerRuntime {
            executable: rscript,
            args: vec![
                "--vanilla".into(),
                "--silent".into(),
                "-e".into(),
                self.run_expression(),
            ],
            application_directory: self.app_dir.clone(),
            env,
        })
    }
}

/// Arbitrary server executable with an argument template.
#[derive(Clone, Debug)]
pub struct CommandRuntime {
    executable: PathBuf,
    args: Vec<String>,
    app_dir: PathBuf,
    env: BTreeMap<String, String>,
}

impl CommandRuntime {
    pub fn new(executable: impl Into<PathBuf>, app_dir: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            app_dir: app_dir.into(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }
}

impl RuntimeResolver for CommandRuntime {
    fn resolve(&self) -> TetherResult<ServerRuntime> {
        let has_dir = self.executable.components().count() > 1;
        if has_dir && !self.executable.exists() {
            return Err(TetherError::LaunchFailure(format!(
                "Server executable missing: {}",
                self.executable.display()
            )));
        }

        Ok(ServerRuntime {
            executable: self.executable.clone(),
            args: self.args.clone(),
            application_directory: self.app_dir.clone(),
            env: self.env.clone(),
        })
    }
}

pub fn resolver_from_config(config: &SupervisorConfig) -> TetherResult<Box<dyn RuntimeResolver>> {
    let runtime = &config.runtime;
    match runtime.kind {
        RuntimeKind::Shiny => Ok(Box::new(
            ShinyRuntime::new(&runtime.r_home, &config.app_dir)
                .with_app_version(&runtime.app_version)
                .with_env(runtime.env.clone()),
        )),
        RuntimeKind::Command => {
            let executable = runtime.executable.clone().ok_or_else(|| {
                TetherError::Config("Runtime kind 'command' requires runtime.executable".into())
            })?;
            Ok(Box::new(
                CommandRuntime::new(executable, &config.app_dir)
                    .with_args(runtime.args.clone())
                    .with_env(runtime.env.clone()),
            ))
        }
    }
}
