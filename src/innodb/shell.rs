//! Administration-shell port
//!
//! [`MySqlShell`] is the set of cluster-administration operations the cluster
//! manager relies on. [`ProcessShell`] implements it by running `mysqlsh` in
//! Python mode against a connection URI; tests substitute a recording double.
//!
//! Each shell is bound to one URI. Calls block the calling task for the
//! duration of the subprocess, and callers issue them one at a time.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use super::{ClusterStatus, DEFAULT_CLUSTER_NAME, InstanceState};

/// Warning mysqlsh prints whenever a password is passed on the command line
const PASSWORD_WARNING: &str = "Using a password on the command line interface can be insecure.";

/// Errors returned by shell invocations
#[derive(Error, Debug)]
pub enum ShellError {
    #[error("failed to run mysqlsh: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("mysqlsh exited with {status}: stdout: {stdout}, stderr: {stderr}")]
    CommandFailed {
        status: String,
        stdout: String,
        stderr: String,
    },

    #[error("failed to parse mysqlsh output {output:?}: {source}")]
    Parse {
        #[source]
        source: serde_json::Error,
        output: String,
    },
}

impl ShellError {
    /// Build a command failure from captured output
    pub fn command_failed(status: impl Into<String>, stdout: &[u8], stderr: &[u8]) -> Self {
        ShellError::CommandFailed {
            status: status.into(),
            stdout: sanitize_output(stdout),
            stderr: sanitize_output(stderr),
        }
    }

    /// Whether the shell reports leftover cluster metadata on an instance whose
    /// group replication is not running, meaning the whole group went down and
    /// must be rebooted rather than created again.
    pub fn suggests_reboot(&self) -> bool {
        let ShellError::CommandFailed { stdout, stderr, .. } = self else {
            return false;
        };
        let text = format!("{}\n{}", stdout, stderr).to_lowercase();

        text.contains("rebootclusterfromcompleteoutage")
            || text.contains("reboot_cluster_from_complete_outage")
            || (text.contains("metadata exists") && text.contains("not active"))
    }
}

/// Options rendered into a Python dictionary literal.
///
/// Keys are emitted in sorted order. Values that read as booleans
/// (`true`/`false`, any case) become Python `True`/`False`; everything else
/// is quoted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShellOptions(BTreeMap<String, String>);

impl ShellOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

}

impl fmt::Display for ShellOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items: Vec<String> = self
            .0
            .iter()
            .map(|(k, v)| {
                let value = match v.to_ascii_lowercase().as_str() {
                    "true" => "True".to_string(),
                    "false" => "False".to_string(),
                    _ => format!("'{}'", escape(v)),
                };
                format!("'{}': {}", escape(k), value)
            })
            .collect();
        write!(f, "{{{}}}", items.join(", "))
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Drop the password warning line and surrounding whitespace
pub fn sanitize_output(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .lines()
        .filter(|line| !line.contains(PASSWORD_WARNING))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Parse the JSON object embedded in shell output.
///
/// mysqlsh prefixes some results with progress text, so parsing starts at the
/// first `{` and ends at the last `}`.
pub fn parse_json<T: DeserializeOwned>(output: &str) -> Result<T, ShellError> {
    let body = match (output.find('{'), output.rfind('}')) {
        (Some(start), Some(end)) if start <= end => &output[start..=end],
        _ => output,
    };
    serde_json::from_str(body).map_err(|source| ShellError::Parse {
        source,
        output: output.to_string(),
    })
}

/// Hide the password in a `user:password@host:port` URI
pub fn redact_uri(uri: &str) -> String {
    match uri.split_once('@') {
        Some((creds, host)) => {
            let user = creds.split(':').next().unwrap_or_default();
            format!("{}:****@{}", user, host)
        }
        None => uri.to_string(),
    }
}

/// Cluster-administration operations against one instance
#[async_trait]
pub trait MySqlShell: Send + Sync {
    /// URI this shell connects to
    fn uri(&self) -> &str;

    async fn create_cluster(&self, opts: &ShellOptions) -> Result<ClusterStatus, ShellError>;

    async fn get_cluster_status(&self) -> Result<ClusterStatus, ShellError>;

    /// Ask the cluster whether the instance at `uri` may rejoin
    async fn check_instance_state(&self, uri: &str) -> Result<InstanceState, ShellError>;

    async fn add_instance_to_cluster(&self, uri: &str, opts: &ShellOptions)
    -> Result<(), ShellError>;

    async fn rejoin_instance_to_cluster(
        &self,
        uri: &str,
        opts: &ShellOptions,
    ) -> Result<(), ShellError>;

    async fn remove_instance_from_cluster(
        &self,
        uri: &str,
        opts: &ShellOptions,
    ) -> Result<(), ShellError>;

    async fn reboot_cluster_from_complete_outage(&self) -> Result<ClusterStatus, ShellError>;
}

/// Builds shells for arbitrary members (the primary, group seeds)
pub trait ShellFactory: Send + Sync {
    fn connect(&self, uri: &str) -> Arc<dyn MySqlShell>;
}

/// `mysqlsh` subprocess implementation
#[derive(Clone, Debug)]
pub struct ProcessShell {
    uri: String,
    binary: String,
}

impl ProcessShell {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            binary: "mysqlsh".to_string(),
        }
    }

    /// Run a Python snippet and return sanitized stdout
    async fn run(&self, python: &str) -> Result<String, ShellError> {
        debug!(uri = %redact_uri(&self.uri), script = %python, "Running mysqlsh");

        let output = Command::new(&self.binary)
            .args(["--no-wizard", "--uri", &self.uri, "--py", "-e", python])
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(ShellError::command_failed(
                output.status.to_string(),
                &output.stdout,
                &output.stderr,
            ));
        }

        Ok(sanitize_output(&output.stdout))
    }

    fn cluster_expr() -> String {
        format!("dba.get_cluster('{}')", DEFAULT_CLUSTER_NAME)
    }
}

#[async_trait]
impl MySqlShell for ProcessShell {
    fn uri(&self) -> &str {
        &self.uri
    }

    async fn create_cluster(&self, opts: &ShellOptions) -> Result<ClusterStatus, ShellError> {
        let python = format!(
            "print(dba.create_cluster('{}', {}).status())",
            DEFAULT_CLUSTER_NAME, opts
        );
        let output = self.run(&python).await?;
        parse_json(&output)
    }

    async fn get_cluster_status(&self) -> Result<ClusterStatus, ShellError> {
        let python = format!("print({}.status())", Self::cluster_expr());
        let output = self.run(&python).await?;
        parse_json(&output)
    }

    async fn check_instance_state(&self, uri: &str) -> Result<InstanceState, ShellError> {
        let python = format!(
            "print({}.check_instance_state('{}'))",
            Self::cluster_expr(),
            escape(uri)
        );
        let output = self.run(&python).await?;
        parse_json(&output)
    }

    async fn add_instance_to_cluster(
        &self,
        uri: &str,
        opts: &ShellOptions,
    ) -> Result<(), ShellError> {
        let python = format!(
            "{}.add_instance('{}', {})",
            Self::cluster_expr(),
            escape(uri),
            opts
        );
        self.run(&python).await.map(|_| ())
    }

    async fn rejoin_instance_to_cluster(
        &self,
        uri: &str,
        opts: &ShellOptions,
    ) -> Result<(), ShellError> {
        let python = format!(
            "{}.rejoin_instance('{}', {})",
            Self::cluster_expr(),
            escape(uri),
            opts
        );
        self.run(&python).await.map(|_| ())
    }

    async fn remove_instance_from_cluster(
        &self,
        uri: &str,
        opts: &ShellOptions,
    ) -> Result<(), ShellError> {
        let python = format!(
            "{}.remove_instance('{}', {})",
            Self::cluster_expr(),
            escape(uri),
            opts
        );
        self.run(&python).await.map(|_| ())
    }

    async fn reboot_cluster_from_complete_outage(&self) -> Result<ClusterStatus, ShellError> {
        let python = format!(
            "print(dba.reboot_cluster_from_complete_outage('{}').status())",
            DEFAULT_CLUSTER_NAME
        );
        let output = self.run(&python).await?;
        parse_json(&output)
    }
}

/// Factory producing [`ProcessShell`]s
#[derive(Clone, Debug, Default)]
pub struct ProcessShellFactory;

impl ShellFactory for ProcessShellFactory {
    fn connect(&self, uri: &str) -> Arc<dyn MySqlShell> {
        Arc::new(ProcessShell::new(uri))
    }
}
