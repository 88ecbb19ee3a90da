//! Local database reachability

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::executor::MysqlConnection;

#[async_trait]
pub trait LocalDatabase: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// `mysqladmin ping` over TCP against the instance in this pod
pub struct MysqlAdminProbe {
    connection: MysqlConnection,
}

impl MysqlAdminProbe {
    pub fn new(connection: MysqlConnection) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl LocalDatabase for MysqlAdminProbe {
    async fn is_reachable(&self) -> bool {
        let output = Command::new("mysqladmin")
            .arg("--protocol=tcp")
            .args(self.connection.args())
            .arg("ping")
            .env("MYSQL_PWD", &self.connection.password)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(out) if out.status.success() => true,
            Ok(out) => {
                debug!(
                    status = %out.status,
                    stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                    "mysqladmin ping failed"
                );
                false
            }
            Err(e) => {
                debug!(error = %e, "Failed to run mysqladmin");
                false
            }
        }
    }
}
