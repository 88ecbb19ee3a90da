//! `mysqldump` executor
//!
//! Backups pipe `mysqldump` through `gzip`; restores pipe the archive through
//! `gunzip` into `mysql`. The password is passed through `MYSQL_PWD` so it
//! never appears in the process list.

use std::process::{Output, Stdio};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use super::{BackupArtifact, BackupExecutor, ExecutorError};
use crate::innodb::MYSQL_DB_PORT;

/// Where and as whom the executor connects
#[derive(Clone, Debug)]
pub struct MysqlConnection {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl MysqlConnection {
    /// Root connection to the instance in the same pod
    pub fn local(password: impl Into<String>) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: MYSQL_DB_PORT,
            user: "root".to_string(),
            password: password.into(),
        }
    }

    /// Connection flags shared by the mysql client tools
    pub fn args(&self) -> Vec<String> {
        vec![
            "-u".to_string(),
            self.user.clone(),
            "-h".to_string(),
            self.host.clone(),
            "-P".to_string(),
            self.port.to_string(),
        ]
    }
}

#[derive(Clone, Debug)]
pub struct MysqldumpExecutor {
    connection: MysqlConnection,
    databases: Vec<String>,
}

impl MysqldumpExecutor {
    pub fn new(connection: MysqlConnection, databases: Vec<String>) -> Self {
        Self {
            connection,
            databases,
        }
    }

    fn dump_args(&self) -> Vec<String> {
        let mut args = self.connection.args();
        args.extend(
            [
                "--single-transaction",
                "--skip-lock-tables",
                "--flush-privileges",
                "--set-gtid-purged=OFF",
                "--databases",
            ]
            .map(String::from),
        );
        args.extend(self.databases.iter().cloned());
        args
    }
}

/// Storage key for a dump taken now
pub fn backup_location(prefix: &str) -> String {
    format!("{}.{}.sql.gz", prefix, Utc::now().format("%Y%m%d%H%M%S"))
}

fn check_status(
    command: &'static str,
    status: std::process::ExitStatus,
    stderr: &[u8],
) -> Result<(), ExecutorError> {
    if status.success() {
        return Ok(());
    }
    Err(ExecutorError::CommandFailed {
        command,
        status: status.to_string(),
        stderr: String::from_utf8_lossy(stderr).trim().to_string(),
    })
}

/// One side of a two-process pipeline
struct Stage {
    name: &'static str,
    command: Command,
}

impl Stage {
    fn new(name: &'static str, command: Command) -> Self {
        Self { name, command }
    }
}

fn spawn_failed(command: &'static str) -> impl FnOnce(std::io::Error) -> ExecutorError {
    move |source| ExecutorError::Spawn { command, source }
}

struct PipelineOutput {
    producer: Output,
    consumer: Output,
    /// Result of writing the input into the producer
    fed: std::io::Result<()>,
}

/// Run `producer | consumer`, writing `input` to the producer's stdin.
///
/// The input is written while both children's stderr and the consumer's
/// stdout are drained, so neither side can stall on a full pipe. The
/// consumer's stdout must be configured by the caller.
async fn run_pipeline(
    mut producer: Stage,
    mut consumer: Stage,
    input: Option<Bytes>,
) -> Result<PipelineOutput, ExecutorError> {
    let stdin = if input.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    };
    let mut first = producer
        .command
        .stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(spawn_failed(producer.name))?;

    let piped: Stdio = first
        .stdout
        .take()
        .ok_or_else(|| ExecutorError::InvalidConfig(format!("{} stdout not captured", producer.name)))?
        .try_into()
        .map_err(spawn_failed(producer.name))?;

    let second = consumer
        .command
        .stdin(piped)
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(spawn_failed(consumer.name))?;

    let writer = first.stdin.take();
    let feed = async move {
        match (writer, input) {
            (Some(mut writer), Some(input)) => {
                let result = writer.write_all(&input).await;
                // closing stdin lets the producer see EOF
                drop(writer);
                result
            }
            _ => Ok(()),
        }
    };

    let (fed, produced, consumed) =
        tokio::join!(feed, first.wait_with_output(), second.wait_with_output());

    Ok(PipelineOutput {
        producer: produced.map_err(spawn_failed(producer.name))?,
        consumer: consumed.map_err(spawn_failed(consumer.name))?,
        fed,
    })
}

/// A restore fails with mysql's error first: when mysql exits early, gunzip
/// and the input write only see a broken pipe.
fn check_restore(output: &PipelineOutput) -> Result<(), ExecutorError> {
    check_status("mysql", output.consumer.status, &output.consumer.stderr)?;
    check_status("gunzip", output.producer.status, &output.producer.stderr)?;
    match &output.fed {
        Ok(()) => Ok(()),
        Err(e) => Err(ExecutorError::Spawn {
            command: "gunzip",
            source: std::io::Error::new(e.kind(), e.to_string()),
        }),
    }
}

#[async_trait]
impl BackupExecutor for MysqldumpExecutor {
    async fn backup(&self, prefix: &str) -> Result<BackupArtifact, ExecutorError> {
        let location = backup_location(prefix);
        info!(databases = ?self.databases, location = %location, "Starting mysqldump");

        let mut dump = Command::new("mysqldump");
        dump.args(self.dump_args())
            .env("MYSQL_PWD", &self.connection.password);
        let mut gzip = Command::new("gzip");
        gzip.arg("-c").stdout(Stdio::piped());

        let output = run_pipeline(
            Stage::new("mysqldump", dump),
            Stage::new("gzip", gzip),
            None,
        )
        .await?;

        check_status("mysqldump", output.producer.status, &output.producer.stderr)?;
        check_status("gzip", output.consumer.status, &output.consumer.stderr)?;

        debug!(bytes = output.consumer.stdout.len(), "mysqldump finished");

        Ok(BackupArtifact {
            content: Bytes::from(output.consumer.stdout),
            location,
        })
    }

    async fn restore(&self, content: Bytes) -> Result<(), ExecutorError> {
        info!(bytes = content.len(), "Starting restore");

        let mut gunzip = Command::new("gunzip");
        gunzip.arg("-c");
        let mut mysql = Command::new("mysql");
        mysql
            .args(self.connection.args())
            .env("MYSQL_PWD", &self.connection.password)
            .stdout(Stdio::null());

        let output = run_pipeline(
            Stage::new("gunzip", gunzip),
            Stage::new("mysql", mysql),
            Some(content),
        )
        .await?;
        check_restore(&output)?;

        info!("Restore finished");
        Ok(())
    }
}
