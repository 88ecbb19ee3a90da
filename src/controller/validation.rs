//! Validation of backup and restore specs
//!
//! Problems are collected into a [`FieldErrors`] list so a single condition
//! and event can report all of them at once. The rendering follows the
//! Kubernetes field error format, e.g.
//! `spec.cluster.name: Not found: "mysql"`.

use std::fmt;

use crate::crd::{MySQLBackupSpec, MySQLRestoreSpec};

/// Kind of a field error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldErrorKind {
    Required,
    NotFound,
    Invalid,
}

/// One problem with one field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub path: String,
    pub kind: FieldErrorKind,
    /// Offending value for `NotFound`/`Invalid`
    pub value: String,
    pub detail: String,
}

impl FieldError {
    pub fn required(path: &str, detail: &str) -> Self {
        Self {
            path: path.to_string(),
            kind: FieldErrorKind::Required,
            value: String::new(),
            detail: detail.to_string(),
        }
    }

    pub fn not_found(path: &str, value: &str) -> Self {
        Self {
            path: path.to_string(),
            kind: FieldErrorKind::NotFound,
            value: value.to_string(),
            detail: String::new(),
        }
    }

    pub fn invalid(path: &str, value: &str, detail: &str) -> Self {
        Self {
            path: path.to_string(),
            kind: FieldErrorKind::Invalid,
            value: value.to_string(),
            detail: detail.to_string(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FieldErrorKind::Required => write!(f, "{}: Required value", self.path)?,
            FieldErrorKind::NotFound => write!(f, "{}: Not found: {:?}", self.path, self.value)?,
            FieldErrorKind::Invalid => {
                write!(f, "{}: Invalid value: {:?}", self.path, self.value)?
            }
        }
        if !self.detail.is_empty() {
            write!(f, ": {}", self.detail)?;
        }
        Ok(())
    }
}

/// Ordered list of field errors
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(Vec<FieldError>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: FieldError) {
        self.0.push(error);
    }

    pub fn extend(&mut self, other: FieldErrors) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }
}

/// A single error renders bare; several render as `[a, b, c]`
impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [] => Ok(()),
            [only] => write!(f, "{}", only),
            many => {
                let items: Vec<String> = many.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", items.join(", "))
            }
        }
    }
}

/// Structural validation of a backup spec
pub fn validate_backup_spec(spec: &MySQLBackupSpec) -> FieldErrors {
    let mut errs = FieldErrors::new();

    match spec.executor.as_ref().and_then(|e| e.mysqldump.as_ref()) {
        None => errs.push(FieldError::required(
            "spec.executor",
            "an executor must be specified",
        )),
        Some(mysqldump) => {
            if mysqldump.databases.is_empty() {
                errs.push(FieldError::required(
                    "spec.executor.mysqldump.databases",
                    "at least one database is required",
                ));
            }
            for (i, db) in mysqldump.databases.iter().enumerate() {
                if db.name.is_empty() {
                    errs.push(FieldError::required(
                        &format!("spec.executor.mysqldump.databases[{}].name", i),
                        "",
                    ));
                }
            }
        }
    }

    match spec.storage_provider.as_ref().and_then(|s| s.s3.as_ref()) {
        None => errs.push(FieldError::required(
            "spec.storageProvider",
            "a storage provider must be specified",
        )),
        Some(s3) => {
            if s3.bucket.is_empty() {
                errs.push(FieldError::required("spec.storageProvider.s3.bucket", ""));
            }
            if s3.region.is_empty() {
                errs.push(FieldError::required("spec.storageProvider.s3.region", ""));
            }
            if s3.credentials_secret.name.is_empty() {
                errs.push(FieldError::required(
                    "spec.storageProvider.s3.credentialsSecret.name",
                    "",
                ));
            }
        }
    }

    if spec.cluster.as_ref().is_none_or(|c| c.name.is_empty()) {
        errs.push(FieldError::required(
            "spec.cluster",
            "a cluster reference must be specified",
        ));
    }

    errs
}

/// Structural validation of a restore spec
pub fn validate_restore_spec(spec: &MySQLRestoreSpec) -> FieldErrors {
    let mut errs = FieldErrors::new();

    if spec.cluster.as_ref().is_none_or(|c| c.name.is_empty()) {
        errs.push(FieldError::required(
            "spec.cluster",
            "a cluster reference must be specified",
        ));
    }
    if spec.backup.as_ref().is_none_or(|b| b.name.is_empty()) {
        errs.push(FieldError::required(
            "spec.backup",
            "a backup reference must be specified",
        ));
    }

    errs
}
