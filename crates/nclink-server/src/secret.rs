//! Secret references in configuration values.
//!
//! `client_id` and `client_secret` may name where the value lives instead of
//! holding it:
//!
//! - `pass::path/in/store` - first line of `pass show path/in/store`
//! - `env::VAR_NAME` - the environment variable `VAR_NAME`
//! - anything else - the value itself

use crate::error::{ServerError, ServerResult};

/// Where a configuration value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretRef<'a> {
    /// An entry in the `pass` password store.
    Pass(&'a str),
    /// An environment variable.
    Env(&'a str),
    /// The literal value.
    Plain(&'a str),
}

impl<'a> SecretRef<'a> {
    /// Classifies `value` by its prefix.
    pub fn parse(value: &'a str) -> Self {
        if let Some(path) = value.strip_prefix("pass::") {
            Self::Pass(path)
        } else if let Some(var) = value.strip_prefix("env::") {
            Self::Env(var)
        } else {
            Self::Plain(value)
        }
    }

    /// Returns true if the value is stored outside the configuration file.
    pub fn is_reference(&self) -> bool {
        !matches!(self, Self::Plain(_))
    }

    /// Produces the referenced value.
    pub fn resolve(&self) -> ServerResult<String> {
        match *self {
            Self::Pass(path) => resolve_pass(path),
            Self::Env(var) => std::env::var(var).map_err(|_| {
                ServerError::secret(format!("env::{}", var), "environment variable is not set")
            }),
            Self::Plain(value) => Ok(value.to_string()),
        }
    }
}

/// Resolves a configuration value that may be a secret reference.
pub fn resolve(value: &str) -> ServerResult<String> {
    SecretRef::parse(value).resolve()
}

fn resolve_pass(path: &str) -> ServerResult<String> {
    let reference = format!("pass::{}", path);
    let output = std::process::Command::new("pass")
        .arg("show")
        .arg(path)
        .output()
        .map_err(|e| ServerError::secret(&reference, format!("failed to run `pass`: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ServerError::secret(
            &reference,
            format!("`pass show` failed ({}): {}", output.status, stderr.trim()),
        ));
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(str::to_string)
        .ok_or_else(|| ServerError::secret(&reference, "`pass show` produced no output"))
}
