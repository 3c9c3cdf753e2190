//! Credential acquisition for the IMAP login
//!
//! Providers are kept separate from the connector so the password can come
//! from an interactive prompt, an environment variable or an external
//! secret-store command. Passwords are zeroed on drop and never printed.

use std::fmt;
use std::process::Command;

use log::debug;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Environment variable that overrides the configured provider
pub const PASSWORD_ENV: &str = "MAILVAULT_PASSWORD";

/// Errors raised while obtaining a credential
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("cannot read password from terminal: {0}")]
    Prompt(#[source] std::io::Error),
    #[error("environment variable {0} is not set")]
    MissingEnv(String),
    #[error("password command is empty")]
    EmptyCommand,
    #[error("cannot run password command {program:?}: {source}")]
    CommandSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("password command {program:?} exited with {status}")]
    CommandFailed { program: String, status: String },
    #[error("password is empty")]
    Empty,
}

/// A password held in memory that is wiped on drop
#[derive(Clone)]
pub struct Password(Zeroizing<String>);

impl Password {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Zeroizing::new(secret.into()))
    }

    /// Borrow the secret for the login call
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(<redacted>)")
    }
}

/// Source of the IMAP password
pub trait CredentialProvider {
    fn password(&self, host: &str, user: &str) -> Result<Password, CredentialError>;
}

/// Interactive prompt on the controlling terminal, input not echoed
pub struct PromptProvider;

impl CredentialProvider for PromptProvider {
    fn password(&self, host: &str, user: &str) -> Result<Password, CredentialError> {
        let secret = rpassword::prompt_password(format!("Password for {}@{}: ", user, host))
            .map_err(CredentialError::Prompt)?;
        non_empty(Zeroizing::new(secret))
    }
}

/// Password read from an environment variable
pub struct EnvProvider {
    pub var: String,
}

impl CredentialProvider for EnvProvider {
    fn password(&self, _host: &str, _user: &str) -> Result<Password, CredentialError> {
        let secret = std::env::var(&self.var)
            .map_err(|_| CredentialError::MissingEnv(self.var.clone()))?;
        debug!("Using password from ${}", self.var);
        non_empty(Zeroizing::new(secret))
    }
}

/// Password printed on the first line of an external command's stdout
///
/// Suits secret stores with a CLI, e.g. `["pass", "show", "mail/imap"]`.
pub struct CommandProvider {
    pub command: Vec<String>,
}

impl CredentialProvider for CommandProvider {
    fn password(&self, _host: &str, _user: &str) -> Result<Password, CredentialError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or(CredentialError::EmptyCommand)?;

        debug!("Running password command {:?}", program);
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| CredentialError::CommandSpawn {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(CredentialError::CommandFailed {
                program: program.clone(),
                status: output.status.to_string(),
            });
        }

        let stdout = Zeroizing::new(output.stdout);
        let text = String::from_utf8_lossy(&stdout);
        let first_line = text.lines().next().unwrap_or_default();
        non_empty(Zeroizing::new(first_line.to_string()))
    }
}

/// Fixed password, for tests and embedding
pub struct StaticProvider(pub Password);

impl CredentialProvider for StaticProvider {
    fn password(&self, _host: &str, _user: &str) -> Result<Password, CredentialError> {
        Ok(self.0.clone())
    }
}

fn non_empty(secret: Zeroizing<String>) -> Result<Password, CredentialError> {
    if secret.is_empty() {
        return Err(CredentialError::Empty);
    }
    Ok(Password(secret))
}

/// Configured credential source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum CredentialSource {
    /// Ask on the terminal
    #[default]
    Prompt,
    /// Read an environment variable
    Env { var: String },
    /// Run a command and use its first output line
    Command { command: Vec<String> },
}

impl CredentialSource {
    pub fn provider(&self) -> Box<dyn CredentialProvider> {
        match self {
            CredentialSource::Prompt => Box::new(PromptProvider),
            CredentialSource::Env { var } => Box::new(EnvProvider { var: var.clone() }),
            CredentialSource::Command { command } => Box::new(CommandProvider {
                command: command.clone(),
            }),
        }
    }
}
