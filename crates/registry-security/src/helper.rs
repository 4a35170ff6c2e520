//! External credential helpers.
//!
//! A credential helper is a program following the docker credential helper
//! protocol: it is run as `<program> get`, reads a server address on stdin and
//! prints a JSON document with the matching principal and secret.

use std::fmt;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use serde::Deserialize;
use tracing::debug;

use crate::errors::HelperError;

/// Directory holding the helper programs shipped alongside this tool
pub const DEFAULT_INTERNAL_DIR: &str = "/regsec-internal";

/// Every helper program name starts with this prefix
pub const CREDENTIAL_HELPER_PREFIX: &str = "docker-credential-";

// Printed by helpers when the store has nothing for the address.
const CREDENTIALS_NOT_FOUND: &str = "credentials not found in native keychain";

/// A principal and secret returned by a credential helper
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HelperCredentials {
    /// The address the helper answered for
    #[serde(rename = "ServerURL", default)]
    pub server_url: String,
    /// The principal, or `<token>` when `secret` is an identity token
    #[serde(rename = "Username", default)]
    pub username: String,
    /// Password or identity token
    #[serde(rename = "Secret", default)]
    pub secret: String,
}

impl fmt::Debug for HelperCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HelperCredentials")
            .field("server_url", &self.server_url)
            .field("username", &self.username)
            .field("secret", &"***")
            .finish()
    }
}

/// Something that can look up credentials for a server address.
///
/// The production implementation is [`ShellHelper`]. Implement this trait to
/// resolve credentials from somewhere else, or to stub helpers out in tests.
///
/// # Example
/// ```rust
/// use registry_security::errors::HelperError;
/// use registry_security::helper::{CredentialHelper, HelperCredentials};
///
/// struct Static;
///
/// impl CredentialHelper for Static {
///     fn get(&self, _helper: &str, server_address: &str) -> Result<HelperCredentials, HelperError> {
///         Ok(HelperCredentials {
///             server_url: server_address.to_owned(),
///             username: "robot".to_owned(),
///             secret: "hunter2".to_owned(),
///         })
///     }
/// }
/// ```
pub trait CredentialHelper {
    /// Ask the helper called `helper` for the credentials of `server_address`
    fn get(&self, helper: &str, server_address: &str) -> Result<HelperCredentials, HelperError>;
}

/// Runs helper programs as subprocesses
#[derive(Clone, Debug)]
pub struct ShellHelper {
    dir: PathBuf,
}

impl Default for ShellHelper {
    fn default() -> Self {
        ShellHelper::new(DEFAULT_INTERNAL_DIR)
    }
}

impl ShellHelper {
    /// Looks up helper programs in `dir` instead of [`DEFAULT_INTERNAL_DIR`]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        ShellHelper { dir: dir.into() }
    }

    /// The program invoked for the helper called `helper`
    pub fn program(&self, helper: &str) -> PathBuf {
        self.dir
            .join(format!("{}{}", CREDENTIAL_HELPER_PREFIX, helper))
    }
}

impl CredentialHelper for ShellHelper {
    fn get(&self, helper: &str, server_address: &str) -> Result<HelperCredentials, HelperError> {
        let program = self.program(helper);
        debug!(program = %program.display(), %server_address, "Invoking credential helper");

        let mut child = Command::new(&program)
            .arg("get")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => HelperError::NotFound {
                    program: program.clone(),
                },
                _ => HelperError::Io(e),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // A helper may exit without reading its input; its exit status
            // tells the real story.
            if let Err(e) = stdin.write_all(server_address.as_bytes()) {
                if e.kind() != ErrorKind::BrokenPipe {
                    return Err(e.into());
                }
            }
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_owned();
            if stdout == CREDENTIALS_NOT_FOUND {
                return Err(HelperError::CredentialsNotFound {
                    server_address: server_address.to_owned(),
                });
            }
            let message = if stdout.is_empty() {
                String::from_utf8_lossy(&output.stderr).trim().to_owned()
            } else {
                stdout
            };
            return Err(HelperError::Exit {
                program,
                status: output.status,
                message,
            });
        }

        let creds: HelperCredentials = serde_json::from_slice(&output.stdout)?;
        debug!(%server_address, "Credential helper returned credentials");
        Ok(creds)
    }
}
