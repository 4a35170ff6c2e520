//! Security configuration for a registry
//!
//! A [`Config`] is usually loaded once with [`Config::from_file`], passed
//! through [`Config::apply_defaults`], and then asked for a
//! [`SendOption`] per registry with [`Config::send_option`].

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::credentials::resolve_identity;
use crate::errors::{CredentialError, Error, Result};
use crate::helper::{CredentialHelper, ShellHelper};
use crate::tls::TlsConfig;
use crate::transport::{BasicAuthTransport, SendOption};

/// Environment variable overriding the default CA certificate location
pub const SSL_CERT_DIR: &str = "SSL_CERT_DIR";

/// CA certificate location used when neither the config nor the environment
/// name one
pub const DEFAULT_CA_CERTS_PATH: &str = "/etc/ssl/certs";

/// Registry credentials in the shape of a docker `config.json` auth entry
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// User to authenticate as
    pub username: String,
    /// Password for `username`
    pub password: String,
    /// base64 encoded `username:password`
    pub auth: String,
    /// Kept for compatibility with docker configs. Unused
    pub email: String,
    /// Registry the credentials belong to
    #[serde(rename = "serveraddress")]
    pub server_address: String,
    /// A token exchanged by the registry for access tokens
    #[serde(rename = "identitytoken")]
    pub identity_token: String,
    /// A bearer token sent to the registry as is
    #[serde(rename = "registrytoken")]
    pub registry_token: String,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn redact(s: &str) -> &str {
            if s.is_empty() {
                ""
            } else {
                "***"
            }
        }
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("auth", &redact(&self.auth))
            .field("email", &self.email)
            .field("server_address", &self.server_address)
            .field("identity_token", &redact(&self.identity_token))
            .field("registry_token", &redact(&self.registry_token))
            .finish()
    }
}

/// Static credentials, optionally with the password kept in a separate file
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct BasicAuthConfig {
    /// The credentials themselves
    #[serde(flatten)]
    pub auth: AuthConfig,
    /// File whose entire contents are used as the password
    #[serde(default)]
    pub password_file: Option<PathBuf>,
}

impl BasicAuthConfig {
    /// Returns the configured credentials, with the password replaced by the
    /// contents of `password_file` when one is set. The file is read on every
    /// call.
    pub fn get(&self) -> std::result::Result<AuthConfig, CredentialError> {
        let mut auth = self.auth.clone();
        if let Some(path) = self
            .password_file
            .as_ref()
            .filter(|p| !p.as_os_str().is_empty())
        {
            auth.password =
                fs::read_to_string(path).map_err(|source| CredentialError::ReadPasswordFile {
                    path: path.clone(),
                    source,
                })?;
        }
        Ok(auth)
    }
}

/// TLS and authentication settings for talking to a registry
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Config {
    /// TLS settings. Always set once defaults are applied
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    /// Static credentials
    #[serde(default, rename = "basic")]
    pub basic_auth: Option<BasicAuthConfig>,
    /// Name of the credential helper to ask for credentials, if any
    #[serde(default, rename = "credsStore")]
    pub remote_credentials_store: String,
}

impl Config {
    /// Parses a YAML document
    pub fn from_yaml_str(document: &str) -> Result<Self> {
        serde_yaml::from_str(document).map_err(|e| Error::Parse(e.to_string()))
    }

    /// Parses a JSON document
    pub fn from_json_str(document: &str) -> Result<Self> {
        serde_json::from_str(document).map_err(|e| Error::Parse(e.to_string()))
    }

    /// Loads a config file. Files ending in `.json` are parsed as JSON,
    /// anything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let document = fs::read_to_string(path).map_err(|e| Error::Config {
            path: path.to_owned(),
            message: e.to_string(),
        })?;
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let parsed = if is_json {
            Self::from_json_str(&document)
        } else {
            Self::from_yaml_str(&document)
        };
        parsed.map_err(|e| match e {
            Error::Parse(message) => Error::Config {
                path: path.to_owned(),
                message,
            },
            other => other,
        })
    }

    /// Returns a copy of this config with defaults filled in.
    ///
    /// The copy always has TLS settings. Its CA certificate path comes from,
    /// in order, this config, the `SSL_CERT_DIR` environment variable and
    /// [`DEFAULT_CA_CERTS_PATH`]. `self` is left untouched.
    pub fn apply_defaults(&self) -> Config {
        let ssl_cert_dir = env::var_os(SSL_CERT_DIR)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        self.apply_defaults_with(ssl_cert_dir)
    }

    fn apply_defaults_with(&self, ssl_cert_dir: Option<PathBuf>) -> Config {
        let mut config = self.clone();
        let tls = config.tls.get_or_insert_with(TlsConfig::default);
        if tls.ca.cert.path.as_os_str().is_empty() {
            tls.ca.cert.path =
                ssl_cert_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_CA_CERTS_PATH));
        }
        config
    }

    /// Whether requests carry credentials. This only looks at what is
    /// configured, not at what the credentials resolve to.
    pub fn uses_basic_auth(&self) -> bool {
        self.basic_auth.is_some() || !self.remote_credentials_store.is_empty()
    }

    /// Decides how to send requests for `repo` to the registry at `addr`,
    /// running credential helpers from [`ShellHelper::default`]
    pub fn send_option(&self, addr: &str, repo: &str) -> Result<SendOption> {
        self.send_option_with(addr, repo, &ShellHelper::default())
    }

    /// Same as [`Config::send_option`] with credential helpers resolved by
    /// `helper`.
    ///
    /// Without credentials configured the result is TLS only, or a no-op
    /// when there are no TLS settings either. Otherwise the identity is
    /// resolved and the result is a transport injecting it, secured with the
    /// TLS context when there is one.
    pub fn send_option_with(
        &self,
        addr: &str,
        repo: &str,
        helper: &dyn CredentialHelper,
    ) -> Result<SendOption> {
        let tls = match &self.tls {
            Some(tls) => Some(tls.build_client()?),
            None => None,
        };

        if !self.uses_basic_auth() {
            return Ok(match tls {
                Some(context) => {
                    tracing::debug!(%addr, "Using TLS without credentials");
                    SendOption::Tls(context)
                }
                None => {
                    tracing::debug!(%addr, "No TLS or credentials configured");
                    SendOption::Noop
                }
            });
        }

        let identity = resolve_identity(
            self.basic_auth.as_ref(),
            &self.remote_credentials_store,
            addr,
            helper,
        )?;
        tracing::debug!(%addr, %repo, tls = tls.is_some(), "Using basic auth transport");
        Ok(SendOption::BasicAuth(BasicAuthTransport::new(
            addr, repo, tls, identity,
        )))
    }
}
