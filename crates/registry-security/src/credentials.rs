//! Resolution of the identity presented to a registry

use std::fmt;

use tracing::debug;

use crate::config::{AuthConfig, BasicAuthConfig};
use crate::errors::CredentialError;
use crate::helper::{CredentialHelper, HelperCredentials};

/// Principal a credential helper reports when its secret is an identity token
pub const TOKEN_USERNAME: &str = "<token>";

/// The credential material sent with each request
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Nothing to send
    Anonymous,
    /// HTTP basic auth
    Password {
        /// User to authenticate as
        username: String,
        /// Password for `username`
        password: String,
    },
    /// HTTP basic auth, already base64 encoded as `username:password`
    EncodedBasic(String),
    /// An identity token, sent as a bearer token
    Token(String),
}

impl Default for Credential {
    fn default() -> Self {
        Credential::Anonymous
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => f.write_str("Anonymous"),
            Self::Password { username, .. } => {
                f.write_fmt(format_args!("Password(username={},password=***)", username))
            }
            Self::EncodedBasic(_) => f.write_str("EncodedBasic(***)"),
            Self::Token(_) => f.write_str("Token(***)"),
        }
    }
}

impl Credential {
    /// Interprets a helper response, switching to token mode when the helper
    /// reports [`TOKEN_USERNAME`] as principal
    pub fn from_helper(creds: HelperCredentials) -> Self {
        if creds.username == TOKEN_USERNAME {
            Credential::Token(creds.secret)
        } else {
            Credential::Password {
                username: creds.username,
                password: creds.secret,
            }
        }
    }

    /// Whether there is anything to send
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Credential::Anonymous)
    }
}

/// The identity to present to one registry
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Identity {
    /// The address this identity is valid for. Empty when it was never set
    pub server_address: String,
    /// What is sent with each request
    pub credential: Credential,
}

impl From<AuthConfig> for Identity {
    // Tokens win over a username/password pair, which wins over a pre-encoded
    // `auth` value.
    fn from(auth: AuthConfig) -> Self {
        let credential = if !auth.identity_token.is_empty() {
            Credential::Token(auth.identity_token)
        } else if !auth.registry_token.is_empty() {
            Credential::Token(auth.registry_token)
        } else if !auth.username.is_empty() || !auth.password.is_empty() {
            Credential::Password {
                username: auth.username,
                password: auth.password,
            }
        } else if !auth.auth.is_empty() {
            Credential::EncodedBasic(auth.auth)
        } else {
            Credential::Anonymous
        };
        Identity {
            server_address: auth.server_address,
            credential,
        }
    }
}

/// Resolves the identity to use when talking to `addr`.
///
/// Static `basic` credentials are resolved first (reading the password file
/// if one is configured). A non-empty `helper_name` then asks the helper, and a
/// successful answer replaces the static credentials entirely, scoped to
/// `addr`. Helper failures are returned as is; there is no fallback to the
/// static credentials. With neither source configured the identity is
/// anonymous.
pub fn resolve_identity(
    basic: Option<&BasicAuthConfig>,
    helper_name: &str,
    addr: &str,
    helper: &dyn CredentialHelper,
) -> Result<Identity, CredentialError> {
    let mut identity = match basic {
        Some(basic) => Identity::from(basic.get()?),
        None => Identity::default(),
    };

    if !helper_name.is_empty() {
        let creds = helper
            .get(helper_name, addr)
            .map_err(|source| CredentialError::Helper {
                helper: helper_name.to_owned(),
                source,
            })?;
        identity = Identity {
            server_address: addr.to_owned(),
            credential: Credential::from_helper(creds),
        };
    }

    debug!(
        %addr,
        credential = ?identity.credential,
        "Resolved registry identity"
    );
    Ok(identity)
}
