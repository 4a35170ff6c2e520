//! Errors produced while resolving how to talk to a registry

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// A specialized `Result` for this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top level error returned when composing a [`SendOption`](crate::SendOption)
#[derive(Error, Debug)]
pub enum Error {
    /// The declarative TLS configuration could not be turned into a TLS context
    #[error("build tls config: {0}")]
    Tls(#[from] TlsError),
    /// Credentials could not be resolved for the target registry
    #[error("get credentials: {0}")]
    Credentials(#[from] CredentialError),
    /// An in-memory configuration document could not be parsed
    #[error("parse config: {0}")]
    Parse(String),
    /// A configuration file could not be read or parsed
    #[error("parse config {}: {message}", path.display())]
    Config {
        /// The file the document was read from
        path: PathBuf,
        /// What the parser complained about
        message: String,
    },
    /// Resolved credentials cannot be expressed as an HTTP header
    #[error("basic auth: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
    /// The HTTP client could not be constructed
    #[error("build http client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Failures of the TLS context builder
#[derive(Error, Debug)]
pub enum TlsError {
    /// A referenced file could not be read
    #[error("read {}: {source}", path.display())]
    Read {
        /// The file that was read
        path: PathBuf,
        /// The underlying I/O error
        source: std::io::Error,
    },
    /// A CA file is not valid PEM
    #[error("parse pem {}: {source}", path.display())]
    Pem {
        /// The file that was parsed
        path: PathBuf,
        /// What the PEM parser reported
        source: std::io::Error,
    },
    /// The CA path points to a file without a single PEM certificate
    #[error("no certificates found in {}", path.display())]
    NoCertificates {
        /// The file that held no certificates
        path: PathBuf,
    },
    /// The TLS backend refused a CA certificate
    #[error("parse certificate {}: {source}", path.display())]
    Certificate {
        /// The file the certificate came from
        path: PathBuf,
        /// The backend error
        source: reqwest::Error,
    },
    /// Only one half of the client certificate/key pair was configured
    #[error("client certificate and key must be configured together")]
    IncompleteKeyPair,
    /// The client certificate/key pair could not be loaded
    #[error("load client key pair: {0}")]
    ClientKeyPair(#[source] reqwest::Error),
    /// The TLS backend rejected the assembled configuration
    #[error("tls backend: {0}")]
    Backend(#[source] reqwest::Error),
}

/// Failures while resolving the identity to present to a registry
#[derive(Error, Debug)]
pub enum CredentialError {
    /// The configured password file could not be read
    #[error("get basic auth config: read password file {}: {source}", path.display())]
    ReadPasswordFile {
        /// The configured password file
        path: PathBuf,
        /// The underlying I/O error
        source: std::io::Error,
    },
    /// The external credential helper failed
    #[error("get credentials from helper {helper}: {source}")]
    Helper {
        /// Name of the helper as configured in `credsStore`
        helper: String,
        /// Why the helper failed
        source: HelperError,
    },
}

/// Failures of a credential helper invocation
#[derive(Error, Debug)]
pub enum HelperError {
    /// The helper program does not exist
    #[error("credential helper {} not found", program.display())]
    NotFound {
        /// The program that was looked for
        program: PathBuf,
    },
    /// The helper has no credentials stored for the address
    #[error("credentials not found for {server_address}")]
    CredentialsNotFound {
        /// The address that was looked up
        server_address: String,
    },
    /// The helper exited unsuccessfully
    #[error("{} exited with {status}: {message}", program.display())]
    Exit {
        /// The program that was run
        program: PathBuf,
        /// How it exited
        status: ExitStatus,
        /// Whatever the helper printed before exiting
        message: String,
    },
    /// The helper printed something that is not a credentials document
    #[error("malformed helper output: {0}")]
    MalformedOutput(#[from] serde_json::Error),
    /// Talking to the helper process failed
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
