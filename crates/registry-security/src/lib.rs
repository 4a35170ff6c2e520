//! Decides how an HTTP client should secure and authenticate its requests to
//! a container registry.
//!
//! A [`Config`] describes TLS settings, static credentials and an optional
//! external credential helper. For a given registry address and repository it
//! produces a single [`SendOption`]:
//!
//! * no credentials configured: TLS only, or [`SendOption::Noop`] without TLS
//!   settings either
//! * static credentials or a credential helper configured: a
//!   [`BasicAuthTransport`] injecting the resolved [`Identity`]
//!
//! ```rust,no_run
//! use registry_security::Config;
//!
//! # fn main() -> registry_security::errors::Result<()> {
//! let config = Config::from_file("/etc/regsec/security.yaml")?.apply_defaults();
//! let option = config.send_option("registry.example.com", "team/app")?;
//! let client = option.client()?;
//! # Ok(())
//! # }
//! ```
#![cfg_attr(not(test), deny(missing_docs))]

pub mod config;
pub mod credentials;
pub mod errors;
pub mod helper;
pub mod tls;
pub mod transport;

#[doc(inline)]
pub use config::Config;
#[doc(inline)]
pub use credentials::{Credential, Identity};
#[doc(inline)]
pub use transport::{BasicAuthTransport, SendOption};
