//! The transport settings handed to an HTTP client

use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Request, Response, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware, Next};
use task_local_extensions::Extensions;
use tracing::{debug, trace};

use crate::credentials::{Credential, Identity};
use crate::errors::{Error, Result};
use crate::tls::TlsContext;

/// How requests to one registry should be sent
#[derive(Clone, Debug, PartialEq)]
pub enum SendOption {
    /// Nothing special, use the HTTP client defaults
    Noop,
    /// Secure the connection, send no credentials
    Tls(TlsContext),
    /// Attach credentials to every request for the registry
    BasicAuth(BasicAuthTransport),
}

impl SendOption {
    /// Builds an HTTP client honoring this option. For
    /// [`SendOption::BasicAuth`] every request sent through the client
    /// carries the resolved credentials.
    pub fn client(&self) -> Result<ClientWithMiddleware> {
        match self {
            SendOption::Noop => {
                let client = reqwest::Client::builder().build().map_err(Error::Client)?;
                Ok(ClientBuilder::new(client).build())
            }
            SendOption::Tls(context) => {
                let client = context
                    .apply(reqwest::Client::builder())?
                    .build()
                    .map_err(Error::Client)?;
                Ok(ClientBuilder::new(client).build())
            }
            SendOption::BasicAuth(transport) => transport.client(),
        }
    }

    /// Adds whatever credentials this option carries to `request`. Only
    /// needed for requests sent through a client not built by
    /// [`SendOption::client`].
    pub fn authorize(&self, request: &mut Request) -> Result<()> {
        match self {
            SendOption::BasicAuth(transport) => transport.authorize(request),
            _ => Ok(()),
        }
    }
}

// Host and port credentials are scoped to, parsed from a registry address
// such as `registry.example.com`, `localhost:5000` or
// `https://Registry.Example.com`.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Endpoint {
    host: String,
    // None means whatever the default port of the request's scheme is
    port: Option<u16>,
}

impl Endpoint {
    fn parse(addr: &str) -> Self {
        let addr = addr.trim().to_ascii_lowercase();
        let (scheme, rest) = match addr.split_once("://") {
            Some((scheme, rest)) => (Some(scheme), rest),
            None => (None, addr.as_str()),
        };
        let authority = rest.split('/').next().unwrap_or_default();
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => match port.parse::<u16>() {
                Ok(port) => (host, Some(port)),
                Err(_) => (authority, None),
            },
            _ => (authority, None),
        };
        let port = port.or(match scheme {
            Some("https") => Some(443),
            Some("http") => Some(80),
            _ => None,
        });
        Endpoint {
            host: host.to_owned(),
            port,
        }
    }

    fn matches(&self, url: &Url) -> bool {
        if url.host_str() != Some(self.host.as_str()) {
            return false;
        }
        match self.port {
            Some(port) => url.port_or_known_default() == Some(port),
            None => url.port().is_none(),
        }
    }
}

/// A transport that authenticates requests to one registry repository.
///
/// Requests to other hosts are left alone, so credentials never leak to
/// token servers or redirects elsewhere.
#[derive(Clone, Debug, PartialEq)]
pub struct BasicAuthTransport {
    addr: String,
    endpoint: Endpoint,
    repo: String,
    tls: Option<TlsContext>,
    identity: Identity,
}

impl BasicAuthTransport {
    /// Creates a transport presenting `identity` to `addr`. Without a TLS
    /// context the HTTP client's defaults are used.
    ///
    /// `addr` is matched case-insensitively; a scheme prefix and an explicit
    /// default port are understood.
    pub fn new(
        addr: impl Into<String>,
        repo: impl Into<String>,
        tls: Option<TlsContext>,
        identity: Identity,
    ) -> Self {
        let addr = addr.into();
        BasicAuthTransport {
            endpoint: Endpoint::parse(&addr),
            addr,
            repo: repo.into(),
            tls,
            identity,
        }
    }

    /// The registry address credentials are scoped to
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// The repository requests are made for
    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// The TLS context layered under the credentials, if any
    pub fn tls(&self) -> Option<&TlsContext> {
        self.tls.as_ref()
    }

    /// The identity presented to the registry
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The registry token scope covering this repository
    pub fn scope(&self) -> String {
        format!("repository:{}:pull,push", self.repo)
    }

    /// Builds an HTTP client with this transport's TLS context that
    /// authorizes every request it sends
    pub fn client(&self) -> Result<ClientWithMiddleware> {
        let builder = reqwest::Client::builder();
        let builder = match &self.tls {
            Some(context) => context.apply(builder)?,
            None => builder,
        };
        let client = builder.build().map_err(Error::Client)?;
        Ok(ClientBuilder::new(client)
            .with(AuthMiddleware(self.clone()))
            .build())
    }

    /// Sets the `Authorization` header of `request` when it targets this
    /// transport's registry
    pub fn authorize(&self, request: &mut Request) -> Result<()> {
        if !self.endpoint.matches(request.url()) {
            trace!(url = %request.url(), addr = %self.addr, "Not adding credentials to foreign host");
            return Ok(());
        }
        if let Some(value) = self.authorization()? {
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        Ok(())
    }

    fn authorization(&self) -> Result<Option<HeaderValue>> {
        let header = match &self.identity.credential {
            Credential::Anonymous => return Ok(None),
            Credential::Password { username, password } => {
                debug!("Using HTTP basic authentication.");
                format!(
                    "Basic {}",
                    base64::encode(format!("{}:{}", username, password))
                )
            }
            Credential::EncodedBasic(auth) => {
                debug!("Using HTTP basic authentication.");
                format!("Basic {}", auth)
            }
            Credential::Token(token) => {
                debug!("Using bearer token authentication.");
                format!("Bearer {}", token)
            }
        };
        let mut value = HeaderValue::from_str(&header)?;
        value.set_sensitive(true);
        Ok(Some(value))
    }
}

#[derive(Clone, Debug)]
struct AuthMiddleware(BasicAuthTransport);

#[async_trait::async_trait]
impl Middleware for AuthMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        self.0
            .authorize(&mut req)
            .map_err(|e| reqwest_middleware::Error::Middleware(anyhow::Error::new(e)))?;
        next.run(req, extensions).await
    }
}
