//! Declarative TLS settings and the builder that turns them into a [`TlsContext`]

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, trace};

use crate::errors::TlsError;

/// A reference to a file holding secret material
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Secret {
    /// Location of the file. Empty means unset
    pub path: PathBuf,
}

impl Secret {
    /// Creates a reference to the file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Secret { path: path.into() }
    }

    fn is_set(&self) -> bool {
        !self.path.as_os_str().is_empty()
    }
}

/// Certificate authorities to trust
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CaConfig {
    /// A PEM bundle, or a directory of PEM files
    pub cert: Secret,
}

/// The client side of a mutual TLS handshake
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientTlsConfig {
    /// Skip building a TLS context altogether and use the HTTP client defaults
    pub disabled: bool,
    /// PEM encoded client certificate
    pub cert: Secret,
    /// PEM encoded PKCS#8 private key for `cert`
    pub key: Secret,
}

/// TLS settings for talking to a registry
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Trusted certificate authorities
    pub ca: CaConfig,
    /// Client certificate settings
    pub client: ClientTlsConfig,
    /// Accept any server certificate. Only meant for testing
    pub insecure: bool,
}

impl TlsConfig {
    /// Builds a TLS context for outgoing connections.
    ///
    /// Every referenced file is read and the result is checked against the
    /// TLS backend, so a context returned from here is ready to use.
    pub fn build_client(&self) -> Result<TlsContext, TlsError> {
        if self.client.disabled {
            debug!("Client TLS disabled, using defaults");
            return Ok(TlsContext::default());
        }

        let root_certificates = if self.ca.cert.is_set() {
            load_certificates(&self.ca.cert.path)?
        } else {
            Vec::new()
        };

        let identity = match (self.client.cert.is_set(), self.client.key.is_set()) {
            (false, false) => None,
            (true, true) => Some(ClientKeyPair {
                cert: read(&self.client.cert.path)?,
                key: read(&self.client.key.path)?,
            }),
            _ => return Err(TlsError::IncompleteKeyPair),
        };

        let context = TlsContext {
            root_certificates,
            identity,
            accept_invalid_certificates: self.insecure,
        };
        context
            .apply(reqwest::Client::builder())?
            .build()
            .map_err(TlsError::Backend)?;
        debug!(
            roots = context.root_certificates.len(),
            client_identity = context.identity.is_some(),
            insecure = context.accept_invalid_certificates,
            "Built TLS context"
        );
        Ok(context)
    }
}

/// A x509 certificate
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Certificate {
    /// File the certificate was loaded from
    pub source: PathBuf,
    /// DER encoding of the certificate
    pub der: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq)]
struct ClientKeyPair {
    cert: Vec<u8>,
    key: Vec<u8>,
}

impl fmt::Debug for ClientKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ClientKeyPair(cert, key=***)")
    }
}

impl ClientKeyPair {
    fn to_identity(&self) -> Result<reqwest::Identity, TlsError> {
        match () {
            #[cfg(feature = "native-tls")]
            () => reqwest::Identity::from_pkcs8_pem(&self.cert, &self.key)
                .map_err(TlsError::ClientKeyPair),
            #[cfg(not(feature = "native-tls"))]
            () => {
                let mut pem = self.cert.clone();
                pem.push(b'\n');
                pem.extend_from_slice(&self.key);
                reqwest::Identity::from_pem(&pem).map_err(TlsError::ClientKeyPair)
            }
        }
    }
}

/// A ready to use TLS context.
///
/// An empty context leaves the HTTP client's defaults untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TlsContext {
    root_certificates: Vec<Certificate>,
    identity: Option<ClientKeyPair>,
    accept_invalid_certificates: bool,
}

impl TlsContext {
    /// Extra certificate authorities trusted on top of the system ones
    pub fn root_certificates(&self) -> &[Certificate] {
        &self.root_certificates
    }

    /// Whether a client certificate is presented during the handshake
    pub fn has_client_identity(&self) -> bool {
        self.identity.is_some()
    }

    /// Whether server certificates go unverified
    pub fn accepts_invalid_certificates(&self) -> bool {
        self.accept_invalid_certificates
    }

    /// Configures `builder` to use this context
    pub fn apply(
        &self,
        builder: reqwest::ClientBuilder,
    ) -> Result<reqwest::ClientBuilder, TlsError> {
        let mut builder = builder.danger_accept_invalid_certs(self.accept_invalid_certificates);
        for c in &self.root_certificates {
            let cert = reqwest::Certificate::from_der(&c.der).map_err(|source| {
                TlsError::Certificate {
                    path: c.source.clone(),
                    source,
                }
            })?;
            builder = builder.add_root_certificate(cert);
        }
        if let Some(pair) = &self.identity {
            builder = builder.identity(pair.to_identity()?);
        }
        Ok(builder)
    }
}

fn read(path: &Path) -> Result<Vec<u8>, TlsError> {
    fs::read(path).map_err(|source| TlsError::Read {
        path: path.to_owned(),
        source,
    })
}

// A directory contributes every certificate found in its regular files.
// Files without certificates, or that fail to parse, are skipped so a
// directory such as /etc/ssl/certs can be used as is.
fn load_certificates(path: &Path) -> Result<Vec<Certificate>, TlsError> {
    if !path.is_dir() {
        let certs = parse_certificates(path, &read(path)?).map_err(|source| TlsError::Pem {
            path: path.to_owned(),
            source,
        })?;
        if certs.is_empty() {
            return Err(TlsError::NoCertificates {
                path: path.to_owned(),
            });
        }
        return Ok(certs);
    }

    let mut files = fs::read_dir(path)
        .and_then(|entries| {
            entries
                .map(|e| e.map(|e| e.path()))
                .collect::<Result<Vec<_>, _>>()
        })
        .map_err(|source| TlsError::Read {
            path: path.to_owned(),
            source,
        })?;
    files.retain(|f| f.is_file());
    files.sort();

    let mut certs = Vec::new();
    for file in files {
        match parse_certificates(&file, &read(&file)?) {
            Ok(found) => {
                trace!(file = %file.display(), count = found.len(), "Scanned CA file");
                certs.extend(found);
            }
            Err(error) => debug!(file = %file.display(), %error, "Skipping unparsable CA file"),
        }
    }
    Ok(certs)
}

fn parse_certificates(source: &Path, bundle: &[u8]) -> std::io::Result<Vec<Certificate>> {
    rustls_pemfile::certs(&mut &bundle[..])
        .map(|cert| {
            cert.map(|der| Certificate {
                source: source.to_owned(),
                der: der.as_ref().to_vec(),
            })
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    const MALFORMED_PEM: &str =
        "-----BEGIN CERTIFICATE-----\n!!!!\n-----END CERTIFICATE-----\n";

    fn self_signed() -> (String, String) {
        let cert = rcgen::generate_simple_self_signed(vec!["registry.example.com".to_owned()])
            .expect("generate certificate");
        (
            cert.serialize_pem().expect("serialize certificate"),
            cert.serialize_private_key_pem(),
        )
    }

    mod deserialize {
        use super::*;

        #[test]
        fn nested_paths() {
            let tls: TlsConfig = serde_yaml::from_str(
                r#"
ca:
  cert:
    path: /etc/registry/ca.pem
client:
  cert:
    path: /etc/registry/client.crt
  key:
    path: /etc/registry/client.key
"#,
            )
            .expect("parse tls config");
            assert_eq!(tls.ca.cert, Secret::new("/etc/registry/ca.pem"));
            assert_eq!(tls.client.cert, Secret::new("/etc/registry/client.crt"));
            assert_eq!(tls.client.key, Secret::new("/etc/registry/client.key"));
            assert!(!tls.client.disabled);
            assert!(!tls.insecure);
        }

        #[test]
        fn empty_document() {
            let tls: TlsConfig = serde_json::from_str("{}").expect("parse tls config");
            assert_eq!(tls, TlsConfig::default());
        }
    }

    mod build {
        use super::*;

        #[test]
        fn no_files_configured() {
            let context = TlsConfig::default()
                .build_client()
                .expect("build tls context");
            assert_eq!(context, TlsContext::default());
        }

        #[test]
        fn ca_bundle_file() {
            let dir = tempfile::tempdir().expect("create tempdir");
            let (first, _) = self_signed();
            let (second, _) = self_signed();
            let bundle = dir.path().join("bundle.pem");
            fs::write(&bundle, format!("{}\n{}", first, second)).expect("write bundle");

            let tls = TlsConfig {
                ca: CaConfig {
                    cert: Secret::new(&bundle),
                },
                ..Default::default()
            };
            let context = tls.build_client().expect("build tls context");
            assert_eq!(context.root_certificates().len(), 2);
            assert!(context
                .root_certificates()
                .iter()
                .all(|c| c.source == bundle));
        }

        #[test]
        fn ca_directory_skips_other_files() {
            let dir = tempfile::tempdir().expect("create tempdir");
            let (cert, _) = self_signed();
            fs::write(dir.path().join("registry.pem"), cert).expect("write cert");
            fs::write(dir.path().join("README"), "not a certificate").expect("write readme");
            fs::create_dir(dir.path().join("nested")).expect("create nested dir");

            let tls = TlsConfig {
                ca: CaConfig {
                    cert: Secret::new(dir.path()),
                },
                ..Default::default()
            };
            let context = tls.build_client().expect("build tls context");
            assert_eq!(context.root_certificates().len(), 1);
            assert_eq!(
                context.root_certificates()[0].source,
                dir.path().join("registry.pem")
            );
        }

        #[test]
        fn ca_file_without_certificates() {
            let dir = tempfile::tempdir().expect("create tempdir");
            let path = dir.path().join("ca.pem");
            fs::write(&path, "garbage").expect("write file");

            let tls = TlsConfig {
                ca: CaConfig {
                    cert: Secret::new(&path),
                },
                ..Default::default()
            };
            match tls.build_client() {
                Err(TlsError::NoCertificates { path: p }) => assert_eq!(p, path),
                other => panic!("expected NoCertificates, got {:?}", other),
            }
        }

        #[test]
        fn malformed_ca_file() {
            let dir = tempfile::tempdir().expect("create tempdir");
            let path = dir.path().join("ca.pem");
            fs::write(&path, MALFORMED_PEM).expect("write file");

            let tls = TlsConfig {
                ca: CaConfig {
                    cert: Secret::new(&path),
                },
                ..Default::default()
            };
            match tls.build_client() {
                Err(TlsError::Pem { path: p, .. }) => assert_eq!(p, path),
                other => panic!("expected Pem, got {:?}", other),
            }
        }

        #[test]
        fn ca_directory_skips_malformed_files() {
            let dir = tempfile::tempdir().expect("create tempdir");
            let (cert, _) = self_signed();
            fs::write(dir.path().join("good.pem"), cert).expect("write cert");
            fs::write(dir.path().join("bad.pem"), MALFORMED_PEM).expect("write cert");

            let tls = TlsConfig {
                ca: CaConfig {
                    cert: Secret::new(dir.path()),
                },
                ..Default::default()
            };
            let context = tls.build_client().expect("build tls context");
            assert_eq!(context.root_certificates().len(), 1);
            assert_eq!(
                context.root_certificates()[0].source,
                dir.path().join("good.pem")
            );
        }

        #[test]
        fn missing_ca_path() {
            let tls = TlsConfig {
                ca: CaConfig {
                    cert: Secret::new("/does/not/exist/ca.pem"),
                },
                ..Default::default()
            };
            match tls.build_client() {
                Err(TlsError::Read { path, .. }) => {
                    assert_eq!(path, PathBuf::from("/does/not/exist/ca.pem"))
                }
                other => panic!("expected Read, got {:?}", other),
            }
        }

        #[test]
        fn client_key_pair() {
            let dir = tempfile::tempdir().expect("create tempdir");
            let (cert, key) = self_signed();
            let cert_path = dir.path().join("client.crt");
            let key_path = dir.path().join("client.key");
            fs::write(&cert_path, cert).expect("write cert");
            fs::write(&key_path, key).expect("write key");

            let tls = TlsConfig {
                client: ClientTlsConfig {
                    cert: Secret::new(&cert_path),
                    key: Secret::new(&key_path),
                    ..Default::default()
                },
                ..Default::default()
            };
            let context = tls.build_client().expect("build tls context");
            assert!(context.has_client_identity());
            assert!(!format!("{:?}", context).contains("PRIVATE KEY"));
        }

        #[test]
        fn certificate_without_key() {
            let tls = TlsConfig {
                client: ClientTlsConfig {
                    cert: Secret::new("/etc/registry/client.crt"),
                    ..Default::default()
                },
                ..Default::default()
            };
            assert!(matches!(
                tls.build_client(),
                Err(TlsError::IncompleteKeyPair)
            ));
        }

        #[test]
        fn disabled_ignores_files() {
            let tls = TlsConfig {
                ca: CaConfig {
                    cert: Secret::new("/does/not/exist/ca.pem"),
                },
                client: ClientTlsConfig {
                    disabled: true,
                    ..Default::default()
                },
                insecure: true,
            };
            assert_eq!(
                tls.build_client().expect("build tls context"),
                TlsContext::default()
            );
        }

        #[test]
        fn insecure() {
            let tls = TlsConfig {
                insecure: true,
                ..Default::default()
            };
            assert!(tls
                .build_client()
                .expect("build tls context")
                .accepts_invalid_certificates());
        }
    }
}
