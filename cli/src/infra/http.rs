//! HTTP infrastructure: the ureq-based fetcher with optional mutual TLS.
//!
//! When a CA certificate is configured the agent trusts only that CA and,
//! when both halves are present, offers the configured client certificate
//! during the handshake. TLS material paths resolve relative to the
//! configuration directory, with per-host override files preferred.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rollout_common::{listing, ListingEntry};

use crate::application::ports::Fetcher;
use crate::domain::config::{self as config_keys, AgentConfig};
use crate::domain::error::{EngineError, EngineResult};
use crate::infra::fs::temp_path;

/// Upper bound on any single response body.
const MAX_BODY: u64 = 512 * 1024 * 1024;

/// Resolved TLS material paths.
#[derive(Debug, Clone, Default)]
pub struct TlsMaterial {
    pub ca_certificate: Option<PathBuf>,
    pub client_certificate: Option<PathBuf>,
    pub client_certificate_key: Option<PathBuf>,
}

impl TlsMaterial {
    /// Resolve the configured TLS paths relative to `configdir`, preferring
    /// per-host override files (`<stem>.<hostname>.<ext>`).
    pub fn resolve(config: &AgentConfig, configdir: &Path, hostname: &str) -> Self {
        Self {
            ca_certificate: resolve_material(
                config.get(config_keys::CA_CERTIFICATE),
                configdir,
                hostname,
            ),
            client_certificate: resolve_material(
                config.get(config_keys::CLIENT_CERTIFICATE),
                configdir,
                hostname,
            ),
            client_certificate_key: resolve_material(
                config.get(config_keys::CLIENT_CERTIFICATE_KEY),
                configdir,
                hostname,
            ),
        }
    }
}

fn resolve_material(value: Option<&str>, configdir: &Path, hostname: &str) -> Option<PathBuf> {
    let value = value?;
    let base = if Path::new(value).is_absolute() {
        PathBuf::from(value)
    } else {
        configdir.join(value)
    };
    let per_host = override_path(&base, hostname);
    if per_host.exists() {
        Some(per_host)
    } else {
        Some(base)
    }
}

fn override_path(base: &Path, hostname: &str) -> PathBuf {
    match base.extension().and_then(|e| e.to_str()) {
        Some(ext) => base.with_extension(format!("{hostname}.{ext}")),
        None => {
            let mut name = base.as_os_str().to_os_string();
            name.push(format!(".{hostname}"));
            PathBuf::from(name)
        }
    }
}

/// Production [`Fetcher`] on top of a blocking ureq agent.
pub struct UreqFetcher {
    agent: ureq::Agent,
}

impl UreqFetcher {
    /// Build a fetcher for the resolved TLS material.
    ///
    /// # Errors
    ///
    /// [`EngineError::LocalFile`] when TLS material cannot be read,
    /// [`EngineError::Config`] when it cannot be used.
    pub fn new(tls: &TlsMaterial) -> EngineResult<Self> {
        let agent = match &tls.ca_certificate {
            Some(ca) => {
                let tls_config = build_tls_config(
                    ca,
                    tls.client_certificate.as_deref(),
                    tls.client_certificate_key.as_deref(),
                )?;
                ureq::AgentBuilder::new()
                    .tls_config(Arc::new(tls_config))
                    .build()
            }
            None => ureq::AgentBuilder::new().build(),
        };
        Ok(Self { agent })
    }
}

fn build_tls_config(
    ca: &Path,
    cert: Option<&Path>,
    key: Option<&Path>,
) -> EngineResult<rustls::ClientConfig> {
    let mut roots = rustls::RootCertStore::empty();
    for der in rustls_pemfile::certs(&mut BufReader::new(open(ca)?)) {
        let der = der.map_err(|e| EngineError::local(ca, e))?;
        roots.add(der).map_err(|e| {
            EngineError::Config(format!("invalid CA certificate {}: {e}", ca.display()))
        })?;
    }
    let builder = rustls::ClientConfig::builder().with_root_certificates(roots);
    match (cert, key) {
        (Some(cert_path), Some(key_path)) => {
            let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(open(cert_path)?))
                .collect::<Result<_, _>>()
                .map_err(|e| EngineError::local(cert_path, e))?;
            let key = rustls_pemfile::private_key(&mut BufReader::new(open(key_path)?))
                .map_err(|e| EngineError::local(key_path, e))?
                .ok_or_else(|| {
                    EngineError::Config(format!("no private key in {}", key_path.display()))
                })?;
            builder.with_client_auth_cert(certs, key).map_err(|e| {
                EngineError::Config(format!("cannot use client certificate: {e}"))
            })
        }
        _ => Ok(builder.with_no_client_auth()),
    }
}

fn open(path: &Path) -> EngineResult<File> {
    File::open(path).map_err(|e| EngineError::local(path, e))
}

impl Fetcher for UreqFetcher {
    fn fetch(&self, url: &str) -> EngineResult<Vec<u8>> {
        let response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| EngineError::Http(format!("GET {url}: {e}")))?;
        let mut body = Vec::new();
        response
            .into_reader()
            .take(MAX_BODY)
            .read_to_end(&mut body)
            .map_err(|e| EngineError::Http(format!("reading {url}: {e}")))?;
        Ok(body)
    }

    fn fetch_to_file(&self, url: &str, dest: &Path) -> EngineResult<()> {
        let response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| EngineError::Http(format!("GET {url}: {e}")))?;
        store_body(dest, response.into_reader().take(MAX_BODY))
    }

    fn index(&self, url: &str) -> EngineResult<Vec<ListingEntry>> {
        let body = self.fetch(url)?;
        listing::parse_listing(&String::from_utf8_lossy(&body))
            .map_err(|e| EngineError::Config(format!("{url}: {e}")))
    }
}

/// Stream a response body to `<dest>.<pid>` and rename into place.
///
/// On any failure the temp file is removed and `dest` is untouched. An
/// empty body never replaces a non-empty destination; that guards against
/// silent truncation by a misbehaving server.
pub(crate) fn store_body(dest: &Path, mut body: impl Read) -> EngineResult<()> {
    let tmp = temp_path(dest);
    let written: EngineResult<u64> = (|| {
        let mut file = File::create(&tmp).map_err(|e| EngineError::local(&tmp, e))?;
        let n = std::io::copy(&mut body, &mut file)
            .map_err(|e| EngineError::Http(format!("reading response body: {e}")))?;
        file.sync_all().map_err(|e| EngineError::local(&tmp, e))?;
        Ok(n)
    })();
    match written {
        Err(err) => {
            let _ = std::fs::remove_file(&tmp);
            Err(err)
        }
        Ok(0) if std::fs::metadata(dest).map(|m| m.len() > 0).unwrap_or(false) => {
            let _ = std::fs::remove_file(&tmp);
            Err(EngineError::Http(
                "Not overwriting existing file with nothing".to_string(),
            ))
        }
        Ok(_) => std::fs::rename(&tmp, dest).map_err(|e| EngineError::local(dest, e)),
    }
}

// ── Unit tests ───────────────────────────────────────────────────────────────
