//! The blocking HTTP transport
//!
//! The only component that touches TLS settings. One-shot verbs read the
//! full response body; watches get an open [`Read`] stream with a per-read
//! deadline, so a silent connection never blocks its caller for more than
//! the configured read timeout.

use std::{
    cell::RefCell,
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use base64::Engine;
use reqwest::{
    blocking::{Client as HttpClient, ClientBuilder},
    header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE},
};
use serde_json::Value;

use super::verb::Verb;
use crate::{config::Credentials, error::ConfigError, Error, Result};

/// Query parameters for a request
///
/// Ordered so composed URLs are deterministic.
pub type Query = BTreeMap<String, String>;

/// The seam the watch and list engines drive
///
/// Implemented by [`Transport`] against the network, and by scripted
/// in-memory fakes in tests.
pub(crate) trait Backend {
    /// Perform a GET and decode the body as JSON
    fn get_json(&self, endpoint: &str, query: &Query) -> Result<Value>;
    /// Open a streaming GET with a per-read deadline
    fn open_stream(
        &self,
        endpoint: &str,
        query: &Query,
        read_timeout: Duration,
    ) -> Result<Box<dyn io::Read>>;
}

/// Compose the request URL from server, endpoint and query map
///
/// An endpoint that already carries a `?` (trailing, or with a non-empty
/// query component) gets parameters appended with `&`, otherwise with `?`.
/// Values are form-urlencoded.
pub(crate) fn compose_url(server: &str, endpoint: &str, query: &Query) -> String {
    let url = format!("{}{}", server, endpoint);
    if query.is_empty() {
        return url;
    }
    let mut qp = url::form_urlencoded::Serializer::new(String::new());
    for (k, v) in query {
        qp.append_pair(k, v);
    }
    let encoded = qp.finish();
    let sep = if url.ends_with('?') || has_nonempty_query(endpoint) {
        "&"
    } else {
        "?"
    };
    format!("{}{}{}", url, sep, encoded)
}

fn has_nonempty_query(endpoint: &str) -> bool {
    endpoint
        .split_once('?')
        .map(|(_, q)| !q.is_empty())
        .unwrap_or(false)
}

/// Credential material cloned out of the resolver for one call
struct Snapshot {
    server: String,
    token: Option<String>,
    basic_auth: Option<(String, String)>,
    ca_path: Option<PathBuf>,
    client_cert_path: Option<PathBuf>,
    client_key_path: Option<PathBuf>,
    verify_peer: bool,
    generation: u64,
}

/// Blocking transport carrying the TLS and auth context
pub(crate) struct Transport {
    creds: RefCell<Credentials>,
    // generation-tagged cache of the one-shot client; invalidated when a
    // refresh rotates the TLS material
    http: RefCell<Option<(u64, HttpClient)>>,
}

impl Transport {
    pub(crate) fn new(creds: Credentials) -> Self {
        Transport {
            creds: RefCell::new(creds),
            http: RefCell::new(None),
        }
    }

    /// The default namespace of the underlying credentials
    pub(crate) fn namespace(&self) -> String {
        self.creds.borrow().namespace().to_string()
    }

    /// Refresh if needed and clone out the current material
    fn snapshot(&self) -> Result<Snapshot> {
        let mut creds = self.creds.borrow_mut();
        creds.ensure_fresh()?;
        Ok(Snapshot {
            server: creds.server.clone(),
            token: creds.token.clone(),
            basic_auth: creds.basic_auth.clone(),
            ca_path: creds.ca_path.clone(),
            client_cert_path: creds.client_cert_path.clone(),
            client_key_path: creds.client_key_path.clone(),
            verify_peer: creds.verify_peer,
            generation: creds.generation,
        })
    }

    /// Perform a one-shot request, returning the raw response body
    ///
    /// Non-2xx responses are not translated to errors here; the body comes
    /// back as-is so callers can inspect `kind: Status` payloads.
    pub(crate) fn request(
        &self,
        endpoint: &str,
        verb: Verb,
        query: &Query,
        body: Option<&Value>,
        pretty: bool,
    ) -> Result<String> {
        let snap = self.snapshot()?;
        let http = self.oneshot_client(&snap)?;
        let url = compose_url(&snap.server, endpoint, query);
        tracing::trace!(%url, ?verb, "requesting");

        let mut req = http.request(verb.method(), &url);
        if let Some(value) = auth_header(&snap) {
            req = req.header(AUTHORIZATION, value);
        }
        if let Some(doc) = body {
            let encoded = if verb.yaml_body() {
                serde_yaml::to_string(doc)?
            } else if pretty {
                serde_json::to_string_pretty(doc)?
            } else {
                serde_json::to_string(doc)?
            };
            req = req.header(CONTENT_TYPE, verb.content_type()).body(encoded);
        }

        let res = req.send().map_err(Error::TransportOpen)?;
        let status = res.status();
        let text = res
            .text()
            .map_err(|e| Error::TransportRead(io::Error::new(io::ErrorKind::Other, e)))?;
        if !status.is_success() {
            tracing::debug!(%status, %url, "non-success response");
        }
        Ok(text)
    }

    fn oneshot_client(&self, snap: &Snapshot) -> Result<HttpClient> {
        let mut cache = self.http.borrow_mut();
        if let Some((generation, client)) = cache.as_ref() {
            if *generation == snap.generation {
                return Ok(client.clone());
            }
        }
        let client = self.build_client(snap, None)?;
        *cache = Some((snap.generation, client.clone()));
        Ok(client)
    }

    fn build_client(&self, snap: &Snapshot, read_timeout: Option<Duration>) -> Result<HttpClient> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, */*"));
        // advisory; lets the server compress large list bodies
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));

        let mut builder = ClientBuilder::new().default_headers(headers);
        if let Some(ca) = &snap.ca_path {
            let pem = read_material(ca)?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|source| {
                Error::SslMaterial {
                    path: ca.clone(),
                    source,
                }
            })?;
            builder = builder.add_root_certificate(cert);
        }
        if let (Some(cert), Some(key)) = (&snap.client_cert_path, &snap.client_key_path) {
            let mut pem = read_material(cert)?;
            pem.extend(read_material(key)?);
            let identity = reqwest::Identity::from_pem(&pem).map_err(|source| {
                Error::SslMaterial {
                    path: cert.clone(),
                    source,
                }
            })?;
            builder = builder.identity(identity);
        }
        if !snap.verify_peer {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(deadline) = read_timeout {
            // watches live far beyond any total deadline; only the
            // per-read timeout applies to them
            builder = builder.timeout(deadline);
        }
        builder.build().map_err(Error::BuildClient)
    }
}

impl Backend for Transport {
    fn get_json(&self, endpoint: &str, query: &Query) -> Result<Value> {
        let text = self.request(endpoint, Verb::Get, query, None, false)?;
        serde_json::from_str(&text).map_err(Error::SerdeError)
    }

    fn open_stream(
        &self,
        endpoint: &str,
        query: &Query,
        read_timeout: Duration,
    ) -> Result<Box<dyn io::Read>> {
        let snap = self.snapshot()?;
        let http = self.build_client(&snap, Some(read_timeout))?;
        let url = compose_url(&snap.server, endpoint, query);
        tracing::debug!(%url, "opening watch stream");

        let mut req = http.get(&url);
        if let Some(value) = auth_header(&snap) {
            req = req.header(AUTHORIZATION, value);
        }
        let res = req.send().map_err(Error::TransportOpen)?;
        Ok(Box::new(res))
    }
}

fn auth_header(snap: &Snapshot) -> Option<String> {
    if let Some(token) = &snap.token {
        Some(format!("Bearer {}", token))
    } else {
        snap.basic_auth.as_ref().map(|(user, pass)| {
            let encoded =
                base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, pass));
            format!("Basic {}", encoded)
        })
    }
}

fn read_material(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|source| {
        ConfigError::ReadFile {
            path: path.into(),
            source,
        }
        .into()
    })
}
