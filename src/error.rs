//! Error handling in [`kube_sync`][crate]

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Possible errors when working with [`kube_sync`][crate]
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to open a connection (DNS, TLS handshake, refused)
    #[error("failed to open connection: {0}")]
    TransportOpen(#[source] reqwest::Error),

    /// A stream read failed unrecoverably
    ///
    /// Distinct from a read that merely timed out with no bytes; those are
    /// handled internally by the watch engine and never surface.
    #[error("failed reading stream: {0}")]
    TransportRead(#[source] std::io::Error),

    /// Failed to build the underlying HTTP client from TLS material
    #[error("failed to build http client: {0}")]
    BuildClient(#[source] reqwest::Error),

    /// Invalid certificate or key material
    #[error("invalid TLS material in {path:?}: {source}")]
    SslMaterial {
        /// File the material was read from
        path: PathBuf,
        /// Underlying reqwest rejection
        #[source]
        source: reqwest::Error,
    },

    /// Common error case when parsing a response into own structs
    #[error("error deserializing response: {0}")]
    SerdeError(#[from] serde_json::Error),

    /// Failed to serialize a request body as YAML (apply patches)
    #[error("error serializing request body: {0}")]
    SerdeYamlError(#[from] serde_yaml::Error),

    /// Configuration error
    #[error("error loading configuration: {0}")]
    Kubeconfig(#[from] ConfigError),

    /// Errors related to refreshing client auth
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    /// Structured-path accessor error
    #[error("path error: {0}")]
    Path(#[from] PathError),
}

/// Possible errors when loading config
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No kubeconfig path and no in-cluster material
    #[error("no kubeconfig found and not running in-cluster")]
    ConfigMissing,

    /// In-cluster environment variables absent
    #[error("in-cluster config requires {0} and {1}")]
    InclusterEnv(&'static str, &'static str),

    /// Failed to parse the kubeconfig YAML
    #[error("failed to parse kubeconfig: {0}")]
    ParseYaml(#[source] serde_yaml::Error),

    /// The named or current context was not found
    #[error("unable to load context {context_name}")]
    LoadContext {
        /// The context searched for
        context_name: String,
    },

    /// The cluster referenced by the context was not found
    #[error("unable to load cluster of context {cluster_name}")]
    LoadClusterOfContext {
        /// The cluster searched for
        cluster_name: String,
    },

    /// The user referenced by the context was not found
    #[error("unable to find named user {user_name}")]
    FindUser {
        /// The user searched for
        user_name: String,
    },

    /// Failed to read a file referenced by the kubeconfig
    #[error("failed to read {path:?}: {source}")]
    ReadFile {
        /// File that could not be read
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Inline base64 data did not decode
    #[error("failed to decode base64 data: {0}")]
    Base64Decode(#[source] base64::DecodeError),

    /// Neither inline data nor a file path was present for a required field
    #[error("no data or file was supplied for {0}")]
    NoFileOrData(&'static str),

    /// Failed to persist decoded credential material to a temp file
    #[error("failed to write credential temp file: {0}")]
    WriteTempfile(#[source] std::io::Error),

    /// A relative path could not be resolved against the kubeconfig dir
    #[error("cannot resolve relative path {path:?} without a config directory")]
    NoAbsolutePath {
        /// The unresolvable path
        path: PathBuf,
    },
}

/// Possible errors when refreshing credentials
///
/// Any of these surface as the `AuthRefreshFailed` failure class: an
/// auth-provider or exec-provider command failed or returned invalid data.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Failed to start the credential command
    #[error("unable to run auth exec {cmd}: {source}")]
    ExecStart {
        /// The command that could not be spawned
        cmd: String,
        /// Spawn failure
        #[source]
        source: std::io::Error,
    },

    /// The credential command exited unsuccessfully
    #[error("auth exec command '{cmd}' failed with status {status}: {out:?}")]
    ExecRun {
        /// The failed command
        cmd: String,
        /// The exit status of the failed command
        status: std::process::ExitStatus,
        /// Stdout/Stderr of the failed command
        out: std::process::Output,
    },

    /// The credential command output was not parseable JSON
    #[error("failed to parse output of auth exec '{cmd}': {source}")]
    ExecParse {
        /// The command whose output failed to parse
        cmd: String,
        /// Underlying decode error
        #[source]
        source: serde_json::Error,
    },

    /// The exec plugin returned the wrong kind or apiVersion
    #[error("exec plugin returned unsupported credential {kind:?}/{api_version:?}")]
    UnsupportedExecCredential {
        /// Returned `kind`
        kind: Option<String>,
        /// Returned `apiVersion`
        api_version: Option<String>,
    },

    /// The exec plugin response carried no status block
    #[error("exec plugin response did not contain a status")]
    ExecPluginFailed,

    /// A required field was absent from the command output
    #[error("auth command output has no value at {path}")]
    MissingTokenField {
        /// The configured extraction path
        path: String,
    },

    /// Malformed token expiration date
    #[error("malformed token expiration date: {0}")]
    MalformedExpirationDate(#[source] chrono::ParseError),

    /// The provider kind is not supported
    #[error("authentication with provider {0} not supported")]
    UnsupportedProvider(String),
}

/// Errors from the structured-path accessor
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PathError {
    /// The path expression itself is malformed (e.g. empty)
    #[error("bad path expression {0:?}")]
    BadPath(String),

    /// No value exists at the path and no default was provided
    #[error("no value at path {0:?}")]
    Missing(String),

    /// A `set` attempted to descend through an existing non-structured value
    #[error("path {0:?} conflicts with an existing scalar")]
    Conflict(String),
}

/// A Kubernetes `Status` payload, as returned in error bodies and watch
/// `ERROR` frames
///
/// It's quite common to get a `410 Gone` here when a watch `resourceVersion`
/// is too old.
#[derive(Error, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[error("{message}: {reason}")]
pub struct ErrorResponse {
    /// The status string, typically `"Failure"`
    #[serde(default)]
    pub status: String,
    /// A human readable message
    #[serde(default)]
    pub message: String,
    /// A machine readable reason
    #[serde(default)]
    pub reason: String,
    /// The http status code
    #[serde(default)]
    pub code: u16,
}
