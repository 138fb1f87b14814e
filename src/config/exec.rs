//! Command-based credential plugin support

use std::{path::Path, process::Command};

use serde::{Deserialize, Serialize};

use super::file_config::ExecConfig;
use crate::{config::utils, error::AuthError, Result};

const EXEC_KIND: &str = "ExecCredential";
const EXEC_API_VERSION: &str = "client.authentication.k8s.io/v1beta1";

/// ExecCredential is used by exec-based plugins to communicate credentials
/// to HTTP transports
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecCredential {
    /// Kind, expected to be `ExecCredential`
    pub kind: Option<String>,
    /// ApiVersion, expected to be `client.authentication.k8s.io/v1beta1`
    #[serde(rename = "apiVersion")]
    pub api_version: Option<String>,
    /// Request-specific information
    pub spec: Option<ExecCredentialSpec>,
    /// Credentials for the transport to use
    pub status: Option<ExecCredentialStatus>,
}

/// ExecCredentialSpec holds request and runtime specific information
/// provided by the transport
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecCredentialSpec {}

/// ExecCredentialStatus holds credentials for the transport to use
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecCredentialStatus {
    /// Expiry of the token, RFC3339
    #[serde(rename = "expirationTimestamp")]
    pub expiration_timestamp: Option<String>,
    /// The bearer token
    pub token: Option<String>,
    /// PEM-encoded client certificate
    #[serde(rename = "clientCertificateData")]
    pub client_certificate_data: Option<String>,
    /// PEM-encoded client key
    #[serde(rename = "clientKeyData")]
    pub client_key_data: Option<String>,
}

/// Run the configured credential plugin and parse its output
///
/// Relative commands resolve against the directory of the kubeconfig that
/// configured them. The output must be an `ExecCredential` document of the
/// supported apiVersion.
pub fn auth_exec(auth: &ExecConfig, config_dir: Option<&Path>) -> Result<ExecCredential> {
    // bare program names go through $PATH; only explicit relative paths
    // resolve against the kubeconfig directory
    let command = if Path::new(&auth.command).components().count() > 1 {
        utils::resolve_relative(Path::new(&auth.command), config_dir)
            .unwrap_or_else(|_| Path::new(&auth.command).to_path_buf())
    } else {
        Path::new(&auth.command).to_path_buf()
    };
    let mut cmd = Command::new(&command);
    if let Some(args) = &auth.args {
        cmd.args(args);
    }
    if let Some(env) = &auth.env {
        let envs = env
            .iter()
            .flat_map(|env| match (env.get("name"), env.get("value")) {
                (Some(name), Some(value)) => Some((name, value)),
                _ => None,
            });
        cmd.envs(envs);
    }
    let cmd_display = format!("{:?}", cmd);
    let out = cmd.output().map_err(|source| AuthError::ExecStart {
        cmd: cmd_display.clone(),
        source,
    })?;
    if !out.status.success() {
        return Err(AuthError::ExecRun {
            cmd: cmd_display,
            status: out.status,
            out,
        }
        .into());
    }
    let creds: ExecCredential =
        serde_json::from_slice(&out.stdout).map_err(|source| AuthError::ExecParse {
            cmd: cmd_display,
            source,
        })?;
    if creds.kind.as_deref() != Some(EXEC_KIND)
        || creds.api_version.as_deref() != Some(EXEC_API_VERSION)
    {
        return Err(AuthError::UnsupportedExecCredential {
            kind: creds.kind,
            api_version: creds.api_version,
        }
        .into());
    }
    Ok(creds)
}
