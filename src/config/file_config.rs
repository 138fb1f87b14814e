//! Serde representation of the kubeconfig file format

use std::{collections::HashMap, fs::File, path::Path};

use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, Result};

/// [`Kubeconfig`] represents the kubeconfig file on disk
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Kubeconfig {
    /// Kind is usually `Config`
    pub kind: Option<String>,
    /// Config apiVersion
    #[serde(rename = "apiVersion")]
    pub api_version: Option<String>,
    /// Client preferences
    pub preferences: Option<Preferences>,
    /// Referencable names to cluster configs
    pub clusters: Vec<NamedCluster>,
    /// Referencable names to user configs
    #[serde(rename = "users")]
    pub auth_infos: Vec<NamedAuthInfo>,
    /// Referencable names to context configs
    pub contexts: Vec<NamedContext>,
    /// The name of the context that you would like to use by default
    #[serde(rename = "current-context")]
    pub current_context: String,
    /// Additional information for extenders
    pub extensions: Option<Vec<NamedExtension>>,
}

/// Preferences stores extensions for cli
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Preferences {
    /// Enable colors
    pub colors: Option<bool>,
    /// Extensions
    pub extensions: Option<Vec<NamedExtension>>,
}

/// NamedExtension associates name with extension
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NamedExtension {
    /// Name of extension
    pub name: String,
    /// Additional information for extenders
    pub extension: serde_json::Value,
}

/// NamedCluster associates name with cluster
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NamedCluster {
    /// Name of cluster
    pub name: String,
    /// Information about how to communicate with a kubernetes cluster
    pub cluster: Cluster,
}

/// Cluster stores information to connect kubernetes cluster
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cluster {
    /// The address of the kubernetes cluster (https://hostname:port)
    pub server: String,
    /// Skips the validity check for the server's certificate
    #[serde(rename = "insecure-skip-tls-verify")]
    pub insecure_skip_tls_verify: Option<bool>,
    /// The path to a cert file for the certificate authority
    #[serde(rename = "certificate-authority")]
    pub certificate_authority: Option<String>,
    /// PEM-encoded certificate authority certificates, base64 encoded
    #[serde(rename = "certificate-authority-data")]
    pub certificate_authority_data: Option<String>,
}

/// NamedAuthInfo associates name with authentication
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NamedAuthInfo {
    /// Name of the user
    pub name: String,
    /// Information that describes identity of the user
    #[serde(rename = "user")]
    pub auth_info: AuthInfo,
}

/// AuthInfo stores information to tell cluster who you are
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct AuthInfo {
    /// The username for basic authentication
    pub username: Option<String>,
    /// The password for basic authentication
    pub password: Option<String>,

    /// The bearer token for authentication
    pub token: Option<String>,
    /// Pointer to a file that contains a bearer token
    #[serde(rename = "tokenFile")]
    pub token_file: Option<String>,

    /// Path to a client cert file for TLS
    #[serde(rename = "client-certificate")]
    pub client_certificate: Option<String>,
    /// PEM-encoded data from a client cert file for TLS, base64 encoded
    #[serde(rename = "client-certificate-data")]
    pub client_certificate_data: Option<String>,

    /// Path to a client key file for TLS
    #[serde(rename = "client-key")]
    pub client_key: Option<String>,
    /// PEM-encoded data from a client key file for TLS, base64 encoded
    #[serde(rename = "client-key-data")]
    pub client_key_data: Option<String>,

    /// The username to act-as
    #[serde(rename = "as")]
    pub impersonate: Option<String>,
    /// The groups to impersonate
    #[serde(rename = "as-groups")]
    pub impersonate_groups: Option<Vec<String>>,

    /// Specifies a custom authentication plugin
    #[serde(rename = "auth-provider")]
    pub auth_provider: Option<AuthProviderConfig>,

    /// Specifies a command-based credential plugin
    pub exec: Option<ExecConfig>,
}

/// AuthProviderConfig stores auth for a cloud provider
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthProviderConfig {
    /// Name of the auth provider
    pub name: String,
    /// Provider-specific settings, including `cmd-path`, `cmd-args`,
    /// `token-key` and `expiry-key`
    pub config: HashMap<String, String>,
}

/// ExecConfig stores credential-plugin configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecConfig {
    /// Preferred input version of the ExecInfo
    #[serde(rename = "apiVersion")]
    pub api_version: Option<String>,
    /// Arguments to pass to the command when executing it
    pub args: Option<Vec<String>>,
    /// The command to execute
    ///
    /// A relative command is resolved against the directory of the
    /// kubeconfig that named it.
    pub command: String,
    /// Additional environment variables to expose to the process, as
    /// `name`/`value` pairs
    pub env: Option<Vec<HashMap<String, String>>>,
}

/// NamedContext associates name with context
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NamedContext {
    /// Name of the context
    pub name: String,
    /// Associations for the context
    pub context: Context,
}

/// Context stores tuple of cluster and user information
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Context {
    /// Name of the cluster for this context
    pub cluster: String,
    /// Name of the user for this context
    pub user: String,
    /// The default namespace to use on unspecified requests
    pub namespace: Option<String>,
    /// Additional information for extenders
    pub extensions: Option<Vec<NamedExtension>>,
}

impl Kubeconfig {
    /// Read a kubeconfig from a file on disk
    pub fn read_from<P: AsRef<Path>>(path: P) -> Result<Kubeconfig> {
        let f = File::open(&path).map_err(|source| ConfigError::ReadFile {
            path: path.as_ref().into(),
            source,
        })?;
        let config = serde_yaml::from_reader(f).map_err(ConfigError::ParseYaml)?;
        Ok(config)
    }

    /// Parse a kubeconfig from an in-memory YAML document
    pub fn from_yaml(text: &str) -> Result<Kubeconfig> {
        serde_yaml::from_str(text)
            .map_err(ConfigError::ParseYaml)
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_kubeconfig() {
        let text = r#"
apiVersion: v1
kind: Config
clusters:
- cluster:
    server: https://1.2.3.4
    insecure-skip-tls-verify: true
  name: minimal
contexts:
- context:
    cluster: minimal
    user: admin
    namespace: kube-system
  name: minimal
current-context: minimal
users:
- name: admin
  user:
    token: abc123
"#;
        let config = Kubeconfig::from_yaml(text).unwrap();
        assert_eq!(config.current_context, "minimal");
        assert_eq!(config.clusters[0].cluster.server, "https://1.2.3.4");
        assert_eq!(config.auth_infos[0].auth_info.token.as_deref(), Some("abc123"));
        assert_eq!(
            config.contexts[0].context.namespace.as_deref(),
            Some("kube-system")
        );
    }

    #[test]
    fn parse_exec_and_provider_users() {
        let text = r#"
apiVersion: v1
kind: Config
clusters:
- cluster:
    server: https://cluster
  name: c
contexts:
- context: {cluster: c, user: exec-user}
  name: c
current-context: c
users:
- name: exec-user
  user:
    exec:
      apiVersion: client.authentication.k8s.io/v1beta1
      command: ./get-token.sh
      args: ["--cluster", "c"]
      env:
      - name: REGION
        value: eu-west-1
- name: provider-user
  user:
    auth-provider:
      name: gcp
      config:
        cmd-path: gcloud
        cmd-args: config config-helper --format=json
        token-key: '{.credential.access_token}'
        expiry-key: '{.credential.token_expiry}'
"#;
        let config = Kubeconfig::from_yaml(text).unwrap();
        let exec = config.auth_infos[0].auth_info.exec.as_ref().unwrap();
        assert_eq!(exec.command, "./get-token.sh");
        assert_eq!(exec.args.as_ref().unwrap().len(), 2);
        let provider = config.auth_infos[1].auth_info.auth_provider.as_ref().unwrap();
        assert_eq!(provider.name, "gcp");
        assert_eq!(
            provider.config.get("token-key").unwrap(),
            "{.credential.access_token}"
        );
    }
}
