//! In cluster or out of cluster kubeconfig to be used by an api client
//!
//! You primarily want to interact with [`Credentials`] and its load
//! functions; the full kubeconfig serde model is exposed for convenience.

mod auth;
pub mod exec;
mod file_config;
pub(crate) mod utils;

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use tempfile::TempPath;

use crate::{error::ConfigError, Result};

pub use file_config::{
    AuthInfo, AuthProviderConfig, Cluster, Context, ExecConfig, Kubeconfig, NamedAuthInfo,
    NamedCluster, NamedContext, NamedExtension, Preferences,
};

const SERVICE_HOSTENV: &str = "KUBERNETES_SERVICE_HOST";
const SERVICE_PORTENV: &str = "KUBERNETES_SERVICE_PORT";
const SERVICE_TOKENFILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
const SERVICE_CERTFILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";
const SERVICE_NSFILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";
const SERVICE_DEFAULT_URL: &str = "https://kubernetes.default.svc";

/// Options used when loading a kubeconfig
#[derive(Default, Clone, Debug)]
pub struct ConfigOptions {
    /// Explicit path to the kubeconfig file (overrides `$KUBECONFIG`)
    pub path: Option<PathBuf>,
    /// The named context to load (defaults to `current-context`)
    pub context: Option<String>,
    /// Override the cluster the context points at
    pub cluster: Option<String>,
    /// Override the user the context points at
    pub user: Option<String>,
}

/// How the bearer token is produced and refreshed
#[derive(Clone, Debug)]
pub(crate) enum Provider {
    /// Token (or basic auth) fixed at load time
    Static,
    /// Cloud auth-provider running a configured command
    AuthProvider(AuthProviderConfig),
    /// Credential plugin speaking the ExecCredential protocol
    Exec(ExecConfig),
}

/// Resolved authentication and TLS material for one cluster
///
/// Constructed once per context; mutated in place only by the refresh logic
/// when an expiry lapses. Inline base64 kubeconfig data is decoded into
/// owned temp files which are deleted when the `Credentials` value drops or
/// when a refresh overwrites them.
#[derive(Debug)]
pub struct Credentials {
    /// The address of the apiserver (https://host:port)
    pub(crate) server: String,
    /// Default namespace of the selected context
    pub(crate) namespace: String,
    pub(crate) ca_path: Option<PathBuf>,
    pub(crate) client_cert_path: Option<PathBuf>,
    pub(crate) client_key_path: Option<PathBuf>,
    pub(crate) token: Option<String>,
    pub(crate) basic_auth: Option<(String, String)>,
    pub(crate) expiry: Option<DateTime<Utc>>,
    /// Verify the server certificate against the CA
    pub(crate) verify_peer: bool,
    pub(crate) provider: Provider,
    /// Directory of the originating kubeconfig, for relative exec commands
    pub(crate) config_dir: Option<PathBuf>,
    // owned decoded material; replacing a slot deletes the previous file
    pub(crate) ca_temp: Option<TempPath>,
    pub(crate) cert_temp: Option<TempPath>,
    pub(crate) key_temp: Option<TempPath>,
    /// Bumped whenever TLS material changes so the transport rebuilds
    pub(crate) generation: u64,
}

impl Credentials {
    /// Load credentials from a kubeconfig file
    pub fn from_kubeconfig(options: &ConfigOptions) -> Result<Credentials> {
        let path = match &options.path {
            Some(p) => p.clone(),
            None => utils::find_kubeconfig()?,
        };
        let config = Kubeconfig::read_from(&path)?;
        let config_dir = path.parent().map(Path::to_path_buf);

        let context_name = options.context.as_ref().unwrap_or(&config.current_context);
        let context = config
            .contexts
            .iter()
            .find(|named| &named.name == context_name)
            .map(|named| &named.context)
            .ok_or_else(|| ConfigError::LoadContext {
                context_name: context_name.clone(),
            })?;
        let cluster_name = options.cluster.as_ref().unwrap_or(&context.cluster);
        let cluster = config
            .clusters
            .iter()
            .find(|named| &named.name == cluster_name)
            .map(|named| &named.cluster)
            .ok_or_else(|| ConfigError::LoadClusterOfContext {
                cluster_name: cluster_name.clone(),
            })?;
        let user_name = options.user.as_ref().unwrap_or(&context.user);
        let user = config
            .auth_infos
            .iter()
            .find(|named| &named.name == user_name)
            .map(|named| &named.auth_info)
            .ok_or_else(|| ConfigError::FindUser {
                user_name: user_name.clone(),
            })?;

        let mut creds = Credentials {
            server: cluster.server.clone(),
            namespace: context.namespace.clone().unwrap_or_else(|| "default".into()),
            ca_path: None,
            client_cert_path: None,
            client_key_path: None,
            token: None,
            basic_auth: None,
            expiry: None,
            verify_peer: !cluster.insecure_skip_tls_verify.unwrap_or(false),
            provider: Provider::Static,
            config_dir: config_dir.clone(),
            ca_temp: None,
            cert_temp: None,
            key_temp: None,
            generation: 0,
        };

        creds.ca_path = creds.materialize(
            &cluster.certificate_authority_data,
            &cluster.certificate_authority,
            Slot::Ca,
        )?;
        creds.client_cert_path = creds.materialize(
            &user.client_certificate_data,
            &user.client_certificate,
            Slot::Cert,
        )?;
        creds.client_key_path =
            creds.materialize(&user.client_key_data, &user.client_key, Slot::Key)?;

        if user.token.is_some() || user.token_file.is_some() {
            creds.token = Some(utils::data_or_file(&user.token, &user.token_file, "token")?);
        } else if let (Some(u), Some(p)) = (&user.username, &user.password) {
            creds.basic_auth = Some((u.clone(), p.clone()));
        }

        if let Some(provider) = &user.auth_provider {
            creds.provider = Provider::AuthProvider(provider.clone());
        } else if let Some(exec) = &user.exec {
            creds.provider = Provider::Exec(exec.clone());
        }

        Ok(creds)
    }

    /// Load credentials from the pod service account when running in-cluster
    pub fn incluster() -> Result<Credentials> {
        let token = fs::read_to_string(SERVICE_TOKENFILE).map_err(|source| {
            ConfigError::ReadFile {
                path: SERVICE_TOKENFILE.into(),
                source,
            }
        })?;
        if !Path::new(SERVICE_CERTFILE).exists() {
            return Err(ConfigError::ReadFile {
                path: SERVICE_CERTFILE.into(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            }
            .into());
        }
        let server = match (env::var(SERVICE_HOSTENV), env::var(SERVICE_PORTENV)) {
            (Ok(host), Ok(port)) => format!("https://{}:{}", host, port),
            _ => SERVICE_DEFAULT_URL.to_string(),
        };
        let namespace = fs::read_to_string(SERVICE_NSFILE)
            .map(|ns| ns.trim().to_string())
            .unwrap_or_else(|_| "default".into());
        Ok(Credentials {
            server,
            namespace,
            ca_path: Some(SERVICE_CERTFILE.into()),
            client_cert_path: None,
            client_key_path: None,
            token: Some(token.trim().to_string()),
            basic_auth: None,
            expiry: None,
            verify_peer: true,
            provider: Provider::Static,
            config_dir: None,
            ca_temp: None,
            cert_temp: None,
            key_temp: None,
            generation: 0,
        })
    }

    /// Infer the credential source
    ///
    /// Attempts in-cluster service account material first, then falls back
    /// to the local kubeconfig.
    pub fn infer() -> Result<Credentials> {
        match Self::incluster() {
            Ok(creds) => Ok(creds),
            Err(e) => {
                tracing::trace!("no in-cluster config found: {}", e);
                tracing::trace!("falling back to local kubeconfig");
                Self::from_kubeconfig(&ConfigOptions::default())
            }
        }
    }

    /// The apiserver address
    pub fn server(&self) -> &str {
        &self.server
    }

    /// The default namespace of the selected context
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn materialize(
        &mut self,
        data: &Option<String>,
        file: &Option<String>,
        slot: Slot,
    ) -> Result<Option<PathBuf>> {
        match (data, file) {
            (None, None) => Ok(None),
            (Some(_), _) => {
                let bytes = utils::data_or_file_with_base64(
                    data,
                    file,
                    self.config_dir.as_deref(),
                    slot.name(),
                )?;
                let temp = utils::write_temp_pem(&bytes)?;
                let path = temp.to_path_buf();
                match slot {
                    Slot::Ca => self.ca_temp = Some(temp),
                    Slot::Cert => self.cert_temp = Some(temp),
                    Slot::Key => self.key_temp = Some(temp),
                }
                Ok(Some(path))
            }
            (None, Some(f)) => {
                let path = utils::resolve_relative(Path::new(f), self.config_dir.as_deref())?;
                Ok(Some(path))
            }
        }
    }
}

enum Slot {
    Ca,
    Cert,
    Key,
}

impl Slot {
    fn name(&self) -> &'static str {
        match self {
            Slot::Ca => "certificate-authority",
            Slot::Cert => "client-certificate",
            Slot::Key => "client-key",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(yaml: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(yaml.as_bytes()).unwrap();
        f
    }

    const BASE: &str = r#"
apiVersion: v1
kind: Config
clusters:
- cluster:
    server: https://core.example:6443
    certificate-authority-data: LS0tLUNB
  name: core
- cluster:
    server: https://edge.example:6443
    insecure-skip-tls-verify: true
  name: edge
contexts:
- context: {cluster: core, user: core-admin, namespace: infra}
  name: core
- context: {cluster: edge, user: edge-admin}
  name: edge
current-context: core
users:
- name: core-admin
  user:
    token: core-token
- name: edge-admin
  user:
    username: u
    password: p
"#;

    #[test]
    fn current_context_is_selected() {
        let file = write_config(BASE);
        let creds = Credentials::from_kubeconfig(&ConfigOptions {
            path: Some(file.path().into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(creds.server(), "https://core.example:6443");
        assert_eq!(creds.namespace(), "infra");
        assert_eq!(creds.token.as_deref(), Some("core-token"));
        assert!(creds.verify_peer);
        // inline CA data became an owned temp file
        let ca = creds.ca_path.clone().unwrap();
        assert!(ca.exists());
        drop(creds);
        assert!(!ca.exists());
    }

    #[test]
    fn named_context_and_insecure_flag() {
        let file = write_config(BASE);
        let creds = Credentials::from_kubeconfig(&ConfigOptions {
            path: Some(file.path().into()),
            context: Some("edge".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(creds.server(), "https://edge.example:6443");
        assert_eq!(creds.namespace(), "default");
        assert!(!creds.verify_peer);
        assert_eq!(creds.basic_auth, Some(("u".into(), "p".into())));
    }

    #[test]
    fn unknown_context_errors() {
        let file = write_config(BASE);
        let err = Credentials::from_kubeconfig(&ConfigOptions {
            path: Some(file.path().into()),
            context: Some("nope".into()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Kubeconfig(ConfigError::LoadContext { .. })
        ));
    }
}
