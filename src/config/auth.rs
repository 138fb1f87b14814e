//! Credential refresh for auth-provider and exec-based plugins

use std::process::Command;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{exec, utils, AuthProviderConfig, Credentials, ExecConfig, Provider};
use crate::{error::AuthError, jsonpath, Result};

impl Credentials {
    /// Refresh the credential material if it has gone stale
    ///
    /// Invoked by the transport before every request. Refreshes when a
    /// known expiry lies in the past, or when a provider is configured but
    /// has not produced a token yet. The caller never observes a
    /// half-refreshed state: fields are only written after the provider
    /// output has been fully validated.
    pub(crate) fn ensure_fresh(&mut self) -> Result<()> {
        let stale = self.expiry.as_ref().map(utils::is_expired).unwrap_or(false);
        let unprimed = self.token.is_none() && !matches!(self.provider, Provider::Static);
        if !stale && !unprimed {
            return Ok(());
        }
        match self.provider.clone() {
            Provider::Static => Ok(()),
            Provider::AuthProvider(provider) => self.refresh_from_provider(&provider),
            Provider::Exec(exec) => self.refresh_from_exec(&exec),
        }
    }

    /// Run the auth-provider command and pull the token out of its output
    fn refresh_from_provider(&mut self, provider: &AuthProviderConfig) -> Result<()> {
        let cmd = provider
            .config
            .get("cmd-path")
            .ok_or_else(|| AuthError::UnsupportedProvider(provider.name.clone()))?;
        let params = provider.config.get("cmd-args").cloned().unwrap_or_default();

        tracing::debug!(command = %cmd, "refreshing token via auth-provider");
        // TODO splitting args by space is not safe
        let output = Command::new(cmd)
            .args(params.trim().split(' '))
            .output()
            .map_err(|source| AuthError::ExecStart {
                cmd: cmd.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(AuthError::ExecRun {
                cmd: format!("{} {}", cmd, params),
                status: output.status,
                out: output,
            }
            .into());
        }

        let token_key = provider
            .config
            .get("token-key")
            .ok_or_else(|| AuthError::UnsupportedProvider(provider.name.clone()))?;
        let doc: Value =
            serde_json::from_slice(&output.stdout).map_err(|source| AuthError::ExecParse {
                cmd: cmd.clone(),
                source,
            })?;
        let token = string_at(&doc, token_key).ok_or_else(|| AuthError::MissingTokenField {
            path: token_key.clone(),
        })?;

        // absent expiry-key means the token never expires
        let expiry = match provider.config.get("expiry-key") {
            Some(key) => match string_at(&doc, key) {
                Some(ts) => Some(
                    ts.parse::<DateTime<Utc>>()
                        .map_err(AuthError::MalformedExpirationDate)?,
                ),
                None => None,
            },
            None => None,
        };

        self.token = Some(token);
        self.expiry = expiry;
        Ok(())
    }

    /// Run the exec plugin and take over its token and TLS material
    fn refresh_from_exec(&mut self, config: &ExecConfig) -> Result<()> {
        tracing::debug!(command = %config.command, "refreshing credentials via exec plugin");
        let creds = exec::auth_exec(config, self.config_dir.as_deref())?;
        let status = creds.status.ok_or(AuthError::ExecPluginFailed)?;

        let expiry = match &status.expiration_timestamp {
            Some(ts) => Some(
                ts.parse::<DateTime<Utc>>()
                    .map_err(AuthError::MalformedExpirationDate)?,
            ),
            None => None,
        };

        if status.token.is_none() && status.client_certificate_data.is_none() {
            return Err(AuthError::ExecPluginFailed.into());
        }

        // overwrite PEM slots last; dropping the previous TempPath deletes
        // the old file
        if let Some(cert) = &status.client_certificate_data {
            let temp = utils::write_temp_pem(cert.as_bytes())?;
            self.client_cert_path = Some(temp.to_path_buf());
            self.cert_temp = Some(temp);
            self.generation += 1;
        }
        if let Some(key) = &status.client_key_data {
            let temp = utils::write_temp_pem(key.as_bytes())?;
            self.client_key_path = Some(temp.to_path_buf());
            self.key_temp = Some(temp);
            self.generation += 1;
        }
        if let Some(token) = status.token {
            self.token = Some(token);
        }
        self.expiry = expiry;
        Ok(())
    }
}

/// Look up a string at a (possibly brace-delimited) dotted path
fn string_at(doc: &Value, path: &str) -> Option<String> {
    let path = jsonpath::strip_braces(path);
    jsonpath::get(doc, path)
        .ok()
        .and_then(Value::as_str)
        .map(str::to_owned)
}
