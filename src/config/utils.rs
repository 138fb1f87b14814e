//! Filesystem plumbing for config loading

use std::{
    env, fs,
    io::Write,
    path::{Path, PathBuf},
};

use base64::Engine;
use chrono::{DateTime, Utc};
use dirs::home_dir;
use tempfile::NamedTempFile;

use crate::{error::ConfigError, Result};

const KUBECONFIG: &str = "KUBECONFIG";

/// Search for the kubeconfig file
///
/// Order: `$KUBECONFIG`, then `$HOME/.kube/config`.
pub fn find_kubeconfig() -> Result<PathBuf> {
    kubeconfig_path()
        .or_else(default_kube_path)
        .ok_or_else(|| ConfigError::ConfigMissing.into())
}

/// Returns kubeconfig path from the `KUBECONFIG` environment variable
pub fn kubeconfig_path() -> Option<PathBuf> {
    env::var_os(KUBECONFIG).map(PathBuf::from)
}

/// Returns kubeconfig path from `$HOME/.kube/config`
pub fn default_kube_path() -> Option<PathBuf> {
    home_dir().map(|h| h.join(".kube").join("config"))
}

/// Resolve a possibly-relative path against the directory of the config
/// file that mentioned it
pub fn resolve_relative(path: &Path, base_dir: Option<&Path>) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    match base_dir {
        Some(dir) => Ok(dir.join(path)),
        None => Err(ConfigError::NoAbsolutePath { path: path.into() }.into()),
    }
}

/// Load bytes from inline base64 `data` or from `file`, preferring data
pub fn data_or_file_with_base64(
    data: &Option<String>,
    file: &Option<String>,
    base_dir: Option<&Path>,
    what: &'static str,
) -> Result<Vec<u8>> {
    match (data, file) {
        (Some(d), _) => base64::engine::general_purpose::STANDARD
            .decode(d)
            .map_err(ConfigError::Base64Decode)
            .map_err(Into::into),
        (_, Some(f)) => {
            let path = resolve_relative(Path::new(f), base_dir)?;
            fs::read(&path).map_err(|source| ConfigError::ReadFile { path, source }.into())
        }
        _ => Err(ConfigError::NoFileOrData(what).into()),
    }
}

/// Load a string from inline `data` or from `file`, preferring data
pub fn data_or_file(
    data: &Option<String>,
    file: &Option<String>,
    what: &'static str,
) -> Result<String> {
    match (data, file) {
        (Some(d), _) => Ok(d.to_string()),
        (_, Some(f)) => fs::read_to_string(f).map_err(|source| {
            ConfigError::ReadFile {
                path: f.into(),
                source,
            }
            .into()
        }),
        _ => Err(ConfigError::NoFileOrData(what).into()),
    }
}

/// Persist credential material to an owned temp file
///
/// The returned [`tempfile::TempPath`] deletes the file when dropped, which
/// is what ties temp-file lifetime to the owning `Credentials`.
pub fn write_temp_pem(data: &[u8]) -> Result<tempfile::TempPath> {
    let mut file = NamedTempFile::with_prefix("kube-sync-pem")
        .map_err(ConfigError::WriteTempfile)?;
    file.write_all(data).map_err(ConfigError::WriteTempfile)?;
    file.flush().map_err(ConfigError::WriteTempfile)?;
    Ok(file.into_temp_path())
}

/// Whether an RFC3339 timestamp lies in the past (with refresh skew)
///
/// A 60 second wiggle room avoids using a token that expires mid-request.
pub fn is_expired(expiry: &DateTime<Utc>) -> bool {
    Utc::now() + chrono::Duration::seconds(60) >= *expiry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kubeconfig_path_from_env() {
        let expected = "/fake/.kube/config";
        env::set_var(KUBECONFIG, expected);
        assert_eq!(PathBuf::from(expected), kubeconfig_path().unwrap());
        env::remove_var(KUBECONFIG);
    }

    #[test]
    fn data_beats_file() {
        let mut tmpfile = NamedTempFile::new().unwrap();
        write!(tmpfile, "file-contents").unwrap();
        let path = tmpfile.path().to_str().unwrap().to_string();

        let actual = data_or_file(&Some("inline".into()), &Some(path.clone()), "token");
        assert_eq!(actual.unwrap(), "inline");

        let actual = data_or_file(&None, &Some(path), "token");
        assert_eq!(actual.unwrap(), "file-contents");

        assert!(data_or_file(&None, &None, "token").is_err());
    }

    #[test]
    fn base64_data_decodes() {
        let bytes =
            data_or_file_with_base64(&Some("aGVsbG8=".into()), &None, None, "ca").unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn relative_files_resolve_against_config_dir() {
        let err = resolve_relative(Path::new("certs/ca.crt"), None).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Kubeconfig(ConfigError::NoAbsolutePath { .. })
        ));
        let resolved =
            resolve_relative(Path::new("certs/ca.crt"), Some(Path::new("/home/u/.kube"))).unwrap();
        assert_eq!(resolved, PathBuf::from("/home/u/.kube/certs/ca.crt"));
    }

    #[test]
    fn temp_pem_is_deleted_on_drop() {
        let path = write_temp_pem(b"-----BEGIN CERTIFICATE-----").unwrap();
        let on_disk = path.to_path_buf();
        assert!(on_disk.exists());
        drop(path);
        assert!(!on_disk.exists());
    }

    #[test]
    fn expiry_includes_wiggle_room() {
        let past = Utc::now() - chrono::Duration::seconds(5);
        let soon = Utc::now() + chrono::Duration::seconds(30);
        let later = Utc::now() + chrono::Duration::seconds(3600);
        assert!(is_expired(&past));
        assert!(is_expired(&soon));
        assert!(!is_expired(&later));
    }
}
