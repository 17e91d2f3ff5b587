//! Backend configuration and profiles
//!
//! Each backend constructor takes one of the config structs below. Profiles map
//! names to backend configs and are read from a TOML file:
//!
//! ```toml
//! default = "archive"
//!
//! [profiles.archive]
//! type = "s3"
//! bucket = "company-archive"
//! region = "eu-west-1"
//!
//! [profiles.scratch]
//! type = "local"
//! root = "/var/tmp/scratch"
//!
//! [profiles.partner]
//! type = "sftp"
//! host = "sftp.partner.example"
//! username = "upload"
//! auth = { method = "key", key_file = "/home/me/.ssh/id_ed25519" }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::stream::DEFAULT_CHUNK_SIZE;
use crate::traits::BackendKind;

/// Environment variable overriding the configuration directory
pub const CONFIG_DIR_ENV: &str = "STOW_CONFIG_DIR";

const PROFILES_FILE: &str = "profiles.toml";

const REDACTED: &str = "[redacted]";

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_port() -> u16 {
    22
}

fn default_sftp_root() -> String {
    "/".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn check_chunk_size(chunk_size: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(Error::Config("chunk_size must be greater than zero".into()));
    }
    Ok(())
}

/// Local filesystem backend parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Existing directory every path is resolved under
    pub root: PathBuf,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl LocalConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        check_chunk_size(self.chunk_size)
    }
}

/// S3-compatible object store parameters
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,

    /// Key prefix acting as the root inside the bucket
    #[serde(default)]
    pub prefix: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// Custom endpoint for S3-compatible services
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Static credentials; when absent the SDK's default provider chain is used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,

    /// Never serialized and redacted from `Debug` output
    #[serde(default, skip_serializing)]
    pub secret_key: Option<String>,

    /// Named profile from the shared AWS config files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,

    #[serde(default)]
    pub force_path_style: bool,

    /// Part size for multipart uploads and read chunk size
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Attempts per request, handed to the SDK retry policy
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl S3Config {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: String::new(),
            region: default_region(),
            endpoint: None,
            access_key: None,
            secret_key: None,
            profile: None,
            force_path_style: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_attempts: default_max_attempts(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(Error::Config("s3 bucket must not be empty".into()));
        }
        if let Some(endpoint) = &self.endpoint {
            url::Url::parse(endpoint)
                .map_err(|e| Error::Config(format!("invalid s3 endpoint '{endpoint}': {e}")))?;
        }
        if self.access_key.is_some() != self.secret_key.is_some() {
            return Err(Error::Config(
                "access_key and secret_key must be given together".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".into()));
        }
        check_chunk_size(self.chunk_size)
    }
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &redacted(&self.secret_key))
            .field("profile", &self.profile)
            .field("force_path_style", &self.force_path_style)
            .field("chunk_size", &self.chunk_size)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

fn redacted(secret: &Option<String>) -> Option<&'static str> {
    secret.as_ref().map(|_| REDACTED)
}

/// How an SFTP session authenticates
///
/// Passwords and passphrases are never serialized and are redacted from
/// `Debug` output.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum SftpAuth {
    /// Private key file, optionally encrypted
    Key {
        key_file: PathBuf,
        #[serde(default, skip_serializing)]
        passphrase: Option<String>,
    },
    Password {
        #[serde(skip_serializing)]
        password: String,
    },
    /// Keys offered by a running ssh-agent
    #[default]
    Agent,
}

impl fmt::Debug for SftpAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key {
                key_file,
                passphrase,
            } => f
                .debug_struct("Key")
                .field("key_file", key_file)
                .field("passphrase", &redacted(passphrase))
                .finish(),
            Self::Password { .. } => f
                .debug_struct("Password")
                .field("password", &REDACTED)
                .finish(),
            Self::Agent => f.write_str("Agent"),
        }
    }
}

/// SFTP server parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SftpConfig {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub username: String,

    #[serde(default)]
    pub auth: SftpAuth,

    /// OpenSSH known_hosts file; `~/.ssh/known_hosts` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_hosts: Option<PathBuf>,

    /// Remote directory every path is resolved under
    #[serde(default = "default_sftp_root")]
    pub root: String,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Session timeout applied to every blocking libssh2 call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl SftpConfig {
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            username: username.into(),
            auth: SftpAuth::default(),
            known_hosts: None,
            root: default_sftp_root(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("sftp host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(Error::Config("sftp port must not be zero".into()));
        }
        if self.username.is_empty() {
            return Err(Error::Config("sftp username must not be empty".into()));
        }
        if !self.root.starts_with('/') {
            return Err(Error::Config(format!(
                "sftp root '{}' must be an absolute path",
                self.root
            )));
        }
        check_chunk_size(self.chunk_size)
    }

    /// known_hosts file to verify the server key against
    pub fn known_hosts_path(&self) -> Option<PathBuf> {
        self.known_hosts
            .clone()
            .or_else(|| dirs::home_dir().map(|h| h.join(".ssh").join("known_hosts")))
    }
}

/// Parameters for any backend, tagged by `type`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    Local(LocalConfig),
    S3(S3Config),
    Sftp(SftpConfig),
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::Local(_) => BackendKind::Local,
            BackendConfig::S3(_) => BackendKind::S3,
            BackendConfig::Sftp(_) => BackendKind::Sftp,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            BackendConfig::Local(c) => c.validate(),
            BackendConfig::S3(c) => c.validate(),
            BackendConfig::Sftp(c) => c.validate(),
        }
    }
}

/// Contents of the profiles file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profiles {
    /// Profile used when none is named
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    #[serde(default)]
    pub profiles: BTreeMap<String, BackendConfig>,
}

impl Profiles {
    /// Parse and validate a profiles document
    pub fn parse(content: &str) -> Result<Self> {
        let profiles: Profiles = toml::from_str(content)
            .map_err(|e| Error::Config(format!("invalid profiles file: {e}")))?;

        if let Some(default) = &profiles.default
            && !profiles.profiles.contains_key(default)
        {
            return Err(Error::Config(format!(
                "default profile '{default}' is not defined"
            )));
        }
        for (name, backend) in &profiles.profiles {
            backend
                .validate()
                .map_err(|e| Error::Config(format!("profile '{name}': {e}")))?;
        }
        Ok(profiles)
    }

    /// Name of the profile to use when the caller names none
    pub fn default_name(&self) -> Option<&str> {
        match &self.default {
            Some(name) => Some(name.as_str()),
            None if self.profiles.len() == 1 => self.profiles.keys().next().map(String::as_str),
            None => None,
        }
    }

    /// Look up `name`, or the default profile when `name` is `None`
    pub fn get(&self, name: Option<&str>) -> Result<(&str, &BackendConfig)> {
        let name = match name {
            Some(name) => name,
            None => self.default_name().ok_or_else(|| {
                Error::Config("no profile given and no default profile configured".into())
            })?,
        };
        self.profiles
            .get_key_value(name)
            .map(|(k, v)| (k.as_str(), v))
            .ok_or_else(|| Error::Config(format!("profile '{name}' does not exist")))
    }
}

/// Locates and loads the profiles file
#[derive(Debug, Clone)]
pub struct ProfileManager {
    path: PathBuf,
}

impl ProfileManager {
    /// Use `$STOW_CONFIG_DIR/profiles.toml`, or the platform config directory
    pub fn new() -> Result<Self> {
        let dir = match std::env::var_os(CONFIG_DIR_ENV) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::config_dir()
                .ok_or_else(|| Error::Config("cannot determine config directory".into()))?
                .join("stowage"),
        };
        Ok(Self::with_path(dir.join(PROFILES_FILE)))
    }

    /// Use an explicit profiles file
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the profiles; a missing file yields no profiles
    pub fn load(&self) -> Result<Profiles> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Profiles::parse(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no profiles file");
                Ok(Profiles::default())
            }
            Err(e) => Err(Error::Config(format!(
                "cannot read {}: {e}",
                self.path.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
default = "archive"

[profiles.archive]
type = "s3"
bucket = "company-archive"
prefix = "nightly"
region = "eu-west-1"
endpoint = "http://localhost:9000"
access_key = "ak"
secret_key = "sk"
force_path_style = true

[profiles.scratch]
type = "local"
root = "/var/tmp/scratch"
chunk_size = 1024

[profiles.partner]
type = "sftp"
host = "sftp.partner.example"
port = 2222
username = "upload"
root = "/incoming"
auth = { method = "key", key_file = "/home/me/.ssh/id_ed25519" }
"#;

    #[test]
    fn test_parse_profiles() {
        let profiles = Profiles::parse(SAMPLE).unwrap();
        assert_eq!(profiles.profiles.len(), 3);

        let (name, backend) = profiles.get(None).unwrap();
        assert_eq!(name, "archive");
        let BackendConfig::S3(s3) = backend else {
            panic!("expected s3 profile");
        };
        assert_eq!(s3.prefix, "nightly");
        assert_eq!(s3.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(s3.max_attempts, 3);
        assert!(s3.force_path_style);

        let (_, backend) = profiles.get(Some("partner")).unwrap();
        let BackendConfig::Sftp(sftp) = backend else {
            panic!("expected sftp profile");
        };
        assert_eq!(sftp.port, 2222);
        assert_eq!(sftp.timeout_secs, 30);
        assert_eq!(
            sftp.auth,
            SftpAuth::Key {
                key_file: PathBuf::from("/home/me/.ssh/id_ed25519"),
                passphrase: None
            }
        );

        let (_, backend) = profiles.get(Some("scratch")).unwrap();
        assert_eq!(backend.kind(), BackendKind::Local);
    }

    #[test]
    fn test_sftp_defaults() {
        let profiles = Profiles::parse(
            r#"
[profiles.only]
type = "sftp"
host = "h"
username = "u"
"#,
        )
        .unwrap();
        let (name, backend) = profiles.get(None).unwrap();
        assert_eq!(name, "only");
        let BackendConfig::Sftp(sftp) = backend else {
            panic!("expected sftp profile");
        };
        assert_eq!(sftp.port, 22);
        assert_eq!(sftp.root, "/");
        assert_eq!(sftp.auth, SftpAuth::Agent);
    }

    #[test]
    fn test_missing_profile_and_default() {
        let profiles = Profiles::parse(SAMPLE).unwrap();
        assert!(matches!(profiles.get(Some("nope")), Err(Error::Config(_))));

        let err = Profiles::parse("default = \"ghost\"\n").unwrap_err();
        assert!(err.to_string().contains("ghost"));

        let two = Profiles::parse(
            r#"
[profiles.a]
type = "local"
root = "/a"

[profiles.b]
type = "local"
root = "/b"
"#,
        )
        .unwrap();
        assert!(two.get(None).is_err());
    }

    #[test]
    fn test_invalid_profiles_rejected() {
        let err = Profiles::parse(
            r#"
[profiles.bad]
type = "s3"
bucket = "b"
endpoint = "not a url"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("bad"));

        let err = Profiles::parse(
            r#"
[profiles.half]
type = "s3"
bucket = "b"
access_key = "only-half"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        assert!(Profiles::parse("[profiles.x]\ntype = \"ftp\"\n").is_err());
    }

    #[test]
    fn test_sftp_root_must_be_absolute() {
        let mut config = SftpConfig::new("h", "u");
        config.root = "relative".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_manager_loads_file_or_nothing() {
        let dir = TempDir::new().unwrap();
        let manager = ProfileManager::with_path(dir.path().join("profiles.toml"));
        assert!(manager.load().unwrap().profiles.is_empty());

        std::fs::write(manager.path(), SAMPLE).unwrap();
        let profiles = manager.load().unwrap();
        assert_eq!(profiles.default_name(), Some("archive"));
    }

    #[test]
    fn test_secrets_stay_out_of_debug_and_serialized_output() {
        let mut s3 = S3Config::new("vault");
        s3.access_key = Some("AKIAPUBLIC".into());
        s3.secret_key = Some("s3-hidden-value".into());
        let debug = format!("{s3:?}");
        assert!(debug.contains("AKIAPUBLIC"));
        assert!(debug.contains("[redacted]"));
        assert!(!debug.contains("s3-hidden-value"));
        assert!(!toml::to_string(&s3).unwrap().contains("s3-hidden-value"));

        let mut sftp = SftpConfig::new("files.example", "deploy");
        sftp.auth = SftpAuth::Password {
            password: "sftp-hidden-value".into(),
        };
        assert!(!format!("{sftp:?}").contains("sftp-hidden-value"));
        assert!(!toml::to_string(&sftp).unwrap().contains("sftp-hidden-value"));

        let auth = SftpAuth::Key {
            key_file: "/home/me/.ssh/id_ed25519".into(),
            passphrase: Some("key-hidden-value".into()),
        };
        let debug = format!("{auth:?}");
        assert!(debug.contains("id_ed25519"));
        assert!(!debug.contains("key-hidden-value"));
        assert!(!toml::to_string(&BackendConfig::Sftp({
            let mut config = SftpConfig::new("h", "u");
            config.auth = auth;
            config
        }))
        .unwrap()
        .contains("key-hidden-value"));
    }

    #[test]
    fn test_unset_secret_debug_shows_none() {
        let s3 = S3Config::new("vault");
        assert!(format!("{s3:?}").contains("secret_key: None"));
    }
}
