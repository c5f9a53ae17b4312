//! Layered configuration.
//!
//! Values are resolved in order: built-in defaults, an optional config file
//! (`mailroom.toml`, `mailroom.json`, ... in the working directory, or an explicit
//! path), then `MAILROOM_*` environment variables. A `.env` file is loaded first
//! when present.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::Error;

pub use config::ConfigError;

pub const ENV_PREFIX: &str = "MAILROOM";
const DEFAULT_FILE_STEM: &str = "mailroom";

pub trait EnvConfig: Sized {
    fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError>;
    /// Layer a config file (required when `path` is given) under prefixed
    /// environment variables.
    fn from_file_and_env(path: Option<&Path>, prefix: &str) -> Result<Self, ConfigError>;
}

impl<D> EnvConfig for D
where
    D: DeserializeOwned,
{
    fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError> {
        config::Config::builder()
            .add_source(config::Environment::with_prefix(prefix))
            .build()?
            .try_deserialize()
    }

    fn from_file_and_env(path: Option<&Path>, prefix: &str) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_FILE_STEM).required(false),
        };

        config::Config::builder()
            .add_source(file)
            .add_source(config::Environment::with_prefix(prefix))
            .build()?
            .try_deserialize()
    }
}

/// Settings for a dispatch run.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Folder scanned for invoice files.
    #[serde(default = "default_invoice_folder")]
    pub invoice_folder: PathBuf,

    /// Recipient directory, `.csv`/`.txt` or a spreadsheet.
    #[serde(default = "default_recipients_path")]
    pub recipients_path: PathBuf,

    /// Worksheet to read from a spreadsheet directory (default: first sheet).
    #[serde(default)]
    pub recipients_sheet: Option<String>,

    /// Regular expression extracting the invoice key from a file name.
    #[serde(default = "default_key_pattern")]
    pub key_pattern: String,

    #[serde(default = "default_true")]
    pub case_insensitive: bool,

    /// Application (client) id registered with the identity platform.
    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default = "default_tenant")]
    pub tenant: String,

    /// Space separated OAuth scopes.
    #[serde(default = "default_scopes")]
    pub scopes: String,

    #[serde(default = "default_token_cache")]
    pub token_cache: PathBuf,

    /// Session-wide sender, used instead of the signed-in account.
    #[serde(default)]
    pub sender_address: Option<String>,

    /// Subject line; `{key}` and `{file}` are substituted.
    #[serde(default = "default_subject_template")]
    pub subject_template: String,

    /// Plain text body; `{key}` and `{file}` are substituted.
    #[serde(default = "default_body_template")]
    pub body_template: String,

    #[serde(default = "default_graph_base_url")]
    pub graph_base_url: String,
}

impl AppConfig {
    /// Load `.env`, then the layered configuration.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        dotenvy::dotenv().ok();
        Ok(Self::from_file_and_env(path, ENV_PREFIX)?)
    }

    pub fn scope_list(&self) -> Vec<String> {
        self.scopes.split_whitespace().map(str::to_string).collect()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            invoice_folder: default_invoice_folder(),
            recipients_path: default_recipients_path(),
            recipients_sheet: None,
            key_pattern: default_key_pattern(),
            case_insensitive: true,
            client_id: None,
            tenant: default_tenant(),
            scopes: default_scopes(),
            token_cache: default_token_cache(),
            sender_address: None,
            subject_template: default_subject_template(),
            body_template: default_body_template(),
            graph_base_url: default_graph_base_url(),
        }
    }
}

fn default_invoice_folder() -> PathBuf {
    PathBuf::from("invoices")
}

fn default_recipients_path() -> PathBuf {
    PathBuf::from("recipients.csv")
}

fn default_key_pattern() -> String {
    r"INV\d+".to_string()
}

fn default_true() -> bool {
    true
}

fn default_tenant() -> String {
    "common".to_string()
}

fn default_scopes() -> String {
    "Mail.Send User.Read offline_access".to_string()
}

fn default_token_cache() -> PathBuf {
    PathBuf::from(".mailroom/token_cache.json")
}

fn default_subject_template() -> String {
    "Invoice {key}".to_string()
}

fn default_body_template() -> String {
    "Hello,\n\nPlease find attached invoice {key}.\n\nKind regards".to_string()
}

fn default_graph_base_url() -> String {
    "https://graph.microsoft.com/v1.0".to_string()
}
