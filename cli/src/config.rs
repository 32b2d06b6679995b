use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context as _};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cli::Cli;

const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_PORT: u16 = 8443;

/// Settings read from `config.toml`. Every value can be overridden on the command line.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    pub table_name: Option<String>,
    pub index_name: Option<String>,
    pub ssl_cert: Option<PathBuf>,
    pub ssl_key: Option<PathBuf>,
    pub git_url: Option<String>,
    pub region: Option<String>,
    pub port: Option<u16>,
}

impl Config {
    /// Load `path`, or the default config file if it exists. No file at the default
    /// location is not an error.
    pub fn load_for(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => match Self::filepath() {
                Ok(path) if path.exists() => Self::load(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = toml::from_str(&text)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn filepath() -> anyhow::Result<PathBuf> {
        Ok(dirs::config_dir()
            .ok_or(anyhow!("Failed to locate appropriate config directory"))?
            .join("patproxy")
            .join("config.toml"))
    }
}

pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Fully resolved startup settings.
pub struct Settings {
    pub table_name: String,
    pub index_name: String,
    pub git_url: Url,
    pub region: String,
    pub port: u16,
    pub tls: Option<TlsFiles>,
}

impl Settings {
    pub fn resolve(config: Config, cli: &Cli) -> anyhow::Result<Self> {
        let table_name = cli
            .table_name
            .clone()
            .or(config.table_name)
            .ok_or(anyhow!("Missing PAT table name (--tablename)"))?;

        let git_url = cli
            .git_url
            .clone()
            .or(config.git_url)
            .ok_or(anyhow!("Missing Git URL (--giturl)"))?;
        let git_url = Url::parse(&git_url).with_context(|| format!("Invalid Git URL {git_url}"))?;

        let tls = match (
            cli.ssl_cert.clone().or(config.ssl_cert),
            cli.ssl_key.clone().or(config.ssl_key),
        ) {
            (Some(cert), Some(key)) => Some(TlsFiles { cert, key }),
            (None, None) => None,
            (Some(_), None) => return Err(anyhow!("Missing SSL key (--sslkey)")),
            (None, Some(_)) => return Err(anyhow!("Missing SSL cert (--sslcert)")),
        };

        Ok(Self {
            table_name,
            index_name: cli
                .index_name
                .clone()
                .or(config.index_name)
                .unwrap_or_else(|| pat_proxy::DEFAULT_REPO_INDEX.to_string()),
            git_url,
            region: cli
                .region
                .clone()
                .or(config.region)
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            port: cli.port.or(config.port).unwrap_or(DEFAULT_PORT),
            tls,
        })
    }
}
