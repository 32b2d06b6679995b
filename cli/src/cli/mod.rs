use std::path::PathBuf;

use clap::Parser;

use crate::config::{Config, Settings};

#[derive(Parser)]
#[clap(version, author, about = "Authenticating proxy for CodeCommit git over HTTPS", long_about = None)]
pub struct Cli {
    /// Name of the DynamoDB table holding personal access tokens
    #[clap(long = "tablename")]
    pub table_name: Option<String>,
    /// Secondary index on `repoID` [default: repoIDIndex]
    #[clap(long)]
    pub index_name: Option<String>,
    /// TLS certificate (PEM) served by the proxy
    #[clap(long = "sslcert")]
    pub ssl_cert: Option<PathBuf>,
    /// TLS private key (PEM) served by the proxy
    #[clap(long = "sslkey")]
    pub ssl_key: Option<PathBuf>,
    /// URL to forward to, e.g. https://git-codecommit.us-east-1.amazonaws.com/v1/repos/
    #[clap(long = "giturl")]
    pub git_url: Option<String>,
    /// AWS region of the CodeCommit endpoint [default: us-east-1]
    #[clap(long)]
    pub region: Option<String>,
    /// Port to listen on [default: 8443]
    #[clap(long)]
    pub port: Option<u16>,
    /// Read settings from this TOML file instead of the default location
    #[clap(long)]
    pub config: Option<PathBuf>,
    /// Enable trace logging
    #[clap(long)]
    pub trace: bool,
    /// Enable debug logging
    #[clap(long)]
    pub debug: bool,
}

pub fn exec() {
    let cli = Cli::parse();
    let mut builder = env_logger::Builder::from_default_env();

    if cli.trace {
        builder.filter_level(log::LevelFilter::Trace);
    } else if cli.debug {
        builder.filter_level(log::LevelFilter::Debug);
    } else {
        builder.filter_level(log::LevelFilter::Info);
    }

    builder.init();

    let config = match Config::load_for(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Failed to load config: {err:#}");
            std::process::exit(1);
        }
    };

    let settings = match Settings::resolve(config, &cli) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(1);
        }
    };

    tokio::runtime::Runtime::new()
        .expect("Failed to create runtime")
        .block_on(async {
            if let Err(err) = crate::server::serve(settings).await {
                log::error!("Proxy stopped: {err:#}");
                std::process::exit(1);
            }
        });
}
