//! The reverse proxy binary's library surface, exposed so integration
//! tests can build an [`routes::create_router`] against a mock upstream
//! without going through `main`.

pub mod config;
pub mod extractor;
pub mod mux;
pub mod proxy;
pub mod response;
pub mod routes;
pub mod security;

pub use proxy::AppState;
pub use routes::{create_router, RouteTable};

use clap::Parser;

/// Command-line flags, layered under the YAML config file via
/// [`config::ProxyConfig::load`].
#[derive(Debug, Parser)]
#[command(name = "labelproxy", about = "Multi-tenant label-enforcing reverse proxy")]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, env = "LABELPROXY_CONFIG", default_value = "labelproxy.yaml")]
    pub config: String,

    /// Overrides `upstream_url` from the config file.
    #[arg(long, env = "LABELPROXY_UPSTREAM_URL")]
    pub upstream_url: Option<String>,

    /// Overrides `label_name` from the config file.
    #[arg(long, env = "LABELPROXY_LABEL_NAME")]
    pub label_name: Option<String>,

    /// Address to listen on.
    #[arg(long, env = "LABELPROXY_LISTEN", default_value = "0.0.0.0")]
    pub listen: String,

    /// Port to listen on.
    #[arg(long, env = "LABELPROXY_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Allow a non-HTTPS or internal upstream URL (development only).
    #[arg(long, env = "LABELPROXY_INSECURE_UPSTREAM", default_value_t = false)]
    pub insecure_upstream: bool,

    /// Increase log verbosity (`-v` for debug, `-vv` for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
