use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;

/// How diagnostic logs render. `pretty`, `full` and `compact` are intended
/// for human consumption; `json` is machine readable.
#[derive(Debug, Clone, Copy, ValueEnum)]
#[clap(rename_all = "kebab_case")]
pub enum DiagnosticFormat {
    Pretty,
    Full,
    Compact,
    Json,
}

/// SMS gateway webhook proxy.
///
/// Mediates between a loopback-only SMS gateway and a dynamic set of
/// remote subscribers, routing per-sender by ring.
#[derive(Debug, Parser)]
#[command(about, version)]
pub struct Opt {
    /// Admin API bind port, on 0.0.0.0.
    #[arg(long)]
    pub port: u16,

    /// The single IP address the Admin API boundary filter trusts.
    /// Any request whose connection's local address does not equal this
    /// value is rejected with 403.
    #[arg(long)]
    pub private_ip: IpAddr,

    /// Gateway basic-auth password. If omitted, read from
    /// --password-file-path.
    #[arg(long)]
    pub password: Option<String>,

    /// File to read the gateway basic-auth password from, if --password
    /// was not given.
    #[arg(long)]
    pub password_file_path: Option<PathBuf>,

    /// Base URL of the upstream gateway.
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    pub gateway_url: String,

    /// Path to the durable allowlist database file.
    #[arg(long, default_value = "/var/spool/sms-gateway-proxy/allowlist.db")]
    pub allowlist_db: PathBuf,

    /// Directory where diagnostic log files will be placed. If omitted,
    /// diagnostics are printed to stderr.
    #[arg(long)]
    pub diag_log_dir: Option<PathBuf>,

    /// How diagnostic logs render.
    #[arg(long, default_value = "full")]
    pub diag_format: DiagnosticFormat,

    /// Instead of running the daemon, print the Admin API's OpenAPI
    /// document to stdout and exit.
    #[arg(long)]
    pub dump_openapi_spec: bool,
}

/// Fully resolved configuration, after optional file reads. Every
/// component receives the values it needs by value, per the "single
/// struct populated at startup" pattern.
#[derive(Debug, Clone)]
pub struct Config {
    pub admin_port: u16,
    pub private_ip: IpAddr,
    pub gateway_url: String,
    pub gateway_password: String,
    pub allowlist_db: PathBuf,
}

const GATEWAY_AUTH_USER: &str = "sms";

impl Config {
    pub fn resolve(opt: &Opt) -> anyhow::Result<Self> {
        let gateway_password = match &opt.password {
            Some(p) => p.clone(),
            None => {
                let path = opt.password_file_path.as_ref().context(
                    "one of --password or --password-file-path is required",
                )?;
                std::fs::read_to_string(path)
                    .with_context(|| format!("reading password file {}", path.display()))?
                    .trim_end()
                    .to_string()
            }
        };

        Ok(Self {
            admin_port: opt.port,
            private_ip: opt.private_ip,
            gateway_url: opt.gateway_url.clone(),
            gateway_password,
            allowlist_db: opt.allowlist_db.clone(),
        })
    }

    pub fn gateway_auth_user(&self) -> &'static str {
        GATEWAY_AUTH_USER
    }
}
