use clap::Parser;

mod admin_types;
mod allowlist;
mod config;
mod conn_info;
mod dedup;
mod error;
mod fanout;
mod gateway;
mod http_admin;
mod http_ingress;
mod lifecycle;
mod logging;
mod model;
mod net;
mod reconciler;
mod registry;
mod supervisor;

use config::{Config, Opt};
use logging::LoggingConfig;

fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();

    if opt.dump_openapi_spec {
        println!("{}", http_admin::openapi_json()?);
        return Ok(());
    }

    LoggingConfig {
        log_dir: opt.diag_log_dir.clone(),
        diag_format: opt.diag_format,
    }
    .init()?;

    let config = Config::resolve(&opt)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(supervisor::run(config))
}
