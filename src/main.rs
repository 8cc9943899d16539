//! Holocron 守护进程入口

use anyhow::{anyhow, Result};
use std::sync::Arc;

use holocron_lib::config::{ConfigManager, ConfigStore};
use holocron_lib::geo::HttpGeoSource;
use holocron_lib::ipc;
use holocron_lib::models::{AppSettings, EndpointConfig};
use holocron_lib::native::NativeChannelClient;
use holocron_lib::orchestrator::Orchestrator;
use holocron_lib::system::SystemProxy;

const USAGE: &str = "Usage: holocron [run|pac|refresh-geo [--force]|import <uri>]";

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("run");

    match command {
        "run" => run().await,
        "pac" => {
            let (orchestrator, _) = build_orchestrator()?;
            println!("{}", orchestrator.pac_script()?);
            Ok(())
        }
        "refresh-geo" => {
            let force = args.iter().skip(2).any(|a| a == "--force");
            let (orchestrator, _) = build_orchestrator()?;
            for report in orchestrator.refresh_geo(force).await? {
                match (&report.error, report.entries) {
                    (Some(error), _) => println!("{}: failed ({})", report.kind, error),
                    (None, Some(entries)) => println!("{}: updated, {} entries", report.kind, entries),
                    (None, None) => println!("{}: up to date", report.kind),
                }
            }
            Ok(())
        }
        "import" => {
            let uri = args.get(2).ok_or_else(|| anyhow!("{}", USAGE))?;
            let endpoint = EndpointConfig::from_uri(uri)?;
            let manager = ConfigManager::new()?;
            println!("Imported endpoint '{}' ({})", endpoint.name, endpoint.id);
            manager.add_endpoint(endpoint)?;
            Ok(())
        }
        _ => {
            println!("{}", USAGE);
            Ok(())
        }
    }
}

fn build_orchestrator() -> Result<(Arc<Orchestrator>, AppSettings)> {
    let manager = Arc::new(ConfigManager::new()?);
    let settings = manager.load_settings()?;
    log::info!("Using native host at {}", settings.helper_path);

    let orchestrator = Orchestrator::new(
        manager,
        Arc::new(NativeChannelClient::new(settings.helper_path.clone())),
        Arc::new(SystemProxy),
        Arc::new(HttpGeoSource::new()?),
    );
    Ok((orchestrator, settings))
}

async fn run() -> Result<()> {
    let (orchestrator, settings) = build_orchestrator()?;
    let control_port = settings.control_port;

    let server = orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = ipc::start_control_server(server, control_port).await {
            log::error!("Control API failed: {}", e);
        }
    });

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for shutdown signal: {}", e);
        }
        log::info!("Shutdown requested");
    };
    orchestrator.clone().run(shutdown).await?;

    // 退出前还原被接管的系统代理，未接管时不动用户设置
    if orchestrator.release_proxy_if_managed() {
        log::info!("System proxy restored on exit");
    }
    Ok(())
}
