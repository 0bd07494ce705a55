use modkeeper::alert::{Alerter, EmailAlerter};
use modkeeper::commands::CommandChannel;
use modkeeper::config::ManagerConfig;
use modkeeper::controller::ServiceController;
use modkeeper::host::{HostControl, SystemctlHost};
use modkeeper::monitor::StatusMonitor;
use modkeeper::registry::ServiceRegistry;
use modkeeper::remote::{HttpRegistryApi, RegistryApi};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    tracing::info!("Module supervisor starting");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/modkeeper.toml".to_string());
    let cfg = ManagerConfig::load(Path::new(&config_path))?;
    tracing::info!("Loaded config from {}", config_path);

    let registry = Arc::new(ServiceRegistry::new());
    let host: Arc<dyn HostControl> = Arc::new(SystemctlHost::new(&cfg.host));
    let remote: Arc<dyn RegistryApi> = Arc::new(HttpRegistryApi::new(&cfg.registry)?);
    let alerter: Arc<dyn Alerter> = Arc::new(EmailAlerter::new(
        cfg.alerts.clone(),
        cfg.servername.clone(),
        host.clone(),
    ));

    // Initial module list, then rediscover services from units already on
    // the host. The first monitor tick resolves their real status.
    match remote.list_modules().await {
        Ok(modules) => {
            tracing::info!("Fetched {} modules from registry", modules.len());
            registry.replace_modules(modules).await;
        }
        Err(e) => tracing::warn!("Could not fetch initial module list: {}", e),
    }
    registry.load_existing_services(&cfg.host.unit_dir).await;

    let alerts_enabled = cfg.alerts.send_alert_after_service_failed;
    let controller = Arc::new(ServiceController::new(
        registry.clone(),
        host.clone(),
        remote.clone(),
        alerter.clone(),
        cfg.host.clone(),
        alerts_enabled,
    ));

    let monitor = StatusMonitor::new(
        registry.clone(),
        host.clone(),
        remote.clone(),
        alerter.clone(),
        Duration::from_secs(cfg.monitor.interval_secs),
        alerts_enabled,
    );
    tokio::spawn(monitor.run());

    let channel = CommandChannel::new(
        controller,
        registry.clone(),
        remote.clone(),
        cfg.mqtt.topic_prefix.clone(),
    );
    let mqtt_cfg = cfg.mqtt.clone();
    tokio::spawn(async move {
        channel.run(&mqtt_cfg).await;
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, exiting");
    Ok(())
}
