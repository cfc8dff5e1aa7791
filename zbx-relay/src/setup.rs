use anyhow::Result;
use zbx_config::Config;
use zbx_statsd::MetricsClientConfig;

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config) {
    if config.path().as_os_str().is_empty() {
        zbx_log::info!("launching relay without config folder");
    } else {
        zbx_log::info!(
            "launching relay from config folder {}",
            config.path().display()
        );
    }
    zbx_log::info!(
        "  listen address: {}:{}",
        config.listen_host(),
        config.listen_port()
    );
    zbx_log::info!(
        "  trapper: {}:{}",
        config.zabbix_host(),
        config.zabbix_port()
    );
    zbx_log::info!("  flush interval: {}ms", config.flush_interval().as_millis());
    zbx_log::info!("  percentile threshold: {}", config.percentile_threshold());
    zbx_log::info!("  log level: {}", config.logging().level);
}

/// Initialize the metric system.
pub fn init_metrics(config: &Config) -> Result<()> {
    let addrs = config.statsd_addrs()?;
    if addrs.is_empty() {
        return Ok(());
    }

    zbx_statsd::init(MetricsClientConfig {
        prefix: config.metrics_prefix(),
        host: &addrs[..],
        default_tags: config.metrics_default_tags().clone(),
        sample_rate: config.metrics_sample_rate(),
    })?;

    Ok(())
}
