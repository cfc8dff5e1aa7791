use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use zbx_config::{Config, OverridableConfig};

use crate::setup;

/// The config folder used if none is passed on the command line.
const DEFAULT_CONFIG_PATH: &str = ".zbx-relay";

const ABOUT: &str = "Relays statsd counters and timers to a Zabbix trapper.";

/// Builds the command line interface.
pub fn make_app() -> Command {
    Command::new("zbx-relay")
        .about(ABOUT)
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .global(true)
                .value_name("CONFIG")
                .value_parser(value_parser!(PathBuf))
                .env("ZBX_RELAY_CONFIG")
                .help("The path to the config folder."),
        )
        .subcommand(
            Command::new("run")
                .about("Run the relay")
                .after_help("This runs the relay in the foreground until it's shut down.")
                .arg(
                    Arg::new("host")
                        .long("host")
                        .value_name("HOST")
                        .help("The address the relay listens on for datagrams."),
                )
                .arg(
                    Arg::new("port")
                        .short('p')
                        .long("port")
                        .value_name("PORT")
                        .help("The UDP port the relay listens on."),
                )
                .arg(
                    Arg::new("zabbix_host")
                        .long("zabbix-host")
                        .value_name("HOST")
                        .help("The host name of the Zabbix trapper."),
                )
                .arg(
                    Arg::new("zabbix_port")
                        .long("zabbix-port")
                        .value_name("PORT")
                        .help("The port of the Zabbix trapper."),
                )
                .arg(
                    Arg::new("flush_interval")
                        .short('f')
                        .long("flush-interval")
                        .value_name("MILLISECONDS")
                        .help("The interval between flushes to the trapper."),
                )
                .arg(
                    Arg::new("percentile_threshold")
                        .short('t')
                        .long("percentile-threshold")
                        .value_name("PERCENT")
                        .help("The percentile reported for timers."),
                )
                .arg(
                    Arg::new("debug")
                        .short('d')
                        .long("debug")
                        .action(ArgAction::SetTrue)
                        .help("Enable debug logging."),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Manage the relay config")
                .subcommand_required(true)
                .subcommand(Command::new("show").about("Show the entire config out for debugging")),
        )
}

/// Runs the command line application.
pub fn execute() -> Result<()> {
    let matches = make_app().get_matches();
    let config_path = matches
        .get_one::<PathBuf>("config")
        .map_or(Path::new(DEFAULT_CONFIG_PATH), PathBuf::as_path);

    let mut config = if Config::config_exists(config_path) {
        Config::from_path(config_path)?
    } else {
        Config::default()
    };

    if let Some(run_matches) = matches.subcommand_matches("run") {
        config.apply_override(extract_config_args(run_matches))?;
    }

    zbx_log::init(config.logging());

    match matches.subcommand() {
        Some(("run", _)) => run(config),
        Some(("config", config_matches)) => manage_config(&config, config_matches),
        _ => bail!("unknown subcommand"),
    }
}

/// Extracts the config overrides passed to the `run` command.
pub fn extract_config_args(matches: &ArgMatches) -> OverridableConfig {
    let arg = |name: &str| matches.get_one::<String>(name).cloned();

    OverridableConfig {
        host: arg("host"),
        port: arg("port"),
        zabbix_host: arg("zabbix_host"),
        zabbix_port: arg("zabbix_port"),
        flush_interval: arg("flush_interval"),
        percentile_threshold: arg("percentile_threshold"),
        log_level: matches.get_flag("debug").then(|| "debug".to_owned()),
        shutdown_timeout: None,
    }
}

pub fn manage_config(config: &Config, matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("show", _)) => show_config(config),
        _ => bail!("unknown config subcommand"),
    }
}

#[allow(clippy::print_stdout)]
pub fn show_config(config: &Config) -> Result<()> {
    print!("{}", config.to_yaml_string()?);
    Ok(())
}

pub fn run(config: Config) -> Result<()> {
    setup::dump_spawn_infos(&config);
    setup::init_metrics(&config)?;
    zbx_server::run(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_matches(args: &[&str]) -> ArgMatches {
        let matches = make_app()
            .try_get_matches_from(std::iter::once("zbx-relay").chain(args.iter().copied()))
            .unwrap();
        matches.subcommand_matches("run").unwrap().clone()
    }

    #[test]
    fn test_app() {
        make_app().debug_assert();
    }

    #[test]
    fn test_run_overrides() {
        let matches = run_matches(&[
            "run",
            "--host",
            "127.0.0.1",
            "-p",
            "9125",
            "--zabbix-host",
            "zabbix.local",
            "--zabbix-port",
            "10052",
            "-f",
            "5000",
            "-t",
            "95",
        ]);

        let overrides = extract_config_args(&matches);
        assert_eq!(overrides.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(overrides.port.as_deref(), Some("9125"));
        assert_eq!(overrides.zabbix_host.as_deref(), Some("zabbix.local"));
        assert_eq!(overrides.zabbix_port.as_deref(), Some("10052"));
        assert_eq!(overrides.flush_interval.as_deref(), Some("5000"));
        assert_eq!(overrides.percentile_threshold.as_deref(), Some("95"));
        assert_eq!(overrides.log_level, None);

        let mut config = Config::default();
        config.apply_override(overrides).unwrap();
        assert_eq!(config.listen_host(), "127.0.0.1");
        assert_eq!(config.listen_port(), 9125);
        assert_eq!(config.zabbix_host(), "zabbix.local");
        assert_eq!(config.zabbix_port(), 10052);
        assert_eq!(config.flush_interval().as_millis(), 5000);
        assert_eq!(config.percentile_threshold(), 95);
    }

    #[test]
    fn test_debug_flag() {
        let overrides = extract_config_args(&run_matches(&["run", "-d"]));
        assert_eq!(overrides.log_level.as_deref(), Some("debug"));
        assert_eq!(overrides.port, None);
    }

    #[test]
    fn test_invalid_override() {
        let overrides = extract_config_args(&run_matches(&["run", "-t", "101"]));
        assert!(Config::default().apply_override(overrides).is_err());
    }

    #[test]
    fn test_config_show() {
        let matches = make_app()
            .try_get_matches_from(["zbx-relay", "-c", "/etc/zbx-relay", "config", "show"])
            .unwrap();

        assert_eq!(
            matches.get_one::<PathBuf>("config"),
            Some(&PathBuf::from("/etc/zbx-relay"))
        );
        let (name, config_matches) = matches.subcommand().unwrap();
        assert_eq!(name, "config");
        assert_eq!(config_matches.subcommand_name(), Some("show"));
    }

    #[test]
    fn test_subcommand_required() {
        assert!(make_app().try_get_matches_from(["zbx-relay"]).is_err());
        assert!(
            make_app()
                .try_get_matches_from(["zbx-relay", "config"])
                .is_err()
        );
    }
}
