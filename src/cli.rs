use std::path::PathBuf;

use clap::{ArgEnum, Parser};
use log::LevelFilter;
use thiserror::Error;

use crate::daemon::DaemonOptions;
use crate::scheduler::ScheduleOptions;

#[derive(ArgEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cleanup {
    /// Keep pulled images in the local image store
    None,
    /// Remove every successfully pulled image again, only the registry mirror stays warm
    RemoveImages,
    /// Run `docker system prune --all --force` after every pull cycle
    Prune,
}

#[derive(ArgEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line on stdout
    Json,
    /// Human readable lines on stderr
    Text,
}

#[derive(Parser, Debug)]
#[clap(version, author, about)]
pub struct Cli {
    /// The network mtu
    #[clap(long, env = "MTU", default_value = "1500")]
    pub mtu: u16,

    /// Enable debug logging from the docker daemon
    #[clap(long, env = "DEBUG")]
    pub debug: bool,

    /// An optional registry mirror address
    #[clap(long, env = "MIRROR")]
    pub registry_mirror: Option<String>,

    /// An optional health endpoint on the registry to wait for
    #[clap(long, env = "REGISTRY_HEALTH_ENDPOINT")]
    pub registry_health_endpoint: Option<String>,

    /// Path to the yaml file with a list of containers to preheat
    #[clap(
        long,
        env = "CONTAINER_LIST_FILE_PATH",
        default_value = "/configs/container-list.yaml",
        parse(from_os_str)
    )]
    pub container_list_file_path: PathBuf,

    /// What to clean up after every pull cycle
    #[clap(arg_enum, long, env = "CLEANUP", default_value = "none")]
    pub cleanup: Cleanup,

    /// Seconds between pull cycles, jittered by 25%
    #[clap(long, env = "INTERVAL_SECONDS", default_value = "900")]
    pub interval: u64,

    /// Seconds between registry health probes, jittered by 25%
    #[clap(long, env = "HEALTH_INTERVAL_SECONDS", default_value = "10")]
    pub health_interval: u64,

    /// Maximum number of images pulled at the same time, 0 pulls everything at once
    #[clap(long, env = "MAX_CONCURRENT_PULLS", default_value = "10")]
    pub max_concurrent_pulls: usize,

    /// Storage driver of the docker daemon
    #[clap(long, env = "STORAGE_DRIVER", default_value = "overlay2")]
    pub storage_driver: String,

    /// Docker daemon executable
    #[clap(long, env = "DOCKERD_BINARY", default_value = "dockerd", parse(from_os_str))]
    pub dockerd_binary: PathBuf,

    /// Docker client executable
    #[clap(long, env = "DOCKER_BINARY", default_value = "docker", parse(from_os_str))]
    pub docker_binary: PathBuf,

    /// Unix socket the docker daemon listens on
    #[clap(
        long,
        env = "DOCKER_SOCKET",
        default_value = "/var/run/docker.sock",
        parse(from_os_str)
    )]
    pub socket_path: PathBuf,

    /// Additional tcp address the docker daemon listens on, empty to disable
    #[clap(long, env = "DOCKER_TCP_HOST", default_value = "tcp://0.0.0.0:2375")]
    pub tcp_host: String,

    /// Log output format
    #[clap(arg_enum, long, env = "LOG_FORMAT", default_value = "json")]
    pub log_format: LogFormat,

    /// Maximum log level (off, error, warn, info, debug, trace)
    #[clap(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LevelFilter,
}

#[derive(Error, Debug, PartialEq)]
pub enum SettingsError {
    #[error("interval must be at least one second")]
    Interval,

    #[error("mtu `{0}` is outside of 68..=65535")]
    Mtu(u16),
}

#[derive(Debug)]
pub struct Settings {
    pub daemon: DaemonOptions,
    pub schedule: ScheduleOptions,
    pub docker_binary: PathBuf,
    pub registry_health_endpoint: Option<String>,
    pub health_interval: u64,
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(String::from)
}

impl Cli {
    pub fn settings(&self) -> Result<Settings, SettingsError> {
        if self.interval == 0 {
            return Err(SettingsError::Interval);
        }
        if self.mtu < 68 {
            return Err(SettingsError::Mtu(self.mtu));
        }

        Ok(Settings {
            daemon: DaemonOptions {
                binary: self.dockerd_binary.clone(),
                socket: self.socket_path.clone(),
                tcp_host: non_empty(Some(&self.tcp_host)),
                mtu: self.mtu,
                storage_driver: self.storage_driver.clone(),
                registry_mirror: non_empty(self.registry_mirror.as_deref()),
                debug: self.debug,
            },
            schedule: ScheduleOptions {
                container_list: self.container_list_file_path.clone(),
                interval: self.interval,
                max_concurrent_pulls: self.max_concurrent_pulls,
                cleanup: self.cleanup,
            },
            docker_binary: self.docker_binary.clone(),
            registry_health_endpoint: non_empty(self.registry_health_endpoint.as_deref()),
            health_interval: self.health_interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(&["preheat"]).unwrap();
        let settings = cli.settings().unwrap();

        assert_eq!(settings.daemon.mtu, 1500);
        assert_eq!(settings.daemon.socket, PathBuf::from("/var/run/docker.sock"));
        assert_eq!(settings.daemon.tcp_host.as_deref(), Some("tcp://0.0.0.0:2375"));
        assert!(!settings.daemon.debug);
        assert_eq!(
            settings.schedule.container_list,
            PathBuf::from("/configs/container-list.yaml")
        );
        assert_eq!(settings.schedule.interval, 900);
        assert_eq!(settings.schedule.cleanup, Cleanup::None);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(cli.log_level, LevelFilter::Info);
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from(&[
            "preheat",
            "--mtu",
            "1460",
            "--debug",
            "--registry-mirror",
            "https://mirror.example.com",
            "--cleanup",
            "remove-images",
            "--tcp-host",
            "",
            "--max-concurrent-pulls",
            "0",
            "--log-format",
            "text",
        ])
        .unwrap();
        let settings = cli.settings().unwrap();

        assert_eq!(settings.daemon.mtu, 1460);
        assert!(settings.daemon.debug);
        assert_eq!(
            settings.daemon.registry_mirror.as_deref(),
            Some("https://mirror.example.com")
        );
        assert_eq!(settings.daemon.tcp_host, None);
        assert_eq!(settings.schedule.cleanup, Cleanup::RemoveImages);
        assert_eq!(settings.schedule.max_concurrent_pulls, 0);
        assert_eq!(cli.log_format, LogFormat::Text);
    }

    #[test]
    fn test_invalid_settings() {
        let cli = Cli::try_parse_from(&["preheat", "--interval", "0"]).unwrap();
        assert_eq!(cli.settings().unwrap_err(), SettingsError::Interval);

        let cli = Cli::try_parse_from(&["preheat", "--mtu", "20"]).unwrap();
        assert_eq!(cli.settings().unwrap_err(), SettingsError::Mtu(20));

        assert!(Cli::try_parse_from(&["preheat", "--cleanup", "everything"]).is_err());
    }

    #[test]
    fn test_blank_mirror_ignored() {
        let cli = Cli::try_parse_from(&["preheat", "--registry-mirror", " "]).unwrap();
        assert_eq!(cli.settings().unwrap().daemon.registry_mirror, None);
    }
}
