use crate::assets::{MAX_REFRESH_HZ, START_TIMEOUT, WRITE_TIMEOUT};
use crate::capture::{CaptureConsent, ConsentGate, GenericDisplay, TerminalConsent};
use crate::pipeline::sender::SessionOptions;
use crate::settings::SettingsStore;
use anyhow::{Context, anyhow};
use clap::ArgMatches;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// How the capture consent prompt is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentMode {
    /// Consent is granted without asking.
    Auto,
    /// Consent is always refused.
    Deny,
    /// Ask on the controlling terminal.
    Prompt,
}

impl ConsentMode {
    pub fn consent(&self) -> Arc<dyn CaptureConsent> {
        match self {
            ConsentMode::Auto => Arc::new(ConsentGate::granted()),
            ConsentMode::Deny => Arc::new(ConsentGate::denied()),
            ConsentMode::Prompt => Arc::new(TerminalConsent),
        }
    }
}

impl FromStr for ConsentMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" | "grant" => Ok(ConsentMode::Auto),
            "deny" => Ok(ConsentMode::Deny),
            "prompt" | "ask" => Ok(ConsentMode::Prompt),
            other => Err(anyhow!("unknown consent mode {:?}", other)),
        }
    }
}

pub struct Config {
    pub settings_path: Option<PathBuf>,
    pub display: GenericDisplay,
    pub consent: ConsentMode,
    pub bind_addr: IpAddr,
    pub start_timeout: Duration,
    pub write_timeout: Duration,
}

impl Config {
    pub fn new() -> Self {
        Config {
            settings_path: None,
            display: GenericDisplay::default(),
            consent: ConsentMode::Auto,
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            start_timeout: START_TIMEOUT,
            write_timeout: WRITE_TIMEOUT,
        }
    }

    /// Overlay command line flags onto the defaults.
    ///
    /// Only flags present on the matched (sub)command are read.
    pub fn from_matches(global: &ArgMatches, command: Option<&ArgMatches>) -> anyhow::Result<Self> {
        let mut conf = Config::new();
        // global flag: may sit before or after the subcommand
        conf.settings_path = command
            .and_then(|m| m.try_get_one::<PathBuf>("settings").ok().flatten())
            .or_else(|| global.try_get_one::<PathBuf>("settings").ok().flatten())
            .cloned();

        let Some(matches) = command else {
            return Ok(conf);
        };

        if let Some(Some(mode)) = matches.try_get_one::<String>("consent").ok() {
            conf.consent = mode.parse()?;
        }
        if let Some(Some(display)) = matches.try_get_one::<String>("display").ok() {
            conf.display = parse_display(display)?;
        }
        if let Some(Some(bind)) = matches.try_get_one::<String>("bind").ok() {
            conf.bind_addr = bind
                .parse()
                .with_context(|| format!("invalid bind address {:?}", bind))?;
        }
        if let Some(Some(secs)) = matches.try_get_one::<u64>("timeout").ok() {
            conf.start_timeout = Duration::from_secs((*secs).max(1));
        }

        Ok(conf)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            bind_addr: self.bind_addr,
            start_timeout: self.start_timeout,
            write_timeout: self.write_timeout,
        }
    }

    /// The settings file given on the command line, or the per-user one.
    pub async fn open_settings(&self) -> anyhow::Result<SettingsStore> {
        let store = match &self.settings_path {
            Some(path) => SettingsStore::open(path).await,
            None => SettingsStore::open_default().await,
        };
        store.context("could not open mirroring settings")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses `WIDTHxHEIGHT[@HZ]`.
fn parse_display(spec: &str) -> anyhow::Result<GenericDisplay> {
    let (size, refresh) = match spec.split_once('@') {
        Some((size, hz)) => (size, hz.trim().parse::<u32>().context("invalid refresh rate")?),
        None => (spec, 60),
    };
    if !(1..=MAX_REFRESH_HZ).contains(&refresh) {
        return Err(anyhow!(
            "refresh rate must be between 1 and {}Hz, got {}",
            MAX_REFRESH_HZ,
            refresh
        ));
    }
    let (w, h) = size
        .to_ascii_lowercase()
        .split_once('x')
        .map(|(w, h)| (w.trim().to_string(), h.trim().to_string()))
        .ok_or_else(|| anyhow!("display must look like 1920x1080@60, got {:?}", spec))?;

    Ok(GenericDisplay::new(
        "Virtual Display",
        w.parse().context("invalid display width")?,
        h.parse().context("invalid display height")?,
        refresh,
    ))
}

/// Returns a version as specified in Cargo.toml
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::DisplayInfo;

    #[test]
    fn test_parse_display() {
        let display = parse_display("1280x720@30").unwrap();
        assert_eq!(display.resolution(), (1280, 720));
        assert_eq!(display.refresh_hz, 30);

        let display = parse_display("2560X1440").unwrap();
        assert_eq!(display.resolution(), (2560, 1440));
        assert_eq!(display.refresh_hz, 60);

        assert!(parse_display("wide").is_err());
        assert!(parse_display("100x@60").is_err());
        assert!(parse_display("1920x1080@0").is_err());
        assert!(parse_display("1920x1080@2000000").is_err());
    }

    #[test]
    fn test_consent_mode() {
        assert_eq!("AUTO".parse::<ConsentMode>().unwrap(), ConsentMode::Auto);
        assert_eq!("ask".parse::<ConsentMode>().unwrap(), ConsentMode::Prompt);
        assert!("maybe".parse::<ConsentMode>().is_err());
    }
}
