use crate::config::{Config, app_name, version};
use crate::capture::GenericScreenCapture;
use crate::settings::KEYS;
use crate::utils::SystemInfo;
use crate::workers::{Caster, Receiver};
use anyhow::{Context, anyhow};
use clap::{Arg, ArgMatches, Command, value_parser};
use log::{info, warn};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::{panic, process};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

pub mod assets;
pub mod capture;
pub mod config;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod pipeline;
pub mod settings;
pub mod utils;
pub mod workers;

fn cli() -> Command {
    Command::new(app_name())
        .version(version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("settings")
                .long("settings")
                .value_name("PATH")
                .help("Settings file to use instead of the per-user one.")
                .value_parser(value_parser!(PathBuf))
                .global(true),
        )
        .subcommand(
            Command::new("start")
                .about("Mirror the screen until Ctrl-C (default).")
                .arg(
                    Arg::new("consent")
                        .long("consent")
                        .value_name("MODE")
                        .help("How screen capture consent is given (auto/deny/prompt).")
                        .default_value("auto"),
                )
                .arg(
                    Arg::new("display")
                        .long("display")
                        .value_name("WxH[@HZ]")
                        .help("Size and refresh rate of the captured display."),
                )
                .arg(
                    Arg::new("bind")
                        .long("bind")
                        .value_name("ADDR")
                        .help("Address the stream listener binds to."),
                )
                .arg(
                    Arg::new("timeout")
                        .long("timeout")
                        .value_name("SECS")
                        .help("Give up if the session is not up after this long.")
                        .value_parser(value_parser!(u64)),
                ),
        )
        .subcommand(
            Command::new("settings")
                .about("Show or change the mirroring settings.")
                .subcommand_required(true)
                .subcommand(Command::new("show").about("Print the stored settings."))
                .subcommand(
                    Command::new("set")
                        .about("Change one setting.")
                        .arg(Arg::new("key").required(true).value_parser(KEYS))
                        .arg(Arg::new("value").required(true)),
                ),
        )
        .subcommand(
            Command::new("info")
                .about("Print device information.")
                .arg(
                    Arg::new("display")
                        .long("display")
                        .value_name("WxH[@HZ]")
                        .help("Size and refresh rate of the captured display."),
                ),
        )
        .subcommand(
            Command::new("receive")
                .about("Connect to a caster and decode its stream.")
                .arg(
                    Arg::new("addr")
                        .required(true)
                        .value_name("ADDR:PORT")
                        .value_parser(value_parser!(SocketAddr)),
                )
                .arg(
                    Arg::new("units")
                        .short('n')
                        .long("units")
                        .value_name("N")
                        .help("Stop after this many units.")
                        .value_parser(value_parser!(u64)),
                ),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let matches = cli().get_matches();

    // kill the main thread as soon as a secondary thread panics
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        // invoke the default handler and exit the process
        orig_hook(panic_info);
        process::exit(105);
    }));

    // first Ctrl-C stops the session cleanly, a second one exits right away
    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    ctrlc::set_handler(move || {
        if on_signal.is_cancelled() {
            process::exit(130);
        }
        on_signal.cancel();
    })
    .context("Error setting Ctrl-C handler")?;

    match matches.subcommand() {
        Some(("settings", sub)) => settings_command(&matches, sub).await,
        Some(("info", sub)) => {
            let conf = Config::from_matches(&matches, Some(sub))?;
            println!("{}", SystemInfo::collect(&conf.display));
            Ok(())
        }
        Some(("receive", sub)) => receive(sub, shutdown).await,
        Some(("start", sub)) => mirror(Config::from_matches(&matches, Some(sub))?, shutdown).await,
        _ => mirror(Config::from_matches(&matches, None)?, shutdown).await,
    }
}

async fn mirror(conf: Config, shutdown: CancellationToken) -> anyhow::Result<()> {
    let settings = Arc::new(conf.open_settings().await?);
    let capture = Arc::new(GenericScreenCapture::new(
        conf.display.clone(),
        conf.consent.consent(),
    ));
    let caster = Caster::new(capture, settings, conf.session_options());

    caster
        .start_mirroring()
        .await
        .context("could not start mirroring")?;
    let home = caster.home_state().await;
    info!(
        "Mirroring {} on {}:{}, press Ctrl-C to stop",
        conf.display, home.device_ip, home.current_port
    );

    let mut status = caster.subscribe();
    tokio::select! {
        _ = shutdown.cancelled() => info!("Stopping mirroring"),
        _ = status.wait_for(|s| s.phase.is_idle()) => warn!("Mirroring ended on its own"),
    }

    caster.stop_mirroring().await?;
    let failure = caster.controller().status().last_failure;
    match failure {
        Some(e) => Err(anyhow!(e).context("mirroring stopped unexpectedly")),
        None => Ok(()),
    }
}

async fn settings_command(global: &ArgMatches, sub: &ArgMatches) -> anyhow::Result<()> {
    let conf = Config::from_matches(global, Some(sub))?;
    let store = conf.open_settings().await?;

    match sub.subcommand() {
        Some(("set", args)) => {
            let (Some(key), Some(value)) = (
                args.get_one::<String>("key"),
                args.get_one::<String>("value"),
            ) else {
                return Err(anyhow!("settings set needs a key and a value"));
            };
            store
                .set(key, value)
                .await
                .with_context(|| format!("could not set {}", key))?;
            println!("{}", store.load_settings().await);
        }
        _ => {
            if let Some(path) = store.path() {
                println!("# {}", path.display());
            }
            println!("{}", store.load_settings().await);
        }
    }
    Ok(())
}

async fn receive(args: &ArgMatches, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = args
        .get_one::<SocketAddr>("addr")
        .copied()
        .ok_or_else(|| anyhow!("missing caster address"))?;
    let units = args.get_one::<u64>("units").copied();

    let receiver = Receiver::connect(addr)
        .await
        .with_context(|| format!("could not receive from {}", addr))?;
    let stats = receiver.run(units, shutdown).await?;
    println!("{}", stats);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConsentMode;
    use std::time::Duration;

    #[test]
    fn test_cli_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn test_start_flags_reach_config() {
        let matches = cli()
            .try_get_matches_from([
                "mirrorcast",
                "--settings",
                "/tmp/mirror.json",
                "start",
                "--consent",
                "deny",
                "--display",
                "1280x720@30",
                "--bind",
                "127.0.0.1",
                "--timeout",
                "3",
            ])
            .unwrap();
        let (_, sub) = matches.subcommand().unwrap();
        let conf = Config::from_matches(&matches, Some(sub)).unwrap();

        assert_eq!(conf.settings_path, Some(PathBuf::from("/tmp/mirror.json")));
        assert_eq!(conf.consent, ConsentMode::Deny);
        assert_eq!(conf.display.refresh_hz, 30);
        assert_eq!(conf.bind_addr.to_string(), "127.0.0.1");
        assert_eq!(conf.start_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_settings_keys_are_checked() {
        assert!(
            cli()
                .try_get_matches_from(["mirrorcast", "settings", "set", "fps", "30"])
                .is_ok()
        );
        assert!(
            cli()
                .try_get_matches_from(["mirrorcast", "settings", "set", "volume", "3"])
                .is_err()
        );
    }
}
