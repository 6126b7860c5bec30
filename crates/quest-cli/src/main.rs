//! # quest
//!
//! Command-line client for beacon quest.
//!
//! ## Running
//!
//! ```bash
//! export QUEST_USERNAME=ana QUEST_PASSWORD=...
//! quest beacons
//! quest hunt walk.txt 2
//! quest discover https://quest.example.com/beacon/42
//! ```
//!
//! `--config <path>` (or `QUEST_CONFIG`) selects a TOML file; without one the
//! platform config directory is tried.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use quest_core::{
    default_config_path, ApiClient, BeaconDirectory, BeaconLocator, DiscoveryGate, Haptics,
    LogHaptics, ProximityState, QuestConfig, QuestError, ReplayLocationSource, ScanSession,
    SessionPhase,
};
use tracing::{info, warn};

mod logging;

const USAGE: &str = "\
usage: quest [--config <path>] <command>

commands:
  beacons                     list beacons
  beacon <id>                 show one beacon
  hunt <track> [interval]     run a proximity session over a file of
                              \"lat, lng\" fixes, one every <interval> seconds
  discover <qr-payload>       confirm a discovery from a scanned code
  discoveries                 list your discoveries
  whoami                      show the signed-in user
  init-config                 write the default configuration file

credentials are read from QUEST_USERNAME and QUEST_PASSWORD";

const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Beacons,
    Beacon(String),
    Hunt { track: PathBuf, interval: Duration },
    Discover(String),
    Discoveries,
    WhoAmI,
    InitConfig,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Invocation {
    config: Option<PathBuf>,
    command: Command,
}

impl Invocation {
    fn parse<I: IntoIterator<Item = String>>(args: I) -> anyhow::Result<Self> {
        let mut config = None;
        let mut rest = Vec::new();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    config = Some(PathBuf::from(args.next().context("--config needs a path")?));
                }
                "--help" | "-h" => rest.insert(0, "help".to_string()),
                _ => rest.push(arg),
            }
        }

        let mut words = rest.into_iter();
        let command = match words.next().as_deref() {
            None | Some("help") => Command::Help,
            Some("beacons") => Command::Beacons,
            Some("beacon") => Command::Beacon(words.next().context("beacon needs an id")?),
            Some("hunt") => {
                let track = PathBuf::from(words.next().context("hunt needs a track file")?);
                let interval = match words.next() {
                    Some(secs) => Duration::from_secs_f64(
                        secs.parse::<f64>()
                            .ok()
                            .filter(|s| s.is_finite() && *s > 0.0)
                            .with_context(|| format!("invalid interval '{secs}'"))?,
                    ),
                    None => DEFAULT_INTERVAL,
                };
                Command::Hunt { track, interval }
            }
            Some("discover") => {
                Command::Discover(words.next().context("discover needs a scanned code")?)
            }
            Some("discoveries") => Command::Discoveries,
            Some("whoami") => Command::WhoAmI,
            Some("init-config") => Command::InitConfig,
            Some(other) => bail!("unknown command '{other}'\n\n{USAGE}"),
        };

        if let Some(extra) = words.next() {
            bail!("unexpected argument '{extra}'");
        }
        Ok(Self { config, command })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let invocation = Invocation::parse(std::env::args().skip(1))?;
    logging::init(logging::is_production())?;

    run(invocation).await.map_err(|err| {
        warn!(error = %err, "command failed");
        anyhow::anyhow!(describe(&err))
    })
}

async fn run(invocation: Invocation) -> anyhow::Result<()> {
    let explicit = invocation
        .config
        .or_else(|| std::env::var_os("QUEST_CONFIG").map(PathBuf::from));
    let path = explicit.clone().or_else(default_config_path);

    if invocation.command == Command::InitConfig {
        let path = path.context("no configuration directory on this platform")?;
        QuestConfig::default().save(&path)?;
        println!("wrote {}", path.display());
        return Ok(());
    }

    let config = QuestConfig::load(path.as_deref(), explicit.is_some())?;

    match invocation.command {
        Command::Help | Command::InitConfig => println!("{USAGE}"),
        Command::Beacons => list_beacons(&signed_in(&config).await?).await?,
        Command::Beacon(id) => show_beacon(&signed_in(&config).await?, &id).await?,
        Command::Hunt { track, interval } => {
            hunt(&config, &signed_in(&config).await?, &track, interval).await?;
        }
        Command::Discover(payload) => {
            // Reject non-beacon codes before touching the network.
            let locator: BeaconLocator = payload.parse()?;
            confirm(&signed_in(&config).await?, &locator).await?;
        }
        Command::Discoveries => list_discoveries(&signed_in(&config).await?).await?,
        Command::WhoAmI => {
            let user = signed_in(&config).await?.current_user().await?;
            println!("{}", user.username);
            if let Some(email) = user.email {
                println!("  email:  {email}");
            }
            if let Some(points) = user.points {
                println!("  points: {points}");
            }
            if let Some(bio) = user.bio {
                println!("  bio:    {bio}");
            }
        }
    }
    Ok(())
}

/// Actionable text for a failed command.
fn describe(err: &anyhow::Error) -> String {
    err.downcast_ref::<QuestError>()
        .map_or_else(|| format!("{err:#}"), QuestError::user_message)
}

async fn signed_in(config: &QuestConfig) -> anyhow::Result<ApiClient> {
    let username = std::env::var("QUEST_USERNAME").context("QUEST_USERNAME is not set")?;
    let password = std::env::var("QUEST_PASSWORD").context("QUEST_PASSWORD is not set")?;
    let client = ApiClient::new(&config.api)?;
    client.sign_in(&username, &password).await?;
    Ok(client)
}

async fn list_beacons(client: &ApiClient) -> anyhow::Result<()> {
    let directory = BeaconDirectory::load(client).await?;
    for beacon in directory.beacons() {
        println!("{:>6}  {:<24} {}", beacon.id, beacon.name, beacon.coordinate);
    }
    if directory.skipped() > 0 {
        println!("({} unusable beacon records skipped)", directory.skipped());
    }
    Ok(())
}

async fn show_beacon(client: &ApiClient, id: &str) -> anyhow::Result<()> {
    let beacon = client.beacon(id).await?;
    println!("{} ({})", beacon.name, beacon.identifier().unwrap_or(id));
    println!("  location: {}", beacon.location);
    if let Some(by) = beacon.created_by {
        println!("  placed by: {by}");
    }
    if let Some(description) = beacon.description {
        println!("  {description}");
    }
    Ok(())
}

async fn confirm(client: &ApiClient, locator: &BeaconLocator) -> anyhow::Result<()> {
    let outcome = DiscoveryGate::new(client).confirm(locator.id()).await?;
    if outcome.already_discovered {
        println!("You already found beacon {}.", outcome.beacon_id);
    } else {
        println!(
            "Found beacon {}: +{} points",
            outcome.beacon_id, outcome.points_awarded
        );
    }
    if let Some(message) = outcome.message {
        println!("  {message}");
    }
    Ok(())
}

async fn list_discoveries(client: &ApiClient) -> anyhow::Result<()> {
    let records = client.my_discoveries().await?;
    if records.is_empty() {
        println!("No discoveries yet.");
    }
    for record in records {
        let when = record
            .discovered_at
            .map_or_else(String::new, |t| t.format("%Y-%m-%d %H:%M").to_string());
        println!(
            "{:>6}  {:<24} {:>4} pts  {when}",
            record.beacon_id,
            record.beacon_name.unwrap_or_default(),
            record.points_awarded
        );
    }
    Ok(())
}

#[cfg(feature = "bluetooth")]
async fn radio() -> anyhow::Result<quest_core::BluezScanner> {
    quest_core::BluezScanner::new()
        .await
        .map_err(|e| QuestError::from(e).into())
}

#[cfg(not(feature = "bluetooth"))]
async fn radio() -> anyhow::Result<quest_core::MockScanner> {
    Ok(quest_core::MockScanner::new())
}

async fn hunt(
    config: &QuestConfig,
    client: &ApiClient,
    track: &Path,
    interval: Duration,
) -> anyhow::Result<()> {
    let location = ReplayLocationSource::from_file(track, interval)?;
    if location.is_empty() {
        bail!("{} has no usable fixes", track.display());
    }
    info!(fixes = location.len(), track = %track.display(), "replaying track");

    let haptics: Arc<dyn Haptics> = Arc::new(LogHaptics);
    let mut session = ScanSession::start(config, client, radio().await?, location, haptics).await;
    let mut updates = session.subscribe();
    render(&updates.borrow_and_update());
    println!("Press Ctrl-C to stop.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            prompt = session.next_prompt() => match prompt {
                Some(near) => println!(
                    ">>> You are near {} ({:.0} m). Scan its code to claim it.",
                    near.beacon.name, near.distance_metres
                ),
                None => break,
            },
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = updates.borrow_and_update().clone();
                render(&state);
                if matches!(
                    state.phase,
                    SessionPhase::PermissionRequired | SessionPhase::Unavailable
                ) {
                    break;
                }
            }
        }
    }

    let last = session.end().await;
    info!(phase = ?last.phase, "hunt finished");
    Ok(())
}

fn render(state: &ProximityState) {
    println!("{}", status_line(state));
}

fn status_line(state: &ProximityState) -> String {
    let mut line = match state.phase {
        SessionPhase::Idle | SessionPhase::Initializing => "starting...".to_string(),
        SessionPhase::Terminated => "stopped".to_string(),
        SessionPhase::PermissionRequired | SessionPhase::Unavailable => state
            .error
            .clone()
            .unwrap_or_else(|| "proximity unavailable".to_string()),
        SessionPhase::Active => match &state.reading {
            Some(reading) => match (&reading.nearest, reading.distance_metres) {
                (Some(beacon), Some(d)) if reading.is_within_range => {
                    format!("{} is within range ({d:.0} m)", beacon.name)
                }
                (Some(beacon), Some(d)) => format!("nearest: {} at {d:.0} m", beacon.name),
                _ => "no beacons to hunt".to_string(),
            },
            None => format!("tracking {} beacons, waiting for a fix", state.beacon_count),
        },
    };
    if let Some(signal) = state.signal {
        line.push_str(&format!(
            " | signal {}% {}",
            signal.normalized_percent, signal.label
        ));
    } else if state.phase == SessionPhase::Active && !state.radio_available {
        line.push_str(" | no radio");
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use quest_core::{ProximityReading, SignalLabel, SignalReading};

    fn parse(args: &[&str]) -> anyhow::Result<Invocation> {
        Invocation::parse(args.iter().map(ToString::to_string))
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse(&[]).unwrap().command, Command::Help);
        assert_eq!(parse(&["beacons"]).unwrap().command, Command::Beacons);
        assert_eq!(
            parse(&["beacon", "7"]).unwrap().command,
            Command::Beacon("7".into())
        );
        assert_eq!(
            parse(&["discover", "beacon://7"]).unwrap().command,
            Command::Discover("beacon://7".into())
        );
    }

    #[test]
    fn test_parse_hunt_interval() {
        let inv = parse(&["--config", "q.toml", "hunt", "walk.txt", "0.5"]).unwrap();
        assert_eq!(inv.config, Some(PathBuf::from("q.toml")));
        assert_eq!(
            inv.command,
            Command::Hunt {
                track: PathBuf::from("walk.txt"),
                interval: Duration::from_millis(500),
            }
        );

        let inv = parse(&["hunt", "walk.txt"]).unwrap();
        assert!(matches!(inv.command, Command::Hunt { interval, .. } if interval == DEFAULT_INTERVAL));

        assert!(parse(&["hunt", "walk.txt", "-1"]).is_err());
        assert!(parse(&["hunt"]).is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_and_extra() {
        assert!(parse(&["dance"]).is_err());
        assert!(parse(&["beacons", "now"]).is_err());
        assert!(parse(&["--config"]).is_err());
    }

    #[test]
    fn test_describe_prefers_user_message() {
        let err = anyhow::Error::from(QuestError::NetworkFailure("connect refused".into()));
        assert!(describe(&err).starts_with("Could not reach the server"));

        let err = anyhow::anyhow!("QUEST_USERNAME is not set");
        assert_eq!(describe(&err), "QUEST_USERNAME is not set");
    }

    #[test]
    fn test_status_line() {
        let mut state = ProximityState {
            phase: SessionPhase::Active,
            beacon_count: 3,
            ..ProximityState::default()
        };
        assert_eq!(
            status_line(&state),
            "tracking 3 beacons, waiting for a fix | no radio"
        );

        state.radio_available = true;
        state.reading = Some(ProximityReading {
            nearest: None,
            distance_metres: None,
            is_within_range: false,
        });
        state.signal = Some(SignalReading {
            raw_strength: Some(-60),
            normalized_percent: 80,
            label: SignalLabel::Good,
        });
        assert_eq!(status_line(&state), "no beacons to hunt | signal 80% Good");

        state.phase = SessionPhase::PermissionRequired;
        state.error = Some("Location permission denied".into());
        assert!(status_line(&state).starts_with("Location permission denied"));
    }
}
