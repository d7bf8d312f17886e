use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Duration;

use crate::auth::Credential;
use crate::pipeline::{PreviewStatus, RunOutcome, RunReport};
use crate::session::{MoodSession, SessionEvent};

const HELP: &str = "commands: record [secs] | stop | quiet | volume <0..1> | status [--json] | \
signin <refresh-token> | signout | help | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Record(Option<Duration>),
    Stop,
    Quiet,
    Volume(f32),
    Status { json: bool },
    SignIn(String),
    SignOut,
    Help,
    Quit,
}

/// Parses one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let arg = words.next();
    if words.next().is_some() {
        bail!("too many arguments; {HELP}");
    }

    let command = match (verb.to_ascii_lowercase().as_str(), arg) {
        ("record", None) => Command::Record(None),
        ("record", Some(secs)) => {
            let secs: u64 = secs
                .parse()
                .map_err(|_| anyhow!("record takes a whole number of seconds"))?;
            if secs == 0 {
                bail!("record interval must be greater than zero");
            }
            Command::Record(Some(Duration::from_secs(secs)))
        }
        ("stop", None) => Command::Stop,
        ("quiet", None) => Command::Quiet,
        ("volume", Some(level)) => {
            let level: f32 = level
                .parse()
                .map_err(|_| anyhow!("volume takes a number between 0 and 1"))?;
            if !(0.0..=1.0).contains(&level) {
                bail!("volume takes a number between 0 and 1");
            }
            Command::Volume(level)
        }
        ("status", None) => Command::Status { json: false },
        ("status", Some("--json")) => Command::Status { json: true },
        ("signin", Some(token)) => Command::SignIn(token.to_string()),
        ("signout", None) => Command::SignOut,
        ("help", None) => Command::Help,
        ("quit" | "exit", None) => Command::Quit,
        _ => bail!("unrecognised command {line:?}; {HELP}"),
    };
    Ok(Some(command))
}

/// Reads commands from stdin and prints session events until `quit`, end of
/// input or Ctrl-C. Always tears the session down on the way out.
pub async fn serve(session: MoodSession) -> Result<()> {
    let mut events = session.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("{HELP}");
    println!("status: {}", session.current_status().await);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    info!("stdin closed");
                    break;
                };
                match parse_command(&line) {
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(command)) => execute(&session, command).await,
                    Ok(None) => {}
                    Err(err) => println!("{err}"),
                }
            }
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(missed)) => warn!("missed {missed} session events"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    session.shutdown().await;
    info!("moodplay stopped");
    Ok(())
}

async fn execute(session: &MoodSession, command: Command) {
    match command {
        Command::Record(interval) => {
            if let Err(err) = session.begin_recording(interval).await {
                println!("cannot record: {err}");
            }
        }
        Command::Stop => session.end_recording().await,
        Command::Quiet => session.stop_preview().await,
        Command::Volume(level) => session.set_volume(level),
        Command::Status { json: true } => match serde_json::to_string(&session.snapshot().await) {
            Ok(json) => println!("{json}"),
            Err(err) => warn!("failed to encode status: {err}"),
        },
        Command::Status { json: false } => {
            println!("status: {}", session.current_status().await);
            if let Some(playing) = session.now_playing().await {
                println!("playing: {}", playing.preview_url);
            }
            if let Some(report) = session.last_report().await {
                println!("last run: {}", describe_run(&report));
            }
        }
        Command::SignIn(refresh_token) => {
            // Expired on arrival, so the first use exchanges the refresh token.
            session
                .sign_in(Credential::new("", Utc::now(), refresh_token))
                .await;
        }
        Command::SignOut => session.sign_out().await,
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::StatusChanged(status) => println!("status: {status}"),
        SessionEvent::RunCompleted(report) => println!("run: {}", describe_run(report)),
    }
}

fn describe_run(report: &RunReport) -> String {
    let took = (report.finished_at - report.started_at).num_milliseconds();
    let what = match &report.outcome {
        RunOutcome::Resolved {
            recommendation,
            preview,
        } => {
            let name = recommendation
                .resolved_track
                .as_ref()
                .map_or(recommendation.suggestion_text.as_str(), |t| t.display_name.as_str());
            match preview {
                PreviewStatus::Playing => format!("now playing {name}"),
                PreviewStatus::Unavailable => format!("{name} (no preview available)"),
                PreviewStatus::Failed(reason) => format!("{name} (preview failed: {reason})"),
            }
        }
        RunOutcome::NoMatch { recommendation } => {
            format!("no track found for {:?}", recommendation.suggestion_text)
        }
        RunOutcome::Failed(err) => format!("failed: {err}"),
    };
    format!("{what} [{took} ms]")
}
