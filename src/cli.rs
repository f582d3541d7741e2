use crate::api::{HttpMonitorApi, MonitorApi};
use crate::config::{self, Overrides};
use crate::model::{parse_date, MonitorConfig, MonitorEvent, Mutation, Notice, ResultStatus};
use crate::orchestrator::{self, MonitorHandle, PollSettings, StatusView};
use crate::text_summary;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use time::{Date, OffsetDateTime};
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "social-monitor",
    version,
    about = "Monitor and control the social media collection backend"
)]
pub struct Cli {
    /// Base URL of the monitoring backend
    #[arg(long, global = true, env = "SOCIAL_MONITOR_BASE_URL")]
    pub base_url: Option<String>,

    /// Bearer token sent with every request
    #[arg(long, global = true, env = "SOCIAL_MONITOR_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Interval between status polls while a task runs (e.g. 5s)
    #[arg(long, global = true)]
    pub poll_interval: Option<humantime::Duration>,

    /// Per-request timeout
    #[arg(long, global = true)]
    pub request_timeout: Option<humantime::Duration>,

    /// Consecutive failed polls before the status is flagged as stale
    #[arg(long, global = true)]
    pub stale_after: Option<u32>,

    /// Path to a TOML config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print JSON instead of text (no TUI)
    #[arg(long, global = true)]
    pub json: bool,

    /// Start date used when starting a collection from the dashboard (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date_arg)]
    pub collect_from: Option<Date>,

    /// Historical start date applied from the dashboard (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date_arg)]
    pub historical_from: Option<Date>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone, PartialEq)]
pub enum Command {
    /// Print the current system status and exit
    Status,
    /// Poll until no task is running, printing every transition
    Watch,
    /// Start a collection
    Run {
        /// Collect from this date onwards (YYYY-MM-DD, before today)
        #[arg(long, value_parser = parse_date_arg)]
        start_date: Option<Date>,
        /// Return once the backend accepted the request
        #[arg(long)]
        no_wait: bool,
    },
    /// Delete every collected run, log and result
    DeleteAll {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
    /// Change the historical backfill start date
    SetStartDate {
        /// New start date (YYYY-MM-DD, before today)
        #[arg(value_parser = parse_date_arg)]
        date: Date,
    },
    /// Print the historical backfill status
    Historical,
    /// Print collection summary counts
    Summary,
    /// List collected results
    Results {
        /// Only results with this processing status
        #[arg(long, value_enum)]
        status: Option<ResultStatus>,
        /// Maximum number of results to print
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

/// Dates preset for the dashboard's start and update keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct DashboardOptions {
    pub collect_from: Option<Date>,
    pub historical_from: Option<Date>,
}

impl Cli {
    /// True when the interactive dashboard owns the terminal.
    pub fn is_tui(&self) -> bool {
        cfg!(feature = "tui") && self.command.is_none() && !self.json
    }

    fn overrides(&self) -> Overrides {
        Overrides {
            base_url: self.base_url.clone(),
            auth_token: self.token.clone(),
            poll_interval: self.poll_interval.map(Into::into),
            request_timeout: self.request_timeout.map(Into::into),
            stale_after_failures: self.stale_after,
        }
    }
}

fn parse_date_arg(s: &str) -> Result<Date, String> {
    parse_date(s).map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

pub(crate) fn today() -> Date {
    OffsetDateTime::now_local()
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
        .date()
}

/// Collection start dates must lie strictly in the past.
pub(crate) fn validate_start_date(date: Date, today: Date) -> Result<()> {
    if date >= today {
        bail!(
            "start date {} must be before today ({})",
            crate::model::format_date(date),
            crate::model::format_date(today)
        );
    }
    Ok(())
}

pub async fn run(args: Cli) -> Result<()> {
    let file = config::load_file(args.config.as_deref()).context("failed to load config")?;
    let cfg = config::resolve(args.overrides(), file).context("invalid configuration")?;
    log::debug!(
        "backend {} (poll every {})",
        cfg.base_url,
        humantime::format_duration(cfg.poll_interval)
    );
    let api: Arc<dyn MonitorApi> =
        Arc::new(HttpMonitorApi::new(&cfg).context("failed to create API client")?);

    let command = match args.command.clone() {
        Some(cmd) => cmd,
        None => {
            #[cfg(feature = "tui")]
            {
                if !args.json {
                    let opts = DashboardOptions {
                        collect_from: args.collect_from,
                        historical_from: args.historical_from,
                    };
                    return crate::tui::run(api, cfg, opts).await;
                }
            }
            // Fallback when built without TUI support, or in JSON mode.
            Command::Watch
        }
    };

    let (out_tx, out_handle) = spawn_output_writer();
    let out = Output {
        tx: out_tx,
        json: args.json,
    };
    let result = run_command(command, api, &cfg, &out).await;
    drop(out);
    let _ = out_handle.await;
    result
}

struct Output {
    tx: mpsc::UnboundedSender<OutputLine>,
    json: bool,
}

impl Output {
    fn lines(&self, lines: Vec<String>) {
        for line in lines {
            let _ = self.tx.send(OutputLine::Stdout(line));
        }
    }

    fn info(&self, msg: impl Into<String>) {
        let _ = self.tx.send(OutputLine::Stderr(msg.into()));
    }

    fn pretty<T: Serialize>(&self, value: &T) -> Result<()> {
        let s = serde_json::to_string_pretty(value)?;
        let _ = self.tx.send(OutputLine::Stdout(s));
        Ok(())
    }

    /// Text lines, or pretty JSON in `--json` mode.
    fn render<T: Serialize>(&self, value: &T, text: impl FnOnce(&T) -> Vec<String>) -> Result<()> {
        if self.json {
            self.pretty(value)
        } else {
            self.lines(text(value));
            Ok(())
        }
    }
}

async fn run_command(
    command: Command,
    api: Arc<dyn MonitorApi>,
    cfg: &MonitorConfig,
    out: &Output,
) -> Result<()> {
    match command {
        Command::Status => {
            let resp = api
                .system_status()
                .await
                .context("failed to fetch system status")?;
            out.render(&resp, |r| text_summary::status_lines(&r.clone().into()))
        }
        Command::Historical => {
            let hist = api
                .historical_status()
                .await
                .context("failed to fetch historical status")?;
            out.render(&hist, text_summary::historical_lines)
        }
        Command::Summary => {
            let summary = api.summary().await.context("failed to fetch summary")?;
            out.render(&summary, text_summary::summary_lines)
        }
        Command::Results { status, limit } => {
            let results = match status {
                Some(s) => api.results_by_status(s).await,
                None => api.all_results().await,
            }
            .context("failed to fetch results")?;
            let shown: Vec<_> = results.iter().take(limit).cloned().collect();
            if out.json {
                out.pretty(&shown)
            } else {
                out.lines(text_summary::result_lines(&results, limit));
                Ok(())
            }
        }
        Command::Watch => {
            let mut session = Session::mount(api, cfg);
            let result = session.follow(out).await;
            session.close().await;
            result
        }
        Command::Run {
            start_date,
            no_wait,
        } => {
            if let Some(d) = start_date {
                validate_start_date(d, today())?;
            }
            warn_if_data_exists(api.as_ref(), out).await;
            run_mutation(api, cfg, out, Mutation::Start { start_date }, !no_wait).await
        }
        Command::DeleteAll { yes } => {
            if !yes {
                bail!("refusing to delete all monitoring data without --yes");
            }
            run_mutation(api, cfg, out, Mutation::DeleteAll, false).await
        }
        Command::SetStartDate { date } => {
            validate_start_date(date, today())?;
            let result = run_mutation(
                api.clone(),
                cfg,
                out,
                Mutation::UpdateHistoricalStartDate {
                    new_start_date: date,
                },
                false,
            )
            .await;
            if result.is_ok() && !out.json {
                if let Ok(hist) = api.historical_status().await {
                    out.lines(text_summary::historical_lines(&hist));
                }
            }
            result
        }
    }
}

/// A collection was already performed. The backend still decides whether
/// a new one may start.
async fn warn_if_data_exists(api: &dyn MonitorApi, out: &Output) {
    match api.summary().await {
        Ok(summary) if summary.has_any_data() => out.info(format!(
            "Note: data from {} previous run(s) already exists. Use `delete-all --yes` to start from scratch.",
            summary.total_runs
        )),
        Ok(_) => {}
        Err(e) => log::debug!("summary unavailable: {e}"),
    }
}

async fn run_mutation(
    api: Arc<dyn MonitorApi>,
    cfg: &MonitorConfig,
    out: &Output,
    mutation: Mutation,
    follow: bool,
) -> Result<()> {
    let mut session = Session::mount(api, cfg);
    let result = async {
        session.wait_for_status(out).await?;
        let receipt = session
            .handle
            .submit(mutation)
            .await
            .context("request was not applied")?;
        if out.json {
            out.pretty(&serde_json::json!({
                "kind": receipt.kind,
                "message": receipt.message,
            }))?;
        } else {
            out.lines(vec![receipt.message]);
        }
        if follow {
            session.follow(out).await?;
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;
    session.close().await;
    result
}

/// A mounted controller plus its event stream.
struct Session {
    handle: MonitorHandle,
    events: mpsc::UnboundedReceiver<MonitorEvent>,
    join: tokio::task::JoinHandle<()>,
    last_label: Option<String>,
}

impl Session {
    fn mount(api: Arc<dyn MonitorApi>, cfg: &MonitorConfig) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let (handle, join) = orchestrator::mount(api, PollSettings::from(cfg), tx);
        Self {
            handle,
            events,
            join,
            last_label: None,
        }
    }

    /// Wait until the first status snapshot is known and the initial poll settled.
    async fn wait_for_status(&mut self, out: &Output) -> Result<StatusView> {
        while let Some(ev) = self.events.recv().await {
            match ev {
                MonitorEvent::StateChanged(view) => {
                    if view.status.is_some() && (!view.polling || view.is_running()) {
                        return Ok(view);
                    }
                }
                MonitorEvent::Notice(notice @ Notice::StatusMayBeStale { .. }) => {
                    bail!("backend unavailable: {}", notice.to_message());
                }
                other => self.print_event(other, out)?,
            }
        }
        bail!("monitor stopped before the backend status was known")
    }

    /// Print events until the polling session ends or Ctrl-C.
    async fn follow(&mut self, out: &Output) -> Result<()> {
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        loop {
            tokio::select! {
                ev = self.events.recv() => {
                    let Some(ev) = ev else { break };
                    let done = matches!(
                        &ev,
                        MonitorEvent::StateChanged(v) if v.status.is_some() && !v.polling && v.pending.is_none()
                    );
                    self.print_event(ev, out)?;
                    if done {
                        break;
                    }
                }
                _ = &mut ctrl_c => {
                    out.info("Interrupted.");
                    break;
                }
            }
        }
        Ok(())
    }

    fn print_event(&mut self, ev: MonitorEvent, out: &Output) -> Result<()> {
        match ev {
            MonitorEvent::StateChanged(view) => {
                if out.json {
                    let line = serde_json::to_string(&view)?;
                    let _ = out.tx.send(OutputLine::Stdout(line));
                    return Ok(());
                }
                let label = text_summary::state_label(&view);
                if self.last_label.as_deref() != Some(label.as_str()) {
                    let now = text_summary::format_timestamp(OffsetDateTime::now_utc());
                    out.lines(vec![format!("[{now}] {label}")]);
                    if !view.polling {
                        if let Some(status) = view.status.as_ref() {
                            out.lines(text_summary::task_detail_lines(status));
                        }
                    }
                    self.last_label = Some(label);
                }
            }
            MonitorEvent::Notice(notice) => {
                let prefix = if notice.is_error() { "warning: " } else { "" };
                out.info(format!("{prefix}{}", notice.to_message()));
            }
            MonitorEvent::Historical(hist) => {
                log::debug!("historical status: {}", hist.message);
            }
            MonitorEvent::ViewsInvalidated => {}
        }
        Ok(())
    }

    async fn close(self) {
        self.handle.teardown();
        let _ = self.join.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::{Call, FakeApi};
    use clap::CommandFactory;
    use std::time::Duration;
    use time::macros::date;

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_command_means_dashboard() {
        let cli = Cli::try_parse_from(["social-monitor"]).unwrap();
        assert_eq!(cli.command, None);
        assert_eq!(cli.is_tui(), cfg!(feature = "tui"));
        let cli = Cli::try_parse_from(["social-monitor", "--json"]).unwrap();
        assert!(!cli.is_tui());
    }

    #[test]
    fn run_accepts_start_date() {
        let cli =
            Cli::try_parse_from(["social-monitor", "run", "--start-date", "2024-01-15", "--no-wait"])
                .unwrap();
        assert_eq!(
            cli.command,
            Some(Command::Run {
                start_date: Some(date!(2024 - 01 - 15)),
                no_wait: true,
            })
        );
    }

    #[test]
    fn malformed_date_is_rejected_by_parser() {
        assert!(Cli::try_parse_from(["social-monitor", "set-start-date", "15/01/2024"]).is_err());
    }

    #[test]
    fn results_filter_uses_backend_names() {
        let cli = Cli::try_parse_from([
            "social-monitor",
            "results",
            "--status",
            "scraper-failed",
            "--limit",
            "5",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Some(Command::Results {
                status: Some(ResultStatus::ScraperFailed),
                limit: 5,
            })
        );
    }

    #[test]
    fn global_flags_become_overrides() {
        let cli = Cli::try_parse_from([
            "social-monitor",
            "status",
            "--poll-interval",
            "2s",
            "--stale-after",
            "4",
        ])
        .unwrap();
        let o = cli.overrides();
        assert_eq!(o.poll_interval, Some(Duration::from_secs(2)));
        assert_eq!(o.stale_after_failures, Some(4));
    }

    fn capture(json: bool) -> (Output, mpsc::UnboundedReceiver<OutputLine>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Output { tx, json }, rx)
    }

    fn stdout_lines(rx: &mut mpsc::UnboundedReceiver<OutputLine>) -> (Vec<String>, Vec<String>) {
        let (mut out, mut err) = (Vec::new(), Vec::new());
        while let Ok(line) = rx.try_recv() {
            match line {
                OutputLine::Stdout(s) => out.push(s),
                OutputLine::Stderr(s) => err.push(s),
            }
        }
        (out, err)
    }

    fn test_config() -> MonitorConfig {
        config::resolve(Overrides::default(), config::FileConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn existing_data_prints_advisory_note() {
        let api = FakeApi::idle().with_summary(crate::model::MonitorSummary {
            total_runs: 4,
            ..Default::default()
        });
        let (out, mut rx) = capture(false);
        warn_if_data_exists(&api, &out).await;
        let (_, err) = stdout_lines(&mut rx);
        assert_eq!(err.len(), 1);
        assert!(err[0].contains("4 previous run(s)"));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_goes_through_the_gate() {
        let api = Arc::new(FakeApi::idle());
        let (out, mut rx) = capture(false);
        run_mutation(api.clone(), &test_config(), &out, Mutation::DeleteAll, false)
            .await
            .unwrap();
        assert_eq!(api.count(|c| *c == Call::DeleteAll), 1);
        let (stdout, _) = stdout_lines(&mut rx);
        assert_eq!(stdout, vec!["ok".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_while_running_is_refused_locally() {
        let api = Arc::new(FakeApi::new(
            crate::model::SystemStatusResponse::running("continuous"),
        ));
        let (out, _rx) = capture(false);
        let err = run_mutation(api.clone(), &test_config(), &out, Mutation::DeleteAll, false)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("a task is already running"));
        assert_eq!(api.count(|c| *c == Call::DeleteAll), 0);
    }

    #[test]
    fn start_date_must_be_in_the_past() {
        let today = date!(2024 - 06 - 01);
        assert!(validate_start_date(date!(2024 - 05 - 31), today).is_ok());
        assert!(validate_start_date(today, today).is_err());
        assert!(validate_start_date(date!(2024 - 07 - 01), today).is_err());
    }
}
