mod help;
mod state;

use self::state::{push_wrapped_status_kv, KeyOutcome, UiState, TAB_DASHBOARD, TAB_SUMMARY};
use crate::api::MonitorApi;
use crate::cli::{today, validate_start_date, DashboardOptions};
use crate::model::{MonitorConfig, MonitorEvent, MonitorSummary, Mutation};
use crate::orchestrator::{self, MonitorHandle, PollSettings, StatusView};
use crate::text_summary;
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Tabs, Wrap},
    Terminal,
};
use std::sync::Arc;
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

/// Requests from the UI thread to the async side.
#[derive(Debug, PartialEq)]
pub enum UiCommand {
    Submit(Mutation),
    Refresh,
    ReloadSummary,
    Quit,
}

/// Everything the UI thread renders.
#[derive(Debug)]
pub enum UiEvent {
    Monitor(MonitorEvent),
    Summary(Result<MonitorSummary, String>),
}

pub async fn run(
    api: Arc<dyn MonitorApi>,
    cfg: MonitorConfig,
    opts: DashboardOptions,
) -> Result<()> {
    for d in [opts.collect_from, opts.historical_from].into_iter().flatten() {
        validate_start_date(d, today())?;
    }

    let (ui_tx, ui_rx) = mpsc::unbounded_channel::<UiEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<MonitorEvent>();

    let state = UiState {
        base_url: cfg.base_url.clone(),
        collect_from: opts.collect_from,
        historical_from: opts.historical_from,
        summary_loading: true,
        ..Default::default()
    };

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_handle = std::thread::spawn(move || run_threaded(state, ui_rx, cmd_tx));

    let (handle, controller) = orchestrator::mount(api.clone(), PollSettings::from(&cfg), event_tx);
    bridge(api, &handle, event_rx, cmd_rx, ui_tx).await;
    handle.teardown();
    let _ = controller.await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }
    Ok(())
}

fn reload_summary(api: Arc<dyn MonitorApi>, ui_tx: UnboundedSender<UiEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let res = api.summary().await.map_err(|e| e.to_string());
        if let Err(e) = &res {
            log::warn!("summary reload failed: {e}");
        }
        let _ = ui_tx.send(UiEvent::Summary(res));
    })
}

/// Forward controller events to the UI thread and UI commands to the controller.
async fn bridge(
    api: Arc<dyn MonitorApi>,
    handle: &MonitorHandle,
    mut events: UnboundedReceiver<MonitorEvent>,
    mut cmds: UnboundedReceiver<UiCommand>,
    ui_tx: UnboundedSender<UiEvent>,
) {
    // Only the latest summary request may report back.
    let mut summary_task = reload_summary(api.clone(), ui_tx.clone());

    loop {
        tokio::select! {
            ev = events.recv() => {
                let Some(ev) = ev else { break };
                if matches!(ev, MonitorEvent::ViewsInvalidated) {
                    summary_task.abort();
                    summary_task = reload_summary(api.clone(), ui_tx.clone());
                }
                if ui_tx.send(UiEvent::Monitor(ev)).is_err() {
                    break;
                }
            }
            cmd = cmds.recv() => {
                match cmd {
                    None | Some(UiCommand::Quit) => break,
                    Some(UiCommand::Submit(mutation)) => {
                        let h = handle.clone();
                        // The outcome reaches the UI as a notice.
                        tokio::spawn(async move {
                            if let Err(e) = h.submit(mutation).await {
                                log::debug!("{e}");
                            }
                        });
                    }
                    Some(UiCommand::Refresh) => handle.refresh(),
                    Some(UiCommand::ReloadSummary) => {
                        summary_task.abort();
                        summary_task = reload_summary(api.clone(), ui_tx.clone());
                    }
                }
            }
        }
    }
    summary_task.abort();
}

/// Run the TUI loop on a dedicated thread.
fn run_threaded(
    mut state: UiState,
    mut ui_rx: UnboundedReceiver<UiEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        while let Ok(ev) = ui_rx.try_recv() {
            state.apply_event(ev);
        }

        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                match state.on_key(k.modifiers, k.code) {
                    KeyOutcome::Quit => {
                        let _ = cmd_tx.send(UiCommand::Quit);
                        break Ok(());
                    }
                    KeyOutcome::Send(cmd) => {
                        if cmd_tx.send(cmd).is_err() {
                            break Err(anyhow::anyhow!("monitor stopped unexpectedly"));
                        }
                    }
                    KeyOutcome::Ignored => {}
                }
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    res
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)].as_ref())
        .split(area);

    let tabs = Tabs::new(vec![
        Line::from("Dashboard"),
        Line::from("Summary"),
        Line::from("Help"),
    ])
    .select(state.tab)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!("social-monitor  {}", state.base_url)),
    )
    .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    match state.tab {
        TAB_DASHBOARD => draw_dashboard(chunks[1], f, state),
        TAB_SUMMARY => draw_summary(chunks[1], f, state),
        _ => help::draw_help(chunks[1], f),
    }
}

fn state_color(view: &StatusView) -> Color {
    if view.stale {
        Color::Red
    } else if view.status.is_none() {
        Color::Gray
    } else if view.is_running() {
        Color::Yellow
    } else {
        Color::Green
    }
}

fn plain_lines(lines: Vec<String>) -> Vec<Line<'static>> {
    lines.into_iter().map(Line::from).collect()
}

fn draw_dashboard(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(8),
                Constraint::Min(4),
                Constraint::Length(5),
            ]
            .as_ref(),
        )
        .split(area);
    let top = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)].as_ref())
        .split(rows[0]);

    // Task status
    let mut task_lines = Vec::new();
    match state.view.as_ref() {
        Some(view) => {
            task_lines.push(Line::from(vec![
                Span::styled("State: ", Style::default().fg(Color::Gray)),
                Span::styled(
                    text_summary::state_label(view),
                    Style::default().fg(state_color(view)),
                ),
            ]));
            task_lines.push(Line::from(vec![
                Span::styled("Polling: ", Style::default().fg(Color::Gray)),
                Span::raw(if view.polling { "active" } else { "off" }),
            ]));
            if let Some(kind) = view.pending {
                task_lines.push(Line::from(vec![
                    Span::styled("Pending: ", Style::default().fg(Color::Gray)),
                    Span::raw(kind.to_string()),
                ]));
            }
            if let Some(status) = view.status.as_ref() {
                task_lines.extend(plain_lines(text_summary::task_detail_lines(status)));
            }
        }
        None => task_lines.push(Line::from("Connecting...")),
    }
    let task = Paragraph::new(task_lines)
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title("Collection"));
    f.render_widget(task, top[0]);

    // Historical backfill (advisory)
    let hist_lines = match state.historical.as_ref() {
        Some(h) => plain_lines(text_summary::historical_lines(h)),
        None => vec![Line::from("Waiting for data...")],
    };
    let hist = Paragraph::new(hist_lines)
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title("Historical"));
    f.render_widget(hist, top[1]);

    // Notices, newest first
    let notice_lines: Vec<Line> = if state.notices.is_empty() {
        vec![Line::styled("No notifications", Style::default().fg(Color::DarkGray))]
    } else {
        state
            .notices
            .iter()
            .map(|n| {
                let color = if n.is_error { Color::Red } else { Color::Green };
                Line::styled(n.text.clone(), Style::default().fg(color))
            })
            .collect()
    };
    let notices = Paragraph::new(notice_lines)
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title("Notifications"));
    f.render_widget(notices, rows[1]);

    // Controls and info line
    let enabled = state.controls_enabled();
    let key_style = if enabled {
        Style::default().fg(Color::Magenta)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    let delete_style = if state.delete_armed {
        Style::default().fg(Color::Red)
    } else {
        key_style
    };
    let mut control_lines = vec![Line::from(vec![
        Span::styled("r", key_style),
        Span::raw(" start  "),
        Span::styled("d", delete_style),
        Span::raw(" delete all  "),
        Span::styled("u", key_style),
        Span::raw(" update start date  "),
        Span::styled("g", Style::default().fg(Color::Magenta)),
        Span::raw(" refresh  "),
        Span::styled("q", Style::default().fg(Color::Magenta)),
        Span::raw(" quit"),
    ])];
    push_wrapped_status_kv(&mut control_lines, "Info", &state.info, rows[2].width);
    let controls =
        Paragraph::new(control_lines).block(Block::default().borders(Borders::ALL).title("Controls"));
    f.render_widget(controls, rows[2]);
}

fn draw_summary(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let mut lines = Vec::new();
    if state.summary_loading {
        lines.push(Line::styled("Reloading...", Style::default().fg(Color::Yellow)));
    }
    if let Some(e) = state.summary_error.as_deref() {
        lines.push(Line::styled(
            format!("Summary unavailable: {e}"),
            Style::default().fg(Color::Red),
        ));
    }
    match state.summary.as_ref() {
        Some(s) => lines.extend(plain_lines(text_summary::summary_lines(s))),
        None if !state.summary_loading => lines.push(Line::from("No summary loaded (press s)")),
        None => {}
    }
    let p = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("Summary"));
    f.render_widget(p, area);
}
