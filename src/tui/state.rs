use super::{UiCommand, UiEvent};
use crate::model::{format_date, HistoricalStatus, MonitorEvent, MonitorSummary, Mutation};
use crate::orchestrator::StatusView;
use crossterm::event::{KeyCode, KeyModifiers};
use ratatui::{
    style::Color,
    style::Style,
    text::{Line, Span},
};
use std::collections::VecDeque;
use time::Date;

const MAX_NOTICES: usize = 8;

pub const TAB_DASHBOARD: usize = 0;
pub const TAB_SUMMARY: usize = 1;
pub const TAB_HELP: usize = 2;
pub const TAB_COUNT: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct NoticeLine {
    pub text: String,
    pub is_error: bool,
}

/// What the input loop should do after a key press.
#[derive(Debug, PartialEq)]
pub enum KeyOutcome {
    Ignored,
    Quit,
    Send(UiCommand),
}

#[derive(Debug, Default)]
pub struct UiState {
    pub tab: usize,
    pub base_url: String,
    pub info: String,
    pub view: Option<StatusView>,
    pub historical: Option<HistoricalStatus>,
    pub summary: Option<MonitorSummary>,
    pub summary_error: Option<String>,
    pub summary_loading: bool,
    pub notices: VecDeque<NoticeLine>,
    /// First `d` press seen; the next `d` deletes.
    pub delete_armed: bool,
    pub collect_from: Option<Date>,
    pub historical_from: Option<Date>,
}

impl UiState {
    /// Controls are enabled only when the gate would accept a mutation.
    pub fn controls_enabled(&self) -> bool {
        self.view.as_ref().is_some_and(|v| v.can_submit())
    }

    pub fn push_notice(&mut self, text: String, is_error: bool) {
        self.notices.push_front(NoticeLine { text, is_error });
        self.notices.truncate(MAX_NOTICES);
    }

    pub fn apply_event(&mut self, ev: UiEvent) {
        match ev {
            UiEvent::Monitor(MonitorEvent::StateChanged(view)) => {
                if self.delete_armed && !view.can_submit() {
                    self.delete_armed = false;
                }
                self.view = Some(view);
            }
            UiEvent::Monitor(MonitorEvent::Notice(notice)) => {
                self.push_notice(notice.to_message(), notice.is_error());
            }
            UiEvent::Monitor(MonitorEvent::Historical(hist)) => {
                self.historical = Some(hist);
            }
            UiEvent::Monitor(MonitorEvent::ViewsInvalidated) => {
                self.summary_loading = true;
            }
            UiEvent::Summary(Ok(summary)) => {
                self.summary = Some(summary);
                self.summary_error = None;
                self.summary_loading = false;
            }
            UiEvent::Summary(Err(e)) => {
                self.summary_error = Some(e);
                self.summary_loading = false;
            }
        }
    }

    pub fn on_key(&mut self, modifiers: KeyModifiers, code: KeyCode) -> KeyOutcome {
        let was_armed = std::mem::take(&mut self.delete_armed);
        match (modifiers, code) {
            (_, KeyCode::Char('q')) | (KeyModifiers::CONTROL, KeyCode::Char('c')) => {
                KeyOutcome::Quit
            }
            (_, KeyCode::Char('r')) => {
                self.info = match self.collect_from {
                    Some(d) => format!("Starting collection from {}...", format_date(d)),
                    None => "Starting collection...".into(),
                };
                KeyOutcome::Send(UiCommand::Submit(Mutation::Start {
                    start_date: self.collect_from,
                }))
            }
            (_, KeyCode::Char('d')) => {
                if was_armed {
                    self.info = "Deleting all data...".into();
                    KeyOutcome::Send(UiCommand::Submit(Mutation::DeleteAll))
                } else {
                    self.delete_armed = true;
                    self.info = "Press d again to delete ALL monitoring data (any other key cancels)"
                        .into();
                    KeyOutcome::Ignored
                }
            }
            (_, KeyCode::Char('u')) => match self.historical_from {
                Some(d) => {
                    self.info = format!("Updating historical start date to {}...", format_date(d));
                    KeyOutcome::Send(UiCommand::Submit(Mutation::UpdateHistoricalStartDate {
                        new_start_date: d,
                    }))
                }
                None => {
                    self.info = "Pass --historical-from YYYY-MM-DD to set the start date".into();
                    KeyOutcome::Ignored
                }
            },
            (_, KeyCode::Char('g')) => {
                self.info = "Refreshing status...".into();
                KeyOutcome::Send(UiCommand::Refresh)
            }
            (_, KeyCode::Char('s')) => {
                self.summary_loading = true;
                KeyOutcome::Send(UiCommand::ReloadSummary)
            }
            (_, KeyCode::Tab) => {
                self.tab = (self.tab + 1) % TAB_COUNT;
                KeyOutcome::Ignored
            }
            (_, KeyCode::Char('?')) => {
                self.tab = TAB_HELP;
                KeyOutcome::Ignored
            }
            (_, KeyCode::Esc) => {
                if was_armed {
                    self.info = "Delete cancelled".into();
                }
                KeyOutcome::Ignored
            }
            _ => KeyOutcome::Ignored,
        }
    }
}

pub fn push_wrapped_status_kv(
    out: &mut Vec<Line<'static>>,
    label: &str,
    value: &str,
    area_width: u16,
) {
    let value = value.trim();
    if value.is_empty() {
        return;
    }

    // Account for borders (2 chars on each side)
    let usable_width = area_width.saturating_sub(4).max(1);
    let label_text = format!("{label}:");
    let label_width = label_text.chars().count() as u16;

    let value_chars: Vec<char> = value.chars().collect();
    let mut remaining = value_chars.as_slice();
    let mut first = true;

    while !remaining.is_empty() {
        let line_width = if first {
            usable_width.saturating_sub(label_width + 1).max(1)
        } else {
            usable_width.saturating_sub(2).max(1)
        };

        let chars_to_take = (remaining.len() as u16).min(line_width) as usize;
        let (line_chars, rest) = remaining.split_at(chars_to_take);
        let line_text: String = line_chars.iter().collect();

        if first {
            out.push(Line::from(vec![
                Span::styled(label_text.clone(), Style::default().fg(Color::Gray)),
                Span::raw(" "),
                Span::raw(line_text),
            ]));
            first = false;
        } else {
            out.push(Line::from(vec![Span::raw("  "), Span::raw(line_text)]));
        }

        remaining = rest;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MutationKind, Notice, SystemStatusResponse};
    use pretty_assertions::assert_eq;
    use time::macros::date;

    fn idle_view() -> StatusView {
        StatusView {
            status: Some(SystemStatusResponse::idle().into()),
            optimistic: false,
            polling: false,
            pending: None,
            stale: false,
            views_epoch: 0,
        }
    }

    fn press(state: &mut UiState, c: char) -> KeyOutcome {
        state.on_key(KeyModifiers::NONE, KeyCode::Char(c))
    }

    #[test]
    fn delete_needs_second_press() {
        let mut state = UiState::default();
        assert_eq!(press(&mut state, 'd'), KeyOutcome::Ignored);
        assert!(state.delete_armed);
        assert_eq!(
            press(&mut state, 'd'),
            KeyOutcome::Send(UiCommand::Submit(Mutation::DeleteAll))
        );
        assert!(!state.delete_armed);
    }

    #[test]
    fn other_key_cancels_delete() {
        let mut state = UiState::default();
        press(&mut state, 'd');
        state.on_key(KeyModifiers::NONE, KeyCode::Tab);
        assert_eq!(press(&mut state, 'd'), KeyOutcome::Ignored);
    }

    #[test]
    fn start_uses_preset_date() {
        let mut state = UiState {
            collect_from: Some(date!(2024 - 01 - 01)),
            ..Default::default()
        };
        assert_eq!(
            press(&mut state, 'r'),
            KeyOutcome::Send(UiCommand::Submit(Mutation::Start {
                start_date: Some(date!(2024 - 01 - 01))
            }))
        );
    }

    #[test]
    fn update_without_date_does_nothing() {
        let mut state = UiState::default();
        assert_eq!(press(&mut state, 'u'), KeyOutcome::Ignored);
        assert!(state.info.contains("--historical-from"));
    }

    #[test]
    fn quit_keys() {
        let mut state = UiState::default();
        assert_eq!(press(&mut state, 'q'), KeyOutcome::Quit);
        assert_eq!(
            state.on_key(KeyModifiers::CONTROL, KeyCode::Char('c')),
            KeyOutcome::Quit
        );
    }

    #[test]
    fn notices_are_bounded_newest_first() {
        let mut state = UiState::default();
        for i in 0..12 {
            state.apply_event(UiEvent::Monitor(MonitorEvent::Notice(
                Notice::MutationSucceeded {
                    kind: MutationKind::Start,
                    message: format!("n{i}"),
                },
            )));
        }
        assert_eq!(state.notices.len(), MAX_NOTICES);
        assert_eq!(state.notices[0].text, "n11");
    }

    #[test]
    fn running_view_disables_controls_and_disarms_delete() {
        let mut state = UiState::default();
        assert!(!state.controls_enabled());
        state.apply_event(UiEvent::Monitor(MonitorEvent::StateChanged(idle_view())));
        assert!(state.controls_enabled());

        press(&mut state, 'd');
        let mut running = idle_view();
        running.status = Some(SystemStatusResponse::running("continuous").into());
        running.polling = true;
        state.apply_event(UiEvent::Monitor(MonitorEvent::StateChanged(running)));
        assert!(!state.delete_armed);
        assert!(!state.controls_enabled());
    }

    #[test]
    fn invalidation_marks_summary_for_reload() {
        let mut state = UiState::default();
        state.apply_event(UiEvent::Monitor(MonitorEvent::ViewsInvalidated));
        assert!(state.summary_loading);
        state.apply_event(UiEvent::Summary(Ok(MonitorSummary::default())));
        assert!(!state.summary_loading);
        assert!(state.summary.is_some());
    }
}
