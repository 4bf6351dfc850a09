use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use speedmon::report::{Update, PLACEHOLDER, READY};
use speedmon::{MeasurementKind, Settings};
use std::time::Duration;

/// One selectable test row.
#[derive(Debug, Clone)]
pub struct TestRow {
    pub kind: MeasurementKind,
    pub title: &'static str,
    pub subtitle: String,
}

pub struct App {
    pub status: String,
    pub metric: String,
    /// False while a measurement runs; only stop and quit are accepted then.
    pub controls_enabled: bool,
    pub should_quit: bool,

    pub rows: Vec<TestRow>,
    pub selected: usize,
}

impl App {
    pub fn new(settings: &Settings) -> Self {
        Self {
            status: READY.to_string(),
            metric: PLACEHOLDER.to_string(),
            controls_enabled: true,
            should_quit: false,
            rows: vec![
                TestRow {
                    kind: MeasurementKind::Download,
                    title: "Download Speed",
                    subtitle: "Continuous download speed test".to_string(),
                },
                TestRow {
                    kind: MeasurementKind::Upload,
                    title: "Upload Speed",
                    subtitle: "Continuous upload speed test".to_string(),
                },
                TestRow {
                    kind: MeasurementKind::Ping,
                    title: "Ping Test",
                    subtitle: format!("Continuous latency to {}", settings.ping_host),
                },
            ],
            selected: 0,
        }
    }

    pub fn apply(&mut self, update: Update) {
        match update {
            Update::Status(update) => {
                self.status = update.status;
                self.metric = update.metric;
            }
            Update::Controls { enabled } => self.controls_enabled = enabled,
        }
    }

    pub fn handle_key_event(&mut self, key: event::KeyEvent) -> Option<AppAction> {
        if key.kind != KeyEventKind::Press {
            return None;
        }

        match key.code {
            KeyCode::Char('q') => {
                self.should_quit = true;
                Some(AppAction::Quit)
            }
            KeyCode::Char('s') | KeyCode::Esc => {
                if self.controls_enabled {
                    None
                } else {
                    Some(AppAction::Stop)
                }
            }
            KeyCode::Char('d') => self.start(MeasurementKind::Download),
            KeyCode::Char('u') => self.start(MeasurementKind::Upload),
            KeyCode::Char('p') => self.start(MeasurementKind::Ping),
            KeyCode::Enter => self.start(self.rows[self.selected].kind),
            KeyCode::Tab | KeyCode::Down | KeyCode::Char('j') => {
                self.selected = (self.selected + 1) % self.rows.len();
                None
            }
            KeyCode::BackTab | KeyCode::Up | KeyCode::Char('k') => {
                self.selected = (self.selected + self.rows.len() - 1) % self.rows.len();
                None
            }
            _ => None,
        }
    }

    fn start(&self, kind: MeasurementKind) -> Option<AppAction> {
        self.controls_enabled.then_some(AppAction::Start(kind))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppAction {
    Quit,
    Start(MeasurementKind),
    Stop,
}

pub fn poll_event(timeout: Duration) -> Result<Option<Event>> {
    if event::poll(timeout)? {
        Ok(Some(event::read()?))
    } else {
        Ok(None)
    }
}
