use anyhow::{Context, Result};
use chrono::Local;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Text},
    widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, TableState, Tabs, Wrap},
};
use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::time::{Duration, Instant};
use tracing::warn;

use crate::browse;
use crate::ingest::{IngestEvent, Orchestrator, RepoBackend, spawn_run};
use crate::store::{CommitFilter, Store};
use crate::view::{ProjectFilter, Selection, ViewState};
use crate::{Commit, Project, ReviewState};

const STATUS_TTL: Duration = Duration::from_secs(3);

/// Application state for the TUI. Lives on the presentation thread; ingestion
/// results reach it only through `events`.
pub struct App<B> {
    view: ViewState,
    store: Arc<Store>,
    orchestrator: Arc<Orchestrator<B>>,
    projects: Vec<Project>,
    /// 0 is "all", `n` is `projects[n - 1]`.
    tab: usize,
    selection: Selection,
    events: Option<Receiver<IngestEvent>>,
    progress: String,
    should_quit: bool,
    show_help: bool,
    status_message: Option<(String, Instant)>,
}

impl<B: RepoBackend + 'static> App<B> {
    /// Create the app with every unreviewed commit already in the store.
    pub fn new(store: Arc<Store>, orchestrator: Arc<Orchestrator<B>>) -> Result<Self> {
        let unreviewed = store
            .load_commits(&CommitFilter::unreviewed())
            .context("Failed to load commits")?;
        let projects = orchestrator.projects().to_vec();
        Ok(Self {
            view: ViewState::new(unreviewed),
            store,
            orchestrator,
            projects,
            tab: 0,
            selection: Selection::default(),
            events: None,
            progress: String::new(),
            should_quit: false,
            show_help: false,
            status_message: None,
        })
    }

    /// Start a background ingestion run unless one is in flight.
    pub fn start_sync(&mut self) {
        if self.events.is_some() {
            self.set_status("Sync already running");
            return;
        }
        let (tx, rx) = mpsc::channel();
        // Detached: the run reports back through the channel only.
        let _ = spawn_run(Arc::clone(&self.orchestrator), tx);
        self.events = Some(rx);
        self.progress = "Syncing...".to_string();
    }

    pub fn is_syncing(&self) -> bool {
        self.events.is_some()
    }

    /// Apply every event the ingestion run has queued so far.
    pub fn drain_events(&mut self) {
        let Some(rx) = self.events.take() else {
            return;
        };
        let mut pending = Vec::new();
        let disconnected = loop {
            match rx.try_recv() {
                Ok(event) => pending.push(event),
                Err(TryRecvError::Empty) => break false,
                Err(TryRecvError::Disconnected) => break true,
            }
        };
        if !disconnected {
            self.events = Some(rx);
        }
        for event in pending {
            self.apply_event(event);
        }
    }

    fn apply_event(&mut self, event: IngestEvent) {
        match event {
            IngestEvent::Progress { project, phase } => {
                self.progress = format!("{}: {}", phase, project);
            }
            IngestEvent::ProjectFailed { project, message } => {
                self.set_status(format!("Sync of {} failed: {}", project, message));
            }
            IngestEvent::Commits(commits) => {
                self.view.merge(commits);
                self.clamp_selection();
            }
            IngestEvent::Finished(summary) => {
                self.progress = if summary.failed.is_empty() {
                    format!(
                        "Synced {} projects, {} new commits",
                        summary.succeeded, summary.new_commits
                    )
                } else {
                    format!(
                        "Synced {} projects, {} new commits, failed: {}",
                        summary.succeeded,
                        summary.new_commits,
                        summary.failed.join(", ")
                    )
                };
            }
        }
    }

    fn filter(&self) -> ProjectFilter {
        match self.tab.checked_sub(1).and_then(|i| self.projects.get(i)) {
            Some(project) => ProjectFilter::Project(project.name.clone()),
            None => ProjectFilter::All,
        }
    }

    fn visible(&self) -> Vec<&Commit> {
        self.view.project_filter(&self.filter())
    }

    fn selected_commit(&self) -> Option<&Commit> {
        self.visible().get(self.selection.index).copied()
    }

    fn clamp_selection(&mut self) {
        let len = self.visible().len();
        self.selection.clamp(len);
    }

    fn select_tab(&mut self, tab: usize) {
        if tab <= self.projects.len() {
            self.tab = tab;
            self.selection = Selection::default();
        }
    }

    fn set_status(&mut self, message: impl Into<String>) {
        self.status_message = Some((message.into(), Instant::now()));
    }

    /// Drop the selected commit from the deck and persist its new state.
    fn review_selected(&mut self) {
        let Some(commit) = self.selected_commit().cloned() else {
            return;
        };
        let Some(request) = self.view.mark_reviewed(&commit.hash) else {
            return;
        };
        match self.store.mark_reviewed(&request.project, &request.hash) {
            Ok(_) => self.set_status(format!("Reviewed {}", commit.short_hash())),
            Err(e) => {
                warn!(
                    project = %request.project,
                    hash = %request.hash,
                    error = %e,
                    "review not stored"
                );
                self.view.merge(vec![commit]);
                self.set_status(format!("Failed to store review: {}", e));
            }
        }
        self.clamp_selection();
    }

    fn open_selected(&mut self) {
        let Some(commit) = self.selected_commit() else {
            return;
        };
        let Some(project) = self.projects.iter().find(|p| p.name == commit.project) else {
            let message = format!("No config found for project {}", commit.project);
            self.set_status(message);
            return;
        };
        let result = browse::commit_url(&project.repo, &commit.hash)
            .and_then(|url| browse::open_in_browser(&url));
        if let Err(e) = result {
            self.set_status(format!("Cannot open commit: {}", e));
        }
    }

    /// Handle keyboard input.
    fn handle_input(&mut self, key: event::KeyEvent) {
        if self.show_help {
            // Any key closes help
            self.show_help = false;
            return;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => {
                self.should_quit = true;
            }
            KeyCode::Char('?') => {
                self.show_help = true;
            }
            KeyCode::Char('j') | KeyCode::Down => {
                let len = self.visible().len();
                self.selection.select_next(len);
            }
            KeyCode::Char('k') | KeyCode::Up => {
                self.selection.select_prev();
            }
            KeyCode::Char(c @ '0'..='9') => {
                if let Some(tab) = c.to_digit(10) {
                    self.select_tab(tab as usize);
                }
            }
            KeyCode::Char('r') => self.review_selected(),
            KeyCode::Char('o') => self.open_selected(),
            KeyCode::Char('s') => self.start_sync(),
            _ => {}
        }
    }

    /// Render the UI.
    fn render(&mut self, frame: &mut Frame) {
        // Expire old status messages
        let expired = self
            .status_message
            .as_ref()
            .map(|(_, time)| time.elapsed() >= STATUS_TTL)
            .unwrap_or(false);
        if expired {
            self.status_message = None;
        }

        if self.show_help {
            self.render_help(frame);
            return;
        }

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Min(1),
                Constraint::Length(3),
            ])
            .split(frame.area());

        self.render_header(frame, chunks[0]);
        self.render_commits(frame, chunks[1]);
        self.render_footer(frame, chunks[2]);
    }

    fn render_header(&self, frame: &mut Frame, area: Rect) {
        let mut titles = vec![Line::from("0 all")];
        titles.extend(self.projects.iter().enumerate().map(|(i, p)| {
            if p.icon.is_empty() {
                Line::from(format!("{} {}", i + 1, p.name))
            } else {
                Line::from(format!("{} {} {}", i + 1, p.icon, p.name))
            }
        }));

        let title = if self.progress.is_empty() {
            "Review Deck".to_string()
        } else {
            format!("Review Deck | {}", self.progress)
        };

        let tabs = Tabs::new(titles)
            .select(self.tab)
            .block(Block::default().borders(Borders::ALL).title(title))
            .highlight_style(
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            );
        frame.render_widget(tabs, area);
    }

    fn render_commits(&self, frame: &mut Frame, area: Rect) {
        let visible = self.visible();
        let rows: Vec<Row> = visible
            .iter()
            .map(|commit| {
                let icon = self
                    .projects
                    .iter()
                    .find(|p| p.name == commit.project)
                    .map(|p| p.icon.as_str())
                    .unwrap_or("");
                let when = commit
                    .commit_time
                    .with_timezone(&Local)
                    .format("%d.%m %H:%M")
                    .to_string();

                Row::new(vec![
                    Cell::from(icon.to_string()),
                    Cell::from(commit.slat_score.to_string()),
                    Cell::from(when),
                    Cell::from(commit.short_hash().to_string()),
                    Cell::from(commit.author_name.clone()),
                    Cell::from(commit.subject.clone()),
                ])
                .style(Style::default().fg(score_color(commit.slat_score)))
            })
            .collect();

        let widths = [
            Constraint::Length(3),
            Constraint::Length(4),
            Constraint::Length(12),
            Constraint::Length(7),
            Constraint::Length(20),
            Constraint::Min(10),
        ];

        let header = Row::new(vec!["", "Slat", "When", "Hash", "Author", "Subject"]).style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        );

        let table = Table::new(rows, widths)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!("Unreviewed ({})", visible.len())),
            )
            .header(header)
            .row_highlight_style(Style::default().add_modifier(Modifier::REVERSED))
            .highlight_symbol("> ");

        let mut state = TableState::default();
        if !visible.is_empty() {
            state.select(Some(self.selection.index));
        }
        frame.render_stateful_widget(table, area, &mut state);
    }

    fn render_footer(&self, frame: &mut Frame, area: Rect) {
        let text = match &self.status_message {
            Some((msg, _)) => msg.clone(),
            None => "j/k: navigate  0-9: project  r: reviewed  o: open  s: sync  ?: help  q: quit"
                .to_string(),
        };
        let footer = Paragraph::new(text)
            .block(Block::default().borders(Borders::ALL))
            .wrap(Wrap { trim: false });
        frame.render_widget(footer, area);
    }

    /// Render the help overlay.
    fn render_help(&self, frame: &mut Frame) {
        let help_text = [
            "Review Deck - Keyboard Shortcuts",
            "",
            "Navigation:",
            "  j / Down      - Next commit",
            "  k / Up        - Previous commit",
            "  0             - All projects",
            "  1-9           - Single project",
            "",
            "Actions:",
            "  r             - Mark commit reviewed",
            "  o             - Open commit in browser",
            "  s             - Sync all projects",
            "",
            "Other:",
            "  ?             - Show this help",
            "  q / Esc       - Quit",
            "",
            "Press any key to close this help",
        ];

        let text = Text::from(help_text.iter().map(|&s| Line::from(s)).collect::<Vec<_>>());

        let paragraph = Paragraph::new(text)
            .block(Block::default().borders(Borders::ALL).title("Help"))
            .wrap(Wrap { trim: false });

        let area = centered_rect(60, 80, frame.area());
        frame.render_widget(Clear, area);
        frame.render_widget(paragraph, area);
    }
}

/// Row colour for a slat score: green at 0, red at 100.
pub fn score_color(score: u8) -> Color {
    let score = u16::from(score.min(100));
    let red = (255 * score / 100) as u8;
    let green = (255 * (100 - score) / 100) as u8;
    Color::Rgb(red, green, 0)
}

/// Create a centered rectangle.
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

/// Setup the terminal for TUI rendering.
fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode().context("Failed to enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)
        .context("Failed to enter alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend).context("Failed to create terminal")
}

/// Restore the terminal to its original state.
fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode().context("Failed to disable raw mode")?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )
    .context("Failed to leave alternate screen")?;
    terminal.show_cursor().context("Failed to show cursor")?;
    Ok(())
}

/// Launch the interactive commit deck and start the first sync.
pub fn run_tui<B: RepoBackend + 'static>(mut app: App<B>) -> Result<()> {
    // Setup panic hook to restore terminal
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture);
        original_hook(panic_info);
    }));

    let mut terminal = setup_terminal()?;
    app.start_sync();

    // Main event loop
    let result = (|| -> Result<()> {
        loop {
            app.drain_events();

            terminal
                .draw(|f| app.render(f))
                .context("Failed to draw frame")?;

            if app.should_quit {
                break;
            }

            if event::poll(Duration::from_millis(200)).context("Failed to poll events")?
                && let Event::Key(key) = event::read().context("Failed to read event")?
            {
                // Ignore key release events
                if key.kind == event::KeyEventKind::Press {
                    app.handle_input(key);
                }
            }
        }
        Ok(())
    })();

    // Restore terminal in all cases
    restore_terminal(&mut terminal)?;

    result
}
