// 🖥️ Terminal dashboard - KPI tiles over the roster plus the company table
use accounts_tracker::{Company, CompanyStore, Event as AuditEvent, KpiCounts};
use anyhow::Result;
use chrono::NaiveDate;
use crossterm::{
    event::{self, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::io;

const PAGE_SIZE: usize = 20;

pub struct App<'a> {
    store: &'a CompanyStore,
    pub companies: Vec<Company>,
    pub kpis: KpiCounts,
    pub state: TableState,
    pub cutoff: NaiveDate,
    pub today: NaiveDate,
    pub search: String,
    pub search_mode: bool,
    pub show_detail: bool,
    pub message: Option<String>,
    events: Vec<AuditEvent>,
}

impl<'a> App<'a> {
    pub fn new(store: &'a CompanyStore, cutoff: NaiveDate, today: NaiveDate) -> Result<Self> {
        let mut app = Self {
            store,
            companies: Vec::new(),
            kpis: KpiCounts::default(),
            state: TableState::default(),
            cutoff,
            today,
            search: String::new(),
            search_mode: false,
            show_detail: false,
            message: None,
            events: Vec::new(),
        };
        app.reload()?;
        Ok(app)
    }

    /// Re-read the view and KPIs. Tiles always cover the whole roster; the
    /// search term only narrows the table.
    pub fn reload(&mut self) -> Result<()> {
        self.kpis = KpiCounts::compute(&self.store.list_all()?, self.cutoff, self.today);
        self.companies = self.store.view(Some(&self.search))?;

        let selected = match (self.state.selected(), self.companies.len()) {
            (_, 0) => None,
            (Some(i), len) => Some(i.min(len - 1)),
            (None, _) => Some(0),
        };
        self.state.select(selected);
        self.load_events()?;
        Ok(())
    }

    fn load_events(&mut self) -> Result<()> {
        self.events = match (self.show_detail, self.selected_company()) {
            (true, Some(company)) => self.store.events_for(&company.number)?,
            _ => Vec::new(),
        };
        Ok(())
    }

    pub fn selected_company(&self) -> Option<&Company> {
        self.state.selected().and_then(|i| self.companies.get(i))
    }

    /// Move the selected company to the next internal status
    pub fn advance_status(&mut self) -> Result<()> {
        let Some(company) = self.selected_company() else {
            return Ok(());
        };
        let number = company.number.clone();
        let next = company.internal_status.next();

        self.store.set_internal_status(&number, next.as_str())?;
        self.message = Some(format!("✓ {} → {}", number, next));
        self.reload()
    }

    pub fn toggle_detail(&mut self) -> Result<()> {
        self.show_detail = !self.show_detail;
        self.load_events()
    }

    pub fn apply_search(&mut self) -> Result<()> {
        self.search_mode = false;
        self.state.select(Some(0));
        self.reload()
    }

    pub fn clear_search(&mut self) -> Result<()> {
        self.search.clear();
        self.apply_search()
    }

    fn select(&mut self, index: usize) -> Result<()> {
        if !self.companies.is_empty() {
            self.state.select(Some(index.min(self.companies.len() - 1)));
        }
        self.load_events()
    }

    pub fn next(&mut self) -> Result<()> {
        let len = self.companies.len();
        let i = match self.state.selected() {
            Some(i) if i + 1 < len => i + 1,
            _ => 0,
        };
        self.select(i)
    }

    pub fn previous(&mut self) -> Result<()> {
        let len = self.companies.len();
        let i = match self.state.selected() {
            Some(0) | None => len.saturating_sub(1),
            Some(i) => i - 1,
        };
        self.select(i)
    }

    pub fn page_down(&mut self) -> Result<()> {
        let i = self.state.selected().map(|i| i + PAGE_SIZE).unwrap_or(0);
        self.select(i)
    }

    pub fn page_up(&mut self) -> Result<()> {
        let i = self.state.selected().map(|i| i.saturating_sub(PAGE_SIZE)).unwrap_or(0);
        self.select(i)
    }
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res
}

fn run_app<B: ratatui::backend::Backend>(terminal: &mut Terminal<B>, app: &mut App) -> Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        let Event::Key(key) = event::read()? else {
            continue;
        };

        if app.search_mode {
            match key.code {
                KeyCode::Enter => app.apply_search()?,
                KeyCode::Esc => app.clear_search()?,
                KeyCode::Backspace => {
                    app.search.pop();
                }
                KeyCode::Char(c) => app.search.push(c),
                _ => {}
            }
            continue;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
            KeyCode::Char('s') => app.advance_status()?,
            KeyCode::Char('/') => app.search_mode = true,
            KeyCode::Char('c') => app.clear_search()?,
            KeyCode::Char('r') => app.reload()?,
            KeyCode::Enter => app.toggle_detail()?,
            KeyCode::Down | KeyCode::Char('j') => app.next()?,
            KeyCode::Up | KeyCode::Char('k') => app.previous()?,
            KeyCode::PageDown => app.page_down()?,
            KeyCode::PageUp => app.page_up()?,
            KeyCode::Home => app.select(0)?,
            KeyCode::End => app.select(usize::MAX)?,
            _ => {}
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4), // KPI tiles
            Constraint::Min(0),    // Company table
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_tiles(f, chunks[0], app);

    if app.show_detail {
        let content = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(chunks[1]);

        render_table(f, content[0], app);
        render_detail_panel(f, content[1], app);
    } else {
        render_table(f, chunks[1], app);
    }

    render_status_bar(f, chunks[2], app);
}

fn render_tiles(f: &mut Frame, area: Rect, app: &App) {
    let tiles = [
        (format!("Outstanding ≤ {}", app.cutoff.format("%d %b %Y")), app.kpis.outstanding, Color::Cyan),
        ("Ready to Submit".to_string(), app.kpis.ready, Color::Green),
        ("Sent to Client".to_string(), app.kpis.sent, Color::Blue),
        ("Missing Information".to_string(), app.kpis.missing, Color::Yellow),
        ("Overdue".to_string(), app.kpis.overdue, Color::Red),
    ];

    let cells = Layout::default()
        .direction(Direction::Horizontal)
        .constraints(tiles.iter().map(|_| Constraint::Ratio(1, tiles.len() as u32)))
        .split(area);

    for ((label, value, color), cell) in tiles.into_iter().zip(cells.iter()) {
        let tile = Paragraph::new(Line::from(Span::styled(
            value.to_string(),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        )))
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(color))
                .title(format!(" {} ", label)),
        );
        f.render_widget(tile, *cell);
    }
}

fn status_color(company: &Company) -> Color {
    use accounts_tracker::InternalStatus::*;
    match company.internal_status {
        NotStarted => Color::DarkGray,
        Started => Color::White,
        SentToClient => Color::Blue,
        MissingInformation => Color::Yellow,
        ReadyToSubmit => Color::Green,
    }
}

fn render_table(f: &mut Frame, area: Rect, app: &mut App) {
    let header_cells = ["Deadline", "Days", "Number", "Company", "Status", "Filed"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)));

    let header = Row::new(header_cells)
        .style(Style::default().bg(Color::DarkGray))
        .height(1);

    let today = app.today;
    let rows = app.companies.iter().map(|company| {
        let days = company.days_until(today);
        let days_color = if days < 0 {
            Color::Red
        } else if days <= 30 {
            Color::Yellow
        } else {
            Color::White
        };
        let filed = if company.filed_with_registry { "✓" } else { "" };

        Row::new(vec![
            Cell::from(company.deadline_str()),
            Cell::from(days.to_string()).style(Style::default().fg(days_color)),
            Cell::from(company.number.clone()),
            Cell::from(truncate(&company.name, 40)),
            Cell::from(company.internal_status.as_str()).style(Style::default().fg(status_color(company))),
            Cell::from(filed).style(Style::default().fg(Color::Green)),
        ])
        .height(1)
    });

    let title = if app.search.is_empty() {
        format!(" Companies ({}) ", app.companies.len())
    } else {
        format!(" Companies matching '{}' ({}) ", app.search, app.companies.len())
    };

    let table = Table::new(
        rows,
        [
            Constraint::Length(12),
            Constraint::Length(6),
            Constraint::Length(10),
            Constraint::Min(20),
            Constraint::Length(21),
            Constraint::Length(6),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(title),
    )
    .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.state);
}

fn render_detail_panel(f: &mut Frame, area: Rect, app: &App) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Company Details ");

    let Some(company) = app.selected_company() else {
        f.render_widget(Paragraph::new("No company selected").block(block), area);
        return;
    };

    let label = |text: &'static str| Span::styled(text, Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD));

    let mut content = vec![
        Line::from(""),
        Line::from(vec![label("  Name: "), Span::raw(company.name.clone())]),
        Line::from(vec![label("  Number: "), Span::raw(company.number.clone())]),
        Line::from(vec![label("  Deadline: "), Span::raw(company.deadline_str())]),
        Line::from(vec![
            label("  Status: "),
            Span::styled(company.internal_status.as_str(), Style::default().fg(status_color(company))),
        ]),
        Line::from(vec![
            label("  Filed: "),
            Span::raw(if company.filed_with_registry { "yes" } else { "no" }),
        ]),
        Line::from(vec![
            label("  Updated: "),
            Span::raw(company.last_updated.format("%Y-%m-%d %H:%M").to_string()),
        ]),
        Line::from(""),
        Line::from(Span::styled(
            "  HISTORY",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
        )),
        Line::from(""),
    ];

    for event in app.events.iter().take(10) {
        content.push(Line::from(vec![
            Span::styled(
                format!("  {} ", event.timestamp.format("%Y-%m-%d")),
                Style::default().fg(Color::DarkGray),
            ),
            Span::raw(event.event_type.clone()),
            Span::styled(format!(" ({})", event.actor), Style::default().fg(Color::DarkGray)),
        ]));
    }

    f.render_widget(Paragraph::new(content).block(block), area);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let selected = app.state.selected().map(|i| i + 1).unwrap_or(0);
    let key = |k: &'static str| Span::styled(k, Style::default().fg(Color::Yellow));

    let spans = if app.search_mode {
        vec![
            Span::styled(" Search: ", Style::default().fg(Color::Cyan)),
            Span::raw(app.search.clone()),
            Span::styled("▏", Style::default().fg(Color::Yellow)),
            Span::raw("  "),
            key("Enter"),
            Span::raw(" apply | "),
            key("Esc"),
            Span::raw(" clear"),
        ]
    } else {
        let mut spans = vec![
            Span::styled(format!(" Row: {}/{} ", selected, app.companies.len()), Style::default().fg(Color::Cyan)),
            Span::raw(" | "),
        ];
        if let Some(message) = &app.message {
            spans.push(Span::styled(message.clone(), Style::default().fg(Color::Green)));
            spans.push(Span::raw(" | "));
        }
        spans.extend([
            key("↑/↓"),
            Span::raw(" Nav | "),
            key("s"),
            Span::raw(" Next status | "),
            key("/"),
            Span::raw(" Search | "),
            key("Enter"),
            Span::raw(" Details | "),
            Span::styled("q", Style::default().fg(Color::Red)),
            Span::raw(" Quit"),
        ]);
        spans
    };

    let status_bar = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accounts_tracker::InternalStatus;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn seeded_store() -> CompanyStore {
        let store = CompanyStore::open_in_memory().unwrap();
        for (number, name, deadline) in [
            ("00000002", "Beta Ltd", "2026-06-01"),
            ("00000001", "Acme Ltd", "2026-05-01"),
            ("00000003", "Gamma Ltd", "2026-09-01"),
        ] {
            store.upsert_if_absent(&Company::new(number, name, date(deadline))).unwrap();
        }
        store
    }

    #[test]
    fn test_navigation_wraps() {
        let store = seeded_store();
        let mut app = App::new(&store, date("2026-07-31"), date("2026-01-01")).unwrap();

        assert_eq!(app.selected_company().unwrap().number, "00000001");
        app.previous().unwrap();
        assert_eq!(app.selected_company().unwrap().number, "00000003");
        app.next().unwrap();
        assert_eq!(app.selected_company().unwrap().number, "00000001");
        app.page_down().unwrap();
        assert_eq!(app.state.selected(), Some(2));
    }

    #[test]
    fn test_advance_status_writes_through_store() {
        let store = seeded_store();
        let mut app = App::new(&store, date("2026-07-31"), date("2026-01-01")).unwrap();

        app.advance_status().unwrap();
        app.advance_status().unwrap();

        assert_eq!(store.get("00000001").unwrap().internal_status, InternalStatus::SentToClient);
        assert_eq!(app.kpis.sent, 1);
        assert!(app.message.as_deref().unwrap_or("").contains("Sent to Client"));
    }

    #[test]
    fn test_search_narrows_table_but_not_tiles() {
        let store = seeded_store();
        let mut app = App::new(&store, date("2026-07-31"), date("2026-01-01")).unwrap();

        app.search = "gamma".to_string();
        app.apply_search().unwrap();

        assert_eq!(app.companies.len(), 1);
        assert_eq!(app.kpis.outstanding, 2);

        app.clear_search().unwrap();
        assert_eq!(app.companies.len(), 3);
    }

    #[test]
    fn test_empty_store() {
        let store = CompanyStore::open_in_memory().unwrap();
        let mut app = App::new(&store, date("2026-07-31"), date("2026-01-01")).unwrap();

        assert!(app.selected_company().is_none());
        app.next().unwrap();
        app.advance_status().unwrap();
        assert!(app.message.is_none());
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("Café Ünïcode Holdings", 10), "Café Ün...");
        assert_eq!(truncate("Acme", 10), "Acme");
    }
}
