use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use rusqlite::Connection;
use rust_decimal::Decimal;
use std::io;
use toll_collect::{
    count_scans, format_millis, get_bill_by_mail_exports, get_recent_account_transactions, get_recent_scans,
    get_top_up_exports, AccountTransaction, ScanRecord, TxType,
};

const PAGE_JUMP: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    ScanHistory,
    AccountHistory,
    Exports,
}

impl Page {
    pub const ALL: [Page; 3] = [Page::ScanHistory, Page::AccountHistory, Page::Exports];

    pub fn next(&self) -> Self {
        match self {
            Page::ScanHistory => Page::AccountHistory,
            Page::AccountHistory => Page::Exports,
            Page::Exports => Page::ScanHistory,
        }
    }

    pub fn previous(&self) -> Self {
        match self {
            Page::ScanHistory => Page::Exports,
            Page::AccountHistory => Page::ScanHistory,
            Page::Exports => Page::AccountHistory,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Page::ScanHistory => "Scan History",
            Page::AccountHistory => "Account History",
            Page::Exports => "Exports",
        }
    }

    fn index(&self) -> usize {
        match self {
            Page::ScanHistory => 0,
            Page::AccountHistory => 1,
            Page::Exports => 2,
        }
    }
}

/// One line on the Exports page; both export tables share the columns
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRow {
    pub kind: &'static str,
    pub timestamp: i64,
    pub target: String,
    pub reason: String,
    pub amount: Decimal,
    pub handoff_key: String,
}

pub struct App {
    conn: Connection,
    limit: usize,
    pub scans: Vec<ScanRecord>,
    pub transactions: Vec<AccountTransaction>,
    pub exports: Vec<ExportRow>,
    pub total_scans: i64,
    pub current_page: Page,
    states: [TableState; 3],
}

impl App {
    pub fn new(conn: Connection, limit: usize) -> Result<Self> {
        let mut app = Self {
            conn,
            limit,
            scans: Vec::new(),
            transactions: Vec::new(),
            exports: Vec::new(),
            total_scans: 0,
            current_page: Page::ScanHistory,
            states: Default::default(),
        };
        app.reload()?;
        Ok(app)
    }

    /// Re-read every page from the database, keeping selections in range
    pub fn reload(&mut self) -> Result<()> {
        self.scans = get_recent_scans(&self.conn, self.limit)?;
        self.transactions = get_recent_account_transactions(&self.conn, self.limit)?;
        self.total_scans = count_scans(&self.conn)?;

        let mut exports: Vec<ExportRow> = get_top_up_exports(&self.conn, None)?
            .into_iter()
            .map(|e| ExportRow {
                kind: "TOP-UP",
                timestamp: e.acct_tx_timestamp,
                target: format!("acct {}", e.account_id),
                reason: "AUTO_TOPUP".to_string(),
                amount: e.amount,
                handoff_key: e.handoff_key,
            })
            .collect();
        exports.extend(get_bill_by_mail_exports(&self.conn, None)?.into_iter().map(|e| ExportRow {
            kind: "BILL-BY-MAIL",
            timestamp: e.scan_timestamp,
            target: e.plate_num,
            reason: e.toll_reason,
            amount: e.total_amount,
            handoff_key: e.handoff_key,
        }));
        exports.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        exports.truncate(self.limit);
        self.exports = exports;

        for page in Page::ALL {
            let len = self.page_len(page);
            let state = &mut self.states[page.index()];
            state.select(match state.selected() {
                _ if len == 0 => None,
                Some(i) => Some(i.min(len - 1)),
                None => Some(0),
            });
        }

        Ok(())
    }

    fn page_len(&self, page: Page) -> usize {
        match page {
            Page::ScanHistory => self.scans.len(),
            Page::AccountHistory => self.transactions.len(),
            Page::Exports => self.exports.len(),
        }
    }

    pub fn selected(&self) -> Option<usize> {
        self.states[self.current_page.index()].selected()
    }

    fn select(&mut self, index: Option<usize>) {
        self.states[self.current_page.index()].select(index);
    }

    pub fn next_page(&mut self) {
        self.current_page = self.current_page.next();
    }

    pub fn previous_page(&mut self) {
        self.current_page = self.current_page.previous();
    }

    pub fn next(&mut self) {
        let len = self.page_len(self.current_page);
        if len == 0 {
            return;
        }
        let i = match self.selected() {
            Some(i) if i < len - 1 => i + 1,
            _ => 0,
        };
        self.select(Some(i));
    }

    pub fn previous(&mut self) {
        let len = self.page_len(self.current_page);
        if len == 0 {
            return;
        }
        let i = match self.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        self.select(Some(i));
    }

    pub fn page_down(&mut self) {
        let len = self.page_len(self.current_page);
        if len == 0 {
            return;
        }
        let i = self.selected().map(|i| (i + PAGE_JUMP).min(len - 1)).unwrap_or(0);
        self.select(Some(i));
    }

    pub fn page_up(&mut self) {
        if self.page_len(self.current_page) == 0 {
            return;
        }
        let i = self.selected().map(|i| i.saturating_sub(PAGE_JUMP)).unwrap_or(0);
        self.select(Some(i));
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

        if let Event::Key(key) = event::read()? {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Tab => app.next_page(),
                KeyCode::BackTab => app.previous_page(),
                KeyCode::Char('r') => app.reload()?,
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return Ok(()),
                KeyCode::Down | KeyCode::Char('j') => app.next(),
                KeyCode::Up | KeyCode::Char('k') => app.previous(),
                KeyCode::PageDown => app.page_down(),
                KeyCode::PageUp => app.page_up(),
                KeyCode::Home => app.select(Some(0)),
                _ => {}
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header with navigation
            Constraint::Min(0),    // Content area
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    match app.current_page {
        Page::ScanHistory => render_scans(f, chunks[1], app),
        Page::AccountHistory => render_transactions(f, chunks[1], app),
        Page::Exports => render_exports(f, chunks[1], app),
    }

    render_status_bar(f, chunks[2], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let mut tab_spans = vec![];
    for (i, page) in Page::ALL.iter().enumerate() {
        if i > 0 {
            tab_spans.push(Span::raw(" │ "));
        }

        let style = if *page == app.current_page {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };

        tab_spans.push(Span::styled(page.title().to_string(), style));
    }

    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("Scans retained: {}", app.total_scans),
        Style::default().fg(Color::White),
    ));

    let header = Paragraph::new(vec![Line::from(tab_spans)])
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Cyan)));

    f.render_widget(header, area);
}

fn header_row(titles: &[&'static str]) -> Row<'static> {
    let cells = titles.iter().map(|h| {
        Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
    });
    Row::new(cells).style(Style::default().bg(Color::DarkGray)).height(1)
}

fn framed<'a>(table: Table<'a>, title: &'a str) -> Table<'a> {
    table
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::White))
                .title(title),
        )
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("→ ")
}

fn render_scans(f: &mut Frame, area: Rect, app: &mut App) {
    let rows = app.scans.iter().map(|scan| {
        let color = if scan.has_account() { Color::Green } else { Color::Red };
        Row::new(vec![
            Cell::from(scan.scanned_at()),
            Cell::from(scan.plate_num.clone()).style(Style::default().fg(color)),
            Cell::from(scan.account_id.to_string()),
            Cell::from(truncate(&scan.toll_loc, 20)),
            Cell::from(scan.toll_lane_num.clone()),
            Cell::from(truncate(&scan.toll_reason, 28)),
            Cell::from(scan.total_amount.to_string()),
        ])
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(24),
            Constraint::Length(8),
            Constraint::Length(8),
            Constraint::Length(22),
            Constraint::Length(5),
            Constraint::Length(30),
            Constraint::Length(10),
        ],
    )
    .header(header_row(&["Time", "Plate", "Account", "Location", "Lane", "Reason", "Total"]));

    f.render_stateful_widget(framed(table, " Scan History "), area, &mut app.states[0]);
}

fn render_transactions(f: &mut Frame, area: Rect, app: &mut App) {
    let rows = app.transactions.iter().map(|tx| {
        let color = match tx.tx_type {
            TxType::Credit => Color::Green,
            TxType::Debit => Color::Red,
        };
        let plate = tx.scan.as_ref().map(|s| s.plate_num.clone()).unwrap_or_default();
        Row::new(vec![
            Cell::from(format_millis(tx.acct_tx_timestamp)),
            Cell::from(tx.account_id.to_string()),
            Cell::from(tx.tx_type.as_str()).style(Style::default().fg(color)),
            Cell::from(plate),
            Cell::from(truncate(&tx.toll_reason, 28)),
            Cell::from(tx.tx_fee_amount.map(|d| d.to_string()).unwrap_or_default()),
            Cell::from(tx.total_amount.to_string()).style(Style::default().fg(color)),
        ])
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(24),
            Constraint::Length(8),
            Constraint::Length(7),
            Constraint::Length(8),
            Constraint::Length(30),
            Constraint::Length(8),
            Constraint::Length(10),
        ],
    )
    .header(header_row(&["Time", "Account", "Type", "Plate", "Reason", "Fee", "Total"]));

    f.render_stateful_widget(framed(table, " Account History "), area, &mut app.states[1]);
}

fn render_exports(f: &mut Frame, area: Rect, app: &mut App) {
    let rows = app.exports.iter().map(|e| {
        let color = if e.kind == "TOP-UP" { Color::Cyan } else { Color::Magenta };
        Row::new(vec![
            Cell::from(format_millis(e.timestamp)),
            Cell::from(e.kind).style(Style::default().fg(color)),
            Cell::from(e.target.clone()),
            Cell::from(truncate(&e.reason, 28)),
            Cell::from(e.amount.to_string()),
            Cell::from(truncate(&e.handoff_key, 15)),
        ])
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(24),
            Constraint::Length(13),
            Constraint::Length(10),
            Constraint::Length(30),
            Constraint::Length(10),
            Constraint::Length(16),
        ],
    )
    .header(header_row(&["Time", "Kind", "Target", "Reason", "Amount", "Key"]));

    f.render_stateful_widget(framed(table, " Exports "), area, &mut app.states[2]);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let selected = app.selected().map(|i| i + 1).unwrap_or(0);
    let total = app.page_len(app.current_page);

    let status_spans = vec![
        Span::styled(format!(" Row: {}/{} ", selected, total), Style::default().fg(Color::Cyan)),
        Span::raw(" | "),
        Span::styled("Tab", Style::default().fg(Color::Yellow)),
        Span::raw(" Page | "),
        Span::styled("j/k", Style::default().fg(Color::Yellow)),
        Span::raw(" Nav | "),
        Span::styled("r", Style::default().fg(Color::Yellow)),
        Span::raw(" Reload | "),
        Span::styled("q", Style::default().fg(Color::Red)),
        Span::raw(" Quit"),
    ];

    let status_bar = Paragraph::new(vec![Line::from(status_spans)]).block(
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
