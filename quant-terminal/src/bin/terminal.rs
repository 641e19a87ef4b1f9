/// Quant Terminal - single-instrument trading TUI
///
/// Usage:
///   quant-terminal                  run the terminal
///   quant-terminal login <user>     log in, password read from stdin
///   quant-terminal register <user>  create an account
///   quant-terminal logout           drop the stored session
///
/// Keys: [b] buy  [s] sell  [l] logout  [q] quit
use std::{
    collections::VecDeque,
    error::Error,
    fs::OpenOptions,
    io::{self, Write},
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use quant_terminal::{
    AuthClient, ConnectionStatus, FileSessionStore, HttpHistoryClient, HttpOrderGateway, Notice,
    OrderClient, Phase, SessionStore, TerminalConfig, TerminalController, TerminalSnapshot,
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Sparkline},
    Terminal,
};
use rustls::crypto::ring::default_provider;
use tracing::info;
use tracing_subscriber::EnvFilter;

// ============================================================================
// COLORS
// ============================================================================
const C_BUY: Color = Color::Rgb(100, 220, 100);
const C_SELL: Color = Color::Rgb(220, 100, 100);
const C_NEUTRAL: Color = Color::Rgb(180, 180, 100);
const C_DIM: Color = Color::Rgb(120, 120, 120);
const C_BRIGHT: Color = Color::Rgb(220, 220, 220);
const C_ACCENT: Color = Color::Rgb(100, 180, 220);
const C_HEADER: Color = Color::Rgb(180, 130, 220);

const MAX_NOTICES: usize = 5;
const DRAW_INTERVAL: Duration = Duration::from_millis(50);

// ============================================================================
// MAIN
// ============================================================================
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let _ = default_provider().install_default();

    let config = TerminalConfig::from_env()?;
    init_logging(&config.log_file)?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None => run_terminal(config).await,
        Some("login") => {
            let user_id = user_arg(&args)?;
            let password = read_password()?;
            let session = auth_client(&config)?.login(user_id, &password).await?;
            println!("Logged in as {}", session.user_id);
            Ok(())
        }
        Some("register") => {
            let user_id = user_arg(&args)?;
            let password = read_password()?;
            let message = auth_client(&config)?.register(user_id, &password).await?;
            println!("{}", message);
            Ok(())
        }
        Some("logout") => {
            let store = FileSessionStore::new(&config.session_file);
            if auth_client(&config)?.logout()? {
                println!("Logged out, removed {}", store.path().display());
            } else {
                println!("No session stored at {}", store.path().display());
            }
            Ok(())
        }
        Some(other) => Err(format!("unknown command '{}' (expected login, register or logout)", other).into()),
    }
}

fn init_logging(path: &Path) -> Result<(), Box<dyn Error>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

fn user_arg(args: &[String]) -> Result<&str, Box<dyn Error>> {
    args.get(1)
        .map(String::as_str)
        .ok_or_else(|| "missing <user> argument".into())
}

fn read_password() -> Result<String, Box<dyn Error>> {
    eprint!("Password: ");
    io::stderr().flush()?;
    let mut password = String::new();
    io::stdin().read_line(&mut password)?;
    Ok(password.trim_end_matches(['\r', '\n']).to_string())
}

fn auth_client(config: &TerminalConfig) -> Result<AuthClient, Box<dyn Error>> {
    Ok(AuthClient::new(
        reqwest::Client::new(),
        config.login_url()?,
        config.register_url()?,
        Arc::new(FileSessionStore::new(&config.session_file)),
    ))
}

// ============================================================================
// TERMINAL
// ============================================================================
async fn run_terminal(config: TerminalConfig) -> Result<(), Box<dyn Error>> {
    let sessions: Arc<dyn SessionStore> = Arc::new(FileSessionStore::new(&config.session_file));
    let client = reqwest::Client::new();
    let history = HttpHistoryClient::new(client.clone(), config.history_url()?);
    let orders = OrderClient::new(Arc::new(HttpOrderGateway::new(client, config.order_url()?)))
        .with_timeout(config.order_timeout);

    info!(ticker = %config.ticker, api = %config.api_url, ws = %config.ws_url, "starting terminal");
    let controller = TerminalController::new((&config).into(), sessions, Arc::new(history), orders);
    let (handle, mut notices) = controller.mount();

    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        original_hook(info);
    }));

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut log: VecDeque<(Color, String)> = VecDeque::with_capacity(MAX_NOTICES);
    let mut last_draw = Instant::now();

    let result: Result<(), Box<dyn Error>> = loop {
        if event::poll(Duration::from_millis(5))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => break Ok(()),
                        KeyCode::Char('b') | KeyCode::Char('B') => handle.buy(),
                        KeyCode::Char('s') | KeyCode::Char('S') => handle.sell(),
                        KeyCode::Char('l') | KeyCode::Char('L') => handle.logout(),
                        _ => {}
                    }
                }
            }
        }

        while let Ok(notice) = notices.try_recv() {
            if log.len() == MAX_NOTICES {
                log.pop_front();
            }
            log.push_back(describe(&notice));
        }

        if last_draw.elapsed() >= DRAW_INTERVAL {
            let snapshot = handle.snapshot();
            terminal.draw(|f| render_ui(f, f.area(), &snapshot, &log))?;
            last_draw = Instant::now();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };

    handle.unmount().await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    result
}

fn describe(notice: &Notice) -> (Color, String) {
    match notice {
        Notice::LoginRequired => (
            C_NEUTRAL,
            "Login required: run `quant-terminal login <user>`".to_string(),
        ),
        Notice::OrderFilled { side, fill } => (
            if side.is_buy() { C_BUY } else { C_SELL },
            format!(
                "{} filled @ {:.2}, balance {:.2}",
                side, fill.execution_price, fill.new_balance
            ),
        ),
        Notice::OrderRejected { kind, message } => (
            if kind.is_recoverable() { C_NEUTRAL } else { C_SELL },
            message.clone(),
        ),
        Notice::SessionExpired => (
            C_SELL,
            "Session expired. Please login again.".to_string(),
        ),
        Notice::Disconnected(reason) => (C_NEUTRAL, format!("Feed unavailable: {}", reason)),
        Notice::BackfillFailed(reason) => (C_NEUTRAL, format!("History unavailable: {}", reason)),
    }
}

// ============================================================================
// RENDER
// ============================================================================
fn render_ui(
    f: &mut ratatui::Frame,
    area: Rect,
    snapshot: &TerminalSnapshot,
    log: &VecDeque<(Color, String)>,
) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(5),
            Constraint::Min(6),
            Constraint::Length(MAX_NOTICES as u16 + 2),
            Constraint::Length(1),
        ])
        .split(area);

    render_header(f, chunks[0], snapshot);
    render_cards(f, chunks[1], snapshot);
    render_chart(f, chunks[2], snapshot);
    render_notices(f, chunks[3], log);
    render_footer(f, chunks[4]);
}

/// Header: Ticker | Phase | Connection | User
fn render_header(f: &mut ratatui::Frame, area: Rect, snapshot: &TerminalSnapshot) {
    let block = Block::default()
        .title(format!(" {} ", snapshot.ticker))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(C_HEADER));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let (status, status_color) = match snapshot.connection {
        ConnectionStatus::Connected => ("[LIVE]", C_BUY),
        ConnectionStatus::Reconnecting => ("[RECONNECTING]", C_NEUTRAL),
        ConnectionStatus::Disconnected => ("[DISC]", C_SELL),
    };
    let phase_color = match snapshot.phase {
        Phase::Live => C_BUY,
        Phase::Trading | Phase::Loading => C_NEUTRAL,
        _ => C_SELL,
    };

    let mut spans = vec![
        Span::styled(status, Style::default().fg(status_color).add_modifier(Modifier::BOLD)),
        Span::raw("  "),
        Span::styled(snapshot.phase.label(), Style::default().fg(phase_color)),
    ];
    if snapshot.pending_orders > 0 {
        spans.push(Span::styled(
            format!("  {} pending", snapshot.pending_orders),
            Style::default().fg(C_NEUTRAL),
        ));
    }
    spans.push(Span::raw("  │  "));
    spans.push(Span::styled(
        snapshot.user_id.as_deref().unwrap_or("not logged in"),
        Style::default().fg(C_DIM),
    ));

    f.render_widget(Paragraph::new(Line::from(spans)), inner);
}

/// Price and balance cards
fn render_cards(f: &mut ratatui::Frame, area: Rect, snapshot: &TerminalSnapshot) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    let price = snapshot
        .current_price
        .map(|p| format!("{:.2}", p))
        .unwrap_or_else(|| "--".to_string());
    let trend_color = match (snapshot.history.first(), snapshot.current_price) {
        (Some(first), Some(last)) if last > first.value => C_BUY,
        (Some(first), Some(last)) if last < first.value => C_SELL,
        _ => C_BRIGHT,
    };

    let cards = [
        (" PRICE ", price, trend_color),
        (" BALANCE ", format!("{:.2}", snapshot.balance), C_ACCENT),
    ];
    for ((title, value, color), col) in cards.into_iter().zip(cols.iter()) {
        let block = Block::default()
            .title(title)
            .borders(Borders::ALL)
            .border_style(Style::default().fg(C_DIM));
        let inner = block.inner(*col);
        f.render_widget(block, *col);
        f.render_widget(
            Paragraph::new(Line::from(Span::styled(
                value,
                Style::default().fg(color).add_modifier(Modifier::BOLD),
            )))
            .alignment(Alignment::Center),
            inner,
        );
    }
}

/// Sparkline over the rolling history, rescaled to its own min/max
fn render_chart(f: &mut ratatui::Frame, area: Rect, snapshot: &TerminalSnapshot) {
    let (min, max) = snapshot
        .history
        .iter()
        .fold((f64::MAX, f64::MIN), |(lo, hi), s| (lo.min(s.value), hi.max(s.value)));

    let title = if snapshot.history.is_empty() {
        " HISTORY ".to_string()
    } else {
        format!(" HISTORY  {:.2} - {:.2}  ({} pts) ", min, max, snapshot.history.len())
    };
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(C_DIM));

    let range = (max - min).max(f64::EPSILON);
    let data: Vec<u64> = snapshot
        .history
        .iter()
        .map(|s| 1 + ((s.value - min) / range * 100.0) as u64)
        .collect();

    f.render_widget(
        Sparkline::default()
            .block(block)
            .data(&data)
            .style(Style::default().fg(C_ACCENT)),
        area,
    );
}

fn render_notices(f: &mut ratatui::Frame, area: Rect, log: &VecDeque<(Color, String)>) {
    let block = Block::default()
        .title(" NOTICES ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(C_DIM));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let lines: Vec<Line> = log
        .iter()
        .rev()
        .map(|(color, text)| Line::from(Span::styled(text.as_str(), Style::default().fg(*color))))
        .collect();
    f.render_widget(Paragraph::new(lines), inner);
}

/// Footer
fn render_footer(f: &mut ratatui::Frame, area: Rect) {
    let key = |k: &'static str, color: Color| {
        Span::styled(k, Style::default().fg(color).add_modifier(Modifier::BOLD))
    };

    let line = Line::from(vec![
        Span::raw(" ["),
        key("B", C_BUY),
        Span::raw("]uy  ["),
        key("S", C_SELL),
        Span::raw("]ell  ["),
        key("L", C_NEUTRAL),
        Span::raw("]ogout  │  "),
        Span::styled("QUANT TERMINAL", Style::default().fg(C_HEADER)),
        Span::raw("  │  [q] Quit"),
    ]);

    f.render_widget(Paragraph::new(line), area);
}
