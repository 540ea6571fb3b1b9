//! Watch command - live view driven by a core watch session.
//!
//! A blocking thread reads terminal keys and turns them into
//! [`UiEvent`]s; the async loop forwards session inputs and redraws on
//! every frame or prompt change.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use crossterm::cursor::MoveTo;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{self, Clear, ClearType};
use crossterm::{execute, queue};
use portview_core::{
    ContainerAction, LogOptions, SessionInput, WatchConfig, WatchFrame, WatchHandle,
};
use tokio::sync::mpsc;
use tracing::debug;

use crate::output::{self, Palette};
use crate::Settings;

/// What the input thread tells the render loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Input(SessionInput),
    Prompt(Prompt),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Prompt {
    #[default]
    None,
    Filter(String),
    ConfirmKill { force: bool },
}

/// Key handling with the two modal prompts.
#[derive(Debug, Default)]
pub struct KeyMapper {
    prompt: Prompt,
    log_tail: usize,
}

impl KeyMapper {
    pub fn new(log_tail: usize) -> Self {
        Self {
            prompt: Prompt::None,
            log_tail,
        }
    }

    fn set_prompt(&mut self, prompt: Prompt, events: &mut Vec<UiEvent>) {
        self.prompt = prompt.clone();
        events.push(UiEvent::Prompt(prompt));
    }

    pub fn handle(&mut self, key: KeyEvent) -> Vec<UiEvent> {
        let mut events = Vec::new();

        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            events.push(UiEvent::Input(SessionInput::Quit));
            return events;
        }

        match self.prompt.clone() {
            Prompt::Filter(mut text) => match key.code {
                KeyCode::Enter => self.set_prompt(Prompt::None, &mut events),
                KeyCode::Esc => {
                    events.push(UiEvent::Input(SessionInput::SetFilter(String::new())));
                    self.set_prompt(Prompt::None, &mut events);
                }
                KeyCode::Backspace => {
                    text.pop();
                    events.push(UiEvent::Input(SessionInput::SetFilter(text.clone())));
                    self.set_prompt(Prompt::Filter(text), &mut events);
                }
                KeyCode::Char(c) => {
                    text.push(c);
                    events.push(UiEvent::Input(SessionInput::SetFilter(text.clone())));
                    self.set_prompt(Prompt::Filter(text), &mut events);
                }
                _ => {}
            },
            Prompt::ConfirmKill { force } => {
                if matches!(key.code, KeyCode::Char('y') | KeyCode::Char('Y')) {
                    events.push(UiEvent::Input(SessionInput::Kill { force }));
                }
                self.set_prompt(Prompt::None, &mut events);
            }
            Prompt::None => {
                let input = match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => Some(SessionInput::Quit),
                    KeyCode::Char('j') | KeyCode::Down => Some(SessionInput::SelectNext),
                    KeyCode::Char('k') | KeyCode::Up => Some(SessionInput::SelectPrev),
                    KeyCode::Char('g') | KeyCode::Home => Some(SessionInput::SelectFirst),
                    KeyCode::Char('G') | KeyCode::End => Some(SessionInput::SelectLast),
                    KeyCode::Char('>') => Some(SessionInput::SortNext),
                    KeyCode::Char('<') => Some(SessionInput::SortPrev),
                    KeyCode::Char('r') => Some(SessionInput::ToggleDirection),
                    KeyCode::Char(' ') => Some(SessionInput::Refresh),
                    KeyCode::Char(c @ '1'..='9') => {
                        Some(SessionInput::SortColumn(c as usize - '1' as usize))
                    }
                    KeyCode::Char('s') => Some(SessionInput::Container(ContainerAction::Stop)),
                    KeyCode::Char('R') => Some(SessionInput::Container(ContainerAction::Restart)),
                    KeyCode::Char('l') => Some(SessionInput::Container(ContainerAction::FetchLogs(
                        LogOptions {
                            tail: Some(self.log_tail),
                            follow: false,
                        },
                    ))),
                    KeyCode::Char('/') => {
                        self.set_prompt(Prompt::Filter(String::new()), &mut events);
                        None
                    }
                    KeyCode::Char('d') => {
                        self.set_prompt(Prompt::ConfirmKill { force: false }, &mut events);
                        None
                    }
                    KeyCode::Char('D') => {
                        self.set_prompt(Prompt::ConfirmKill { force: true }, &mut events);
                        None
                    }
                    _ => None,
                };
                if let Some(input) = input {
                    events.push(UiEvent::Input(input));
                }
            }
        }
        events
    }
}

/// Restores the terminal however the loop exits.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        execute!(io::stdout(), crossterm::cursor::Hide)?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = execute!(io::stdout(), crossterm::cursor::Show);
        let _ = terminal::disable_raw_mode();
    }
}

fn spawn_input_thread(
    tx: mpsc::UnboundedSender<UiEvent>,
    stop: Arc<AtomicBool>,
    log_tail: usize,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut mapper = KeyMapper::new(log_tail);
        while !stop.load(Ordering::Relaxed) {
            match event::poll(Duration::from_millis(200)) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    debug!(error = %e, "terminal poll failed");
                    break;
                }
            }
            let key = match event::read() {
                Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => key,
                Ok(_) => continue,
                Err(e) => {
                    debug!(error = %e, "terminal read failed");
                    break;
                }
            };
            for ui in mapper.handle(key) {
                let quit = ui == UiEvent::Input(SessionInput::Quit);
                if tx.send(ui).is_err() || quit {
                    return;
                }
            }
        }
    })
}

fn prompt_line(prompt: &Prompt, frame: Option<&WatchFrame>) -> Option<String> {
    match prompt {
        Prompt::None => None,
        Prompt::Filter(text) => Some(format!("/{}", text)),
        Prompt::ConfirmKill { force } => {
            let target = frame
                .and_then(|f| f.selected_record())
                .and_then(|r| r.pid().map(|pid| (pid, r.process_name().unwrap_or("?").to_string())));
            let verb = if *force { "Force kill" } else { "Kill" };
            Some(match target {
                Some((pid, name)) => format!("{} {} (PID {})? [y/N]", verb, name, pid),
                None => "No process selected. Press any key".to_string(),
            })
        }
    }
}

const HELP: &str =
    "j/k: move  </>: sort  r: reverse  1-9: column  /: filter  d/D: kill  s/R/l: container  q: quit";

fn draw(frame: Option<&WatchFrame>, prompt: &Prompt, palette: &Palette) -> io::Result<()> {
    let mut lines = Vec::new();
    if let Some(frame) = frame {
        let records = frame.view.records();
        lines.extend(output::table_lines(
            records,
            frame.view.captured_at(),
            palette,
            Some(frame.order),
            frame.selected,
        ));
        if records.is_empty() {
            lines.push("No matching ports.".to_string());
        }
        lines.push(String::new());
        lines.push(output::footer(&frame.view, records.len()));
        if let Some(status) = &frame.status {
            lines.push(status.clone());
        }
        if !frame.logs.is_empty() {
            lines.push(String::new());
            lines.extend(frame.logs.iter().cloned());
        }
    } else {
        lines.push("Scanning...".to_string());
    }
    lines.push(prompt_line(prompt, frame).unwrap_or_else(|| HELP.to_string()));

    let mut stdout = io::stdout();
    queue!(stdout, Clear(ClearType::All), MoveTo(0, 0))?;
    // Raw mode needs explicit carriage returns
    write!(stdout, "{}", lines.join("\r\n"))?;
    stdout.flush()
}

pub async fn run(query: Option<String>, interval: Option<u64>, settings: &Settings) -> Result<()> {
    let engine = super::engine()?;
    let config = WatchConfig {
        query,
        docker: settings.docker,
        interval: interval
            .map(Duration::from_millis)
            .unwrap_or_else(|| settings.config.refresh_interval())
            .max(portview_core::config::MIN_REFRESH_INTERVAL),
        include_non_listening: settings.show_all,
        json: settings.json,
        log_tail: settings.config.log_tail_lines,
    };

    let handle = engine.watch(config);
    if settings.json {
        return stream_json(handle).await;
    }
    interactive(handle, settings).await
}

/// One JSON array per frame until Ctrl-C.
async fn stream_json(mut handle: WatchHandle) -> Result<()> {
    loop {
        tokio::select! {
            frame = handle.next_frame() => match frame {
                Some(frame) => println!("{}", serde_json::to_string(&frame.to_serialized())?),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    handle.cancel();
    handle.join().await;
    Ok(())
}

async fn interactive(mut handle: WatchHandle, settings: &Settings) -> Result<()> {
    let palette = Palette::new(&settings.config.colors, settings.color);
    let guard = RawModeGuard::enable()?;

    let (tx, mut ui) = mpsc::unbounded_channel();
    let stop = Arc::new(AtomicBool::new(false));
    let input_thread = spawn_input_thread(tx, Arc::clone(&stop), settings.config.log_tail_lines);

    let mut latest: Option<Arc<WatchFrame>> = None;
    let mut prompt = Prompt::None;
    draw(None, &prompt, &palette)?;

    loop {
        tokio::select! {
            frame = handle.next_frame() => match frame {
                Some(frame) => latest = Some(frame),
                None => break,
            },
            event = ui.recv() => match event {
                Some(UiEvent::Input(SessionInput::Quit)) => {
                    // Cancel directly so a running kill or container action cannot delay exit
                    handle.cancel();
                    break;
                }
                Some(UiEvent::Input(input)) => {
                    if handle.send(input).await.is_err() {
                        break;
                    }
                    continue;
                }
                Some(UiEvent::Prompt(next)) => prompt = next,
                None => break,
            },
        }
        draw(latest.as_deref(), &prompt, &palette)?;
    }

    stop.store(true, Ordering::Relaxed);
    handle.cancel();
    handle.join().await;
    if input_thread.join().is_err() {
        debug!("input thread panicked");
    }
    drop(guard);
    println!();
    Ok(())
}
