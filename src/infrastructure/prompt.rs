//! Interactive variable input.
//!
//! Keys come from a [`KeySource`] so the line editor runs headless in
//! tests; the terminal implementation reads crossterm events in raw mode.
//! Each variable keeps its own history file under the temp directory.

use crate::application::eval::VariableSource;
use crate::domain::errors::{GurlError, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{self, Clear, ClearType};
use crossterm::{cursor, queue};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// Where key presses come from.
pub trait KeySource: Send {
    fn start(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn read(&mut self) -> io::Result<Event>;

    fn stop(&mut self) {}
}

/// Reads keys from the controlling terminal in raw mode.
#[derive(Debug, Default)]
pub struct TerminalKeys;

impl KeySource for TerminalKeys {
    fn start(&mut self) -> io::Result<()> {
        terminal::enable_raw_mode()
    }

    fn read(&mut self) -> io::Result<Event> {
        event::read()
    }

    fn stop(&mut self) {
        if let Err(e) = terminal::disable_raw_mode() {
            debug!(error = %e, "could not leave raw mode");
        }
    }
}

/// What a key press did to the line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOutcome {
    Continue,
    Submit(String),
    Abort,
}

/// Line editor state: the text, the cursor (in chars) and a position in
/// the history list while browsing it.
#[derive(Debug, Default)]
pub struct LineState {
    buffer: Vec<char>,
    cursor: usize,
    history: Vec<String>,
    browsing: Option<usize>,
    draft: Vec<char>,
}

impl LineState {
    pub fn new(history: Vec<String>) -> Self {
        Self {
            history,
            ..Default::default()
        }
    }

    pub fn text(&self) -> String {
        self.buffer.iter().collect()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn handle(&mut self, key: KeyEvent) -> KeyOutcome {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('c') if ctrl => return KeyOutcome::Abort,
            KeyCode::Char('d') if ctrl => {
                if self.buffer.is_empty() {
                    return KeyOutcome::Abort;
                }
                self.delete_forward();
            }
            KeyCode::Char('u') if ctrl => {
                self.buffer.drain(..self.cursor);
                self.cursor = 0;
            }
            KeyCode::Char('a') if ctrl => self.cursor = 0,
            KeyCode::Char('e') if ctrl => self.cursor = self.buffer.len(),
            KeyCode::Char(_) if ctrl => {}
            KeyCode::Char(c) => {
                self.buffer.insert(self.cursor, c);
                self.cursor += 1;
            }
            KeyCode::Enter => return KeyOutcome::Submit(self.text()),
            KeyCode::Backspace if self.cursor > 0 => {
                self.cursor -= 1;
                self.buffer.remove(self.cursor);
            }
            KeyCode::Delete => self.delete_forward(),
            KeyCode::Left => self.cursor = self.cursor.saturating_sub(1),
            KeyCode::Right => self.cursor = (self.cursor + 1).min(self.buffer.len()),
            KeyCode::Home => self.cursor = 0,
            KeyCode::End => self.cursor = self.buffer.len(),
            KeyCode::Up => self.history_back(),
            KeyCode::Down => self.history_forward(),
            _ => {}
        }
        KeyOutcome::Continue
    }

    fn delete_forward(&mut self) {
        if self.cursor < self.buffer.len() {
            self.buffer.remove(self.cursor);
        }
    }

    fn history_back(&mut self) {
        let next = match self.browsing {
            None if self.history.is_empty() => return,
            None => {
                self.draft = self.buffer.clone();
                self.history.len() - 1
            }
            Some(0) => return,
            Some(i) => i - 1,
        };
        self.browsing = Some(next);
        self.load(self.history[next].chars().collect());
    }

    fn history_forward(&mut self) {
        let Some(i) = self.browsing else {
            return;
        };
        if i + 1 < self.history.len() {
            self.browsing = Some(i + 1);
            self.load(self.history[i + 1].chars().collect());
        } else {
            self.browsing = None;
            let draft = std::mem::take(&mut self.draft);
            self.load(draft);
        }
    }

    fn load(&mut self, text: Vec<char>) {
        self.cursor = text.len();
        self.buffer = text;
    }
}

/// Asks the user for variable values, one line per variable.
pub struct TerminalPrompt<K: KeySource = TerminalKeys> {
    keys: Mutex<K>,
    history_dir: PathBuf,
    out: Mutex<Box<dyn Write + Send>>,
}

impl TerminalPrompt<TerminalKeys> {
    pub fn new() -> Self {
        Self::with_keys(TerminalKeys, std::env::temp_dir(), Box::new(io::stderr()))
    }
}

impl Default for TerminalPrompt<TerminalKeys> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: KeySource> TerminalPrompt<K> {
    pub fn with_keys(keys: K, history_dir: PathBuf, out: Box<dyn Write + Send>) -> Self {
        Self {
            keys: Mutex::new(keys),
            history_dir,
            out: Mutex::new(out),
        }
    }

    pub fn history_path(&self, name: &str) -> PathBuf {
        self.history_dir.join(format!("gurl-vars-{name}"))
    }

    fn read_line(&self, name: &str, keys: &mut K) -> Result<String> {
        let history_path = self.history_path(name);
        let mut state = LineState::new(load_history(&history_path));
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        let prompt = format!("{name}: ");

        render(&mut *out, &prompt, &state).map_err(terminal_error)?;
        loop {
            let Event::Key(key) = keys.read().map_err(terminal_error)? else {
                continue;
            };
            if key.kind != KeyEventKind::Press {
                continue;
            }
            match state.handle(key) {
                KeyOutcome::Continue => render(&mut *out, &prompt, &state).map_err(terminal_error)?,
                KeyOutcome::Submit(line) => {
                    write!(out, "\r\n").and_then(|_| out.flush()).map_err(terminal_error)?;
                    append_history(&history_path, &line);
                    return Ok(line);
                }
                KeyOutcome::Abort => {
                    // Best effort: the process is about to exit.
                    let _ = write!(out, "\r\n").and_then(|_| out.flush());
                    return Err(GurlError::InteractiveAbort);
                }
            }
        }
    }
}

impl<K: KeySource> VariableSource for TerminalPrompt<K> {
    fn resolve(&self, name: &str) -> Result<Option<String>> {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        keys.start().map_err(terminal_error)?;
        let line = self.read_line(name, &mut keys);
        keys.stop();
        debug!(name, answered = line.is_ok(), "prompted for variable");
        line.map(Some)
    }
}

fn render<W: Write>(out: &mut W, prompt: &str, state: &LineState) -> io::Result<()> {
    let column = prompt.chars().count() + state.cursor();
    queue!(
        out,
        cursor::MoveToColumn(0),
        Clear(ClearType::CurrentLine),
    )?;
    write!(out, "{prompt}{}", state.text())?;
    queue!(out, cursor::MoveToColumn(u16::try_from(column).unwrap_or(u16::MAX)))?;
    out.flush()
}

fn load_history(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .map(|content| {
            content
                .lines()
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn append_history(path: &Path, line: &str) {
    if line.is_empty() || load_history(path).last().is_some_and(|last| last == line) {
        return;
    }
    let written = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| writeln!(file, "{line}"));
    if let Err(e) = written {
        debug!(path = %path.display(), error = %e, "history not saved");
    }
}

fn terminal_error(e: io::Error) -> GurlError {
    GurlError::resource("<terminal>", e)
}
