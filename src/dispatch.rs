// src/dispatch.rs - routes key events to the typed text buffer or to OS keystrokes
use once_cell::sync::Lazy;
use std::collections::{BTreeMap, HashMap};

use crate::config::DispatchTarget;
use crate::error::InjectionError;
use crate::touch::KeyEvent;

/// Keys that never change the typed text.
pub const MODIFIERS: [&str; 5] = ["SHIFT", "CTRL", "ALT", "WIN", "ESC"];

/// Typed text, kept as one token per key so multi-character names delete as a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypedBuffer {
    tokens: Vec<String>,
}

impl TypedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, token: impl Into<String>) {
        self.tokens.push(token.into());
    }

    /// Removes the last token; no-op on an empty buffer.
    pub fn delete_last(&mut self) -> Option<String> {
        self.tokens.pop()
    }

    pub fn contents(&self) -> String {
        self.tokens.concat()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Applies one typed key.
    pub fn apply_key(&mut self, key: &str) {
        match key {
            "ENTER" => self.push("\n"),
            "SPACE" => self.push(" "),
            "BACKSPACE" | "DEL" => {
                self.delete_last();
            }
            k if MODIFIERS.contains(&k) => {}
            other => self.push(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedKey {
    Backspace,
    Enter,
    Space,
    Shift,
    Control,
    Alt,
    Meta,
    Escape,
    Delete,
    UpArrow,
    DownArrow,
    LeftArrow,
    RightArrow,
    Tab,
    CapsLock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyCode {
    Named(NamedKey),
    Char(char),
}

static KEYCODES: Lazy<HashMap<&'static str, NamedKey>> = Lazy::new(|| {
    HashMap::from([
        ("BACKSPACE", NamedKey::Backspace),
        ("ENTER", NamedKey::Enter),
        ("SPACE", NamedKey::Space),
        ("SHIFT", NamedKey::Shift),
        ("CTRL", NamedKey::Control),
        ("ALT", NamedKey::Alt),
        ("WIN", NamedKey::Meta),
        ("ESC", NamedKey::Escape),
        ("DEL", NamedKey::Delete),
        ("UP", NamedKey::UpArrow),
        ("DOWN", NamedKey::DownArrow),
        ("LEFT", NamedKey::LeftArrow),
        ("RIGHT", NamedKey::RightArrow),
        ("TAB", NamedKey::Tab),
        ("CAPS", NamedKey::CapsLock),
    ])
});

/// Maps a key name to what the OS backend injects.
pub fn keycode_for(name: &str) -> Result<KeyCode, InjectionError> {
    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return Ok(KeyCode::Char(c.to_lowercase().next().unwrap_or(c)));
    }
    KEYCODES
        .get(name.to_ascii_uppercase().as_str())
        .map(|k| KeyCode::Named(*k))
        .ok_or_else(|| InjectionError::Unmapped(name.to_string()))
}

/// Boundary to whatever actually synthesizes keystrokes.
pub trait KeyInjector: Send {
    fn key_down(&mut self, key: KeyCode) -> Result<(), InjectionError>;
    fn key_up(&mut self, key: KeyCode) -> Result<(), InjectionError>;
}

/// Logs keystrokes instead of injecting them. Used when no OS backend is wired in.
#[derive(Debug, Default)]
pub struct LogInjector;

impl KeyInjector for LogInjector {
    fn key_down(&mut self, key: KeyCode) -> Result<(), InjectionError> {
        tracing::info!(?key, "key down");
        Ok(())
    }

    fn key_up(&mut self, key: KeyCode) -> Result<(), InjectionError> {
        tracing::info!(?key, "key up");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stroke {
    Down(KeyCode),
    Up(KeyCode),
}

/// Remembers every stroke; optionally fails them all.
#[derive(Debug, Default)]
pub struct RecordingInjector {
    pub strokes: Vec<Stroke>,
    pub fail: bool,
}

impl RecordingInjector {
    fn record(&mut self, stroke: Stroke) -> Result<(), InjectionError> {
        if self.fail {
            return Err(InjectionError::Backend("recording injector set to fail".into()));
        }
        self.strokes.push(stroke);
        Ok(())
    }
}

impl KeyInjector for RecordingInjector {
    fn key_down(&mut self, key: KeyCode) -> Result<(), InjectionError> {
        self.record(Stroke::Down(key))
    }

    fn key_up(&mut self, key: KeyCode) -> Result<(), InjectionError> {
        self.record(Stroke::Up(key))
    }
}

/// Sends key events to the configured target. Failures are logged, never returned.
pub struct Dispatcher {
    target: DispatchTarget,
    buffer: TypedBuffer,
    injector: Box<dyn KeyInjector>,
    /// Contacts currently holding each injected key.
    held: BTreeMap<String, usize>,
}

impl Dispatcher {
    pub fn new(target: DispatchTarget, injector: Box<dyn KeyInjector>) -> Self {
        Self {
            target,
            buffer: TypedBuffer::new(),
            injector,
            held: BTreeMap::new(),
        }
    }

    pub fn logging(target: DispatchTarget) -> Self {
        Self::new(target, Box::new(LogInjector))
    }

    pub fn buffer(&self) -> &TypedBuffer {
        &self.buffer
    }

    pub fn held_keys(&self) -> impl Iterator<Item = &str> {
        self.held.keys().map(String::as_str)
    }

    pub fn dispatch(&mut self, event: &KeyEvent) {
        match self.target {
            DispatchTarget::Text => match event {
                KeyEvent::Tap(key) | KeyEvent::Press(key) => self.buffer.apply_key(key),
                KeyEvent::Release(_) => {}
            },
            DispatchTarget::Os => self.inject(event),
        }
    }

    fn inject(&mut self, event: &KeyEvent) {
        let key = event.key();
        let code = match keycode_for(key) {
            Ok(code) => code,
            Err(e) => {
                tracing::warn!("dropping {event}: {e}");
                return;
            }
        };

        let result = match event {
            KeyEvent::Press(_) => {
                if let Some(count) = self.held.get_mut(key) {
                    *count += 1;
                    return;
                }
                let result = self.injector.key_down(code);
                if result.is_ok() {
                    self.held.insert(key.to_string(), 1);
                }
                result
            }
            KeyEvent::Release(_) => {
                let Some(count) = self.held.get_mut(key) else {
                    return;
                };
                *count -= 1;
                if *count > 0 {
                    return;
                }
                self.held.remove(key);
                self.injector.key_up(code)
            }
            KeyEvent::Tap(_) => self
                .injector
                .key_down(code)
                .and_then(|_| self.injector.key_up(code)),
        };
        if let Err(e) = result {
            tracing::warn!("injection of {event} failed: {e}");
        }
    }

    /// Lifts every key still held down on the OS side.
    pub fn release_all(&mut self) {
        for key in std::mem::take(&mut self.held).into_keys() {
            tracing::info!(key = %key, "releasing injected key");
            let result = keycode_for(&key).and_then(|code| self.injector.key_up(code));
            if let Err(e) = result {
                tracing::warn!("release of '{key}' failed: {e}");
            }
        }
    }
}
