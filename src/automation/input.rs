//! Keyboard input emission for the game.
//!
//! Key presses go through the [`KeyEmitter`] trait. Every press is preceded by
//! an [`AbortSignal`] check so an external abort stops emission before the
//! next key, even in the middle of a sequence.
//!
//! On Windows, [`SendInputEmitter`] simulates hardware-level key presses and
//! [`CornerFailsafe`] aborts when the cursor is pushed into the top-left
//! screen corner.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::automation::config::ControlsConfig;

/// Errors raised at the input-emission boundary.
#[derive(Debug, Error)]
pub enum InputError {
    /// The abort signal fired; no further key was pressed.
    #[error("input emission aborted after {pressed} of {total} keys")]
    Aborted { pressed: usize, total: usize },
    #[error("unknown key name '{0}'")]
    UnknownKey(String),
    #[error("failed to send key {key}: {reason}")]
    SendFailed { key: Key, reason: String },
}

/// A keyboard key the bot can press.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    /// A-Z, stored uppercase
    Letter(char),
    /// 0-9
    Digit(char),
    Enter,
    Space,
    Tab,
    Backspace,
    Escape,
    Left,
    Right,
    Up,
    Down,
    /// F1-F12
    Function(u8),
}

impl Key {
    /// Parses a key name as written in config.json (case-insensitive).
    pub fn from_name(name: &str) -> Result<Key, InputError> {
        let trimmed = name.trim();
        let mut chars = trimmed.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            if c.is_ascii_alphabetic() {
                return Ok(Key::Letter(c.to_ascii_uppercase()));
            }
            if c.is_ascii_digit() {
                return Ok(Key::Digit(c));
            }
        }

        let lower = trimmed.to_ascii_lowercase();
        let key = match lower.as_str() {
            "enter" | "return" => Key::Enter,
            "space" => Key::Space,
            "tab" => Key::Tab,
            "backspace" => Key::Backspace,
            "esc" | "escape" => Key::Escape,
            "left" => Key::Left,
            "right" => Key::Right,
            "up" => Key::Up,
            "down" => Key::Down,
            _ => {
                let function = lower
                    .strip_prefix('f')
                    .and_then(|n| n.parse::<u8>().ok())
                    .filter(|n| (1..=12).contains(n));
                match function {
                    Some(n) => Key::Function(n),
                    None => return Err(InputError::UnknownKey(name.to_string())),
                }
            }
        };
        Ok(key)
    }

    /// Windows virtual-key code.
    pub fn virtual_key_code(&self) -> u16 {
        match self {
            Key::Letter(c) | Key::Digit(c) => *c as u16,
            Key::Enter => 0x0D,
            Key::Space => 0x20,
            Key::Tab => 0x09,
            Key::Backspace => 0x08,
            Key::Escape => 0x1B,
            Key::Left => 0x25,
            Key::Up => 0x26,
            Key::Right => 0x27,
            Key::Down => 0x28,
            Key::Function(n) => 0x70 + (*n as u16 - 1),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Letter(c) | Key::Digit(c) => write!(f, "{}", c),
            Key::Enter => write!(f, "Enter"),
            Key::Space => write!(f, "Space"),
            Key::Tab => write!(f, "Tab"),
            Key::Backspace => write!(f, "Backspace"),
            Key::Escape => write!(f, "Escape"),
            Key::Left => write!(f, "Left"),
            Key::Right => write!(f, "Right"),
            Key::Up => write!(f, "Up"),
            Key::Down => write!(f, "Down"),
            Key::Function(n) => write!(f, "F{}", n),
        }
    }
}

/// Parsed key bindings from `controls`.
#[derive(Clone, Debug)]
pub struct KeyBindings {
    /// Key per ingredient slot position
    pub input_keys: Vec<Key>,
    pub page_turn: Key,
    pub confirm: Key,
}

impl KeyBindings {
    pub fn from_controls(controls: &ControlsConfig) -> Result<Self, InputError> {
        Ok(Self {
            input_keys: controls
                .input_keys
                .iter()
                .map(|name| Key::from_name(name))
                .collect::<Result<_, _>>()?,
            page_turn: Key::from_name(&controls.page_turn_key)?,
            confirm: Key::from_name(&controls.confirm_key)?,
        })
    }
}

/// Presses keys in the game.
pub trait KeyEmitter {
    fn press(&mut self, key: Key) -> Result<(), InputError>;
}

/// Out-of-band signal that stops key emission.
pub trait AbortSignal {
    fn is_triggered(&self) -> bool;
}

impl AbortSignal for AtomicBool {
    fn is_triggered(&self) -> bool {
        self.load(Ordering::SeqCst)
    }
}

/// Never fires. Used for dry runs where nothing is sent to the game.
pub struct NeverAbort;

impl AbortSignal for NeverAbort {
    fn is_triggered(&self) -> bool {
        false
    }
}

/// Presses `keys` in order, checking `abort` before every press.
///
/// Returns [`InputError::Aborted`] without pressing the pending key as soon as
/// the signal fires.
pub fn press_sequence(
    emitter: &mut dyn KeyEmitter,
    abort: &dyn AbortSignal,
    keys: &[Key],
    key_delay: Duration,
) -> Result<(), InputError> {
    for (pressed, key) in keys.iter().enumerate() {
        if abort.is_triggered() {
            warn!("Abort signal received, {} keys left unpressed", keys.len() - pressed);
            return Err(InputError::Aborted {
                pressed,
                total: keys.len(),
            });
        }
        emitter.press(*key)?;
        debug!("Pressed key: {}", key);
        if !key_delay.is_zero() {
            std::thread::sleep(key_delay);
        }
    }
    Ok(())
}

/// Logs keys instead of sending them.
#[derive(Default)]
pub struct DryRunEmitter {
    pub pressed: Vec<Key>,
}

impl KeyEmitter for DryRunEmitter {
    fn press(&mut self, key: Key) -> Result<(), InputError> {
        info!("[dry-run] would press {}", key);
        self.pressed.push(key);
        Ok(())
    }
}

#[cfg(windows)]
pub use platform::{CornerFailsafe, SendInputEmitter};

#[cfg(windows)]
mod platform {
    use super::{AbortSignal, InputError, Key, KeyEmitter};

    use windows::Win32::Foundation::POINT;
    use windows::Win32::UI::Input::KeyboardAndMouse::{
        SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, KEYBDINPUT, KEYBD_EVENT_FLAGS,
        KEYEVENTF_KEYUP, VIRTUAL_KEY,
    };
    use windows::Win32::UI::WindowsAndMessaging::GetCursorPos;

    /// Simulates hardware-level key presses with SendInput.
    ///
    /// The game reads raw input, so window messages are not enough. The game
    /// window must have focus.
    pub struct SendInputEmitter;

    impl KeyEmitter for SendInputEmitter {
        fn press(&mut self, key: Key) -> Result<(), InputError> {
            let vk = VIRTUAL_KEY(key.virtual_key_code());
            let make_input = |flags: KEYBD_EVENT_FLAGS| INPUT {
                r#type: INPUT_KEYBOARD,
                Anonymous: INPUT_0 {
                    ki: KEYBDINPUT {
                        wVk: vk,
                        wScan: 0,
                        dwFlags: flags,
                        time: 0,
                        dwExtraInfo: 0,
                    },
                },
            };
            let inputs = [make_input(KEYBD_EVENT_FLAGS(0)), make_input(KEYEVENTF_KEYUP)];

            let sent = unsafe { SendInput(&inputs, std::mem::size_of::<INPUT>() as i32) };
            if sent as usize != inputs.len() {
                return Err(InputError::SendFailed {
                    key,
                    reason: format!("SendInput accepted {} of {} events", sent, inputs.len()),
                });
            }
            Ok(())
        }
    }

    /// Fires while the cursor sits in the top-left screen corner.
    pub struct CornerFailsafe {
        pub margin: i32,
    }

    impl AbortSignal for CornerFailsafe {
        fn is_triggered(&self) -> bool {
            let mut pt = POINT::default();
            match unsafe { GetCursorPos(&mut pt) } {
                Ok(()) => pt.x <= self.margin && pt.y <= self.margin,
                // Can't read the cursor: refuse to keep typing
                Err(_) => true,
            }
        }
    }
}
