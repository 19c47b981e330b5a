//! Input events and their wire form.
//!
//! An input event travels as `{"ts": <ms>, "event": 0|1, "keyCode": <code>}`
//! through whichever transport is active, and reaches the module as a
//! `(discriminator, key code)` pair.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Direction of a key transition. The discriminant is what the module's
/// input entry point expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum KeyEvent {
    /// The key was pressed.
    KeyDown = 0,
    /// The key was released.
    KeyUp = 1,
}

impl KeyEvent {
    /// The raw discriminator passed across the module boundary.
    #[must_use]
    pub const fn discriminator(self) -> i32 {
        self as i32
    }
}

impl From<KeyEvent> for u8 {
    fn from(event: KeyEvent) -> Self {
        event as u8
    }
}

impl TryFrom<u8> for KeyEvent {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::KeyDown),
            1 => Ok(Self::KeyUp),
            other => Err(format!("unknown key event {other}")),
        }
    }
}

/// A single input event as published, polled or queued by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DoomKey {
    /// Sender timestamp in milliseconds. Events are delivered in `ts` order.
    pub ts: f64,
    pub event: KeyEvent,
    /// Key code in the engine's key space (see [`to_doom_key`]).
    #[serde(rename = "keyCode")]
    pub key_code: i32,
}

impl DoomKey {
    /// A key press at `ts`.
    #[must_use]
    pub fn down(ts: f64, key_code: i32) -> Self {
        Self {
            ts,
            event: KeyEvent::KeyDown,
            key_code,
        }
    }

    /// A key release at `ts`.
    #[must_use]
    pub fn up(ts: f64, key_code: i32) -> Self {
        Self {
            ts,
            event: KeyEvent::KeyUp,
            key_code,
        }
    }
}

/// Wall-clock milliseconds since the Unix epoch, the `ts` senders stamp on
/// events.
#[must_use]
pub fn timestamp_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |elapsed| elapsed.as_secs_f64() * 1000.0)
}

/// Anything that accepts input events on behalf of a running simulation.
pub trait InputSink: Send + Sync {
    /// Deliver one event. Implementations must not reorder events.
    fn send_key(&self, key: DoomKey);
}

// Engine key codes that differ from browser key codes.
pub const KEY_BACKSPACE: i32 = 127;
pub const KEY_RCTRL: i32 = 0x80 + 0x1d;
pub const KEY_RALT: i32 = 0x80 + 0x38;
pub const KEY_LEFTARROW: i32 = 0xac;
pub const KEY_UPARROW: i32 = 0xad;
pub const KEY_RIGHTARROW: i32 = 0xae;
pub const KEY_DOWNARROW: i32 = 0xaf;
pub const KEY_F1: i32 = 0x80 + 0x3b;

/// Translate a browser `keyCode` into the engine's key space.
#[must_use]
pub fn to_doom_key(browser_code: i32) -> i32 {
    match browser_code {
        8 => KEY_BACKSPACE,
        17 => KEY_RCTRL,
        18 => KEY_RALT,
        37 => KEY_LEFTARROW,
        38 => KEY_UPARROW,
        39 => KEY_RIGHTARROW,
        40 => KEY_DOWNARROW,
        // A..Z arrive upper case; the engine wants lower case ASCII.
        65..=90 => browser_code + 32,
        112..=123 => browser_code - 112 + KEY_F1,
        other => other,
    }
}

/// Build the event a browser key transition produces, or `None` for
/// auto-repeats, which are never re-sent.
#[must_use]
pub fn from_browser(ts: f64, event: KeyEvent, browser_code: i32, repeat: bool) -> Option<DoomKey> {
    if repeat {
        return None;
    }
    Some(DoomKey {
        ts,
        event,
        key_code: to_doom_key(browser_code),
    })
}

/// Sort events into delivery order. Stable, so equal timestamps keep their
/// arrival order.
pub fn sort_by_timestamp(keys: &mut [DoomKey]) {
    keys.sort_by(|a, b| a.ts.total_cmp(&b.ts));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_form_matches_viewers() {
        let key = DoomKey::down(1234.5, KEY_UPARROW);
        let json = serde_json::to_value(key).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "ts": 1234.5, "event": 0, "keyCode": 0xad })
        );
    }

    #[test]
    fn test_parse_key_up() {
        let key: DoomKey = serde_json::from_str(r#"{"ts":7,"event":1,"keyCode":97}"#).unwrap();
        assert_eq!(key.event, KeyEvent::KeyUp);
        assert_eq!(key.key_code, 97);
    }

    #[test]
    fn test_reject_unknown_event() {
        let result: Result<DoomKey, _> = serde_json::from_str(r#"{"ts":7,"event":2,"keyCode":97}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_browser_translation() {
        assert_eq!(to_doom_key(8), 127);
        assert_eq!(to_doom_key(17), 0x9d);
        assert_eq!(to_doom_key(18), 0xb8);
        assert_eq!(to_doom_key(37), 0xac);
        assert_eq!(to_doom_key(40), 0xaf);
        assert_eq!(to_doom_key(65), 97);
        assert_eq!(to_doom_key(90), 122);
        assert_eq!(to_doom_key(112), 187);
        assert_eq!(to_doom_key(123), 198);
        assert_eq!(to_doom_key(13), 13);
        assert_eq!(to_doom_key(32), 32);
    }

    #[test]
    fn test_late_letters_are_not_function_keys() {
        // 'P'..'Z' lower-case into the F-key range but stay letters.
        assert_eq!(to_doom_key(80), i32::from(b'p'));
        assert_eq!(to_doom_key(90), i32::from(b'z'));
        assert_eq!(to_doom_key(112), KEY_F1);
    }

    #[test]
    fn test_repeats_are_dropped() {
        assert!(from_browser(1.0, KeyEvent::KeyDown, 65, true).is_none());
        let key = from_browser(1.0, KeyEvent::KeyDown, 65, false).unwrap();
        assert_eq!(key.key_code, 97);
    }

    #[test]
    fn test_timestamp_now_is_after_2020() {
        assert!(timestamp_now() > 1_577_836_800_000.0);
    }

    #[test]
    fn test_sort_is_stable_on_equal_timestamps() {
        let mut keys = vec![
            DoomKey::up(20.0, 1),
            DoomKey::down(10.0, 2),
            DoomKey::down(20.0, 3),
        ];
        sort_by_timestamp(&mut keys);
        let codes: Vec<i32> = keys.iter().map(|k| k.key_code).collect();
        assert_eq!(codes, vec![2, 1, 3]);
    }
}
