//! Performance events flowing through the router and players.
//!
//! This module defines the event value type used everywhere in the crate:
//!
//! - [`EventKind`] - The twelve message kinds the router understands
//! - [`Event`] - An immutable message with optional channel/number and a value
//!
//! Events parse from raw MIDI bytes ([`Event::from_bytes`]) and from a compact
//! text form `kind:chan:num:val` used in player definitions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CompileError;

/// Kind of a performance event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Note,
    NoteOff,
    Cc,
    Prog,
    Pbend,
    Cpress,
    Kpress,
    Sysex,
    Clock,
    Start,
    Continue,
    Stop,
}

impl EventKind {
    pub const ALL: [EventKind; 12] = [
        EventKind::Note,
        EventKind::NoteOff,
        EventKind::Cc,
        EventKind::Prog,
        EventKind::Pbend,
        EventKind::Cpress,
        EventKind::Kpress,
        EventKind::Sysex,
        EventKind::Clock,
        EventKind::Start,
        EventKind::Continue,
        EventKind::Stop,
    ];

    /// Name used in rule text and the compact event form.
    pub fn name(self) -> &'static str {
        match self {
            EventKind::Note => "note",
            EventKind::NoteOff => "noteoff",
            EventKind::Cc => "cc",
            EventKind::Prog => "prog",
            EventKind::Pbend => "pbend",
            EventKind::Cpress => "cpress",
            EventKind::Kpress => "kpress",
            EventKind::Sysex => "sysex",
            EventKind::Clock => "clock",
            EventKind::Start => "start",
            EventKind::Continue => "continue",
            EventKind::Stop => "stop",
        }
    }

    /// Channel voice messages carry a channel.
    pub fn has_chan(self) -> bool {
        matches!(
            self,
            EventKind::Note
                | EventKind::NoteOff
                | EventKind::Cc
                | EventKind::Prog
                | EventKind::Pbend
                | EventKind::Cpress
                | EventKind::Kpress
        )
    }

    /// Kinds that carry a parameter number (note or controller).
    pub fn has_num(self) -> bool {
        matches!(
            self,
            EventKind::Note | EventKind::NoteOff | EventKind::Cc | EventKind::Kpress
        )
    }

    /// Transport messages without channel, number or value of their own.
    pub fn is_transport(self) -> bool {
        matches!(
            self,
            EventKind::Clock | EventKind::Start | EventKind::Continue | EventKind::Stop
        )
    }

    /// Kinds the engine's native router can handle on its own.
    pub fn is_native_routable(self) -> bool {
        matches!(
            self,
            EventKind::Note
                | EventKind::Cc
                | EventKind::Prog
                | EventKind::Pbend
                | EventKind::Cpress
                | EventKind::Kpress
        )
    }

    /// Largest value this kind carries.
    pub fn max_val(self) -> f64 {
        match self {
            EventKind::Pbend => 16383.0,
            _ => 127.0,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EventKind {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        EventKind::ALL
            .iter()
            .copied()
            .find(|k| k.name() == name)
            .ok_or_else(|| CompileError::new(s, "unknown event type"))
    }
}

/// A performance event.
///
/// Channels are 1-based. Fields a kind does not carry are `None`. Events are
/// immutable; the `with_*` methods return modified copies.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Event {
    kind: EventKind,
    chan: Option<i32>,
    num: Option<i32>,
    val: f64,
    data: Vec<u8>,
}

impl Event {
    /// Create an event, dropping fields the kind does not carry.
    pub fn new(kind: EventKind, chan: Option<i32>, num: Option<i32>, val: f64) -> Self {
        Self {
            kind,
            chan: if kind.has_chan() { chan } else { None },
            num: if kind.has_num() { num } else { None },
            val,
            data: Vec::new(),
        }
    }

    pub fn note(chan: i32, num: i32, val: f64) -> Self {
        Self::new(EventKind::Note, Some(chan), Some(num), val)
    }

    pub fn note_off(chan: i32, num: i32) -> Self {
        Self::new(EventKind::NoteOff, Some(chan), Some(num), 0.0)
    }

    pub fn cc(chan: i32, num: i32, val: f64) -> Self {
        Self::new(EventKind::Cc, Some(chan), Some(num), val)
    }

    pub fn prog(chan: i32, val: f64) -> Self {
        Self::new(EventKind::Prog, Some(chan), None, val)
    }

    pub fn pbend(chan: i32, val: f64) -> Self {
        Self::new(EventKind::Pbend, Some(chan), None, val)
    }

    pub fn cpress(chan: i32, val: f64) -> Self {
        Self::new(EventKind::Cpress, Some(chan), None, val)
    }

    pub fn kpress(chan: i32, num: i32, val: f64) -> Self {
        Self::new(EventKind::Kpress, Some(chan), Some(num), val)
    }

    /// A transport message (clock, start, continue, stop).
    pub fn transport(kind: EventKind) -> Self {
        Self::new(kind, None, None, 0.0)
    }

    pub fn sysex(data: Vec<u8>) -> Self {
        Self {
            data,
            ..Self::new(EventKind::Sysex, None, None, 0.0)
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn chan(&self) -> Option<i32> {
        self.chan
    }

    pub fn num(&self) -> Option<i32> {
        self.num
    }

    pub fn val(&self) -> f64 {
        self.val
    }

    /// Sysex payload, without the framing bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Copy with a different kind; fields the new kind lacks are dropped.
    pub fn with_kind(&self, kind: EventKind) -> Self {
        Self {
            data: self.data.clone(),
            ..Self::new(kind, self.chan, self.num, self.val)
        }
    }

    pub fn with_chan(&self, chan: Option<i32>) -> Self {
        Self {
            chan: if self.kind.has_chan() { chan } else { None },
            ..self.clone()
        }
    }

    pub fn with_num(&self, num: Option<i32>) -> Self {
        Self {
            num: if self.kind.has_num() { num } else { None },
            ..self.clone()
        }
    }

    pub fn with_val(&self, val: f64) -> Self {
        Self {
            val,
            ..self.clone()
        }
    }

    /// Whether this is a sounding note-on (note with non-zero velocity).
    pub fn is_key_down(&self) -> bool {
        self.kind == EventKind::Note && self.val > 0.0
    }

    /// Note-off, or note-on with zero velocity.
    pub fn is_key_up(&self) -> bool {
        self.kind == EventKind::NoteOff || (self.kind == EventKind::Note && self.val <= 0.0)
    }

    /// Parse raw MIDI bytes into an event.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let status = *bytes.first()?;

        // System messages
        match status {
            0xF8 => return Some(Event::transport(EventKind::Clock)),
            0xFA => return Some(Event::transport(EventKind::Start)),
            0xFB => return Some(Event::transport(EventKind::Continue)),
            0xFC => return Some(Event::transport(EventKind::Stop)),
            0xF0 => {
                let end = bytes.iter().position(|b| *b == 0xF7).unwrap_or(bytes.len());
                return Some(Event::sysex(bytes[1..end].to_vec()));
            }
            _ => {}
        }

        // Channel messages
        let msg_type = status & 0xF0;
        let chan = (status & 0x0F) as i32 + 1;

        match msg_type {
            0x90 if bytes.len() >= 3 => {
                let note = bytes[1] as i32;
                let velocity = bytes[2] as f64;
                if velocity == 0.0 {
                    // Note on with velocity 0 is treated as note off
                    Some(Event::new(EventKind::NoteOff, Some(chan), Some(note), 0.0))
                } else {
                    Some(Event::note(chan, note, velocity))
                }
            }
            0x80 if bytes.len() >= 3 => Some(Event::new(
                EventKind::NoteOff,
                Some(chan),
                Some(bytes[1] as i32),
                bytes[2] as f64,
            )),
            0xB0 if bytes.len() >= 3 => Some(Event::cc(chan, bytes[1] as i32, bytes[2] as f64)),
            0xE0 if bytes.len() >= 3 => {
                // Pitch bend is 14-bit: LSB + MSB
                let value = ((bytes[2] as i32) << 7) | bytes[1] as i32;
                Some(Event::pbend(chan, value as f64))
            }
            0xD0 if bytes.len() >= 2 => Some(Event::cpress(chan, bytes[1] as f64)),
            0xA0 if bytes.len() >= 3 => {
                Some(Event::kpress(chan, bytes[1] as i32, bytes[2] as f64))
            }
            0xC0 if bytes.len() >= 2 => Some(Event::prog(chan, bytes[1] as f64)),
            _ => None,
        }
    }

    /// Encode as raw MIDI bytes, clamping out-of-range fields.
    pub fn to_bytes(&self) -> Vec<u8> {
        let chan = self.chan.unwrap_or(1).saturating_sub(1).clamp(0, 15) as u8;
        let num = self.num.unwrap_or(0).clamp(0, 127) as u8;
        let data7 = self.val.round().clamp(0.0, 127.0) as u8;
        match self.kind {
            EventKind::Note => vec![0x90 | chan, num, data7],
            EventKind::NoteOff => vec![0x80 | chan, num, data7],
            EventKind::Cc => vec![0xB0 | chan, num, data7],
            EventKind::Kpress => vec![0xA0 | chan, num, data7],
            EventKind::Prog => vec![0xC0 | chan, data7],
            EventKind::Cpress => vec![0xD0 | chan, data7],
            EventKind::Pbend => {
                let value = self.val.round().clamp(0.0, 16383.0) as u16;
                vec![0xE0 | chan, (value & 0x7F) as u8, (value >> 7) as u8]
            }
            EventKind::Sysex => {
                let mut bytes = Vec::with_capacity(self.data.len() + 2);
                bytes.push(0xF0);
                bytes.extend_from_slice(&self.data);
                bytes.push(0xF7);
                bytes
            }
            EventKind::Clock => vec![0xF8],
            EventKind::Start => vec![0xFA],
            EventKind::Continue => vec![0xFB],
            EventKind::Stop => vec![0xFC],
        }
    }
}

fn format_val(val: f64) -> String {
    if val.fract() == 0.0 && val.abs() < 1e15 {
        format!("{}", val as i64)
    } else {
        format!("{}", val)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if self.kind == EventKind::Sysex {
            f.write_str(":")?;
            for byte in &self.data {
                write!(f, "{:02X}", byte)?;
            }
            return Ok(());
        }
        if let Some(chan) = self.chan {
            write!(f, ":{}", chan)?;
        }
        if let Some(num) = self.num {
            write!(f, ":{}", num)?;
        }
        if self.kind.has_chan() {
            write!(f, ":{}", format_val(self.val))?;
        }
        Ok(())
    }
}

impl FromStr for Event {
    type Err = CompileError;

    /// Parse `kind:chan:num:val`, `kind:chan:val` or a bare transport kind.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let mut parts = text.split(':');
        let kind: EventKind = parts.next().unwrap_or_default().parse()?;
        let fields: Vec<&str> = parts.collect();

        if kind == EventKind::Sysex {
            let hex: String = fields.concat().split_whitespace().collect();
            if !hex.is_ascii() {
                return Err(CompileError::new(s, "sysex payload is not hexadecimal"));
            }
            if hex.len() % 2 != 0 {
                return Err(CompileError::new(s, "sysex payload needs whole bytes"));
            }
            let data = hex
                .as_bytes()
                .chunks(2)
                .map(|pair| {
                    std::str::from_utf8(pair)
                        .ok()
                        .and_then(|digits| u8::from_str_radix(digits, 16).ok())
                })
                .collect::<Option<Vec<u8>>>()
                .ok_or_else(|| CompileError::new(s, "sysex payload is not hexadecimal"))?;
            return Ok(Event::sysex(data));
        }

        let expected = match (kind.has_chan(), kind.has_num()) {
            (true, true) => 3,
            (true, false) => 2,
            _ => 0,
        };
        if fields.len() != expected {
            return Err(CompileError::new(
                s,
                format!("{} events take {} fields, found {}", kind, expected, fields.len()),
            ));
        }

        let int = |field: &str| {
            field
                .trim()
                .parse::<i32>()
                .map_err(|_| CompileError::new(s, format!("'{}' is not an integer", field)))
        };
        let float = |field: &str| {
            field
                .trim()
                .parse::<f64>()
                .map_err(|_| CompileError::new(s, format!("'{}' is not a number", field)))
        };

        match expected {
            3 => Ok(Event::new(
                kind,
                Some(int(fields[0])?),
                Some(int(fields[1])?),
                float(fields[2])?,
            )),
            2 => Ok(Event::new(kind, Some(int(fields[0])?), None, float(fields[1])?)),
            _ => Ok(Event::transport(kind)),
        }
    }
}

impl TryFrom<String> for Event {
    type Error = CompileError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Event> for String {
    fn from(value: Event) -> Self {
        value.to_string()
    }
}
