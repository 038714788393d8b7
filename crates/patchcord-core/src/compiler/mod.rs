//! Rule compiler.
//!
//! Turns the two user-facing rule notations into [`Rule`] values:
//!
//! - the structured [`RuleSpec`], as found in bank and patch files
//! - the one-line text form `FROM[:C[/N[/V]]][=TO[:C[/N[/V]]]] [key=value ...]`
//!
//! Range fields accept `A`, `A-B`, `A-B*M+C` and `A-B=C-D`, where every
//! token may be a number, a note name such as `C#4` or a name from the
//! compiler's names table.
//!
//! # Example
//!
//! ```
//! use patchcord_core::compiler::RuleCompiler;
//! use patchcord_core::Event;
//!
//! let compiler = RuleCompiler::new();
//! let rule = compiler.compile("cc:1/1-16*1+0=note:1-16*1+0").unwrap();
//! let out = rule.apply(&Event::cc(1, 1, 64.0));
//! assert_eq!(out.event, Event::note(1, 1, 64.0));
//! ```

mod note;
mod range;

use std::collections::HashMap;
use std::fmt;

use log::debug;
use serde::{Deserialize, Serialize};

pub use note::parse_note_name;
pub use range::{parse_range, RangeSpec, RangeTransform};

use crate::error::CompileError;
use crate::events::EventKind;
use crate::route::Route;
use crate::rule::{Rule, RuleEffect};

/// A range given either as a bare number or as range text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SpecValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for SpecValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpecValue::Int(v) => write!(f, "{}", v),
            SpecValue::Float(v) => write!(f, "{}", v),
            SpecValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<&str> for SpecValue {
    fn from(text: &str) -> Self {
        SpecValue::Text(text.to_string())
    }
}

impl From<i64> for SpecValue {
    fn from(v: i64) -> Self {
        SpecValue::Int(v)
    }
}

/// Structured rule definition.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSpec {
    /// `"from=to"` or a bare `"kind"`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chan: Option<SpecValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num: Option<SpecValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val: Option<SpecValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lsb: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inc: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fluidsetting: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub play: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tempo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swing: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groove: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tap: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arpeggio: Option<String>,
    #[serde(rename = "loop", default, skip_serializing_if = "Option::is_none")]
    pub loop_player: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fx: Option<String>,
}

impl RuleSpec {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    /// Effect keys in the order they run.
    fn effect_keys(&self) -> Vec<(&'static str, &str)> {
        let keys: [(&'static str, &Option<String>); 11] = [
            ("counter", &self.counter),
            ("fluidsetting", &self.fluidsetting),
            ("play", &self.play),
            ("tempo", &self.tempo),
            ("record", &self.record),
            ("swing", &self.swing),
            ("groove", &self.groove),
            ("tap", &self.tap),
            ("arpeggio", &self.arpeggio),
            ("loop", &self.loop_player),
            ("fx", &self.fx),
        ];
        keys.iter()
            .filter_map(|(key, value)| value.as_deref().map(|v| (*key, v)))
            .collect()
    }
}

/// Rule under construction, shared by both notations.
struct Draft<'a> {
    text: &'a str,
    kind: EventKind,
    tokind: EventKind,
    chan: Option<Route>,
    num: Option<Route>,
    val: Option<Route>,
    log: Option<f64>,
    lsb: Option<i32>,
    inc: Option<f64>,
    effects: Vec<RuleEffect>,
}

impl<'a> Draft<'a> {
    fn new(text: &'a str, kind: EventKind, tokind: EventKind) -> Self {
        Self {
            text,
            kind,
            tokind,
            chan: None,
            num: None,
            val: None,
            log: None,
            lsb: None,
            inc: None,
            effects: Vec::new(),
        }
    }

    fn error(&self, reason: impl Into<String>) -> CompileError {
        CompileError::new(self.text, reason)
    }

    fn number(&self, key: &str, value: &str) -> Result<f64, CompileError> {
        value
            .trim()
            .parse::<f64>()
            .map_err(|_| self.error(format!("{} expects a number, got '{}'", key, value)))
    }

    fn set_key(&mut self, key: &str, value: &str) -> Result<(), CompileError> {
        let name = value.trim().to_string();
        if name.is_empty() {
            return Err(self.error(format!("{} needs a value", key)));
        }
        let effect = match key {
            "log" => {
                self.log = Some(self.number(key, value)?);
                return Ok(());
            }
            "lsb" => {
                let lsb = self.number(key, value)?;
                if lsb.fract() != 0.0 {
                    return Err(self.error("lsb must be a controller number"));
                }
                self.lsb = Some(lsb as i32);
                return Ok(());
            }
            "inc" => {
                self.inc = Some(self.number(key, value)?);
                return Ok(());
            }
            "counter" => RuleEffect::Counter { name, inc: 1.0 },
            "fluidsetting" => RuleEffect::Setting { name },
            "play" => RuleEffect::Play { player: name },
            "tempo" => RuleEffect::Tempo { player: name },
            "record" => RuleEffect::Record { player: name },
            "swing" => RuleEffect::Swing { player: name },
            "groove" => RuleEffect::Groove { player: name },
            "tap" => RuleEffect::Tap { player: name },
            "arpeggio" => RuleEffect::Arpeggio { player: name },
            "loop" => RuleEffect::Loop { player: name },
            "fx" => match name.split_once('>') {
                Some((effect, port)) if !effect.is_empty() && !port.is_empty() => RuleEffect::Fx {
                    effect: effect.to_string(),
                    port: port.to_string(),
                },
                _ => return Err(self.error("fx expects 'effect>port'")),
            },
            other => return Err(self.error(format!("unknown key '{}'", other))),
        };
        self.effects.push(effect);
        Ok(())
    }

    fn check_field(&self, field: &str, allowed: bool) -> Result<(), CompileError> {
        if allowed {
            Ok(())
        } else {
            Err(self.error(format!(
                "{} does not apply to {} or {}",
                field, self.kind, self.tokind
            )))
        }
    }

    /// Validate, fill default routes and produce the rule.
    fn finish(mut self) -> Result<Rule, CompileError> {
        let (kind, tokind) = (self.kind, self.tokind);
        self.check_field("chan", self.chan.is_none() || kind.has_chan() || tokind.has_chan())?;
        self.check_field("num", self.num.is_none() || kind.has_num() || tokind.has_num())?;

        if let Some(log) = self.log {
            if !log.is_finite() || log == 0.0 {
                return Err(self.error("log must be a finite, non-zero number"));
            }
        }
        if let Some(lsb) = self.lsb {
            if !(0..=127).contains(&lsb) {
                return Err(self.error("lsb must be between 0 and 127"));
            }
        }
        if let Some(inc) = self.inc {
            let mut found = false;
            for effect in self.effects.iter_mut() {
                if let RuleEffect::Counter { inc: step, .. } = effect {
                    *step = inc;
                    found = true;
                }
            }
            if !found {
                return Err(self.error("inc requires a counter"));
            }
        }

        for (index, slot) in [&mut self.chan, &mut self.num, &mut self.val]
            .into_iter()
            .enumerate()
        {
            if slot.is_none() {
                *slot = default_domain(kind, index).map(RangeSpec::to_route);
            }
        }

        Ok(Rule {
            kind,
            tokind,
            chan: self.chan,
            num: self.num,
            val: self.val,
            log: self.log,
            lsb: self.lsb,
            effects: self.effects,
        })
    }
}

/// Match domain assumed for field `index` (chan, num, val) of `kind`.
fn default_domain(kind: EventKind, index: usize) -> Option<RangeSpec> {
    match index {
        0 if kind.has_chan() => Some(RangeSpec::identity(1.0, 16.0)),
        1 if kind.has_num() => Some(RangeSpec::identity(0.0, 127.0)),
        2 if kind.has_chan() => Some(RangeSpec::identity(0.0, kind.max_val())),
        _ => None,
    }
}

/// One side of a text rule: the kind and up to three range fields.
struct Side<'a> {
    kind: EventKind,
    fields: [Option<&'a str>; 3],
}

fn parse_side<'a>(text: &str, side: &'a str) -> Result<Side<'a>, CompileError> {
    let (kind, rest) = match side.split_once(':') {
        Some((kind, rest)) => (kind, Some(rest)),
        None => (side, None),
    };
    let kind = kind
        .parse::<EventKind>()
        .map_err(|_| CompileError::new(text, format!("unknown event type '{}'", kind)))?;

    let mut fields = [None; 3];
    if let Some(rest) = rest {
        let parts: Vec<&str> = rest.split('/').collect();
        if parts.len() > fields.len() {
            return Err(CompileError::new(text, "expected at most chan/num/val"));
        }
        for (slot, part) in fields.iter_mut().zip(parts) {
            *slot = Some(part.trim()).filter(|p| !p.is_empty());
        }
    }
    Ok(Side { kind, fields })
}

/// Split `left=right` at the first `=` that introduces an event type.
fn split_head(head: &str) -> (&str, Option<&str>) {
    for (at, _) in head.match_indices('=') {
        let after = &head[at + 1..];
        let word = after.split(':').next().unwrap_or(after);
        if word.parse::<EventKind>().is_ok() {
            return (&head[..at], Some(after));
        }
    }
    (head, None)
}

/// Compiles rule text and rule specs against a table of names.
#[derive(Clone, Debug, Default)]
pub struct RuleCompiler {
    names: HashMap<String, String>,
}

impl RuleCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_names(names: HashMap<String, String>) -> Self {
        Self { names }
    }

    /// Define or replace a name usable in range fields.
    pub fn set_name(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.names.insert(name.into(), value.into());
    }

    pub fn names(&self) -> &HashMap<String, String> {
        &self.names
    }

    /// Parse a range field.
    pub fn parse_range(&self, text: &str) -> Result<RangeSpec, CompileError> {
        parse_range(text, &self.names)
    }

    /// Parse a range field straight into a [`Route`].
    pub fn route(&self, text: &str) -> Result<Route, CompileError> {
        Ok(self.parse_range(text)?.to_route())
    }

    fn kinds(&self, text: &str, type_spec: &str) -> Result<(EventKind, EventKind), CompileError> {
        let parse = |name: &str| {
            name.trim()
                .parse::<EventKind>()
                .map_err(|_| CompileError::new(text, format!("unknown event type '{}'", name.trim())))
        };
        match type_spec.split_once('=') {
            Some((from, to)) => Ok((parse(from)?, parse(to)?)),
            None => {
                let kind = parse(type_spec)?;
                Ok((kind, kind))
            }
        }
    }

    /// Compile a structured rule definition.
    pub fn compile_spec(&self, spec: &RuleSpec) -> Result<Rule, CompileError> {
        let (kind, tokind) = self.kinds(&spec.kind, &spec.kind)?;
        let mut draft = Draft::new(&spec.kind, kind, tokind);

        let route = |value: &Option<SpecValue>| -> Result<Option<Route>, CompileError> {
            value.as_ref().map(|v| self.route(&v.to_string())).transpose()
        };
        draft.chan = route(&spec.chan)?;
        draft.num = route(&spec.num)?;
        draft.val = route(&spec.val)?;
        draft.log = spec.log;
        draft.lsb = spec.lsb;
        draft.inc = spec.inc;
        for (key, value) in spec.effect_keys() {
            draft.set_key(key, value)?;
        }

        let rule = draft.finish()?;
        debug!("compiled rule spec '{}' -> {:?}", spec.kind, rule);
        Ok(rule)
    }

    /// Compile the one-line text notation.
    pub fn compile(&self, text: &str) -> Result<Rule, CompileError> {
        let mut tokens = text.split_whitespace();
        let head = tokens
            .next()
            .ok_or_else(|| CompileError::new(text, "empty rule"))?;

        let (left, right) = split_head(head);
        let left = parse_side(text, left)?;
        let right = right.map(|r| parse_side(text, r)).transpose()?;

        let tokind = right.as_ref().map_or(left.kind, |r| r.kind);
        let mut draft = Draft::new(text, left.kind, tokind);

        let mut routes = [None; 3];
        for (i, slot) in routes.iter_mut().enumerate() {
            let from = left.fields[i].map(|f| self.parse_range(f)).transpose()?;
            let to = right
                .as_ref()
                .and_then(|r| r.fields[i])
                .map(|f| self.parse_range(f))
                .transpose()?;
            *slot = match (from, to) {
                (Some(from), Some(to)) => Some(RangeSpec::combine(from, to, text)?.to_route()),
                (Some(spec), None) => Some(spec.to_route()),
                (None, Some(to)) => match default_domain(left.kind, i) {
                    Some(domain) => Some(RangeSpec::combine(domain, to, text)?.to_route()),
                    None => Some(to.to_route()),
                },
                (None, None) => None,
            };
        }
        let [chan, num, val] = routes;
        draft.chan = chan;
        draft.num = num;
        draft.val = val;

        for token in tokens {
            let (key, value) = token
                .split_once('=')
                .ok_or_else(|| CompileError::new(text, format!("expected key=value, got '{}'", token)))?;
            draft.set_key(key, value)?;
        }

        let rule = draft.finish()?;
        debug!("compiled rule '{}' -> {:?}", text, rule);
        Ok(rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Event;

    #[test]
    fn test_end_to_end_cc_to_note() {
        let rule = RuleCompiler::new()
            .compile("cc:1/1-16*1+0=note:1-16*1+0")
            .unwrap();
        assert_eq!(rule.kind, EventKind::Cc);
        assert_eq!(rule.tokind, EventKind::Note);
        let event = Event::cc(1, 1, 64.0);
        assert!(rule.applies(&event));
        assert_eq!(rule.apply(&event).event, Event::note(1, 1, 64.0));
        assert!(!rule.applies(&Event::cc(2, 1, 64.0)));
        assert!(!rule.applies(&Event::cc(1, 17, 64.0)));
    }

    #[test]
    fn test_defaults_for_voice_kinds() {
        let compiler = RuleCompiler::new();
        let rule = compiler.compile("note").unwrap();
        assert_eq!(rule.chan, Some(Route::identity(1.0, 16.0)));
        assert_eq!(rule.num, Some(Route::identity(0.0, 127.0)));
        assert_eq!(rule.val, Some(Route::identity(0.0, 127.0)));

        let rule = compiler.compile("pbend").unwrap();
        assert_eq!(rule.num, None);
        assert_eq!(rule.val, Some(Route::identity(0.0, 16383.0)));

        let rule = compiler.compile("start=cc:1/64/127").unwrap();
        assert_eq!(rule.val.map(|r| r.tomin), Some(127.0));
        assert_eq!(rule.chan.map(|r| r.tomin), Some(1.0));
        let out = rule.apply(&Event::transport(EventKind::Start)).event;
        assert_eq!(out, Event::cc(1, 64, 127.0));
    }

    #[test]
    fn test_plain_ranges_combine_to_fromto() {
        let rule = RuleCompiler::new()
            .compile("cc:1/7/0-127=cc:2/7/0-100")
            .unwrap();
        let out = rule.apply(&Event::cc(1, 7, 127.0)).event;
        assert_eq!(out.chan(), Some(2));
        assert!((out.val() - 100.0).abs() < 1e-9);
        assert_eq!(rule.apply(&Event::cc(1, 7, 0.0)).event.val(), 0.0);
    }

    #[test]
    fn test_destination_only_fields_map_the_default_domain() {
        let rule = RuleCompiler::new().compile("note=cc:1/20").unwrap();
        assert!(rule.applies(&Event::note(5, 60, 90.0)));
        assert_eq!(rule.apply(&Event::note(5, 60, 90.0)).event, Event::cc(1, 20, 90.0));

        let rule = RuleCompiler::new().compile("cc:1/7=cc:1/7/0-100").unwrap();
        assert!((rule.apply(&Event::cc(1, 7, 127.0)).event.val() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_equals_inside_range_is_not_a_type_split() {
        let rule = RuleCompiler::new().compile("note:1/C4-B4=C3-B3").unwrap();
        assert_eq!(rule.tokind, EventKind::Note);
        let out = rule.apply(&Event::note(1, 60, 100.0)).event;
        assert_eq!(out.num(), Some(48));
    }

    #[test]
    fn test_empty_fields_are_absent() {
        let rule = RuleCompiler::new().compile("cc:/7").unwrap();
        assert_eq!(rule.chan, Some(Route::identity(1.0, 16.0)));
        assert_eq!(rule.num, Some(Route::identity(7.0, 7.0)));
    }

    #[test]
    fn test_transforming_left_with_right_is_an_error() {
        let err = RuleCompiler::new()
            .compile("cc:1/7*2=cc:1/8")
            .unwrap_err();
        assert!(err.reason.contains("transforming"));
    }

    #[test]
    fn test_effects_keep_token_order() {
        let rule = RuleCompiler::new()
            .compile("cc:1/20 tap=seq play=seq fx=reverb>room")
            .unwrap();
        assert_eq!(
            rule.effects,
            vec![
                RuleEffect::Tap { player: "seq".into() },
                RuleEffect::Play { player: "seq".into() },
                RuleEffect::Fx {
                    effect: "reverb".into(),
                    port: "room".into()
                },
            ]
        );
    }

    #[test]
    fn test_counter_with_inc() {
        let rule = RuleCompiler::new()
            .compile("cc:1/21=prog:1 counter=presets inc=-1")
            .unwrap();
        assert_eq!(
            rule.effects,
            vec![RuleEffect::Counter {
                name: "presets".into(),
                inc: -1.0
            }]
        );
        assert!(RuleCompiler::new().compile("cc inc=2").is_err());
    }

    #[test]
    fn test_invalid_keys_and_values() {
        let compiler = RuleCompiler::new();
        assert!(compiler.compile("cc bogus=1").is_err());
        assert!(compiler.compile("cc fx=reverb").is_err());
        assert!(compiler.compile("cc lsb=200").is_err());
        assert!(compiler.compile("cc log=0").is_err());
        assert!(compiler.compile("cc play").is_err());
        assert!(compiler.compile("wobble").is_err());
        assert!(compiler.compile("").is_err());
        assert!(compiler.compile("prog:1/5").is_err());
    }

    #[test]
    fn test_names_table() {
        let mut compiler = RuleCompiler::new();
        compiler.set_name("drums", "10");
        let rule = compiler.compile("note:drums=note:1").unwrap();
        assert!(rule.applies(&Event::note(10, 36, 100.0)));
        assert_eq!(rule.apply(&Event::note(10, 36, 100.0)).event.chan(), Some(1));
        assert!(compiler.compile("note:bass").is_err());
    }

    #[test]
    fn test_compile_spec() {
        let spec = RuleSpec {
            chan: Some(SpecValue::Int(1)),
            num: Some(SpecValue::Int(7)),
            val: Some("0-127=0-16383".into()),
            lsb: Some(39),
            ..RuleSpec::new("cc")
        };
        let rule = RuleCompiler::new().compile_spec(&spec).unwrap();
        let out = rule.apply(&Event::cc(1, 7, 127.0));
        assert_eq!(out.event.val(), 127.0);
        assert_eq!(out.lsb.map(|e| e.num()), Some(Some(39)));
    }

    #[test]
    fn test_rule_spec_from_toml() {
        let spec: RuleSpec = toml::from_str(
            r#"
            type = "note=note"
            chan = 1
            num = "C4-B4"
            arpeggio = "arp"
            "#,
        )
        .unwrap();
        let rule = RuleCompiler::new().compile_spec(&spec).unwrap();
        assert_eq!(rule.num, Some(Route::identity(60.0, 71.0)));
        assert_eq!(rule.effects, vec![RuleEffect::Arpeggio { player: "arp".into() }]);

        let unknown: Result<RuleSpec, _> = toml::from_str("type = \"cc\"\nwobble = 1");
        assert!(unknown.is_err());
    }

    #[test]
    fn test_spec_effects_run_in_canonical_order() {
        let spec = RuleSpec {
            fx: Some("chorus>depth".into()),
            counter: Some("c".into()),
            inc: Some(2.0),
            ..RuleSpec::new("cc")
        };
        let rule = RuleCompiler::new().compile_spec(&spec).unwrap();
        assert!(matches!(rule.effects[0], RuleEffect::Counter { inc, .. } if inc == 2.0));
        assert!(matches!(rule.effects[1], RuleEffect::Fx { .. }));
    }
}
