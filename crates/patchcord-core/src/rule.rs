//! Compiled rules: match, transform and side effects.

use crate::events::{Event, EventKind};
use crate::route::Route;

/// A side effect attached to a rule.
///
/// A rule may carry any number of effects; the router runs them in order
/// after the transform and before the event is forwarded.
#[derive(Clone, Debug, PartialEq)]
pub enum RuleEffect {
    /// Relative control: step a named counter and emit its value.
    Counter { name: String, inc: f64 },
    /// Write the value to a named engine setting.
    Setting { name: String },
    /// Start (`<0` forever, `>0` that many loops) or stop (`0`) a player.
    Play { player: String },
    /// Set a player's tempo in BPM.
    Tempo { player: String },
    /// Start/stop loop recording on a player.
    Record { player: String },
    /// Set a player's swing.
    Swing { player: String },
    /// Set a player's groove.
    Groove { player: String },
    /// Tap tempo for a player.
    Tap { player: String },
    /// Feed held keys to an arpeggio; the key itself is silenced.
    Arpeggio { player: String },
    /// Feed events to a loop recorder.
    Loop { player: String },
    /// Write the value to an effect port.
    Fx { effect: String, port: String },
}

impl RuleEffect {
    /// Player targeted by this effect, if any.
    pub fn player(&self) -> Option<&str> {
        match self {
            RuleEffect::Play { player }
            | RuleEffect::Tempo { player }
            | RuleEffect::Record { player }
            | RuleEffect::Swing { player }
            | RuleEffect::Groove { player }
            | RuleEffect::Tap { player }
            | RuleEffect::Arpeggio { player }
            | RuleEffect::Loop { player } => Some(player),
            RuleEffect::Counter { .. } | RuleEffect::Setting { .. } | RuleEffect::Fx { .. } => {
                None
            }
        }
    }
}

/// How long an installed rule lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleScope {
    /// Cleared on the next patch switch.
    Patch,
    /// Kept until rules are reset explicitly.
    Persistent,
}

/// Output of applying a rule to an event.
#[derive(Clone, Debug, PartialEq)]
pub struct Transformed {
    /// The transformed event.
    pub event: Event,
    /// Low byte of a 14-bit controller pair, sent without routing.
    pub lsb: Option<Event>,
}

/// A fully resolved routing rule.
#[derive(Clone, Debug, PartialEq)]
pub struct Rule {
    pub kind: EventKind,
    pub tokind: EventKind,
    pub chan: Option<Route>,
    pub num: Option<Route>,
    pub val: Option<Route>,
    /// Exponent of the value curve (`b = 10^log`).
    pub log: Option<f64>,
    /// Controller number receiving the low seven bits of the value.
    pub lsb: Option<i32>,
    pub effects: Vec<RuleEffect>,
}

impl Rule {
    /// A bare rule matching `kind` and emitting `tokind`, no routes.
    pub fn new(kind: EventKind, tokind: EventKind) -> Self {
        Self {
            kind,
            tokind,
            chan: None,
            num: None,
            val: None,
            log: None,
            lsb: None,
            effects: Vec::new(),
        }
    }

    pub fn with_chan(mut self, route: Route) -> Self {
        self.chan = Some(route);
        self
    }

    pub fn with_num(mut self, route: Route) -> Self {
        self.num = Some(route);
        self
    }

    pub fn with_val(mut self, route: Route) -> Self {
        self.val = Some(route);
        self
    }

    pub fn with_effect(mut self, effect: RuleEffect) -> Self {
        self.effects.push(effect);
        self
    }

    /// Same-kind voice rules with no curve, split or effect can run in the
    /// engine's own router.
    pub fn is_native_eligible(&self) -> bool {
        self.kind == self.tokind
            && self.kind.is_native_routable()
            && self.effects.is_empty()
            && self.log.is_none()
            && self.lsb.is_none()
    }

    /// Split a channel range into one rule per channel.
    ///
    /// Exclusion intervals and single channels come back unchanged.
    pub fn expand_channels(&self) -> Vec<Rule> {
        match self.chan {
            Some(route) if route.is_range() => {
                let first = route.min.ceil() as i64;
                let last = route.max.floor() as i64;
                (first..=last)
                    .map(|c| Rule {
                        chan: Some(route.pinned(c as f64)),
                        ..self.clone()
                    })
                    .collect()
            }
            _ => vec![self.clone()],
        }
    }

    /// Whether `event` is the release of a key this `note` rule matches.
    pub fn releases(&self, event: &Event) -> bool {
        self.kind == EventKind::Note && event.kind() == EventKind::NoteOff
    }

    /// Whether this rule matches the event.
    ///
    /// Every route the rule carries must accept the corresponding field;
    /// fields the event does not carry are not checked. A `note` rule also
    /// matches note-offs on its channels and numbers, whatever its value
    /// range, so held keys are always released.
    pub fn applies(&self, event: &Event) -> bool {
        let released = self.releases(event);
        if self.kind != event.kind() && !released {
            return false;
        }
        let fields = [
            (self.chan, event.chan().map(f64::from)),
            (self.num, event.num().map(f64::from)),
            (
                self.val,
                Some(event.val()).filter(|_| event.kind().has_chan() && !released),
            ),
        ];
        fields.iter().all(|(route, value)| match (route, value) {
            (Some(route), Some(value)) => route.contains(*value),
            _ => true,
        })
    }

    /// Transform an event this rule applies to.
    pub fn apply(&self, event: &Event) -> Transformed {
        let source = event.kind();
        let target = self.tokind;

        if source.is_transport() {
            let val = match (self.val, source) {
                (Some(route), _) => route.tomin,
                (None, EventKind::Clock) => 1.0 / 24.0,
                (None, EventKind::Start | EventKind::Continue) => -1.0,
                (None, _) => 0.0,
            };
            let chan = self.chan.map(|r| r.tomin.round() as i32);
            let num = self.num.map(|r| r.tomin.round() as i32);
            return Transformed {
                event: Event::new(target, chan, num, val),
                lsb: None,
            };
        }

        let chan = match (event.chan(), self.chan) {
            (Some(c), Some(route)) => Some(route.apply(c as f64).round() as i32),
            (None, Some(route)) => Some(route.tomin.round() as i32),
            (c, None) => c,
        };

        let num = if target.has_num() {
            match (event.num(), self.num) {
                (Some(n), Some(route)) => Some(route.apply(n as f64).round() as i32),
                (Some(n), None) => Some(n),
                (None, Some(route)) => Some(route.tomin.round() as i32),
                (None, None) => Some(0),
            }
        } else {
            None
        };

        // a release maps like a zero-velocity key
        let released = self.releases(event);
        let input = if released { 0.0 } else { event.val() };
        let mut val = match (self.val, self.log) {
            (Some(route), Some(log)) => route.apply_log(input, log),
            (Some(route), None) => route.apply(input),
            (None, _) => input,
        };
        if released {
            val = val.clamp(0.0, target.max_val());
        }

        let mut lsb = None;
        if let Some(controller) = self.lsb {
            let wide = val.round().clamp(0.0, 16383.0) as i32;
            val = (wide >> 7) as f64;
            lsb = Some(Event::new(
                EventKind::Cc,
                chan,
                Some(controller),
                (wide & 0x7F) as f64,
            ));
        }

        let mut out = Event::new(target, chan, num, val);
        if released && target == EventKind::Note {
            out = Event::new(EventKind::NoteOff, chan, num, 0.0);
        }
        if target == EventKind::Sysex {
            out = event.with_kind(EventKind::Sysex);
        }
        Transformed { event: out, lsb }
    }
}
