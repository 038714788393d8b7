//! Event router.
//!
//! Every incoming event is first handed to the engine unchanged (where the
//! native routing table sees it), then matched against the router's own
//! rules in insertion order. Each match produces a transformed event, runs
//! the rule's effects and injects the result directly.

mod counter;
mod tap;

use std::collections::HashMap;

use log::{debug, info, warn};

pub use counter::CounterRegistry;
pub use tap::TapTempo;

use crate::config::RouterConfig;
use crate::engine::SoundEngine;
use crate::events::Event;
use crate::players::{Player, PlayerDirectory};
use crate::rule::{Rule, RuleEffect, RuleScope};

#[derive(Clone, Debug, PartialEq)]
struct InstalledRule {
    rule: Rule,
    scope: RuleScope,
}

/// State the effects write to, split out so rules can be read meanwhile.
struct EffectState<'a> {
    counters: &'a mut CounterRegistry,
    taps: &'a mut HashMap<String, TapTempo>,
    config: &'a RouterConfig,
}

pub struct EventRouter {
    rules: Vec<InstalledRule>,
    native: Vec<InstalledRule>,
    counters: CounterRegistry,
    taps: HashMap<String, TapTempo>,
    config: RouterConfig,
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new(RouterConfig::default())
    }
}

impl EventRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            rules: Vec::new(),
            native: Vec::new(),
            counters: CounterRegistry::new(),
            taps: HashMap::new(),
            config,
        }
    }

    /// Rules matched by the router itself, in evaluation order.
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().map(|r| &r.rule)
    }

    /// Rules handed to the engine's native table, in insertion order.
    pub fn native_rules(&self) -> impl Iterator<Item = &Rule> {
        self.native.iter().map(|r| &r.rule)
    }

    pub fn counters(&self) -> &CounterRegistry {
        &self.counters
    }

    /// Install a rule, splitting channel ranges into one rule per channel.
    pub fn install(&mut self, rule: Rule, scope: RuleScope, engine: &mut dyn SoundEngine) {
        let expanded = if rule.kind.has_chan() {
            rule.expand_channels()
        } else {
            vec![rule]
        };
        let mut native_changed = false;
        for rule in expanded {
            let installed = InstalledRule { rule, scope };
            if self.config.native_routing && installed.rule.is_native_eligible() {
                self.native.push(installed);
                native_changed = true;
            } else {
                self.rules.push(installed);
            }
        }
        info!(
            "installed rule, {} routed and {} native",
            self.rules.len(),
            self.native.len()
        );
        if native_changed {
            self.push_native(engine);
        }
    }

    /// Rebuild the engine's table; it wants the newest rule first.
    fn push_native(&self, engine: &mut dyn SoundEngine) {
        engine.clear_native_rules();
        for installed in self.native.iter().rev() {
            engine.add_native_rule(&installed.rule);
        }
    }

    /// Drop every rule, persistent ones included.
    pub fn reset_rules(&mut self, engine: &mut dyn SoundEngine) {
        self.rules.clear();
        self.native.clear();
        self.push_native(engine);
        debug!("all rules cleared");
    }

    /// Drop patch-scoped rules, keeping persistent ones.
    pub fn clear_patch_rules(&mut self, engine: &mut dyn SoundEngine) {
        self.rules.retain(|r| r.scope == RuleScope::Persistent);
        let before = self.native.len();
        self.native.retain(|r| r.scope == RuleScope::Persistent);
        if before != 0 {
            self.push_native(engine);
        }
        debug!("patch rules cleared");
    }

    /// Dispatch one incoming event. Returns how many rules matched.
    pub fn handle_event(
        &mut self,
        event: &Event,
        engine: &mut dyn SoundEngine,
        players: &mut PlayerDirectory,
        monitor: &mut dyn FnMut(&Event),
    ) -> usize {
        engine.send_event(event, true);
        monitor(event);

        let mut state = EffectState {
            counters: &mut self.counters,
            taps: &mut self.taps,
            config: &self.config,
        };
        let mut matched = 0;
        for installed in &self.rules {
            let rule = &installed.rule;
            if !rule.applies(event) {
                continue;
            }
            matched += 1;
            let transformed = rule.apply(event);
            let out = if rule.releases(event) {
                run_release(rule, transformed.event, engine, players)
            } else {
                run_effects(rule, transformed.event, engine, players, &mut state)
            };
            debug!("{} -> {}", event, out);
            monitor(&out);
            engine.send_event(&out, false);
            if let Some(lsb) = transformed.lsb {
                monitor(&lsb);
                engine.send_event(&lsb, false);
            }
        }
        matched
    }
}

fn with_player(players: &mut PlayerDirectory, name: &str, f: impl FnOnce(&mut dyn Player)) {
    match players.get_mut(name) {
        Some(player) => f(player),
        None => warn!("no player named '{}'", name),
    }
}

/// Key releases only reach the players that track held keys.
fn run_release(
    rule: &Rule,
    event: Event,
    engine: &mut dyn SoundEngine,
    players: &mut PlayerDirectory,
) -> Event {
    for effect in &rule.effects {
        match effect {
            RuleEffect::Arpeggio { player } | RuleEffect::Loop { player } => {
                with_player(players, player, |p| p.add(&event, engine))
            }
            _ => {}
        }
    }
    event
}

fn run_effects(
    rule: &Rule,
    mut event: Event,
    engine: &mut dyn SoundEngine,
    players: &mut PlayerDirectory,
    state: &mut EffectState<'_>,
) -> Event {
    for effect in &rule.effects {
        let value = event.val();
        match effect {
            RuleEffect::Counter { name, inc } => {
                let count = state.counters.step(name, rule.val.as_ref(), *inc, value);
                event = event.with_val(count);
            }
            RuleEffect::Setting { name } => engine.set_setting(name, value),
            RuleEffect::Fx { effect, port } => engine.set_effect_param(effect, port, value),
            RuleEffect::Play { player } => {
                with_player(players, player, |p| p.play(value, engine))
            }
            RuleEffect::Tempo { player } => {
                with_player(players, player, |p| p.set_tempo(value, engine))
            }
            RuleEffect::Record { player } => {
                with_player(players, player, |p| p.record(value, engine))
            }
            RuleEffect::Swing { player } => with_player(players, player, |p| p.set_swing(value)),
            RuleEffect::Groove { player } => {
                with_player(players, player, |p| p.set_groove(vec![value, 1.0]))
            }
            RuleEffect::Tap { player } => {
                if value <= 0.0 {
                    continue;
                }
                let bpm = state.taps.entry(player.clone()).or_default().tap(
                    engine.current_tick(),
                    value,
                    engine.ticks_per_second(),
                    state.config.tap_ratio,
                    state.config.tap_timeout_ticks,
                );
                if let Some(bpm) = bpm {
                    debug!("tap tempo for '{}': {:.2}", player, bpm);
                    with_player(players, player, |p| p.set_tempo(bpm, engine));
                }
            }
            RuleEffect::Arpeggio { player } => {
                let held = event.clone();
                with_player(players, player, |p| p.add(&held, engine));
                event = event.with_val(0.0);
            }
            RuleEffect::Loop { player } => {
                let played = event.clone();
                with_player(players, player, |p| p.add(&played, engine));
            }
        }
    }
    event
}
