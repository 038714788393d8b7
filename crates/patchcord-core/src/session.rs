//! The session ties compiler, router, players and engine together.
//!
//! It is the single entry point for a patch manager: compile and install
//! rules, feed incoming events, relay engine callbacks and switch patches.

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, trace, warn};

use crate::compiler::{RuleCompiler, RuleSpec};
use crate::config::Config;
use crate::engine::{Due, PlayerId, RecordingEngine, SoundEngine};
use crate::error::Result;
use crate::events::Event;
use crate::patch::{Bank, Patch};
use crate::players::{Player, PlayerDef, PlayerDirectory};
use crate::router::EventRouter;
use crate::rule::{Rule, RuleScope};

type Monitor = Box<dyn FnMut(&Event) + Send>;

pub struct Session<E: SoundEngine> {
    engine: E,
    router: EventRouter,
    players: PlayerDirectory,
    compiler: RuleCompiler,
    config: Config,
    monitor: Option<Monitor>,
    monitor_tx: Option<Sender<Event>>,
}

impl<E: SoundEngine> Session<E> {
    pub fn new(engine: E, config: Config) -> Self {
        Self {
            router: EventRouter::new(config.router.clone()),
            players: PlayerDirectory::new(config.sequencer.clone()),
            compiler: RuleCompiler::new(),
            engine,
            config,
            monitor: None,
            monitor_tx: None,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn compiler(&self) -> &RuleCompiler {
        &self.compiler
    }

    pub fn compiler_mut(&mut self) -> &mut RuleCompiler {
        &mut self.compiler
    }

    pub fn compile_rule(&self, text: &str) -> Result<Rule> {
        Ok(self.compiler.compile(text)?)
    }

    pub fn compile_spec(&self, spec: &RuleSpec) -> Result<Rule> {
        Ok(self.compiler.compile_spec(spec)?)
    }

    pub fn install_rule(&mut self, rule: Rule, scope: RuleScope) {
        self.router.install(rule, scope, &mut self.engine);
    }

    /// Compile and install in one go.
    pub fn add_rule(&mut self, text: &str, scope: RuleScope) -> Result<()> {
        let rule = self.compile_rule(text)?;
        self.install_rule(rule, scope);
        Ok(())
    }

    pub fn reset_rules(&mut self) {
        self.router.reset_rules(&mut self.engine);
    }

    /// Route one incoming event. Returns how many rules matched.
    pub fn handle_event(&mut self, event: &Event) -> usize {
        let monitor = &mut self.monitor;
        let tx = &self.monitor_tx;
        let mut report = |e: &Event| {
            if let Some(monitor) = monitor.as_mut() {
                monitor(e);
            }
            if let Some(tx) = tx {
                if tx.send(e.clone()).is_err() {
                    trace!("monitor channel closed");
                }
            }
        };
        self.router
            .handle_event(event, &mut self.engine, &mut self.players, &mut report)
    }

    /// Parse and route a raw MIDI message. Returns `false` if unparseable.
    pub fn handle_midi_bytes(&mut self, bytes: &[u8]) -> bool {
        match Event::from_bytes(bytes) {
            Some(event) => {
                self.handle_event(&event);
                true
            }
            None => {
                debug!("ignoring MIDI bytes {:02x?}", bytes);
                false
            }
        }
    }

    pub fn add_player(&mut self, name: &str, def: PlayerDef) -> Result<PlayerId> {
        self.players.add_player(name, def, &mut self.engine)
    }

    pub fn remove_player(&mut self, name: &str) -> bool {
        self.players.remove_player(name, &mut self.engine)
    }

    pub fn player(&self, name: &str) -> Option<&dyn Player> {
        self.players.get(name)
    }

    pub fn players(&self) -> &PlayerDirectory {
        &self.players
    }

    /// Run a player operation with the engine at hand.
    pub fn with_player<R>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut dyn Player, &mut dyn SoundEngine) -> R,
    ) -> Option<R> {
        let player = self.players.get_mut(name)?;
        Some(f(player, &mut self.engine))
    }

    /// Engine timer callback for a player.
    pub fn on_player_callback(&mut self, id: PlayerId) {
        match self.players.by_id_mut(id) {
            Some(player) => player.scheduler(&mut self.engine),
            None => trace!("callback for dismissed {}", id),
        }
    }

    /// Position report from the engine's file player.
    pub fn on_file_tick(&mut self, tick: u64) {
        let engine = &mut self.engine;
        self.players
            .for_each_mut(|player| player.on_file_tick(tick, engine));
    }

    /// A player's queued event has been played by the engine.
    pub fn on_scheduled_event(&mut self, event: &Event) {
        if let Some(monitor) = self.monitor.as_mut() {
            monitor(event);
        }
        if let Some(tx) = &self.monitor_tx {
            if tx.send(event.clone()).is_err() {
                trace!("monitor channel closed");
            }
        }
    }

    /// Switch to `patch`, keeping persistent rules and unchanged players.
    ///
    /// Everything is compiled and validated before anything changes, so a
    /// broken patch leaves the current one in place.
    pub fn apply_patch(&mut self, bank: &Bank, patch: &Patch) -> Result<()> {
        let compiler = RuleCompiler::with_names(bank.names.clone());
        let rules = bank
            .rules
            .iter()
            .chain(patch.rules.iter())
            .map(|spec| compiler.compile_spec(spec))
            .collect::<std::result::Result<Vec<Rule>, _>>()?;
        for (name, def) in &patch.players {
            def.validate(name)?;
        }

        self.compiler = compiler;
        self.router.clear_patch_rules(&mut self.engine);
        for rule in rules {
            self.router.install(rule, RuleScope::Patch, &mut self.engine);
        }

        let keep: Vec<&str> = patch.players.keys().map(String::as_str).collect();
        self.players.retain_names(&keep, &mut self.engine);
        for (name, def) in &patch.players {
            if let Err(err) = self.players.add_player(name, def.clone(), &mut self.engine) {
                warn!("player '{}' not created: {}", name, err);
            }
        }
        info!(
            "patch applied: {} rules, {} players",
            bank.rules.len() + patch.rules.len(),
            patch.players.len()
        );
        Ok(())
    }

    /// Look a patch up by name and apply it.
    pub fn select_patch(&mut self, bank: &Bank, name: &str) -> Result<()> {
        let patch = bank.patch(name)?;
        self.apply_patch(bank, patch)
    }

    /// Observe every routed, transformed and played event.
    pub fn set_monitor(&mut self, monitor: impl FnMut(&Event) + Send + 'static) {
        self.monitor = Some(Box::new(monitor));
    }

    pub fn clear_monitor(&mut self) {
        self.monitor = None;
    }

    /// A channel receiving the same events as the monitor.
    ///
    /// Each call replaces the previous channel.
    pub fn monitor_channel(&mut self) -> Receiver<Event> {
        let (tx, rx) = unbounded();
        self.monitor_tx = Some(tx);
        rx
    }
}

impl Session<RecordingEngine> {
    /// Offline session with default settings.
    pub fn offline() -> Self {
        let config = Config::default();
        let engine = RecordingEngine::with_ticks_per_second(config.sequencer.ticks_per_second);
        Self::new(engine, config)
    }

    /// Deliver everything due up to `tick`, in order, then move the clock.
    pub fn advance_to(&mut self, tick: u64) {
        while let Some((_, due)) = self.engine.pop_due(tick) {
            match due {
                Due::Callback(id) => self.on_player_callback(id),
                Due::Event(_, event) => {
                    self.engine.send_event(&event, false);
                    self.on_scheduled_event(&event);
                }
            }
        }
        self.engine.set_tick(tick);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::players::{ArpeggioDef, MidiFileDef, MidiLoopDef, SequenceDef};
    use std::sync::{Arc, Mutex};

    fn session() -> Session<RecordingEngine> {
        let _ = env_logger::builder().is_test(true).try_init();
        Session::offline()
    }

    fn played(session: &Session<RecordingEngine>) -> Vec<Event> {
        session
            .engine()
            .sent()
            .iter()
            .filter(|s| !s.route)
            .map(|s| s.event.clone())
            .collect()
    }

    #[test]
    fn test_end_to_end_rule() {
        let mut session = session();
        session
            .add_rule("cc:1/1-16*1+0=note:1-16*1+0", RuleScope::Patch)
            .unwrap();
        assert_eq!(session.handle_event(&Event::cc(1, 1, 64.0)), 1);
        assert_eq!(played(&session), vec![Event::note(1, 1, 64.0)]);
    }

    #[test]
    fn test_compile_errors_surface() {
        let session = session();
        assert!(session.compile_rule("cc:1/bogus").is_err());
        assert!(session.compile_rule("cc:1/7=note").is_ok());
    }

    #[test]
    fn test_midi_bytes_are_routed() {
        let mut session = session();
        session.add_rule("note=cc:1/20", RuleScope::Patch).unwrap();
        assert!(session.handle_midi_bytes(&[0x90, 60, 100]));
        assert!(!session.handle_midi_bytes(&[]));
        assert_eq!(played(&session), vec![Event::cc(1, 20, 100.0)]);
    }

    #[test]
    fn test_key_release_follows_routed_note() {
        let mut session = session();
        session
            .add_rule("note=note:2 fluidsetting=synth.last", RuleScope::Patch)
            .unwrap();
        session.handle_midi_bytes(&[0x91, 60, 100]);
        session.handle_midi_bytes(&[0x81, 60, 0]);
        assert_eq!(
            played(&session),
            vec![Event::note(2, 60, 100.0), Event::note_off(2, 60)]
        );
        assert_eq!(session.engine().get_setting("synth.last"), Some(100.0));
    }

    #[test]
    fn test_arpeggio_stops_on_release_bytes() {
        let mut session = session();
        session
            .add_player("arp", PlayerDef::Arpeggio(ArpeggioDef::default()))
            .unwrap();
        session.add_rule("note arpeggio=arp", RuleScope::Patch).unwrap();

        session.handle_midi_bytes(&[0x90, 60, 100]);
        session.handle_midi_bytes(&[0x90, 64, 100]);
        assert!(session.player("arp").unwrap().is_playing());
        // velocity zero and a real note-off both release
        session.handle_midi_bytes(&[0x90, 60, 0]);
        assert!(session.player("arp").unwrap().is_playing());
        session.handle_midi_bytes(&[0x80, 64, 0]);
        assert!(!session.player("arp").unwrap().is_playing());
    }

    #[test]
    fn test_monitor_sees_original_and_result() {
        let mut session = session();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        session.set_monitor(move |e| sink.lock().unwrap().push(e.clone()));
        let rx = session.monitor_channel();

        session.add_rule("cc=pbend", RuleScope::Patch).unwrap();
        session.handle_event(&Event::cc(2, 1, 100.0));

        let expected = vec![Event::cc(2, 1, 100.0), Event::pbend(2, 100.0)];
        assert_eq!(*seen.lock().unwrap(), expected);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn test_rule_starts_sequence_and_time_advances() {
        let mut session = session();
        let def: SequenceDef = toml::from_str(
            r#"patterns = [[["note:10:36:100", "note:10:38:100"]]]"#,
        )
        .unwrap();
        session.add_player("beat", PlayerDef::Sequence(def)).unwrap();
        session.add_rule("cc:1/100 play=beat", RuleScope::Patch).unwrap();

        session.handle_event(&Event::cc(1, 100, 1.0));
        assert!(session.player("beat").unwrap().is_playing());

        session.advance_to(1000);
        let notes: Vec<i32> = played(&session)
            .iter()
            .filter(|e| e.kind() == EventKind::Note)
            .filter_map(Event::num)
            .collect();
        assert_eq!(notes, vec![36, 38]);
        assert!(!session.player("beat").unwrap().is_playing());
    }

    #[test]
    fn test_loop_records_through_rules() {
        let mut session = session();
        session
            .add_player("loop", PlayerDef::MidiLoop(MidiLoopDef::default()))
            .unwrap();
        session.add_rule("cc:1/64 record=loop", RuleScope::Patch).unwrap();
        session.add_rule("note=note:2 loop=loop", RuleScope::Patch).unwrap();

        session.handle_event(&Event::cc(1, 64, 127.0));
        session.handle_event(&Event::note(1, 60, 100.0));
        session.advance_to(1000);
        session.handle_event(&Event::cc(1, 64, 0.0));

        let recorded = session
            .with_player("loop", |p, _| p.is_playing())
            .unwrap();
        assert!(recorded);

        session.engine_mut().take_sent();
        session.advance_to(3500);
        assert!(played(&session).contains(&Event::note(2, 60, 100.0)));
    }

    #[test]
    fn test_file_ticks_reach_players() {
        let mut session = session();
        let def = MidiFileDef {
            jumps: vec![(2, 0)],
            ..MidiFileDef::new("song.mid")
        };
        session.add_player("song", PlayerDef::MidiFile(def)).unwrap();
        session.with_player("song", |p, engine| p.play(1.0, engine));
        assert!(session.engine().file().playing);
        session.on_file_tick(100);
        session.on_file_tick(2000);
        assert!(!session.engine().file().playing);
    }

    #[test]
    fn test_apply_patch_keeps_unchanged_players_and_persistent_rules() {
        let mut session = session();
        let bank = Bank::from_toml_str(
            r#"
            [names]
            pedal = "64"

            [[rules]]
            type = "cc"
            num = "pedal"
            fluidsetting = "sustain"

            [patches.a.players.loop]
            type = "midiloop"
            beats = 4.0

            [patches.a.players.other]
            type = "midiloop"

            [patches.b]
            rules = [{ type = "note=note", chan = 1, val = "0-127=0-64", counter = "n" }]

            [patches.b.players.loop]
            type = "midiloop"
            beats = 4.0
            "#,
        )
        .unwrap();

        session
            .add_rule("clock fluidsetting=clock", RuleScope::Persistent)
            .unwrap();
        session.select_patch(&bank, "a").unwrap();
        let loop_id = session.players().id_of("loop");
        assert!(session.players().id_of("other").is_some());
        assert_eq!(session.router().rules().count(), 1 + 16);

        session.select_patch(&bank, "b").unwrap();
        assert_eq!(session.players().id_of("loop"), loop_id);
        assert!(session.players().id_of("other").is_none());
        assert_eq!(session.router().rules().count(), 1 + 16 + 1);

        session.handle_event(&Event::cc(3, 64, 127.0));
        assert_eq!(session.engine().get_setting("sustain"), Some(127.0));

        assert!(session.select_patch(&bank, "missing").is_err());
    }

    #[test]
    fn test_broken_patch_changes_nothing() {
        let mut session = session();
        let mut bank = Bank::default();
        bank.patches.insert(
            "ok".into(),
            Patch {
                rules: vec![RuleSpec::new("note=cc")],
                ..Default::default()
            },
        );
        bank.patches.insert(
            "broken".into(),
            Patch {
                rules: vec![RuleSpec::new("note=wobble")],
                ..Default::default()
            },
        );
        session.select_patch(&bank, "ok").unwrap();
        let before = session.router().rules().count();
        assert!(session.select_patch(&bank, "broken").is_err());
        assert_eq!(session.router().rules().count(), before);
    }
}
