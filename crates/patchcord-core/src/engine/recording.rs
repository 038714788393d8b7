//! Offline engine that records instead of playing.
//!
//! Sent events are captured with the tick they were sent at; scheduled
//! items are kept in a tick-ordered queue that the caller drains with
//! [`RecordingEngine::pop_due`]. Settings, effect ports and the file player
//! are plain state so tests can read back what the router wrote.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use log::{debug, trace};

use super::{PlayerId, SoundEngine, DEFAULT_FILE_TICKS_PER_BEAT};
use crate::events::Event;
use crate::rule::Rule;
use crate::timing::DEFAULT_TICKS_PER_SECOND;

/// One captured `send_event` call.
#[derive(Clone, Debug, PartialEq)]
pub struct SentEvent {
    pub tick: u64,
    pub event: Event,
    pub route: bool,
}

/// Something the engine timer is due to deliver.
#[derive(Clone, Debug, PartialEq)]
pub enum Due {
    /// Call the player's scheduler.
    Callback(PlayerId),
    /// Play an event queued by a player.
    Event(PlayerId, Event),
}

impl Due {
    pub fn player(&self) -> PlayerId {
        match self {
            Due::Callback(id) | Due::Event(id, _) => *id,
        }
    }
}

/// State of the simulated file player.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FileTransport {
    pub path: Option<PathBuf>,
    pub playing: bool,
    pub position: u64,
    pub tempo: Option<f64>,
}

#[derive(Debug)]
pub struct RecordingEngine {
    tick: u64,
    ticks_per_second: f64,
    file_ticks_per_beat: u32,
    sent: Vec<SentEvent>,
    routed: Vec<Event>,
    queue: BTreeMap<(u64, u64), Due>,
    next_seq: u64,
    native_rules: Vec<Rule>,
    settings: HashMap<String, f64>,
    effect_params: HashMap<(String, String), f64>,
    file: FileTransport,
}

impl Default for RecordingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::with_ticks_per_second(DEFAULT_TICKS_PER_SECOND)
    }

    pub fn with_ticks_per_second(ticks_per_second: f64) -> Self {
        Self {
            tick: 0,
            ticks_per_second,
            file_ticks_per_beat: DEFAULT_FILE_TICKS_PER_BEAT,
            sent: Vec::new(),
            routed: Vec::new(),
            queue: BTreeMap::new(),
            next_seq: 0,
            native_rules: Vec::new(),
            settings: HashMap::new(),
            effect_params: HashMap::new(),
            file: FileTransport::default(),
        }
    }

    /// Move the clock. Never goes backwards.
    pub fn set_tick(&mut self, tick: u64) {
        self.tick = self.tick.max(tick);
    }

    pub fn set_file_ticks_per_beat(&mut self, ticks: u32) {
        self.file_ticks_per_beat = ticks.max(1);
    }

    /// Every `send_event` call so far.
    pub fn sent(&self) -> &[SentEvent] {
        &self.sent
    }

    /// Events sent so far, without tick or routing flag.
    pub fn sent_events(&self) -> Vec<Event> {
        self.sent.iter().map(|s| s.event.clone()).collect()
    }

    pub fn take_sent(&mut self) -> Vec<SentEvent> {
        std::mem::take(&mut self.sent)
    }

    /// Output of the native routing table for routed sends.
    pub fn routed(&self) -> &[Event] {
        &self.routed
    }

    pub fn native_rules(&self) -> &[Rule] {
        &self.native_rules
    }

    pub fn file(&self) -> &FileTransport {
        &self.file
    }

    /// Number of queued items for one player.
    pub fn pending(&self, player: PlayerId) -> usize {
        self.queue.values().filter(|due| due.player() == player).count()
    }

    /// Tick of the earliest queued item.
    pub fn next_due_tick(&self) -> Option<u64> {
        self.queue.keys().next().map(|(tick, _)| *tick)
    }

    /// Remove the earliest item due at or before `until`, moving the clock
    /// to its tick.
    pub fn pop_due(&mut self, until: u64) -> Option<(u64, Due)> {
        let key = *self.queue.keys().next()?;
        if key.0 > until {
            return None;
        }
        let due = self.queue.remove(&key)?;
        self.set_tick(key.0);
        trace!("due at {}: {:?}", key.0, due);
        Some((key.0, due))
    }

    fn enqueue(&mut self, at_tick: u64, due: Due) {
        // Items in the past fire on the next drain.
        let at_tick = at_tick.max(self.tick);
        self.queue.insert((at_tick, self.next_seq), due);
        self.next_seq += 1;
    }
}

impl SoundEngine for RecordingEngine {
    fn send_event(&mut self, event: &Event, route: bool) {
        if route {
            // native routers evaluate the last added rule first
            for rule in self.native_rules.iter().rev() {
                if rule.applies(event) {
                    self.routed.push(rule.apply(event).event);
                }
            }
        }
        self.sent.push(SentEvent {
            tick: self.tick,
            event: event.clone(),
            route,
        });
    }

    fn schedule_event(&mut self, event: &Event, player: PlayerId, at_tick: u64) {
        self.enqueue(at_tick, Due::Event(player, event.clone()));
    }

    fn schedule_callback(&mut self, player: PlayerId, at_tick: u64) {
        self.enqueue(at_tick, Due::Callback(player));
    }

    fn remove_events(&mut self, player: PlayerId) {
        let before = self.queue.len();
        self.queue.retain(|_, due| due.player() != player);
        debug!("removed {} queued items for {}", before - self.queue.len(), player);
    }

    fn current_tick(&self) -> u64 {
        self.tick
    }

    fn ticks_per_second(&self) -> f64 {
        self.ticks_per_second
    }

    fn add_native_rule(&mut self, rule: &Rule) {
        self.native_rules.push(rule.clone());
    }

    fn clear_native_rules(&mut self) {
        self.native_rules.clear();
    }

    fn set_setting(&mut self, name: &str, value: f64) {
        self.settings.insert(name.to_string(), value);
    }

    fn get_setting(&self, name: &str) -> Option<f64> {
        self.settings.get(name).copied()
    }

    fn set_effect_param(&mut self, effect: &str, port: &str, value: f64) {
        self.effect_params
            .insert((effect.to_string(), port.to_string()), value);
    }

    fn get_effect_param(&self, effect: &str, port: &str) -> Option<f64> {
        self.effect_params
            .get(&(effect.to_string(), port.to_string()))
            .copied()
    }

    fn file_play(&mut self, path: &Path) -> bool {
        if self.file.path.as_deref() != Some(path) {
            self.file.position = 0;
        }
        self.file.path = Some(path.to_path_buf());
        self.file.playing = true;
        true
    }

    fn file_stop(&mut self) {
        self.file.playing = false;
    }

    fn file_seek(&mut self, tick: u64) {
        self.file.position = tick;
    }

    fn file_set_tempo(&mut self, bpm: f64) {
        self.file.tempo = Some(bpm);
    }

    fn file_ticks_per_beat(&self) -> u32 {
        self.file_ticks_per_beat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::route::Route;

    #[test]
    fn test_queue_is_tick_ordered() {
        let mut engine = RecordingEngine::new();
        let a = PlayerId(1);
        let b = PlayerId(2);
        engine.schedule_callback(a, 200);
        engine.schedule_event(&Event::note(1, 60, 100.0), b, 100);
        engine.schedule_callback(b, 100);

        assert_eq!(engine.next_due_tick(), Some(100));
        assert_eq!(
            engine.pop_due(1000),
            Some((100, Due::Event(b, Event::note(1, 60, 100.0))))
        );
        assert_eq!(engine.pop_due(1000), Some((100, Due::Callback(b))));
        assert_eq!(engine.pop_due(150), None);
        assert_eq!(engine.current_tick(), 100);
        assert_eq!(engine.pop_due(1000), Some((200, Due::Callback(a))));
        assert_eq!(engine.current_tick(), 200);
    }

    #[test]
    fn test_remove_events_only_hits_one_player() {
        let mut engine = RecordingEngine::new();
        engine.schedule_callback(PlayerId(1), 10);
        engine.schedule_callback(PlayerId(2), 10);
        engine.schedule_event(&Event::cc(1, 7, 1.0), PlayerId(1), 20);
        engine.remove_events(PlayerId(1));
        assert_eq!(engine.pending(PlayerId(1)), 0);
        assert_eq!(engine.pending(PlayerId(2)), 1);
    }

    #[test]
    fn test_native_table_routes_sent_events() {
        let mut engine = RecordingEngine::new();
        let rule = Rule::new(EventKind::Note, EventKind::Note).with_chan(Route::fromto(1.0, 1.0, 2.0, 2.0));
        engine.add_native_rule(&rule);
        engine.send_event(&Event::note(1, 60, 90.0), true);
        engine.send_event(&Event::note(1, 62, 90.0), false);
        assert_eq!(engine.routed(), &[Event::note(2, 60, 90.0)]);
        assert_eq!(engine.sent().len(), 2);
        assert!(engine.sent()[0].route);
    }

    #[test]
    fn test_native_table_reads_oldest_rule_first() {
        let mut engine = RecordingEngine::new();
        let to_chan = |c: f64| {
            Rule::new(EventKind::Note, EventKind::Note).with_chan(Route::fromto(1.0, 1.0, c, c))
        };
        // pushed newest first, as the router does
        engine.add_native_rule(&to_chan(3.0));
        engine.add_native_rule(&to_chan(2.0));
        engine.send_event(&Event::note(1, 60, 90.0), true);
        assert_eq!(
            engine.routed(),
            &[Event::note(2, 60, 90.0), Event::note(3, 60, 90.0)]
        );
    }

    #[test]
    fn test_settings_and_file_transport() {
        let mut engine = RecordingEngine::new();
        engine.set_setting("synth.gain", 0.5);
        engine.set_effect_param("reverb", "room", 0.8);
        assert_eq!(engine.get_setting("synth.gain"), Some(0.5));
        assert_eq!(engine.get_effect_param("reverb", "room"), Some(0.8));
        assert_eq!(engine.get_effect_param("reverb", "damp"), None);

        assert!(engine.file_play(Path::new("song.mid")));
        engine.file_seek(960);
        engine.file_stop();
        assert!(!engine.file().playing);
        assert_eq!(engine.file().position, 960);
    }
}
