//! Real-time interpretation of decoded tracks into synthesis commands.
//!
//! Every track owns one engine channel. The song player interleaves its
//! tracks by play time, so shared state (the tempo list and the exclusive
//! generator channels) is always observed in chronological order. Output is
//! a stream of absolutely-timestamped [`SynthCommand`]s that can be fed to
//! an engine as they appear or collected and scheduled in bulk.
//!
//! A looped track plays its intro plus two passes of the loop body: the
//! backward jump is refused once the elapsed tick counter reaches the
//! track's play length, which also stops rest-free loop bodies from spinning
//! forever.

use std::collections::HashMap;

use mp2k_synth::command::{ChannelCtrl, NoteOn, SynthCommand, VoiceId};
use mp2k_synth::util::note_to_freq;

use crate::instrument::InstrumentId;
use crate::song::SongData;
use crate::track::{op, Mp2kEvent, TrackData, INDEFINITE};

/// Seconds per tick before the first tempo command (tempo 75 = 150 BPM).
const INITIAL_SEC_PER_TICK: f64 = 1.0 / 60.0;

/// A tempo command byte `v` means `1.25 / v` seconds per tick.
const TEMPO_SCALE: f64 = 1.25;

/// Pitch bend range in semitones before any range command.
const DEFAULT_BEND_RANGE: f64 = 2.0;

/// Bookkeeping for one sounding voice.
#[derive(Debug, Clone, Copy)]
struct ActiveNote {
    voice: VoiceId,
    /// When the release segment begins; 0 for indefinite notes.
    release_time: f64,
    /// When the release tail is projected to fall silent.
    end_time: f64,
    released: bool,
}

/// State shared by every track of one song.
#[derive(Debug, Default)]
struct SongState {
    /// Tempo breakpoints `(play time, seconds per tick)` in append order.
    tempos: Vec<(f64, f64)>,
    /// Active voice per exclusive generator channel, song wide.
    generators: HashMap<u8, ActiveNote>,
}

/// Playback cursor over one decoded track.
#[derive(Debug)]
struct TrackPlayer {
    channel: usize,
    position: usize,
    play_time: f64,
    sec_per_tick: f64,
    elapsed_ticks: u64,
    transpose: u8,
    tuning: f64,
    bend_range: f64,
    instrument: Option<InstrumentId>,
    release: f64,
    active: HashMap<u8, ActiveNote>,
    next_voice: u32,
    jumped: bool,
    stopped: bool,
}

impl TrackPlayer {
    fn new(channel: usize, song: &SongData) -> Self {
        let instrument = song.default_instrument();
        let release =
            instrument.map_or(0.0, |id| song.bank().instrument(id).adsr.release);
        TrackPlayer {
            channel,
            position: 0,
            play_time: 0.0,
            sec_per_tick: INITIAL_SEC_PER_TICK,
            elapsed_ticks: 0,
            transpose: 0,
            tuning: 0.0,
            bend_range: DEFAULT_BEND_RANGE,
            instrument,
            release,
            active: HashMap::new(),
            next_voice: 0,
            jumped: false,
            stopped: false,
        }
    }

    fn is_finished(&self, track: &TrackData) -> bool {
        self.stopped
            || self.position >= track.events.len()
            || self.elapsed_ticks > track.length_ticks
    }

    fn mint_voice(&mut self) -> VoiceId {
        let id = VoiceId(((self.channel as u64) << 32) | u64::from(self.next_voice));
        self.next_voice += 1;
        id
    }

    /// Processes one event, appending any commands it produces.
    fn step(
        &mut self,
        song: &SongData,
        state: &mut SongState,
        out: &mut Vec<(usize, SynthCommand)>,
    ) {
        let track = &song.tracks()[self.channel];
        // Adopt the most recently appended tempo at or before now; another
        // track may have changed it since this one last ran.
        for &(time, sec_per_tick) in state.tempos.iter().rev() {
            if time <= self.play_time {
                self.sec_per_tick = sec_per_tick;
                break;
            }
        }
        let event = track.events[self.position];
        self.position += 1;
        match event {
            Mp2kEvent::Rest { ticks } => {
                self.play_time += f64::from(ticks) * self.sec_per_tick;
                self.elapsed_ticks += u64::from(ticks);
                self.jumped = false;
            }
            Mp2kEvent::Stop => {
                self.stopped = true;
                self.jumped = false;
            }
            Mp2kEvent::Goto { index } => {
                if self.elapsed_ticks >= track.length_ticks || self.jumped {
                    self.position = track.events.len();
                } else {
                    self.position = index;
                    self.jumped = true;
                }
            }
            Mp2kEvent::Param { id, value } => {
                self.jumped = false;
                self.param(song, state, id, value, out);
            }
            Mp2kEvent::Note {
                key,
                velocity,
                ticks,
            } => {
                self.jumped = false;
                self.note(song, state, key, velocity, ticks, out);
            }
        }
        if self.is_finished(track) {
            self.kill_remaining(out);
        }
    }

    fn param(
        &mut self,
        song: &SongData,
        state: &mut SongState,
        id: u8,
        value: u8,
        out: &mut Vec<(usize, SynthCommand)>,
    ) {
        match id {
            op::TEMPO => {
                // A zero tempo would stall time entirely; keep the old one.
                if value != 0 {
                    self.sec_per_tick = TEMPO_SCALE / f64::from(value);
                    state.tempos.push((self.play_time, self.sec_per_tick));
                }
            }
            op::KEYSH => self.transpose = value,
            op::TUNE => self.tuning = (f64::from(value) - 64.0) / 64.0,
            op::VOICE => match song.bank().slot(value) {
                Some(id) => {
                    self.release = song.bank().instrument(id).adsr.release;
                    self.instrument = Some(id);
                }
                None => self.instrument = None,
            },
            op::PAN => out.push((
                self.channel,
                SynthCommand::Channel {
                    ctrl: ChannelCtrl::Pan,
                    value: f64::from(value) / 128.0,
                    time: self.play_time,
                },
            )),
            op::VOL => out.push((
                self.channel,
                SynthCommand::Channel {
                    ctrl: ChannelCtrl::Gain,
                    value: 4.0 * f64::from(value) / 127.0,
                    time: self.play_time,
                },
            )),
            op::BENDR => self.bend_range = f64::from(value),
            op::BEND => {
                let ratio =
                    note_to_freq(69.0 + self.bend_range * (f64::from(value) - 64.0) / 64.0) / 440.0;
                out.push((
                    self.channel,
                    SynthCommand::Channel {
                        ctrl: ChannelCtrl::PitchBend,
                        value: ratio,
                        time: self.play_time,
                    },
                ));
            }
            // LFOS, LFODL, MOD, MODT: modulation is accepted but not rendered.
            _ => {}
        }
    }

    fn note(
        &mut self,
        song: &SongData,
        state: &mut SongState,
        key: u8,
        velocity: u8,
        ticks: u8,
        out: &mut Vec<(usize, SynthCommand)>,
    ) {
        let Some(id) = self.instrument else {
            return;
        };
        let instrument = song.bank().instrument(id);
        let now = self.play_time;
        let note = key.wrapping_add(self.transpose);
        let generator = instrument.kind.generator_code();
        let note_id = generator.map_or(note, |code| 0x80 | code);

        // Generator channels are exclusive song-wide; melodic voices collide
        // per track and pitch.
        let existing = if generator.is_some() {
            state.generators.get(&note_id).copied()
        } else {
            self.active.get(&note_id).copied()
        };
        if let Some(entry) = existing {
            let contested =
                generator.is_some() || entry.release_time == 0.0 || entry.end_time > now;
            if contested {
                let immediate = velocity > 0 || entry.end_time == 0.0 || entry.end_time > now;
                let map = if generator.is_some() {
                    &mut state.generators
                } else {
                    &mut self.active
                };
                if immediate {
                    map.remove(&note_id);
                } else if !entry.released {
                    // Let the old voice fade, moving its remaining release
                    // window to start now.
                    if let Some(live) = map.get_mut(&note_id) {
                        live.released = true;
                        live.end_time = now + (entry.end_time - entry.release_time);
                        live.release_time = now;
                    }
                }
                out.push((
                    self.channel,
                    SynthCommand::Kill {
                        voice: entry.voice,
                        time: now,
                        immediate,
                    },
                ));
            }
        }

        if ticks == 0 {
            // Zero-length notes only exist to release a held voice.
            return;
        }
        let duration = if ticks == INDEFINITE {
            None
        } else {
            Some(f64::from(ticks) * self.sec_per_tick)
        };
        let Some(spec) = instrument.make_note(song.bank(), note, self.tuning, velocity, duration)
        else {
            return;
        };
        let voice = self.mint_voice();
        let release_time = duration.map_or(0.0, |d| now + d);
        let entry = ActiveNote {
            voice,
            release_time,
            end_time: release_time + self.release,
            released: false,
        };
        if generator.is_some() {
            state.generators.insert(note_id, entry);
        }
        self.active.insert(note_id, entry);
        out.push((
            self.channel,
            SynthCommand::NoteOn(NoteOn {
                voice,
                start: now,
                duration: spec.duration,
                source: spec.source,
                gain: spec.gain,
                pan: spec.pan,
                envelope: spec.envelope,
            }),
        ));
    }

    fn kill_remaining(&mut self, out: &mut Vec<(usize, SynthCommand)>) {
        for (_, entry) in self.active.drain() {
            out.push((
                self.channel,
                SynthCommand::Kill {
                    voice: entry.voice,
                    time: self.play_time,
                    immediate: true,
                },
            ));
        }
    }
}

/// Plays every track of a song, producing one command stream.
pub struct SongPlayer<'a> {
    song: &'a SongData,
    state: SongState,
    tracks: Vec<TrackPlayer>,
}

impl<'a> SongPlayer<'a> {
    /// Sets up a player with one channel per decoded track. Every track
    /// starts on the song's default instrument.
    pub fn new(song: &'a SongData) -> Self {
        let tracks = (0..song.tracks().len())
            .map(|i| TrackPlayer::new(i, song))
            .collect();
        SongPlayer {
            song,
            state: SongState::default(),
            tracks,
        }
    }

    /// Rewinds every track to the start and forgets accumulated tempo and
    /// voice state.
    pub fn reset(&mut self) {
        self.state = SongState::default();
        self.tracks = (0..self.song.tracks().len())
            .map(|i| TrackPlayer::new(i, self.song))
            .collect();
    }

    /// Number of engine channels the command stream addresses.
    pub fn channel_count(&self) -> usize {
        self.tracks.len()
    }

    /// Play time in seconds of the furthest-advanced track.
    pub fn play_time(&self) -> f64 {
        self.tracks.iter().map(|tp| tp.play_time).fold(0.0, f64::max)
    }

    /// True once every track has finished.
    pub fn is_finished(&self) -> bool {
        self.tracks
            .iter()
            .all(|tp| tp.is_finished(&self.song.tracks()[tp.channel]))
    }

    /// Advances the earliest unfinished track by one event, appending its
    /// commands as `(channel, command)`. Returns false when nothing is left
    /// to play.
    pub fn step(&mut self, out: &mut Vec<(usize, SynthCommand)>) -> bool {
        let song = self.song;
        let mut next: Option<usize> = None;
        for (i, tp) in self.tracks.iter().enumerate() {
            if tp.is_finished(&song.tracks()[i]) {
                continue;
            }
            if next.map_or(true, |n| tp.play_time < self.tracks[n].play_time) {
                next = Some(i);
            }
        }
        match next {
            Some(i) => {
                self.tracks[i].step(song, &mut self.state, out);
                true
            }
            None => false,
        }
    }

    /// Plays the whole song, returning the complete command stream.
    pub fn run(&mut self) -> Vec<(usize, SynthCommand)> {
        let mut out = Vec::new();
        while self.step(&mut out) {}
        out
    }
}
