//! Track bytecode decoding.
//!
//! A track is a byte stream of commands: timed notes and rests, parameter
//! changes, and flow control (loops, pattern calls, repeats). Decoding runs
//! a single forward pass that flattens the stream into a linear event list.
//! Pattern calls and repeats are unrolled in place; a backward jump to an
//! already-decoded address becomes a [`Mp2kEvent::Goto`] back into the event
//! list and ends the pass.
//!
//! ## Command encoding
//!
//! - `0x00..=0x7F` are data bytes. On their own they re-invoke the current
//!   running command with the byte as its first argument.
//! - `0x80..=0xB0` are rests of a fixed tick count.
//! - `0xB1..=0xCD` are control and parameter commands.
//! - `0xCE` releases the current note, `0xCF` starts an indefinite note,
//!   `0xD0..=0xFF` are notes of a fixed tick count.
//!
//! Note arguments (key, velocity, extra length) are optional: each is
//! present only while the next byte is a data byte, and absent arguments
//! reuse the previous note's values.

use std::collections::HashMap;
use std::fmt;

use crate::error::{Mp2kError, Result};
use crate::rom::RomImage;

/// Track command opcodes.
pub mod op {
    /// End of track.
    pub const FINE: u8 = 0xB1;
    /// Jump to an absolute address.
    pub const GOTO: u8 = 0xB2;
    /// Pattern call to an absolute address.
    pub const PATT: u8 = 0xB3;
    /// Return from a pattern call.
    pub const PEND: u8 = 0xB4;
    /// Repeated pattern call with a count.
    pub const REPT: u8 = 0xB5;
    /// End of track, alternate form.
    pub const STOP: u8 = 0xB6;
    /// Memory access command (skipped).
    pub const MEMACC: u8 = 0xB9;
    /// Voice priority (consumed and dropped).
    pub const PRIO: u8 = 0xBA;
    /// Tempo change.
    pub const TEMPO: u8 = 0xBB;
    /// Key shift (transpose).
    pub const KEYSH: u8 = 0xBC;
    /// Instrument select.
    pub const VOICE: u8 = 0xBD;
    /// Track volume.
    pub const VOL: u8 = 0xBE;
    /// Stereo pan.
    pub const PAN: u8 = 0xBF;
    /// Pitch bend position.
    pub const BEND: u8 = 0xC0;
    /// Pitch bend range in semitones.
    pub const BENDR: u8 = 0xC1;
    /// Vibrato speed.
    pub const LFOS: u8 = 0xC2;
    /// Vibrato delay.
    pub const LFODL: u8 = 0xC3;
    /// Vibrato depth.
    pub const MOD: u8 = 0xC4;
    /// Vibrato target.
    pub const MODT: u8 = 0xC5;
    /// Fine tuning.
    pub const TUNE: u8 = 0xC8;
    /// Extension command (skipped).
    pub const XCMD: u8 = 0xCD;
    /// End of tie, releases the sounding note.
    pub const EOT: u8 = 0xCE;
    /// Tie, a note held until released.
    pub const TIE: u8 = 0xCF;
}

/// Tick durations for note and rest opcodes. Notes index it by
/// `opcode - 0xCE`, rests by `opcode - 0x81 + 2`.
const NOTE_LENGTH: [u8; 50] = [
    0, 0xFF, //
    1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, //
    17, 18, 19, 20, 21, 22, 23, 24, 28, 30, 32, 36, 40, 42, 44, 48, //
    52, 54, 56, 60, 64, 66, 68, 72, 76, 78, 80, 84, 88, 90, 92, 96,
];

/// Sentinel tick count for a note held until it is released.
pub const INDEFINITE: u8 = 0xFF;

/// One decoded track event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mp2kEvent {
    /// Advance time without sounding anything.
    Rest {
        /// Pause length in ticks.
        ticks: u8,
    },
    /// Start a note, or release one when `ticks` is zero.
    Note {
        /// Pitch as a key number, middle C = 60.
        key: u8,
        /// Key-on velocity; zero marks a release.
        velocity: u8,
        /// Note length in ticks, [`INDEFINITE`] for a tie.
        ticks: u8,
    },
    /// Change a playback parameter.
    Param {
        /// The parameter opcode ([`op::TEMPO`], [`op::VOL`] and friends).
        id: u8,
        /// Raw argument byte.
        value: u8,
    },
    /// Loop back to an earlier event.
    Goto {
        /// Index into the event list.
        index: usize,
    },
    /// End of the track.
    Stop,
}

impl Mp2kEvent {
    fn ticks(&self) -> u64 {
        match self {
            Mp2kEvent::Rest { ticks } => u64::from(*ticks),
            _ => 0,
        }
    }
}

impl fmt::Display for Mp2kEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Mp2kEvent::Rest { ticks } => write!(f, "REST {ticks}"),
            Mp2kEvent::Note { key, velocity, ticks: INDEFINITE } => {
                write!(f, "TIE key={key} vel={velocity}")
            }
            Mp2kEvent::Note { key, velocity: 0, ticks: 0 } => write!(f, "EOT key={key}"),
            Mp2kEvent::Note { key, velocity, ticks } => {
                write!(f, "NOTE key={key} vel={velocity} len={ticks}")
            }
            Mp2kEvent::Param { id, value } => write!(f, "{} {value}", param_name(id)),
            Mp2kEvent::Goto { index } => write!(f, "GOTO -> {index}"),
            Mp2kEvent::Stop => write!(f, "FINE"),
        }
    }
}

/// Name of a parameter opcode for dumps.
pub fn param_name(id: u8) -> &'static str {
    match id {
        op::FINE => "FINE",
        op::GOTO => "GOTO",
        op::PATT => "PATT",
        op::PEND => "PEND",
        op::REPT => "REPT",
        op::STOP => "STOP",
        op::MEMACC => "MEMACC",
        op::PRIO => "PRIO",
        op::TEMPO => "TEMPO",
        op::KEYSH => "KEYSH",
        op::VOICE => "VOICE",
        op::VOL => "VOL",
        op::PAN => "PAN",
        op::BEND => "BEND",
        op::BENDR => "BENDR",
        op::LFOS => "LFOS",
        op::LFODL => "LFODL",
        op::MOD => "MOD",
        op::MODT => "MODT",
        op::TUNE => "TUNE",
        op::XCMD => "XCMD",
        op::EOT => "EOT",
        op::TIE => "TIE",
        _ => "?",
    }
}

/// Decoded form of one track.
#[derive(Debug, Clone)]
pub struct TrackData {
    /// Offset of the first command byte.
    pub addr: u32,
    /// Decoded events in playback order.
    pub events: Vec<Mp2kEvent>,
    /// Whether the event list ends in a loop back into itself.
    pub has_loop: bool,
    /// Total playable length in ticks. A looped track counts its intro plus
    /// two passes of the loop body.
    pub length_ticks: u64,
}

impl TrackData {
    /// Decodes the command stream starting at `addr` into an event list.
    ///
    /// The pass terminates because every jump target is checked against the
    /// set of already-visited addresses: a revisit closes the loop, and a
    /// fresh target only ever moves decoding to bytes not yet seen under the
    /// current call context.
    pub fn decode(rom: &RomImage, addr: u32) -> Result<Self> {
        let mut events: Vec<Mp2kEvent> = Vec::new();
        // Visited addresses, tagged with the pattern-call return address so
        // the same bytes decoded inside and outside a call stay distinct.
        let mut visited: HashMap<u64, usize> = HashMap::new();
        let mut pos = addr;
        let mut running: u8 = 0;
        let mut note_key: u8 = 60;
        let mut note_vel: u8 = 127;
        let mut return_addr: u32 = 0;
        let mut repeat_addr: u32 = 0;
        let mut repeat_count: u8 = 1;
        let mut has_loop = false;

        loop {
            let event_addr = pos;
            let byte = rom.read_u8(pos)?;
            let mut first_arg: Option<u8> = None;
            let opcode = if byte < 0x80 {
                if running == 0 {
                    return Err(Mp2kError::Decode {
                        addr: pos,
                        reason: format!("data byte 0x{byte:02X} with no running command"),
                    });
                }
                first_arg = Some(byte);
                running
            } else {
                pos += 1;
                byte
            };

            visited.insert(effective_addr(return_addr, event_addr), events.len());

            match opcode {
                0x80..=0xB0 => {
                    let ticks = if opcode == 0x80 {
                        0
                    } else {
                        NOTE_LENGTH[usize::from(opcode) - 0x81 + 2]
                    };
                    events.push(Mp2kEvent::Rest { ticks });
                }
                0xCE..=0xFF => {
                    running = opcode;
                    let max_args = match opcode {
                        op::EOT => 1,
                        op::TIE => 2,
                        _ => 3,
                    };
                    let mut args = [0u8; 3];
                    let mut count = 0usize;
                    if let Some(arg) = first_arg {
                        pos += 1;
                        args[0] = arg;
                        count = 1;
                    }
                    while count < max_args {
                        let arg = rom.read_u8(pos)?;
                        if arg >= 0x80 {
                            break;
                        }
                        args[count] = arg;
                        count += 1;
                        pos += 1;
                    }
                    if count > 0 {
                        note_key = args[0];
                    }
                    if count > 1 {
                        note_vel = args[1];
                    }
                    let event = if opcode == op::EOT {
                        Mp2kEvent::Note { key: note_key, velocity: 0, ticks: 0 }
                    } else {
                        let mut ticks = NOTE_LENGTH[usize::from(opcode) - 0xCE];
                        if count > 2 {
                            ticks = ticks.wrapping_add(args[2]);
                        }
                        Mp2kEvent::Note { key: note_key, velocity: note_vel, ticks }
                    };
                    events.push(event);
                }
                op::FINE | op::STOP => {
                    events.push(Mp2kEvent::Stop);
                    break;
                }
                op::GOTO => {
                    let target = rom.read_pointer(pos, false)?;
                    pos += 4;
                    match visited.get(&effective_addr(return_addr, target)) {
                        Some(&index) => {
                            has_loop = true;
                            events.push(Mp2kEvent::Goto { index });
                            break;
                        }
                        None => pos = target,
                    }
                }
                op::PATT => {
                    let target = rom.read_pointer(pos, false)?;
                    pos += 4;
                    if return_addr != 0 {
                        return Err(Mp2kError::Decode {
                            addr: event_addr,
                            reason: "nested pattern call".into(),
                        });
                    }
                    repeat_count = 1;
                    return_addr = pos;
                    pos = target;
                }
                op::PEND => {
                    // A return with no pending call is ignored.
                    if return_addr != 0 {
                        repeat_count = repeat_count.saturating_sub(1);
                        if repeat_count > 0 {
                            pos = repeat_addr;
                        } else {
                            pos = return_addr;
                            return_addr = 0;
                        }
                    }
                }
                op::REPT => {
                    let count = rom.read_u8(pos)?;
                    let target = rom.read_pointer(pos + 1, false)?;
                    pos += 5;
                    if return_addr != 0 {
                        return Err(Mp2kError::Decode {
                            addr: event_addr,
                            reason: "nested pattern call".into(),
                        });
                    }
                    if count > 0 {
                        repeat_count = count;
                        repeat_addr = target;
                        return_addr = pos;
                        pos = target;
                    }
                }
                op::PRIO => {
                    consume_arg(rom, &mut pos, first_arg)?;
                }
                op::VOICE | op::VOL | op::PAN | op::BEND | op::BENDR | op::MOD | op::TUNE => {
                    running = opcode;
                    let value = consume_arg(rom, &mut pos, first_arg)?;
                    events.push(Mp2kEvent::Param { id: opcode, value });
                }
                op::TEMPO | op::KEYSH | op::LFOS | op::LFODL | op::MODT => {
                    let value = consume_arg(rom, &mut pos, first_arg)?;
                    events.push(Mp2kEvent::Param { id: opcode, value });
                }
                op::MEMACC => {
                    let mode = rom.read_u8(pos)?;
                    pos += if mode > 5 { 7 } else { 3 };
                }
                op::XCMD | 0xCB | 0xCC => {
                    consume_arg(rom, &mut pos, first_arg)?;
                }
                _ => {
                    return Err(Mp2kError::Decode {
                        addr: event_addr,
                        reason: format!("unknown command 0x{opcode:02X}"),
                    });
                }
            }
        }

        let length_ticks = length_of(&events);
        Ok(TrackData { addr, events, has_loop, length_ticks })
    }
}

#[inline]
fn effective_addr(return_addr: u32, addr: u32) -> u64 {
    (u64::from(return_addr) << 32) | u64::from(addr)
}

fn consume_arg(rom: &RomImage, pos: &mut u32, first_arg: Option<u8>) -> Result<u8> {
    match first_arg {
        Some(arg) => {
            *pos += 1;
            Ok(arg)
        }
        None => {
            let arg = rom.read_u8(*pos)?;
            *pos += 1;
            Ok(arg)
        }
    }
}

/// Sums rest ticks over the event list; a trailing loop edge counts the loop
/// body a second time.
fn length_of(events: &[Mp2kEvent]) -> u64 {
    let full: u64 = events.iter().map(Mp2kEvent::ticks).sum();
    match events.last() {
        Some(&Mp2kEvent::Goto { index }) => {
            full + events[index..].iter().map(Mp2kEvent::ticks).sum::<u64>()
        }
        _ => full,
    }
}
