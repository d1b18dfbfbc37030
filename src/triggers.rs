//! Marker triggers and deferred commands
use {
    crate::{
        SoundId,
        result::{DimuseError, DimuseResult, Pool},
        timing::Tick,
    },
    arrayvec::{ArrayString, ArrayVec},
};

/// Number of triggers that can be armed at the same time
pub const MAX_TRIGGERS: usize = 8;
/// Number of pending deferred commands
pub const MAX_DEFERS: usize = 8;
/// Arguments stored with a trigger or a deferred command
pub const TRIGGER_ARGS: usize = 10;
/// Longest marker text
pub const MARKER_LEN: usize = 255;
/// Trigger opcodes from this one on run a script instead of a command
pub const SCRIPT_OPCODE_BASE: i32 = 30;

/// Marker text, as found in `TEXT` blocks
pub type Marker = ArrayString<MARKER_LEN>;

/// Arguments of a trigger action
pub type Args = [i32; TRIGGER_ARGS];

/// Make a marker out of raw `TEXT` payload.
///
/// Invalid UTF-8 is replaced, overlong text is cut at a character boundary.
#[must_use]
pub fn marker(text: &[u8]) -> Marker {
    let text = String::from_utf8_lossy(text);
    let mut end = text.len().min(MARKER_LEN);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = Marker::new();
    out.push_str(&text[..end]);
    out
}

/// An armed trigger
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Trigger {
    /// Sound whose markers are watched (0: free slot)
    pub sound: SoundId,
    /// Marker to react to (empty: any marker)
    pub marker: Marker,
    /// What to do when it fires
    pub opcode: i32,
    /// Arguments of the action
    pub args: Args,
    /// Cleared while triggers were being processed; removed once processing ends
    pub clear_later: bool,
}

/// A command waiting to run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Defer {
    /// Ticks to wait (0: free slot)
    pub counter: Tick,
    /// Command to run
    pub opcode: i32,
    /// Its arguments
    pub args: Args,
}

/// Something a fired trigger or an expired defer wants done
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Tell the script host that `marker` of `sound` was passed
    Marker {
        /// Sound the marker belongs to
        sound: SoundId,
        /// Marker text
        marker: Marker,
    },
    /// Run an engine command
    Command {
        /// Command opcode
        opcode: i32,
        /// Command arguments
        args: Args,
    },
    /// Run a script
    Script {
        /// Script number
        opcode: i32,
        /// Script arguments
        args: Args,
    },
}

impl Action {
    fn for_opcode(opcode: i32, args: Args) -> Self {
        if opcode < SCRIPT_OPCODE_BASE {
            Self::Command { opcode, args }
        } else {
            Self::Script { opcode, args }
        }
    }
}

/// The trigger and defer tables
#[derive(Default, Debug)]
pub struct Triggers {
    pub(crate) triggers: [Trigger; MAX_TRIGGERS],
    pub(crate) defers: [Defer; MAX_DEFERS],
    mid_processing: u32,
}

/// Whether trigger `t` is selected by a query. `None`/empty selectors match anything.
fn selects(t: &Trigger, sound: Option<SoundId>, marker: &str, opcode: Option<i32>) -> bool {
    t.sound != 0
        && sound.is_none_or(|s| s == t.sound)
        && (marker.is_empty() || *marker == *t.marker)
        && opcode.is_none_or(|op| op == t.opcode)
}

impl Triggers {
    /// Arm a trigger
    pub fn set_trigger(
        &mut self,
        sound: SoundId,
        marker: &str,
        opcode: i32,
        args: Args,
    ) -> DimuseResult {
        if sound == 0 {
            return Err(DimuseError::ParamOutOfRange);
        }
        let marker = Marker::from(marker).map_err(|_| DimuseError::ParamOutOfRange)?;
        let Some(slot) = self.triggers.iter_mut().find(|t| t.sound == 0) else {
            log::warn!("Trigger table full, dropping trigger of sound {sound}");
            return Err(DimuseError::PoolExhausted(Pool::Trigger));
        };
        *slot = Trigger {
            sound,
            marker,
            opcode,
            args,
            clear_later: false,
        };
        Ok(())
    }
    /// Number of armed triggers matching the query
    #[must_use]
    pub fn check_trigger(&self, sound: Option<SoundId>, marker: &str, opcode: Option<i32>) -> usize {
        self.triggers
            .iter()
            .filter(|t| selects(t, sound, marker, opcode) && !t.clear_later)
            .count()
    }
    /// Disarm the triggers matching the query.
    ///
    /// While triggers are being processed, removal is postponed until processing ends.
    pub fn clear_trigger(&mut self, sound: Option<SoundId>, marker: &str, opcode: Option<i32>) {
        let deferred = self.mid_processing > 0;
        for t in &mut self.triggers {
            if selects(t, sound, marker, opcode) {
                if deferred {
                    t.clear_later = true;
                } else {
                    t.sound = 0;
                }
            }
        }
    }
    /// Start processing the triggers of `marker` of `sound`.
    ///
    /// Matching triggers are disarmed and their actions returned. Every call
    /// must be paired with [`end_processing`](Self::end_processing).
    pub fn begin_processing(&mut self, sound: SoundId, marker: &str) -> ArrayVec<Action, MAX_TRIGGERS> {
        self.mid_processing += 1;
        let mut actions = ArrayVec::new();
        for t in &mut self.triggers {
            if t.sound == 0
                || t.sound != sound
                || t.clear_later
                || (!t.marker.is_empty() && *t.marker != *marker)
            {
                continue;
            }
            t.sound = 0;
            actions.push(if t.opcode == 0 {
                Action::Marker {
                    sound,
                    marker: Marker::from(marker).unwrap_or_default(),
                }
            } else {
                Action::for_opcode(t.opcode, t.args)
            });
        }
        actions
    }
    /// Finish processing. The outermost call removes the triggers cleared meanwhile.
    pub fn end_processing(&mut self) {
        self.mid_processing = self.mid_processing.saturating_sub(1);
        if self.mid_processing > 0 {
            return;
        }
        for t in &mut self.triggers {
            if t.clear_later {
                t.sound = 0;
                t.clear_later = false;
            }
        }
    }
    /// Run `opcode` with `args` after `ticks` 60 Hz ticks
    pub fn defer_command(&mut self, ticks: Tick, opcode: i32, args: Args) -> DimuseResult {
        if ticks == 0 {
            return Err(DimuseError::ParamOutOfRange);
        }
        let Some(slot) = self.defers.iter_mut().find(|d| d.counter == 0) else {
            log::warn!("Defer table full, dropping command {opcode}");
            return Err(DimuseError::PoolExhausted(Pool::Defer));
        };
        *slot = Defer {
            counter: ticks,
            opcode,
            args,
        };
        Ok(())
    }
    /// Count down the deferred commands by one tick, returning the ones that are due
    pub fn tick_defers(&mut self) -> ArrayVec<Action, MAX_DEFERS> {
        let mut due = ArrayVec::new();
        for d in &mut self.defers {
            if d.counter == 0 {
                continue;
            }
            d.counter -= 1;
            if d.counter == 0 {
                due.push(Action::for_opcode(d.opcode, d.args));
            }
        }
        due
    }
    /// Disarm everything
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
