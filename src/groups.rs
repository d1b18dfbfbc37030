//! Group master volumes
use crate::result::{DimuseError, DimuseResult};

/// Number of volume groups
pub const MAX_GROUPS: usize = 16;

/// Group 0 scales every other group
pub const GROUP_MASTER: i32 = 0;
/// Sound effects
pub const GROUP_SFX: i32 = 1;
/// Speech. Ducks [`GROUP_MUSIC_EFFECT`] while playing.
pub const GROUP_SPEECH: i32 = 2;
/// Music
pub const GROUP_MUSIC: i32 = 3;
/// Music as heard, after ducking
pub const GROUP_MUSIC_EFFECT: i32 = 4;

/// Master volume of each group, and the effective volume after scaling by group 0
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Groups {
    pub(crate) vols: [i32; MAX_GROUPS],
    pub(crate) eff_vols: [i32; MAX_GROUPS],
}

impl Default for Groups {
    fn default() -> Self {
        Self {
            vols: [127; MAX_GROUPS],
            eff_vols: [127; MAX_GROUPS],
        }
    }
}

fn slot(id: i32) -> DimuseResult<usize> {
    usize::try_from(id)
        .ok()
        .filter(|&id| id < MAX_GROUPS)
        .ok_or(DimuseError::ParamOutOfRange)
}

impl Groups {
    /// Set the volume of group `id`, or query it with a volume of -1.
    ///
    /// Returns the group's volume.
    pub fn set_group_vol(&mut self, id: i32, vol: i32) -> DimuseResult<i32> {
        let idx = slot(id)?;
        if vol == -1 {
            return Ok(self.vols[idx]);
        }
        if !(0..=127).contains(&vol) {
            return Err(DimuseError::ParamOutOfRange);
        }
        self.vols[idx] = vol;
        if idx == 0 {
            self.eff_vols[0] = vol;
            for (eff, group) in self.eff_vols.iter_mut().zip(self.vols).skip(1) {
                *eff = (group + 1) * vol / 128;
            }
        } else {
            self.eff_vols[idx] = (vol + 1) * self.vols[0] / 128;
        }
        Ok(vol)
    }
    /// Volume as last set
    pub fn vol(&self, id: i32) -> DimuseResult<i32> {
        Ok(self.vols[slot(id)?])
    }
    /// Volume after scaling by the master group
    pub fn eff_vol(&self, id: i32) -> DimuseResult<i32> {
        Ok(self.eff_vols[slot(id)?])
    }
    /// The track volume `vol` as heard in group `id`
    pub fn track_eff_vol(&self, id: i32, vol: i32) -> i32 {
        let group = self.eff_vol(id).unwrap_or(127);
        (vol + 1) * group / 128
    }
}
