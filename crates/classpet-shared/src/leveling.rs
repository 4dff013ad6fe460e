//! Pet leveling rules.
//!
//! Starting at level 1 with 0 exp, every 100 exp consumed advances one level.
//! Level 5 is final: exp is pinned at 100 and the pet is completed.  Both
//! functions here are pure so the sync engine can apply them during the
//! optimistic write without waiting on the network.

use serde::{Deserialize, Serialize};

use crate::constants::{EXP_PER_LEVEL, MAX_PET_LEVEL};

/// Level and in-level exp of a pet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PetProgress {
    pub level: u32,
    /// Exp within the current level (0..100, pinned to 100 once completed).
    pub exp: u32,
    pub completed: bool,
}

impl PetProgress {
    pub const START: Self = Self {
        level: 1,
        exp: 0,
        completed: false,
    };

    const FINAL: Self = Self {
        level: MAX_PET_LEVEL,
        exp: EXP_PER_LEVEL,
        completed: true,
    };

    /// Progress reached from an accumulated total.
    pub fn from_total(total_exp: u32) -> Self {
        let level = level_for_exp(total_exp);
        if level >= MAX_PET_LEVEL {
            Self::FINAL
        } else {
            Self {
                level,
                exp: total_exp % EXP_PER_LEVEL,
                completed: false,
            }
        }
    }

    /// Add `gain` exp, consuming 100 per level.  A completed pet does not move.
    pub fn gain(self, gain: u32) -> Self {
        if self.completed || self.level >= MAX_PET_LEVEL {
            return Self::FINAL;
        }
        let mut level = self.level.max(1);
        let mut exp = self.exp.saturating_add(gain);
        while exp >= EXP_PER_LEVEL && level < MAX_PET_LEVEL {
            exp -= EXP_PER_LEVEL;
            level += 1;
        }
        if level >= MAX_PET_LEVEL {
            Self::FINAL
        } else {
            Self {
                level,
                exp,
                completed: false,
            }
        }
    }
}

/// Level for an accumulated exp total, in `1..=5`.
pub fn level_for_exp(total_exp: u32) -> u32 {
    (1 + total_exp / EXP_PER_LEVEL).min(MAX_PET_LEVEL)
}

/// Share of the current level already earned, as a 0-100 percentage.
pub fn exp_progress(total_exp: u32) -> u8 {
    if level_for_exp(total_exp) >= MAX_PET_LEVEL {
        return 100;
    }
    ((total_exp % EXP_PER_LEVEL) * 100 / EXP_PER_LEVEL) as u8
}
