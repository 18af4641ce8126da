use bincode::{Decode, Encode};

use crate::regs::TimerCtrl;

/// DIV and TIMA timers.
///
/// Both are driven from one internal clock incremented every M-cycle:
/// DIV is its bits 13..6 and TIMA advances on the falling edge of the
/// bit selected by TAC. The two-counter formulation in some documents
/// is observably identical at these rates.
#[derive(Default, Encode, Decode)]
pub(crate) struct Timer {
    // Registers owned by it.
    #[bincode(with_serde)]
    pub(crate) tac: TimerCtrl,
    pub(crate) tma: u8,
    pub(crate) tima: u8,

    /// Internal 14-bit sys-clock incremented every M-cycle.
    sys_clock: u16,
    div_reset: bool,
}

const SYS_CLOCK_MASK: u16 = !(!0 << 14);

impl Timer {
    pub(crate) fn new() -> Self {
        Default::default()
    }

    /// Advance the internal clock by `mcycles`.
    /// Returns true if the TIMER interrupt has been requested.
    pub(crate) fn tick(&mut self, mcycles: u32) -> bool {
        // A pending DIV write means the clock was RESET instead of
        // INCREMENTED on that M-cycle.
        let mcycles = if self.div_reset {
            self.div_reset = false;
            mcycles.saturating_sub(1)
        } else {
            mcycles
        };

        let mut timer_intr = false;

        for _ in 0..mcycles {
            let new = (self.sys_clock + 1) & SYS_CLOCK_MASK;

            timer_intr = self.tick_from_to(self.sys_clock, new) || timer_intr;
            self.sys_clock = new;
        }

        timer_intr
    }

    pub(crate) fn set_div(&mut self, _val: u8) {
        // Any write to DIV resets the whole clock to 0.
        self.sys_clock = 0;
        self.div_reset = true;
    }

    pub(crate) fn get_div(&self) -> u8 {
        (self.sys_clock >> 6) as u8
    }

    /// Reset DIV without the one-shot latch, for STOP entry.
    pub(crate) fn reset_div(&mut self) {
        self.sys_clock = 0;
    }

    fn tick_from_to(&mut self, old: u16, new: u16) -> bool {
        if self.tac.enable == 0 {
            return false;
        }

        if !has_fallen(old, new, get_clock_fall_bit(self.tac.clock_select)) {
            return false;
        }

        if self.tima == 0xFF {
            self.tima = self.tma;
            true
        } else {
            self.tima += 1;
            false
        }
    }
}

/// Which bit of the sys-clock should fall for TIMA to be incremented.
/// Periods are {256, 4, 16, 64} M-cycles for TAC clock-select {0, 1, 2, 3}.
#[inline]
fn get_clock_fall_bit(clock_select: u8) -> u32 {
    match clock_select {
        1 => 1,
        2 => 3,
        3 => 5,
        0 => 7,
        _ => unreachable!(),
    }
}

#[inline]
fn has_fallen(old: u16, new: u16, fall_bit: u32) -> bool {
    (old >> fall_bit) & 1 == 1 && (new >> fall_bit) & 1 == 0
}
