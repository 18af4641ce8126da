use bincode::{Decode, Encode};

use crate::regs::{ActionButtons, DPad, JoypadSelect};

/// Joypad button matrix behind the JOYP/P1 register.
///
/// The register exposes two selectable line groups(d-pad and action
/// buttons) on its lower nibble, all lines active-low. A falling edge on
/// any composed line requests the joypad interrupt.
#[derive(Default, Encode, Decode)]
pub(crate) struct Joypad {
    #[bincode(with_serde)]
    select: JoypadSelect,
    #[bincode(with_serde)]
    dpad: DPad,
    #[bincode(with_serde)]
    buttons: ActionButtons,
    /// Previously composed low nibble, for edge detection.
    lines: u8,
}

impl Joypad {
    pub(crate) fn new() -> Self {
        Self {
            // Nothing selected after boot, all lines released.
            select: JoypadSelect::new(0x30),
            lines: 0x0F,
            ..Default::default()
        }
    }

    /// Read JOYP: unused bits 7-6 are 1, then the select bits and the
    /// currently selected input lines.
    pub(crate) fn read(&self) -> u8 {
        0xC0 | self.select.read() | self.lines
    }

    /// Write JOYP: only the two select bits are writable. Changing the
    /// selection re-drives the input lines, which can itself produce a
    /// falling edge. Returns true if the interrupt should be requested.
    pub(crate) fn write(&mut self, val: u8) -> bool {
        self.select.write(val & 0x30);
        self.compose_lines()
    }

    /// Update the pressed-button state from the host. Returns true if the
    /// joypad interrupt should be requested.
    pub(crate) fn set_state(&mut self, dpad: DPad, buttons: ActionButtons) -> bool {
        self.dpad = dpad;
        self.buttons = buttons;
        self.compose_lines()
    }

    /// Recompute the low nibble from the selected groups.
    /// If both groups are selected a line is low when pressed in either.
    fn compose_lines(&mut self) -> bool {
        let mut new = 0x0F;

        if self.select.select_dpad == 0 {
            new &= !self.dpad.read();
        }
        if self.select.select_buttons == 0 {
            new &= !self.buttons.read();
        }
        new &= 0x0F;

        // Interrupt only when any of the four lines falls.
        let fell = self.lines & !new != 0;
        self.lines = new;
        fell
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pressed_down() -> DPad {
        DPad {
            down: 1,
            ..Default::default()
        }
    }

    #[test]
    fn nothing_selected_reads_released() {
        let mut joy = Joypad::new();
        assert_eq!(joy.read(), 0xFF);

        // Presses are invisible until a group is selected.
        assert!(!joy.set_state(pressed_down(), Default::default()));
        assert_eq!(joy.read() & 0x0F, 0x0F);
    }

    #[test]
    fn dpad_selection_exposes_lines() {
        let mut joy = Joypad::new();
        joy.set_state(pressed_down(), Default::default());

        // Select d-pad (bit 4 low): down is line 3.
        assert!(joy.write(0x20));
        assert_eq!(joy.read(), 0xE0 | 0b0111);
    }

    #[test]
    fn action_selection_exposes_lines() {
        let mut joy = Joypad::new();
        joy.set_state(
            Default::default(),
            ActionButtons {
                a: 1,
                start: 1,
                ..Default::default()
            },
        );

        assert!(joy.write(0x10));
        assert_eq!(joy.read() & 0x0F, 0b0110);
    }

    #[test]
    fn both_selected_ands_groups() {
        let mut joy = Joypad::new();
        joy.write(0x00);
        joy.set_state(
            pressed_down(),
            ActionButtons {
                a: 1,
                ..Default::default()
            },
        );

        // Line 0 from A, line 3 from down.
        assert_eq!(joy.read() & 0x0F, 0b0110);
    }

    #[test]
    fn interrupt_only_on_falling_edge() {
        let mut joy = Joypad::new();
        joy.write(0x20);

        assert!(joy.set_state(pressed_down(), Default::default()));
        // Held down, no new edge.
        assert!(!joy.set_state(pressed_down(), Default::default()));
        // Release produces no interrupt either.
        assert!(!joy.set_state(Default::default(), Default::default()));
    }
}
