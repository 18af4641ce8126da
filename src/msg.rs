use crate::{frame, regs};

/// Messages for controlling a running emulator.
pub enum Request {
    Start,
    UpdateButtonState(ButtonState),
    GetVideoFrame,
    GetFrequency,
    GetTitle,
    CyclePalette,
    Shutdown { save_state: bool },
}

/// Replies sent back for requests which produce one.
pub enum Reply {
    VideoFrame(Box<frame::Frame>),
    Frequency(f64),
    Title(String),
    ShuttingDown(Option<Box<[u8]>>),
}

/// A glue type for sending button states from the user to the emulator.
#[derive(Default, Clone, Copy, PartialEq, Eq)]
pub struct ButtonState {
    // Action buttons
    pub a: bool,
    pub b: bool,
    pub select: bool,
    pub start: bool,
    // D-Pad buttons
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

impl ButtonState {
    pub(crate) fn to_internal_repr(self) -> (regs::DPad, regs::ActionButtons) {
        let dpad = regs::DPad {
            right: self.right as u8,
            left: self.left as u8,
            up: self.up as u8,
            down: self.down as u8,
        };

        let btns = regs::ActionButtons {
            a: self.a as u8,
            b: self.b as u8,
            select: self.select as u8,
            start: self.start as u8,
        };

        (dpad, btns)
    }
}

impl std::ops::BitOrAssign for ButtonState {
    fn bitor_assign(&mut self, rhs: Self) {
        self.a |= rhs.a;
        self.b |= rhs.b;
        self.select |= rhs.select;
        self.start |= rhs.start;
        self.up |= rhs.up;
        self.down |= rhs.down;
        self.left |= rhs.left;
        self.right |= rhs.right;
    }
}
