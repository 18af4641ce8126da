//! IO-port register structures for convenient reading and writing.

use crate::macros::bit_fields;

bit_fields! {
    /// Joypad/P1 register select lines, only these two bits are writable
    /// by user-code. In this register, rather unconventionally, 0 means
    /// SELECTED/PRESSED.
    #[derive(serde::Serialize, serde::Deserialize)]
    pub(crate) struct JoypadSelect<u8> {
        _0: 4,
        select_dpad: 1,
        select_buttons: 1,
    }
}

bit_fields! {
    #[derive(serde::Serialize, serde::Deserialize, PartialEq, Eq)]
    pub(crate) struct DPad<u8> {
        right: 1,
        left: 1,
        up: 1,
        down: 1,
    }
}

bit_fields! {
    #[derive(serde::Serialize, serde::Deserialize, PartialEq, Eq)]
    pub(crate) struct ActionButtons<u8> {
        a: 1,
        b: 1,
        select: 1,
        start: 1,
    }
}

bit_fields! {
    #[derive(serde::Serialize, serde::Deserialize)]
    pub(crate) struct LcdCtrl<u8> {
        /// BG and window enable, when 0 both show blank color.
        bg_win_enable: 1,
        obj_enable: 1,
        obj_size: 1,
        bg_tile_map: 1,
        /// Addressing mode for BG/Win tile index in tile data.
        bg_win_tile_data: 1,
        win_enable: 1,
        win_tile_map: 1,
        ppu_enable: 1,
    }
}

bit_fields! {
    #[derive(Debug, serde::Serialize, serde::Deserialize)]
    pub(crate) struct LcdStat<u8> {
        ppu_mode: 2,
        ly_eq_lyc: 1,
        // Conditions for STAT interrupt.
        mode0_int: 1,
        mode1_int: 1,
        mode2_int: 1,
        lyc_int: 1,
    }
}

bit_fields! {
    /// `TIMA` register control information.
    #[derive(serde::Serialize, serde::Deserialize)]
    pub(crate) struct TimerCtrl<u8> {
        clock_select: 2,
        enable: 1,
    }
}

bit_fields! {
    /// Interrupt flag and interrupt enable register fields.
    #[derive(Debug, serde::Serialize, serde::Deserialize)]
    pub(crate) struct IntrBits<u8> {
        vblank: 1,
        stat: 1,
        timer: 1,
        serial: 1,
        joypad: 1,
    }
}
