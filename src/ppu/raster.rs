//! Whole-scanline rasterizer: background and window first, then sprites
//! composited over them.

use super::Ppu;
use crate::{info::*, macros::bit_fields};

bit_fields! {
    /// OAM attribute flags. The low nibble is only meaningful on color
    /// hardware and reads as plain storage here.
    pub(crate) struct OamAttrs<u8> {
        _0: 4,
        dmg_palette: 1,
        xflip: 1,
        yflip: 1,
        bg_priority: 1,
    }
}

/// One OAM slot.
/// Byte-0: Y-position + 16, Byte-1: X-position + 8,
/// Byte-2: tile index, Byte-3: attributes.
#[derive(Default, Clone, Copy)]
struct OamEntry {
    ypos: u8,
    xpos: u8,
    tile_id: u8,
    attrs: OamAttrs,
}

impl OamEntry {
    fn from_array(a: [u8; 4]) -> Self {
        Self {
            ypos: a[0],
            xpos: a[1],
            tile_id: a[2],
            attrs: OamAttrs::new(a[3]),
        }
    }
}

impl Ppu {
    /// Draw the full current scan-line into the frame. Runs once when the
    /// line enters HBlank; reads go straight to the PPU's own VRAM/OAM so
    /// the CPU-side access locks never apply here.
    pub(super) fn render_scanline(&mut self) {
        let mut bg_color_ids = [0u8; SCREEN_RESOLUTION.0];

        self.render_bg_window(&mut bg_color_ids);
        if self.lcdc.obj_enable == 1 {
            self.render_sprites(&bg_color_ids);
        }
    }

    fn render_bg_window(&mut self, bg_color_ids: &mut [u8; SCREEN_RESOLUTION.0]) {
        let ly = self.ly;

        for x in 0..SCREEN_RESOLUTION.0 as u8 {
            let color_id = if self.lcdc.bg_win_enable == 0 {
                0
            } else if self.in_window(x) {
                // WX below 7 still resolves to a non-negative column.
                let px = (x as i16 - (self.wx as i16 - 7)) as u8;
                let py = ly - self.wy;
                self.bg_win_color_id(px, py, self.lcdc.win_tile_map)
            } else {
                let px = x.wrapping_add(self.scx);
                let py = ly.wrapping_add(self.scy);
                self.bg_win_color_id(px, py, self.lcdc.bg_tile_map)
            };

            bg_color_ids[x as usize] = color_id;
            let shade = apply_palette(self.bgp, color_id);
            self.frame.set(x as usize, ly as usize, shade);
        }
    }

    /// The window covers a column once enabled and both origins have been
    /// passed. WX is biased by +7, values below 7 reach the left border.
    fn in_window(&self, x: u8) -> bool {
        self.lcdc.win_enable == 1 && self.ly >= self.wy && x as i16 >= self.wx as i16 - 7
    }

    /// Color ID for one position within the 256x256 BG/window plane.
    fn bg_win_color_id(&self, px: u8, py: u8, tile_map: u8) -> u8 {
        let map_base = if tile_map == 1 { TILE_MAP1 } else { TILE_MAP0 };
        let map_addr = map_base - *ADDR_VRAM.start() + (py as usize / 8) * 32 + px as usize / 8;

        let tile_id = self.vram[map_addr];
        let (low, high) = self.tile_row(tile_id, py % 8, self.lcdc.bg_win_tile_data == 1);
        tile_color_id(low, high, px % 8)
    }

    fn render_sprites(&mut self, bg_color_ids: &[u8; SCREEN_RESOLUTION.0]) {
        let ly = self.ly;
        let line = ly as u16 + 16;
        let height: u16 = if self.lcdc.obj_size == 1 { 16 } else { 8 };

        // Earlier OAM slots win both selection and pixel overlap, so a
        // single pass in OAM order needs no sorting.
        let mut selected = 0;
        let mut covered = [false; SCREEN_RESOLUTION.0];

        for idx in 0..OAM_ENTRIES {
            if selected == MAX_OBJ_PER_LINE {
                break;
            }

            let obj = oam_entry(&self.oam, idx);
            if !(obj.ypos as u16 <= line && line < obj.ypos as u16 + height) {
                continue;
            }
            selected += 1;

            self.render_one_sprite(obj, height as u8, bg_color_ids, &mut covered);
        }
    }

    fn render_one_sprite(
        &mut self,
        obj: OamEntry,
        height: u8,
        bg_color_ids: &[u8; SCREEN_RESOLUTION.0],
        covered: &mut [bool; SCREEN_RESOLUTION.0],
    ) {
        let ly = self.ly;

        let mut row = (ly as u16 + 16 - obj.ypos as u16) as u8;
        if obj.attrs.yflip == 1 {
            row = height - 1 - row;
        }

        // Tall objects are two stacked tiles, even index on top.
        let tile_id = if height == 16 {
            if row < 8 {
                obj.tile_id & !1
            } else {
                obj.tile_id | 1
            }
        } else {
            obj.tile_id
        };

        // Objects always use the unsigned 0x8000 addressing mode.
        let (low, high) = self.tile_row(tile_id, row % 8, true);

        for px in 0..8u8 {
            let sx = obj.xpos as i16 - 8 + px as i16;
            if !(0..SCREEN_RESOLUTION.0 as i16).contains(&sx) {
                continue;
            }
            let sx = sx as usize;
            if covered[sx] {
                continue;
            }

            let col = if obj.attrs.xflip == 1 { 7 - px } else { px };
            let color_id = tile_color_id(low, high, col);

            // Color 0 is transparent for objects.
            if color_id == 0 {
                continue;
            }
            // An opaque pixel masks later sprites even when it loses to
            // the background below.
            covered[sx] = true;

            if obj.attrs.bg_priority == 1 && bg_color_ids[sx] != 0 {
                continue;
            }

            let palette = if obj.attrs.dmg_palette == 1 {
                self.obp1
            } else {
                self.obp0
            };
            self.frame.set(sx, ly as usize, apply_palette(palette, color_id));
        }
    }

    /// Both bytes of one tile row.
    fn tile_row(&self, tile_id: u8, row: u8, unsigned_mode: bool) -> (u8, u8) {
        let addr = tile_data_vram_addr(unsigned_mode, tile_id) + 2 * row as usize;
        (self.vram[addr], self.vram[addr + 1])
    }
}

fn oam_entry(oam: &[u8], idx: usize) -> OamEntry {
    let d = &oam[(idx * 4)..(idx * 4 + 4)];
    OamEntry::from_array([d[0], d[1], d[2], d[3]])
}

/// VRAM-relative address of a tile's data.
/// Unsigned mode indexes up from 0x8000, signed mode around 0x9000.
#[inline]
fn tile_data_vram_addr(unsigned_mode: bool, tile_id: u8) -> usize {
    if unsigned_mode {
        TILE_BLOCK0 - *ADDR_VRAM.start() + tile_id as usize * TILE_SIZE
    } else {
        let offset = (tile_id as i8) as isize * TILE_SIZE as isize;
        (TILE_BLOCK2 as isize - *ADDR_VRAM.start() as isize + offset) as usize
    }
}

/// Final 2-bit shade for a color ID through a BGP/OBPx packed palette.
#[inline]
fn apply_palette(palette: u8, color_id: u8) -> u8 {
    (palette >> (color_id * 2)) & 0b11
}

#[inline(always)]
fn tile_color_id(low: u8, high: u8, x_index: u8) -> u8 {
    debug_assert!(x_index < 8);
    let i = 7 - x_index; // Bit-7 is leftmost pixel.
    ((low >> i) & 1) | ((high >> i) & 1) << 1
}
