use std::{
    sync::mpsc::{self, RecvError, TryRecvError},
    time::Instant,
};

use crate::{
    cartridge::Cartridge,
    cpu::Cpu,
    frame::{Frame, ShadeFrame, PALETTES},
    info,
    mem::Mmu,
    msg::{ButtonState, Reply, Request},
    EmulatorErr,
};

/// The whole machine plus host-side plumbing: pacing, palettes and the
/// request/reply channel loop. The machine itself lives in `Cpu` (which
/// owns the bus and through it every other component), so a save state
/// is one bincode snapshot of that tree.
pub struct Emulator {
    cpu: Cpu,
    /// Total T-cycles ticked since the last clock reset.
    tcycles: u64,
    target_freq: u32,
    actual_freq: f64,
    start_time: Instant,
    palette_idx: usize,
    is_running: bool,
    /// The CPU hit a fatal decode error; execution is parked but the
    /// message loop keeps serving the frontend until shutdown.
    halted_on_error: bool,
    frame_requested: bool,
}

impl Emulator {
    /// Create a powered-on machine with the ROM installed.
    pub fn from_rom(rom: &[u8]) -> Result<Self, EmulatorErr> {
        let cart = Cartridge::new(rom)?;
        let mut cpu = Cpu::new(Mmu::new(cart));

        // Post-boot register state, the boot ROM itself is not emulated.
        // The LCD starts disabled until the game writes LCDC.
        cpu.pc.0 = 0x0100;
        cpu.sp.0 = 0xFFFE;

        Ok(Self::with_cpu(cpu))
    }

    /// Restore a machine from a save state produced by `save_state`.
    pub fn from_saved(saved: &[u8]) -> Result<Self, EmulatorErr> {
        let (cpu, read) = bincode::decode_from_slice(saved, bincode::config::standard())
            .map_err(|_| EmulatorErr::SaveFileCorrupted)?;
        if read != saved.len() {
            return Err(EmulatorErr::SaveFileCorrupted);
        }

        Ok(Self::with_cpu(cpu))
    }

    /// Extract the ROM image embedded in a save state.
    pub fn rom_from_saved(saved: &[u8]) -> Result<Vec<u8>, EmulatorErr> {
        let emu = Self::from_saved(saved)?;
        Ok(emu.cpu.mmu.cart.rom_bytes().to_vec())
    }

    fn with_cpu(cpu: Cpu) -> Self {
        Self {
            cpu,
            tcycles: 0,
            target_freq: info::FREQUENCY,
            actual_freq: 0.0,
            start_time: Instant::now(),
            palette_idx: 0,
            is_running: false,
            halted_on_error: false,
            frame_requested: false,
        }
    }

    /// Snapshot the whole machine state.
    pub fn save_state(&self) -> Result<Box<[u8]>, EmulatorErr> {
        bincode::encode_to_vec(&self.cpu, bincode::config::standard())
            .map(Vec::into_boxed_slice)
            .map_err(|_| EmulatorErr::SaveFileCorrupted)
    }

    /// ROM title from the cartridge header.
    pub fn title(&self) -> String {
        self.cpu.mmu.cart.title()
    }

    /// Print one line per executed instruction to stderr.
    pub fn set_trace(&mut self, enabled: bool) {
        self.cpu.trace_execution = enabled;
    }

    /// T-cycles elapsed since power-on or the last clock reset.
    pub fn tcycles(&self) -> u64 {
        self.tcycles
    }

    /// Execute one instruction(or one low-power cycle) and run the rest
    /// of the machine for the same duration.
    pub fn step(&mut self) -> Result<(), EmulatorErr> {
        let mcycles = self.cpu.step()?;
        self.tcycles += mcycles as u64 * 4;
        Ok(())
    }

    /// Run until the PPU completes the current frame. Returns once a
    /// frame's worth of cycles has elapsed even if the LCD is disabled,
    /// so a machine that never turns the screen on still makes progress.
    pub fn run_frame(&mut self) -> Result<(), EmulatorErr> {
        let limit = self.tcycles + 2 * info::FRAME_DOTS as u64;

        loop {
            self.step()?;

            if self.cpu.mmu.ppu.consume_frame_ready() || self.tcycles >= limit {
                return Ok(());
            }
        }
    }

    /// The current screen contents through the active host palette.
    pub fn video_frame(&self) -> Frame {
        let mut shades = ShadeFrame::default();
        self.cpu.mmu.ppu.fill_frame(&mut shades);
        shades.to_frame(PALETTES[self.palette_idx])
    }

    /// Update the pressed-button state.
    pub fn set_buttons(&mut self, buttons: ButtonState) {
        let (dpad, btns) = buttons.to_internal_repr();
        self.cpu.mmu.set_buttons(dpad, btns);
    }

    /// Run until `Request::Shutdown` is received.
    /// Run it in a new thread and use the channels to communicate with
    /// it: button presses, frame requests and other commands.
    pub fn run(&mut self, request_rx: mpsc::Receiver<Request>, reply_tx: mpsc::Sender<Reply>) {
        self.reset_clock();
        self.is_running = true;

        while self.is_running {
            // Run several steps at once, the total must stay well inside
            // one VBlank interval(4560 dots) so the frame handover below
            // never skips a frame. The longest instruction is 6 M-cycles
            // = 24 dots, so 128 steps can cover at most 3072 dots.
            if !self.halted_on_error {
                for _ in 0..128 {
                    match self.cpu.step() {
                        Ok(mcycles) => self.tcycles += mcycles as u64 * 4,
                        Err(e) => {
                            log::error!("emulator: {e}");
                            self.halted_on_error = true;
                            break;
                        }
                    }
                }
            }

            // If the CPU is stopped then wait for messages in blocking
            // mode, only host input can wake it.
            let non_blocking = !self.cpu.is_stopped() && !self.halted_on_error;
            if !self.handle_msgs(&request_rx, &reply_tx, non_blocking) {
                log::error!("emulator: send/receive channels closed abnormally");
                break;
            }

            // Hand frames over only as they complete to avoid tearing.
            if self.frame_requested && self.cpu.mmu.ppu.consume_frame_ready() {
                self.frame_requested = false;
                if reply_tx
                    .send(Reply::VideoFrame(Box::new(self.video_frame())))
                    .is_err()
                {
                    break;
                }
            }

            if !self.halted_on_error {
                self.pace_clock();
            }
        }
    }

    /// Handle user messages and respond to them.
    /// Returns false if send/receive failed, otherwise true.
    fn handle_msgs(
        &mut self,
        msg_rx: &mpsc::Receiver<Request>,
        msg_tx: &mpsc::Sender<Reply>,
        non_blocking: bool,
    ) -> bool {
        let msg = if non_blocking {
            match msg_rx.try_recv() {
                Ok(msg) => msg,
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        } else {
            match msg_rx.recv() {
                Ok(msg) => msg,
                Err(RecvError) => return false,
            }
        };

        match msg {
            Request::Start => {
                self.reset_clock();
                true
            }

            Request::UpdateButtonState(btns) => {
                self.set_buttons(btns);
                true
            }

            Request::GetVideoFrame => {
                // A stopped or errored machine produces no new frames,
                // answer with the last one instead of stalling the GUI.
                if self.cpu.is_stopped() || self.halted_on_error {
                    msg_tx
                        .send(Reply::VideoFrame(Box::new(self.video_frame())))
                        .is_ok()
                } else {
                    self.frame_requested = true;
                    true
                }
            }

            Request::GetFrequency => msg_tx.send(Reply::Frequency(self.actual_freq)).is_ok(),

            Request::GetTitle => msg_tx.send(Reply::Title(self.title())).is_ok(),

            Request::CyclePalette => {
                self.palette_idx = (self.palette_idx + 1) % PALETTES.len();
                true
            }

            Request::Shutdown { save_state } => {
                self.is_running = false;
                let saved = if save_state {
                    self.save_state().ok()
                } else {
                    None
                };
                msg_tx.send(Reply::ShuttingDown(saved)).is_ok()
            }
        }
    }

    /// Busy-wait until the wall clock catches up with the emulated clock.
    fn pace_clock(&mut self) {
        loop {
            let elapsed = self.start_time.elapsed().as_secs_f64();
            let expected = elapsed * self.target_freq as f64;
            let actual = self.tcycles as f64;

            if expected > actual {
                self.actual_freq = actual / elapsed;
                break;
            }
        }
    }

    fn reset_clock(&mut self) {
        self.tcycles = 0;
        self.start_time = Instant::now();
    }
}
