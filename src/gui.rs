use std::{collections::HashMap, sync::mpsc, thread};

use sdl3::{
    event::Event,
    gamepad::{Axis, Button, Gamepad},
    hint,
    keyboard::{KeyboardState, Scancode},
    pixels::Color,
    render::{Canvas, FRect},
    video::Window,
    EventPump,
};

use monoboy::{ButtonState, Emulator, Reply, Request, SCREEN_RESOLUTION};

const BLOCK_SZ: u32 = 4;
const WX: u32 = SCREEN_RESOLUTION.0 as u32 * BLOCK_SZ;
const WY: u32 = SCREEN_RESOLUTION.1 as u32 * BLOCK_SZ;

pub struct EmulatorGui {
    sdl_ctx: sdl3::Sdl,
    gamepad_sys: sdl3::GamepadSubsystem,

    running: bool,
    request_tx: mpsc::Sender<Request>,
    reply_rx: mpsc::Receiver<Reply>,
    gamepads: HashMap<u32, Gamepad>,
    handle: Option<thread::JoinHandle<()>>,
}

impl EmulatorGui {
    pub fn new(mut emulator: Emulator) -> Self {
        let (request_tx, request_rx) = mpsc::channel();
        let (reply_tx, reply_rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            emulator.run(request_rx, reply_tx);
        });

        hint::set(hint::names::RENDER_VSYNC, "1");
        let sdl_ctx = sdl3::init().unwrap();
        let gamepad_sys = sdl_ctx.gamepad().unwrap();

        Self {
            sdl_ctx,
            gamepad_sys,

            running: false,
            request_tx,
            reply_rx,
            gamepads: Default::default(),
            handle: Some(handle),
        }
    }

    /// Run the emulator and return its saved state(if requested).
    pub fn main_loop(&mut self, save_state: bool) -> Option<Box<[u8]>> {
        self.send(Request::Start);
        self.send(Request::GetTitle);
        self.running = true;
        let Reply::Title(rom_title) = self.receive() else {
            panic!("invalid title reply")
        };

        let video_sys = self.sdl_ctx.video().unwrap();
        let window = video_sys
            .window(&format!("monoboy - {rom_title}"), WX, WY)
            .position_centered()
            .build()
            .unwrap();

        let mut canvas = window.into_canvas();
        let mut event_pump = self.sdl_ctx.event_pump().unwrap();

        while self.running {
            self.update(&mut event_pump);
            self.draw(&mut canvas);
        }

        // Erase the frequency readout line.
        eprintln!("\r                             ");
        self.send(Request::Shutdown { save_state });
        self.handle.take().unwrap().join().unwrap();

        match self.receive() {
            Reply::ShuttingDown(s) => s,
            _ => panic!("invalid shutdown reply"),
        }
    }

    fn update(&mut self, event_pump: &mut EventPump) {
        for event in event_pump.poll_iter() {
            match event {
                Event::Quit { .. }
                | Event::KeyDown {
                    scancode: Some(Scancode::Escape),
                    ..
                } => self.running = false,

                Event::KeyDown {
                    scancode: Some(Scancode::Space),
                    ..
                } => self.send(Request::CyclePalette),

                Event::ControllerDeviceAdded { which, .. } => {
                    if let Ok(g) = self.gamepad_sys.open(which) {
                        self.gamepads.insert(which, g);
                    }
                }

                Event::ControllerDeviceRemoved { which, .. } => {
                    self.gamepads.remove(&which);
                }

                _ => (),
            }
        }

        self.update_keystate(event_pump);

        self.send(Request::GetFrequency);
        let Reply::Frequency(freq) = self.receive() else {
            panic!("invalid frequency reply")
        };
        eprint!("\r=> {:.3} MHz", freq / 1e6);
    }

    fn update_keystate(&mut self, event_pump: &EventPump) {
        let s = KeyboardState::new(event_pump);
        let keydown = |scancode| s.is_scancode_pressed(scancode);
        let mut pressed = ButtonState {
            a: keydown(Scancode::X),
            b: keydown(Scancode::Z),
            select: keydown(Scancode::Return),
            start: keydown(Scancode::Backspace),
            up: keydown(Scancode::W) || keydown(Scancode::Up),
            down: keydown(Scancode::S) || keydown(Scancode::Down),
            left: keydown(Scancode::A) || keydown(Scancode::Left),
            right: keydown(Scancode::D) || keydown(Scancode::Right),
        };

        for g in self.gamepads.values() {
            // Treat the left joystick as D-pad presses over a threshold.
            const THRES: i16 = i16::MAX / 2;
            pressed |= ButtonState {
                a: g.button(Button::South),
                b: g.button(Button::West),
                select: g.button(Button::Back),
                start: g.button(Button::Start),
                up: g.button(Button::DPadUp) || g.axis(Axis::LeftY) < -THRES,
                down: g.button(Button::DPadDown) || g.axis(Axis::LeftY) > THRES,
                left: g.button(Button::DPadLeft) || g.axis(Axis::LeftX) < -THRES,
                right: g.button(Button::DPadRight) || g.axis(Axis::LeftX) > THRES,
            };
        }

        self.send(Request::UpdateButtonState(pressed));
    }

    fn draw(&self, canvas: &mut Canvas<Window>) {
        self.send(Request::GetVideoFrame);
        let Reply::VideoFrame(pixels) = self.receive() else {
            panic!("invalid frame reply")
        };

        canvas.set_draw_color(Color::RGB(0, 0, 0));
        canvas.clear();

        for y in 0..SCREEN_RESOLUTION.1 {
            for x in 0..SCREEN_RESOLUTION.0 {
                let monoboy::Color { r, g, b } = pixels.get(x, y);
                let rect = FRect {
                    x: x as f32 * BLOCK_SZ as f32,
                    y: y as f32 * BLOCK_SZ as f32,
                    w: BLOCK_SZ as f32,
                    h: BLOCK_SZ as f32,
                };

                canvas.set_draw_color(Color::RGB(r, g, b));
                canvas.fill_rect(rect).unwrap();
            }
        }

        canvas.present();
    }

    fn send(&self, request: Request) {
        self.request_tx.send(request).unwrap()
    }

    fn receive(&self) -> Reply {
        self.reply_rx.recv().unwrap()
    }
}
