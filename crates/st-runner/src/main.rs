//! Host runner for the Atari ST machine core.
//!
//! The emulator runs on its own thread at PAL speed and publishes frames
//! into a shared buffer; the winit thread presents them through a pixels
//! surface and feeds keyboard/mouse/gamepad input to the IKBD. Headless
//! mode runs a fixed number of frames and can dump a PNG screenshot and
//! a WAV of the PSG output.

mod audio;
mod config;
mod input;

use std::collections::HashSet;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};

use gilrs::{Axis, Button, GamepadId, Gilrs};
use machine_atari_st::atari_shifter::{FB_HEIGHT, FB_WIDTH};
use machine_atari_st::format_st::FloppyDisk;
use machine_atari_st::peripheral_atari_ikbd::AciaIkbd;
use machine_atari_st::{AtariSt, FramePacer, MachineConfig, RamSize, StModel};
use pixels::{Pixels, SurfaceTexture};
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{DeviceEvent, DeviceId, ElementState, MouseButton, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowAttributes, WindowId};

use crate::config::EmulatorConfig;

const SCALE: u32 = 2;
const WINDOW_HEIGHT: u32 = (FB_HEIGHT as u32) * 2; // scan-doubled 640x400

struct CliArgs {
    tos: Option<PathBuf>,
    altconfig: Option<PathBuf>,
    debug: bool,
    maxspeed: Option<bool>,
    floppy: Option<PathBuf>,
    mouse_sensitivity: Option<(u32, u32)>,
    headless: bool,
    frames: u32,
    screenshot: Option<PathBuf>,
    audio_dump: Option<PathBuf>,
}

fn print_usage_and_exit(code: i32) -> ! {
    eprintln!("Usage: st-runner [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --tos=<path>                TOS ROM image (192 KiB or 256 KiB)");
    eprintln!("  --altconfig=<path>          Use an alternate JSON config file");
    eprintln!("  --debug                     Enable debug tracing");
    eprintln!("  --maxspeed[=true|false]     Disable 50 Hz pacing");
    eprintln!("  --floppy=<path>             Insert an .ST or .MSA image at startup");
    eprintln!("  --mouse-sensitivity=X,Y     Mouse divisors [default: 2,2]");
    eprintln!("  --headless                  Run without a window");
    eprintln!("  --frames=<n>                Frames to run headless [default: 500]");
    eprintln!("  --screenshot=<file.png>     Save a framebuffer screenshot (headless)");
    eprintln!("  --audio=<file.wav>          Save a PSG audio dump (headless)");
    eprintln!("  -h, --help                  Show this help");
    process::exit(code);
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Flags are `--name=value`, parsed left to right; a repeated flag's last
/// occurrence wins.
fn parse_args() -> CliArgs {
    let mut cli = CliArgs {
        tos: None,
        altconfig: None,
        debug: false,
        maxspeed: None,
        floppy: None,
        mouse_sensitivity: None,
        headless: false,
        frames: 500,
        screenshot: None,
        audio_dump: None,
    };

    for arg in std::env::args().skip(1) {
        let (name, value) = match arg.split_once('=') {
            Some((name, value)) => (name.to_string(), Some(value.to_string())),
            None => (arg.clone(), None),
        };
        match name.as_str() {
            "--tos" => cli.tos = value.map(PathBuf::from),
            "--altconfig" => cli.altconfig = value.map(PathBuf::from),
            "--debug" => cli.debug = true,
            "--maxspeed" => {
                cli.maxspeed = match value {
                    None => Some(true),
                    Some(v) => match parse_bool(&v) {
                        Some(flag) => Some(flag),
                        None => {
                            eprintln!("Invalid --maxspeed value '{v}'");
                            print_usage_and_exit(1);
                        }
                    },
                }
            }
            "--floppy" => cli.floppy = value.map(PathBuf::from),
            "--mouse-sensitivity" => {
                let Some(value) = value else {
                    eprintln!("Missing value for --mouse-sensitivity (expected X,Y)");
                    print_usage_and_exit(1);
                };
                let parsed = value.split_once(',').and_then(|(x, y)| {
                    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
                });
                match parsed {
                    Some(pair) => cli.mouse_sensitivity = Some(pair),
                    None => {
                        eprintln!("Invalid --mouse-sensitivity value '{value}' (expected X,Y)");
                        print_usage_and_exit(1);
                    }
                }
            }
            "--headless" => cli.headless = true,
            "--frames" => {
                if let Some(value) = value {
                    cli.frames = value.parse().unwrap_or(500);
                }
            }
            "--screenshot" => cli.screenshot = value.map(PathBuf::from),
            "--audio" => cli.audio_dump = value.map(PathBuf::from),
            "-h" | "--help" => print_usage_and_exit(0),
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage_and_exit(1);
            }
        }
    }

    if cli.screenshot.is_some() || cli.audio_dump.is_some() {
        cli.headless = true;
    }
    cli
}

fn merge_cli(config: &mut EmulatorConfig, cli: &CliArgs) {
    if let Some(tos) = &cli.tos {
        config.tos_path = Some(tos.display().to_string());
    }
    if cli.debug {
        config.debug_mode = true;
    }
    if let Some(maxspeed) = cli.maxspeed {
        config.max_speed = maxspeed;
    }
    if let Some(floppy) = &cli.floppy {
        config.floppy_image_path = Some(floppy.display().to_string());
    }
    if let Some((x, y)) = cli.mouse_sensitivity {
        config.mouse_x_sensitivity = x;
        config.mouse_y_sensitivity = y;
    }
}

fn make_machine(config: &EmulatorConfig) -> AtariSt {
    let Some(tos_path) = &config.tos_path else {
        eprintln!("No TOS ROM configured (use --tos=<path>).");
        process::exit(1);
    };
    let tos = match std::fs::read(tos_path) {
        Ok(tos) => tos,
        Err(error) => {
            eprintln!("Failed to read TOS ROM {tos_path}: {error}");
            process::exit(1);
        }
    };

    let model = match config.st_model {
        0 => StModel::St,
        1 => StModel::MegaSt,
        _ => {
            eprintln!("STModel {} is not supported (only the ST is).", config.st_model);
            process::exit(1);
        }
    };

    let mut machine_config = MachineConfig::new(tos);
    machine_config.model = model;
    machine_config.ram = RamSize::from_index(config.ram_configuration);
    machine_config.sample_rate = config.sample_rate;
    machine_config.debug = config.debug_mode;

    let machine = match AtariSt::new(machine_config) {
        Ok(machine) => machine,
        Err(error) => {
            eprintln!("Cannot start the machine: {error}");
            process::exit(1);
        }
    };

    if let Ok(mut acia) = machine.acia_handle().lock() {
        acia.set_mouse_sensitivity(config.mouse_x_sensitivity, config.mouse_y_sensitivity);
    }
    machine
}

fn load_disk(path: &Path) -> FloppyDisk {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(error) => {
            eprintln!("Failed to read floppy image {}: {error}", path.display());
            process::exit(1);
        }
    };
    match FloppyDisk::from_named_bytes(&path.display().to_string(), bytes) {
        Ok(disk) => disk,
        Err(error) => {
            eprintln!("Invalid floppy image {}: {error}", path.display());
            process::exit(1);
        }
    }
}

/// Write a modified disk image back where it came from.
fn flush_disk(machine: &mut AtariSt, path: &Path) {
    let Some(disk) = machine.eject_disk(0) else {
        return;
    };
    if !disk.dirty() || disk.write_protected() {
        return;
    }
    let is_msa = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("msa"))
        .unwrap_or(false);
    let bytes = if is_msa {
        disk.to_msa_bytes()
    } else {
        disk.to_st_bytes()
    };
    if let Err(error) = std::fs::write(path, bytes) {
        eprintln!("Failed to write floppy image {}: {error}", path.display());
    } else {
        log::info!("floppy image {} written back", path.display());
    }
}

// --- Headless ------------------------------------------------------------

fn save_screenshot(framebuffer: &[u32], path: &Path) -> Result<(), String> {
    let file = File::create(path)
        .map_err(|e| format!("failed to create screenshot {}: {e}", path.display()))?;
    let writer = BufWriter::new(file);

    let mut encoder = png::Encoder::new(writer, FB_WIDTH as u32, FB_HEIGHT as u32);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut png_writer = encoder
        .write_header()
        .map_err(|e| format!("failed to write PNG header {}: {e}", path.display()))?;

    let mut bytes = vec![0u8; FB_WIDTH * FB_HEIGHT * 4];
    for (i, &argb) in framebuffer.iter().enumerate() {
        let o = i * 4;
        bytes[o] = ((argb >> 16) & 0xFF) as u8;
        bytes[o + 1] = ((argb >> 8) & 0xFF) as u8;
        bytes[o + 2] = (argb & 0xFF) as u8;
        bytes[o + 3] = ((argb >> 24) & 0xFF) as u8;
    }
    png_writer
        .write_image_data(&bytes)
        .map_err(|e| format!("failed to write PNG data {}: {e}", path.display()))
}

fn save_audio_wav(samples: &[f32], sample_rate: u32, path: &Path) -> Result<(), String> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| format!("failed to create WAV {}: {e}", path.display()))?;
    for &sample in samples {
        let scaled = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
        writer
            .write_sample(scaled)
            .map_err(|e| format!("failed to write WAV sample {}: {e}", path.display()))?;
    }
    writer
        .finalize()
        .map_err(|e| format!("failed to finalize WAV {}: {e}", path.display()))
}

fn run_headless(mut machine: AtariSt, cli: &CliArgs, sample_rate: u32) {
    let queue = machine.audio_queue();
    let mut samples = Vec::new();
    let mut scratch = Vec::new();
    let mut last = 0.0f32;

    for _ in 0..cli.frames {
        machine.run_frame();
        let pending = queue.len();
        if pending > 0 {
            scratch.resize(pending, 0.0);
            queue.fill(&mut scratch, &mut last);
            if cli.audio_dump.is_some() {
                samples.extend_from_slice(&scratch);
            }
        }
    }

    if let Some(path) = &cli.screenshot {
        if let Err(error) = save_screenshot(machine.framebuffer(), path) {
            eprintln!("{error}");
            process::exit(1);
        }
        eprintln!("Screenshot saved to {}", path.display());
    }
    if let Some(path) = &cli.audio_dump {
        if let Err(error) = save_audio_wav(&samples, sample_rate, path) {
            eprintln!("{error}");
            process::exit(1);
        }
        eprintln!("Audio saved to {}", path.display());
    }
}

// --- Windowed ------------------------------------------------------------

enum ControlMsg {
    Reset,
    Quit,
}

struct SharedVideo {
    framebuffer: Mutex<Vec<u32>>,
    frame_count: AtomicU64,
    running: AtomicBool,
}

fn emulator_loop(
    mut machine: AtariSt,
    shared: Arc<SharedVideo>,
    control: Receiver<ControlMsg>,
    max_speed: bool,
    floppy_path: Option<PathBuf>,
) {
    let mut pacer = FramePacer::pal();
    while shared.running.load(Ordering::Relaxed) {
        for msg in control.try_iter() {
            match msg {
                ControlMsg::Reset => machine.reset(),
                ControlMsg::Quit => shared.running.store(false, Ordering::Relaxed),
            }
        }

        machine.run_frame();

        if let Ok(mut fb) = shared.framebuffer.lock() {
            fb.copy_from_slice(machine.framebuffer());
        }
        shared.frame_count.fetch_add(1, Ordering::Release);

        if !max_speed {
            pacer.wait();
        }
    }

    if let Some(path) = &floppy_path {
        flush_disk(&mut machine, path);
    }
}

struct App {
    shared: Arc<SharedVideo>,
    control: Sender<ControlMsg>,
    acia: Arc<Mutex<AciaIkbd>>,
    window: Option<&'static Window>,
    pixels: Option<Pixels<'static>>,
    presented_frame: u64,
    joystick_keys: HashSet<KeyCode>,
    gilrs: Option<Gilrs>,
    active_gamepad: Option<GamepadId>,
}

impl App {
    fn new(shared: Arc<SharedVideo>, control: Sender<ControlMsg>, acia: Arc<Mutex<AciaIkbd>>) -> Self {
        let gilrs = match Gilrs::new() {
            Ok(gilrs) => Some(gilrs),
            Err(error) => {
                eprintln!("Gamepad support unavailable: {error}");
                None
            }
        };
        Self {
            shared,
            control,
            acia,
            window: None,
            pixels: None,
            presented_frame: 0,
            joystick_keys: HashSet::new(),
            gilrs,
            active_gamepad: None,
        }
    }

    fn update_joystick(&mut self) {
        let mut up = self.joystick_keys.contains(&KeyCode::Numpad8);
        let mut down = self.joystick_keys.contains(&KeyCode::Numpad2);
        let mut left = self.joystick_keys.contains(&KeyCode::Numpad4);
        let mut right = self.joystick_keys.contains(&KeyCode::Numpad6);
        let mut fire = self.joystick_keys.contains(&KeyCode::Numpad0);

        if let (Some(gilrs), Some(id)) = (&self.gilrs, self.active_gamepad) {
            if let Some(gamepad) = gilrs.connected_gamepad(id) {
                up |= gamepad.is_pressed(Button::DPadUp);
                down |= gamepad.is_pressed(Button::DPadDown);
                left |= gamepad.is_pressed(Button::DPadLeft);
                right |= gamepad.is_pressed(Button::DPadRight);
                fire |= gamepad.is_pressed(Button::South) || gamepad.is_pressed(Button::East);

                const AXIS_THRESHOLD: f32 = 0.5;
                if let Some(axis) = gamepad.axis_data(Axis::LeftStickX) {
                    right |= axis.value() > AXIS_THRESHOLD;
                    left |= axis.value() < -AXIS_THRESHOLD;
                }
                if let Some(axis) = gamepad.axis_data(Axis::LeftStickY) {
                    up |= axis.value() > AXIS_THRESHOLD;
                    down |= axis.value() < -AXIS_THRESHOLD;
                }
            }
        }

        if let Ok(mut acia) = self.acia.lock() {
            acia.joystick(up, down, left, right, fire);
        }
    }

    fn present(&mut self) {
        let frame = self.shared.frame_count.load(Ordering::Acquire);
        if frame == self.presented_frame {
            return;
        }
        self.presented_frame = frame;

        let Some(pixels) = self.pixels.as_mut() else {
            return;
        };
        let Ok(fb) = self.shared.framebuffer.lock() else {
            return;
        };
        let out = pixels.frame_mut();
        for (row_index, row) in fb.chunks(FB_WIDTH).enumerate() {
            for doubled in 0..2usize {
                let base = (row_index * 2 + doubled) * FB_WIDTH * 4;
                for (x, &argb) in row.iter().enumerate() {
                    let o = base + x * 4;
                    out[o] = ((argb >> 16) & 0xFF) as u8;
                    out[o + 1] = ((argb >> 8) & 0xFF) as u8;
                    out[o + 2] = (argb & 0xFF) as u8;
                    out[o + 3] = 0xFF;
                }
            }
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let size = LogicalSize::new(FB_WIDTH as u32 * SCALE, WINDOW_HEIGHT * SCALE);
        let attrs = WindowAttributes::default()
            .with_title("Atari ST (F12 quits, numpad is joystick 1)")
            .with_inner_size(size)
            .with_resizable(false);

        match event_loop.create_window(attrs) {
            Ok(window) => {
                let window: &'static Window = Box::leak(Box::new(window));
                let inner = window.inner_size();
                let surface = SurfaceTexture::new(inner.width, inner.height, window);
                match Pixels::new(FB_WIDTH as u32, WINDOW_HEIGHT, surface) {
                    Ok(pixels) => {
                        self.pixels = Some(pixels);
                        self.window = Some(window);
                    }
                    Err(error) => {
                        eprintln!("Failed to create pixels surface: {error}");
                        event_loop.exit();
                    }
                }
            }
            Err(error) => {
                eprintln!("Failed to create window: {error}");
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                self.shared.running.store(false, Ordering::Relaxed);
                event_loop.exit();
            }
            WindowEvent::KeyboardInput { event, .. } => {
                let PhysicalKey::Code(code) = event.physical_key else {
                    return;
                };
                let pressed = event.state == ElementState::Pressed;

                if code == KeyCode::F12 && pressed {
                    self.shared.running.store(false, Ordering::Relaxed);
                    let _ = self.control.send(ControlMsg::Quit);
                    event_loop.exit();
                    return;
                }
                // Pause warm-resets the machine.
                if code == KeyCode::Pause && pressed {
                    let _ = self.control.send(ControlMsg::Reset);
                    return;
                }

                if matches!(
                    code,
                    KeyCode::Numpad8
                        | KeyCode::Numpad2
                        | KeyCode::Numpad4
                        | KeyCode::Numpad6
                        | KeyCode::Numpad0
                ) {
                    if pressed {
                        self.joystick_keys.insert(code);
                    } else {
                        self.joystick_keys.remove(&code);
                    }
                    self.update_joystick();
                    return;
                }

                if event.repeat {
                    return;
                }
                if let Some(scancode) = input::st_scancode(code) {
                    if let Ok(mut acia) = self.acia.lock() {
                        acia.key_event(scancode, pressed);
                    }
                }
            }
            WindowEvent::MouseInput { state, button, .. } => {
                let pressed = state == ElementState::Pressed;
                let left = match button {
                    MouseButton::Left => true,
                    MouseButton::Right => false,
                    _ => return,
                };
                if let Ok(mut acia) = self.acia.lock() {
                    acia.mouse_button(left, pressed);
                }
            }
            WindowEvent::RedrawRequested => {
                self.present();
                if let Some(pixels) = self.pixels.as_ref() {
                    if let Err(error) = pixels.render() {
                        eprintln!("Render error: {error}");
                        event_loop.exit();
                    }
                }
            }
            _ => {}
        }
    }

    fn device_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        _device_id: DeviceId,
        event: DeviceEvent,
    ) {
        if let DeviceEvent::MouseMotion { delta } = event {
            if let Ok(mut acia) = self.acia.lock() {
                acia.mouse_motion(delta.0 as i32, delta.1 as i32);
            }
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(gilrs) = self.gilrs.as_mut() {
            while let Some(event) = gilrs.next_event() {
                self.active_gamepad = Some(event.id);
            }
            if self.active_gamepad.is_some() {
                self.update_joystick();
            }
        }
        if let Some(window) = self.window {
            window.request_redraw();
        }
    }
}

fn main() {
    let cli = parse_args();

    let mut builder = env_logger::Builder::from_default_env();
    if cli.debug {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();

    let config_path = cli
        .altconfig
        .clone()
        .unwrap_or_else(config::default_config_path);
    let mut emu_config = config::load_from_file(&config_path);
    merge_cli(&mut emu_config, &cli);
    if let Err(error) = config::save_to_file(&config_path, &emu_config) {
        log::warn!("could not persist config {}: {error}", config_path.display());
    }

    let mut machine = make_machine(&emu_config);

    let floppy_path = emu_config.floppy_image_path.as_ref().map(PathBuf::from);
    if let Some(path) = &floppy_path {
        let disk = load_disk(path);
        log::info!("inserted {} ({})", path.display(), disk.geometry());
        machine.insert_disk(0, disk);
    }

    if cli.headless {
        run_headless(machine, &cli, emu_config.sample_rate);
        return;
    }

    let audio_output = match audio::AudioOutput::new(machine.audio_queue(), emu_config.sample_rate)
    {
        Ok(output) => Some(output),
        Err(error) => {
            eprintln!("Warning: no audio ({error})");
            None
        }
    };

    let shared = Arc::new(SharedVideo {
        framebuffer: Mutex::new(vec![0xFF00_0000; FB_WIDTH * FB_HEIGHT]),
        frame_count: AtomicU64::new(0),
        running: AtomicBool::new(true),
    });
    let (control_tx, control_rx) = std::sync::mpsc::channel();
    let acia = machine.acia_handle();
    let max_speed = emu_config.max_speed;

    let emulator = {
        let shared = Arc::clone(&shared);
        std::thread::spawn(move || {
            emulator_loop(machine, shared, control_rx, max_speed, floppy_path);
        })
    };

    let event_loop = EventLoop::new().expect("failed to create event loop");
    let mut app = App::new(Arc::clone(&shared), control_tx, acia);
    if let Err(error) = event_loop.run_app(&mut app) {
        eprintln!("Event loop error: {error}");
    }

    shared.running.store(false, Ordering::Relaxed);
    let _ = emulator.join();
    drop(audio_output);
}
