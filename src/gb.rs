//! Game Boy emulation entrypoint and associated functions and structures.
//!
//! Most of the meaningful publicly available functions and structures to
//! build a working emulator should be present here.
//!
//! # Examples
//!
//! Creates a [`GameBoy`] instance from a ROM image and runs it one video
//! frame at a time.
//!
//! ```rust,no_run
//! use damage::gb::GameBoy;
//! let rom = std::fs::read("game.gb").unwrap();
//! let mut game_boy = GameBoy::new(&rom, 44100, 2048).unwrap();
//! let event = game_boy.run_until(game_boy.cycles() + 70224);
//! assert!(event.new_frame() || event.until_cycles());
//! ```

use damage_common::{
    error::Error,
    util::{read_file, write_file},
};

use crate::{
    apu::{Apu, CH1},
    consts::{
        BGP_ADDR, IE_ADDR, IF_ADDR, LCDC_ADDR, LYC_ADDR, OBP0_ADDR, OBP1_ADDR, SCX_ADDR, SCY_ADDR,
    },
    cpu::Cpu,
    mmu::Mmu,
    pad::{JoypadButtons, PadCallback},
    ppu::DISPLAY_SIZE,
    rom::Cartridge,
};

/// Base clock frequency of the DMG (T-cycles per second).
pub const CPU_FREQ: u32 = 4194304;

/// Wave RAM contents at power on.
const BOOT_WAVE_RAM: [u8; 16] = [
    0x60, 0x0d, 0xda, 0xdd, 0x50, 0x0f, 0xad, 0xed, 0xc0, 0xde, 0xf0, 0x0d, 0xbe, 0xef, 0xfe,
    0xed,
];

/// Host facing configuration toggles. Owned by the MMU so every
/// component can read it without locking.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct EmulatorConfig {
    pub disable_sound: [bool; 4],
    pub disable_bg: bool,
    pub disable_window: bool,
    pub disable_obj: bool,
    pub allow_simultaneous_dpad_opposites: bool,
}

/// Bitset of the conditions that end a `run_until` slice.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct EmulatorEvent {
    bits: u8,
}

impl EmulatorEvent {
    pub const NEW_FRAME: u8 = 0x01;
    pub const AUDIO_BUFFER_FULL: u8 = 0x02;
    pub const UNTIL_CYCLES: u8 = 0x04;

    #[inline(always)]
    pub fn bits(&self) -> u8 {
        self.bits
    }

    #[inline(always)]
    pub fn from_bits(bits: u8) -> Self {
        Self { bits }
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    #[inline(always)]
    pub fn new_frame(&self) -> bool {
        self.bits & Self::NEW_FRAME != 0
    }

    #[inline(always)]
    pub fn audio_buffer_full(&self) -> bool {
        self.bits & Self::AUDIO_BUFFER_FULL != 0
    }

    #[inline(always)]
    pub fn until_cycles(&self) -> bool {
        self.bits & Self::UNTIL_CYCLES != 0
    }

    #[inline(always)]
    fn set(&mut self, flag: u8) {
        self.bits |= flag;
    }
}

/// Top level structure that abstracts the usage of the Game Boy
/// system. Should serve as the main entry-point API.
pub struct GameBoy {
    /// Reference to the Game Boy CPU component, which owns the MMU
    /// (and through it every other component) and drives the machine
    /// cycle scheduler.
    cpu: Cpu,

    /// Events returned by the previous `run_until` slice, their edge
    /// state is consumed at the start of the next one.
    last_event: EmulatorEvent,
}

impl GameBoy {
    /// Builds an emulator from a ROM image, leaving the machine in
    /// the post boot ROM state ready to execute at 0x0100. The ROM
    /// must be at least 32 KiB long and a multiple of 32 KiB.
    pub fn new(rom: &[u8], audio_frequency: u32, audio_frames: u32) -> Result<Self, Error> {
        let cartridge = Cartridge::from_data(rom)?;
        let apu = Apu::new(audio_frequency, audio_frames);
        let mmu = Mmu::new(cartridge, apu);
        let cpu = Cpu::new(mmu);
        let mut game_boy = Self {
            cpu,
            last_event: EmulatorEvent::default(),
        };
        game_boy.boot();
        Ok(game_boy)
    }

    pub fn verify_rom(data: &[u8]) -> bool {
        Cartridge::from_data(data).is_ok()
    }

    /// Applies the post boot ROM machine state: registers, timer
    /// divider and the IO/APU registers the boot ROM leaves behind.
    fn boot(&mut self) {
        self.cpu.boot();

        let mmu = self.cpu.mmu();
        mmu.timer().set_div_counter_raw(0xac00);

        // APU power on state, NR52 first so the writes land
        mmu.write(0xff26, 0xf1);
        mmu.write(0xff11, 0x80);
        mmu.write(0xff12, 0xf3);
        mmu.write(0xff14, 0x80);
        mmu.write(0xff24, 0x77);
        mmu.write(0xff25, 0xf3);
        mmu.apu().set_initialized(true);
        mmu.apu().wave_mut().ram = BOOT_WAVE_RAM;
        // channel 1 is left playing the boot chime, mute it
        mmu.apu().channel_mut(CH1).envelope.volume = 0;

        mmu.write(LCDC_ADDR, 0x91);
        mmu.write(SCY_ADDR, 0x00);
        mmu.write(SCX_ADDR, 0x00);
        mmu.write(LYC_ADDR, 0x00);
        mmu.write(BGP_ADDR, 0xfc);
        mmu.write(OBP0_ADDR, 0xff);
        mmu.write(OBP1_ADDR, 0xff);
        mmu.write(IF_ADDR, 0x01);
        mmu.write(IE_ADDR, 0x00);
    }

    /// Advances emulation until a new video frame is produced, the
    /// audio buffer fills up, or the cycle target is passed,
    /// whichever happens first. The APU is synchronized before
    /// returning so its visible state is current.
    pub fn run_until(&mut self, until_cycles: u64) -> EmulatorEvent {
        if self.last_event.new_frame() {
            self.cpu.mmu().ppu().set_new_frame_edge(false);
        }
        if self.last_event.audio_buffer_full() {
            self.cpu.mmu().apu().audio_buffer_mut().clear();
        }
        self.cpu.mmu().check_pad_interrupt();

        let (frames, frequency, position) = {
            let buffer = self.cpu.mmu_i().apu_i().audio_buffer();
            (buffer.frames(), buffer.frequency(), buffer.position_frames())
        };
        let frames_left = frames.saturating_sub(position) as u64;
        let max_audio_cycles = self.cpu.mmu_i().apu_i().cycles()
            + (frames_left * CPU_FREQ as u64).div_ceil(frequency as u64);

        let mut event = EmulatorEvent::default();
        while event.is_empty() {
            self.cpu.step();
            if self.cpu.mmu_i().ppu_i().new_frame_edge() {
                event.set(EmulatorEvent::NEW_FRAME);
            }
            if max_audio_cycles < self.cpu.mmu_i().cycles() {
                event.set(EmulatorEvent::AUDIO_BUFFER_FULL);
            }
            if until_cycles < self.cpu.mmu_i().cycles() {
                event.set(EmulatorEvent::UNTIL_CYCLES);
            }
        }

        self.cpu.mmu().synchronize_apu();
        self.last_event = event;
        event
    }

    /// Advances emulation by a single instruction.
    pub fn step(&mut self) -> EmulatorEvent {
        self.run_until(self.cycles() + 1)
    }

    #[inline(always)]
    pub fn cycles(&self) -> u64 {
        self.cpu.mmu_i().cycles()
    }

    /// The 160x144 RGBA frame buffer, valid until the next
    /// `run_until` call.
    pub fn frame_buffer(&self) -> &[u32; DISPLAY_SIZE] {
        self.cpu.mmu_i().ppu_i().frame_buffer()
    }

    pub fn frame_buffer_bytes(&self) -> Vec<u8> {
        self.cpu.mmu_i().ppu_i().frame_buffer_bytes()
    }

    /// Stereo interleaved unsigned 8 bit samples produced since the
    /// buffer was last cleared.
    pub fn audio_buffer(&self) -> &[u8] {
        self.cpu.mmu_i().apu_i().audio_buffer().samples()
    }

    pub fn clear_audio_buffer(&mut self) {
        self.cpu.mmu().apu().audio_buffer_mut().clear();
    }

    pub fn audio_frequency(&self) -> u32 {
        self.cpu.mmu_i().apu_i().audio_buffer().frequency()
    }

    pub fn set_joypad_buttons(&mut self, buttons: JoypadButtons) {
        self.cpu.mmu().pad().set_buttons(buttons);
    }

    pub fn set_joypad_callback(&mut self, callback: PadCallback) {
        self.cpu.mmu().pad().set_callback(Some(callback));
    }

    pub fn clear_joypad_callback(&mut self) {
        self.cpu.mmu().pad().set_callback(None);
    }

    pub fn config(&self) -> EmulatorConfig {
        *self.cpu.mmu_i().config()
    }

    pub fn set_config(&mut self, config: EmulatorConfig) {
        self.cpu.mmu().set_config(config);
    }

    /// External RAM contents for battery backed saves, `None` when
    /// the cartridge has no battery.
    pub fn save_ram(&self) -> Option<Vec<u8>> {
        let rom = self.cpu.mmu_i().rom_i();
        if !rom.has_battery() {
            return None;
        }
        Some(rom.ram_data().to_vec())
    }

    pub fn load_ram(&mut self, data: &[u8]) -> Result<(), Error> {
        if !self.cpu.mmu_i().rom_i().has_battery() {
            return Err(Error::CustomError(String::from(
                "Cartridge has no battery backed RAM",
            )));
        }
        self.cpu.mmu().rom().set_ram_data(data)
    }

    pub fn save_ram_to_file(&self, path: &str) -> Result<(), Error> {
        match self.save_ram() {
            Some(data) => write_file(path, &data),
            None => Err(Error::CustomError(String::from(
                "Cartridge has no battery backed RAM",
            ))),
        }
    }

    pub fn load_ram_from_file(&mut self, path: &str) -> Result<(), Error> {
        let data = read_file(path)?;
        self.load_ram(&data)
    }

    pub fn save_state_to_file(&self, path: &str) -> Result<(), Error> {
        let data = self.save_state()?;
        write_file(path, &data)
    }

    pub fn load_state_from_file(&mut self, path: &str) -> Result<(), Error> {
        let data = read_file(path)?;
        self.load_state(&data)
    }

    pub fn rom_title(&self) -> String {
        self.cpu.mmu_i().rom_i().title()
    }

    #[inline(always)]
    pub fn cpu(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    #[inline(always)]
    pub fn cpu_i(&self) -> &Cpu {
        &self.cpu
    }

    #[inline(always)]
    pub fn mmu(&mut self) -> &mut Mmu {
        self.cpu.mmu()
    }

    #[inline(always)]
    pub fn mmu_i(&self) -> &Mmu {
        self.cpu.mmu_i()
    }

    #[inline(always)]
    pub fn ppu_frame(&self) -> u32 {
        self.cpu.mmu_i().ppu_i().frame()
    }

    #[inline(always)]
    pub fn last_event(&self) -> EmulatorEvent {
        self.last_event
    }

    #[inline(always)]
    pub fn set_last_event(&mut self, value: EmulatorEvent) {
        self.last_event = value;
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        consts::{DIV_ADDR, LCDC_ADDR},
        pad::JoypadButtons,
        ppu::{FRAME_CYCLES, RGBA_WHITE},
        test::{build_rom, build_test_gb, program_rom},
    };

    use super::GameBoy;

    #[test]
    fn test_reject_invalid_rom() {
        assert!(GameBoy::new(&[0x00; 0x1000], 44100, 2048).is_err());
        assert!(!GameBoy::verify_rom(&[0x00; 0x8000]));
    }

    #[test]
    fn test_boot_state() {
        let game_boy = build_test_gb(&build_rom(0x00, 0x00, 0x00));
        assert_eq!(game_boy.cpu_i().pc, 0x0100);
        assert_eq!(game_boy.cpu_i().sp, 0xfffe);
        assert_eq!(game_boy.cpu_i().af(), 0x01b0);
        assert_eq!(game_boy.cpu_i().bc(), 0x0013);
        assert_eq!(game_boy.cpu_i().de(), 0x00d8);
        assert_eq!(game_boy.cpu_i().hl(), 0x014d);
        assert!(!game_boy.cpu_i().ime());
        assert_eq!(game_boy.mmu_i().ppu_i().read(LCDC_ADDR), 0x91);
        assert_eq!(game_boy.mmu_i().apu_i().read(0xff26) & 0x80, 0x80);
    }

    #[test]
    fn test_nop_frame() {
        // a ROM full of NOPs; the first four frames are held back by
        // the display stabilization delay
        let mut game_boy = build_test_gb(&build_rom(0x00, 0x00, 0x00));
        let mut event = game_boy.run_until(game_boy.cycles() + 6 * FRAME_CYCLES as u64);
        while !event.new_frame() {
            assert!(!event.until_cycles());
            event = game_boy.run_until(game_boy.cycles() + 6 * FRAME_CYCLES as u64);
        }
        assert!(game_boy
            .frame_buffer()
            .iter()
            .all(|pixel| *pixel == RGBA_WHITE));
    }

    #[test]
    fn test_frame_cycle_count() {
        let mut game_boy = build_test_gb(&build_rom(0x00, 0x00, 0x00));

        // skip the stabilization delay frames
        for _ in 0..5 {
            while !game_boy
                .run_until(game_boy.cycles() + FRAME_CYCLES as u64)
                .new_frame()
            {}
        }

        let start = game_boy.ppu_frame();
        while game_boy.ppu_frame() == start {
            game_boy.step();
        }
        let frame_start = game_boy.cycles();
        while game_boy.ppu_frame() == start + 1 {
            game_boy.step();
        }
        // a full frame takes 70224 T-cycles, modulo the instruction
        // granularity of the stepping
        let elapsed = game_boy.cycles() - frame_start;
        assert!(elapsed.abs_diff(FRAME_CYCLES as u64) < 24);
    }

    #[test]
    fn test_div_read_scenario() {
        // write DIV, wait 64 M-cycles, read back 0x01
        let program = [
            0x3e, 0x00, // LD A, 0x00      (2 M-cycles)
            0xe0, 0x04, // LD [FF04], A    (3 M-cycles, write on the last)
        ];
        let mut game_boy = build_test_gb(&program_rom(&program));
        game_boy.step(); // entry jump
        game_boy.step();
        game_boy.step();

        // the DIV write happened on the last cycle of the LDH; run 64
        // M-cycles and the counter reaches 0x100
        let target = game_boy.cycles() + 64 * 4;
        while game_boy.cycles() < target {
            game_boy.step();
        }
        assert_eq!(game_boy.mmu().read(DIV_ADDR), 0x01);
    }

    #[test]
    fn test_stack_push_scenario() {
        let program = [
            0x01, 0x34, 0x12, // LD BC, 0x1234
            0xc5, // PUSH BC
        ];
        let mut game_boy = build_test_gb(&program_rom(&program));
        game_boy.step(); // entry jump
        game_boy.step();
        game_boy.step();

        assert_eq!(game_boy.cpu_i().sp, 0xfffc);
        assert_eq!(game_boy.mmu().read(0xfffd), 0x12);
        assert_eq!(game_boy.mmu().read(0xfffc), 0x34);
    }

    #[test]
    fn test_joypad_buttons() {
        let mut game_boy = build_test_gb(&build_rom(0x00, 0x00, 0x00));
        game_boy.set_joypad_buttons(JoypadButtons {
            start: true,
            ..Default::default()
        });
        // select the button matrix line and read it back
        game_boy.mmu().write(0xff00, 0x10);
        assert_eq!(game_boy.mmu().read(0xff00) & 0x0f, 0x07);
    }
}
