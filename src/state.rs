//! Save state support.
//!
//! A save state is a versioned binary blob: a 32 bit header magic
//! derived from the format version, followed by one length prefixed
//! section per component in a fixed order. Loading validates the
//! header and every section length before any state is replaced, so
//! a failed load leaves the emulator untouched.

use std::io::Cursor;

use damage_common::{
    data::{read_bytes, read_u32, read_u8, write_bytes, write_u32, write_u8},
    error::Error,
};

use crate::gb::{EmulatorEvent, GameBoy};

pub const SAVE_STATE_VERSION: u32 = 2;
pub const SAVE_STATE_HEADER: u32 = 0x6b57a7e0 + SAVE_STATE_VERSION;

/// Number of length prefixed sections in a save state, one per
/// serialized component.
const SECTION_COUNT: usize = 9;

/// A component whose complete runtime state can be serialized into
/// (and restored from) a flat byte buffer.
pub trait StateComponent {
    fn state(&self) -> Result<Vec<u8>, Error>;
    fn set_state(&mut self, data: &[u8]) -> Result<(), Error>;
}

impl GameBoy {
    /// Serializes the complete machine state, including the cycle
    /// counters, so a load resumes mid-frame exactly where the save
    /// happened.
    pub fn save_state(&self) -> Result<Vec<u8>, Error> {
        let mut cursor = Cursor::new(vec![]);
        write_u32(&mut cursor, SAVE_STATE_HEADER)?;
        write_u8(&mut cursor, self.last_event().bits())?;
        for section in self.state_sections()? {
            write_u32(&mut cursor, section.len() as u32)?;
            write_bytes(&mut cursor, &section)?;
        }
        Ok(cursor.into_inner())
    }

    /// Restores a previously saved state. The active multi-cart
    /// slice is re-selected from the saved index as part of the
    /// cartridge section.
    pub fn load_state(&mut self, data: &[u8]) -> Result<(), Error> {
        let mut cursor = Cursor::new(data);
        let header = read_u32(&mut cursor).map_err(|_| Error::InvalidData)?;
        if header != SAVE_STATE_HEADER {
            return Err(Error::CustomError(format!(
                "Invalid save state header 0x{:08x}",
                header
            )));
        }
        let last_event = read_u8(&mut cursor).map_err(|_| Error::InvalidData)?;

        let mut sections: Vec<Vec<u8>> = vec![];
        for _ in 0..SECTION_COUNT {
            let length = read_u32(&mut cursor).map_err(|_| Error::InvalidData)? as usize;
            sections.push(read_bytes(&mut cursor, length).map_err(|_| Error::InvalidData)?);
        }
        if cursor.position() != data.len() as u64 {
            return Err(Error::InvalidData);
        }

        // validate every section length against the current machine
        // before mutating anything, sizes are deterministic for a
        // given cartridge
        let expected = self.state_sections()?;
        for (section, expected) in sections.iter().zip(expected.iter()) {
            if section.len() != expected.len() {
                return Err(Error::InvalidData);
            }
        }

        self.set_state_sections(&sections)?;
        self.set_last_event(EmulatorEvent::from_bits(last_event));
        Ok(())
    }

    fn state_sections(&self) -> Result<Vec<Vec<u8>>, Error> {
        let mmu = self.mmu_i();
        Ok(vec![
            self.cpu_i().state()?,
            mmu.state()?,
            mmu.timer_i().state()?,
            mmu.serial_i().state()?,
            mmu.pad_i().state()?,
            StateComponent::state(mmu.dma_i())?,
            StateComponent::state(mmu.ppu_i())?,
            mmu.apu_i().state()?,
            mmu.rom_i().state()?,
        ])
    }

    fn set_state_sections(&mut self, sections: &[Vec<u8>]) -> Result<(), Error> {
        self.cpu().set_state(&sections[0])?;
        self.mmu().set_state(&sections[1])?;
        self.mmu().timer().set_state(&sections[2])?;
        self.mmu().serial().set_state(&sections[3])?;
        self.mmu().pad().set_state(&sections[4])?;
        StateComponent::set_state(self.mmu().dma(), &sections[5])?;
        StateComponent::set_state(self.mmu().ppu(), &sections[6])?;
        self.mmu().apu().set_state(&sections[7])?;
        self.mmu().rom().set_state(&sections[8])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        ppu::FRAME_CYCLES,
        test::{build_rom, build_test_gb},
    };

    use super::{SAVE_STATE_HEADER, SAVE_STATE_VERSION};

    #[test]
    fn test_header_value() {
        assert_eq!(SAVE_STATE_VERSION, 2);
        assert_eq!(SAVE_STATE_HEADER, 0x6b57a7e2);
    }

    #[test]
    fn test_round_trip_determinism() {
        let rom = build_rom(0x00, 0x00, 0x00);
        let mut game_boy = build_test_gb(&rom);

        // advance into the middle of a frame before saving
        game_boy.run_until(game_boy.cycles() + 3 * FRAME_CYCLES as u64 / 2);
        let state = game_boy.save_state().unwrap();
        game_boy.clear_audio_buffer();

        let mut restored = build_test_gb(&rom);
        restored.load_state(&state).unwrap();

        assert_eq!(restored.cycles(), game_boy.cycles());
        assert_eq!(restored.cpu_i().pc, game_boy.cpu_i().pc);
        assert_eq!(restored.cpu_i().af(), game_boy.cpu_i().af());

        // both instances step identically afterwards
        for _ in 0..1000 {
            game_boy.step();
            restored.step();
            assert_eq!(restored.cycles(), game_boy.cycles());
            assert_eq!(restored.cpu_i().pc, game_boy.cpu_i().pc);
        }

        // render a complete frame on both and compare the outputs,
        // including the resampled audio produced since the save
        while !game_boy
            .run_until(game_boy.cycles() + 2 * FRAME_CYCLES as u64)
            .new_frame()
        {}
        while !restored
            .run_until(restored.cycles() + 2 * FRAME_CYCLES as u64)
            .new_frame()
        {}
        assert_eq!(restored.cycles(), game_boy.cycles());
        assert_eq!(
            restored.frame_buffer().as_slice(),
            game_boy.frame_buffer().as_slice()
        );
        assert_eq!(restored.audio_buffer(), game_boy.audio_buffer());
    }

    #[test]
    fn test_bad_header_rejected() {
        let rom = build_rom(0x00, 0x00, 0x00);
        let mut game_boy = build_test_gb(&rom);
        let mut state = game_boy.save_state().unwrap();
        state[0] ^= 0xff;

        let pc = game_boy.cpu_i().pc;
        assert!(game_boy.load_state(&state).is_err());
        assert_eq!(game_boy.cpu_i().pc, pc);
    }

    #[test]
    fn test_truncated_state_rejected() {
        let rom = build_rom(0x00, 0x00, 0x00);
        let mut game_boy = build_test_gb(&rom);
        let state = game_boy.save_state().unwrap();
        assert!(game_boy.load_state(&state[..state.len() - 1]).is_err());
        assert!(game_boy.load_state(&[]).is_err());
    }
}
