//! Gamepad (joypad) functions and structures.

use std::io::Cursor;

use damage_common::{
    data::{read_u8, write_u8},
    error::Error,
};

use crate::{
    consts::JOYP_ADDR,
    gb::EmulatorConfig,
    mmu::{Interrupts, IF_JOYPAD},
    state::StateComponent,
    warnln,
};

/// Callback invoked whenever the joypad register is read, letting the
/// host refresh the button state just in time.
pub type PadCallback = Box<dyn FnMut(&mut JoypadButtons)>;

#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct JoypadButtons {
    pub down: bool,
    pub up: bool,
    pub left: bool,
    pub right: bool,
    pub start: bool,
    pub select: bool,
    pub b: bool,
    pub a: bool,
}

impl JoypadButtons {
    pub fn pack(&self) -> u8 {
        (if self.down { 0x80 } else { 0x00 })
            | (if self.up { 0x40 } else { 0x00 })
            | (if self.left { 0x20 } else { 0x00 })
            | (if self.right { 0x10 } else { 0x00 })
            | (if self.start { 0x08 } else { 0x00 })
            | (if self.select { 0x04 } else { 0x00 })
            | (if self.b { 0x02 } else { 0x00 })
            | (if self.a { 0x01 } else { 0x00 })
    }

    pub fn unpack(value: u8) -> Self {
        Self {
            down: value & 0x80 == 0x80,
            up: value & 0x40 == 0x40,
            left: value & 0x20 == 0x20,
            right: value & 0x10 == 0x10,
            start: value & 0x08 == 0x08,
            select: value & 0x04 == 0x04,
            b: value & 0x02 == 0x02,
            a: value & 0x01 == 0x01,
        }
    }
}

/// Matrix line selection, bits 4 and 5 of JOYP (low = selected), with
/// both lines selected the outputs are OR'd together.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PadSelection {
    Both = 0x00,
    Buttons = 0x01,
    Dpad = 0x02,
    None = 0x03,
}

impl PadSelection {
    pub fn from_u8(value: u8) -> Self {
        match value & 0x03 {
            0x00 => PadSelection::Both,
            0x01 => PadSelection::Buttons,
            0x02 => PadSelection::Dpad,
            _ => PadSelection::None,
        }
    }
}

pub struct Pad {
    buttons: JoypadButtons,
    selection: PadSelection,

    /// Previous p10-p13 observation, the joypad interrupt fires on any
    /// high to low transition of these four lines.
    last_p10_p13: u8,

    callback: Option<PadCallback>,
}

impl Pad {
    pub fn new() -> Self {
        Self {
            buttons: JoypadButtons::default(),
            selection: PadSelection::None,
            last_p10_p13: 0x0f,
            callback: None,
        }
    }

    pub fn reset(&mut self) {
        self.buttons = JoypadButtons::default();
        self.selection = PadSelection::None;
        self.last_p10_p13 = 0x0f;
    }

    /// Computes the p10-p13 output lines for the current selection,
    /// the bits are low when the corresponding buttons are pressed.
    fn p10_p13(&self, config: &EmulatorConfig) -> u8 {
        let mut result = 0x00;

        if self.selection == PadSelection::Buttons || self.selection == PadSelection::Both {
            result |= (if self.buttons.start { 0x08 } else { 0x00 })
                | (if self.buttons.select { 0x04 } else { 0x00 })
                | (if self.buttons.b { 0x02 } else { 0x00 })
                | (if self.buttons.a { 0x01 } else { 0x00 });
        }

        let mut left = self.buttons.left;
        let mut up = self.buttons.up;
        let right = self.buttons.right;
        let down = self.buttons.down;
        if !config.allow_simultaneous_dpad_opposites {
            if left && right {
                left = false;
            } else if up && down {
                up = false;
            }
        }

        if self.selection == PadSelection::Dpad || self.selection == PadSelection::Both {
            result |= (if down { 0x08 } else { 0x00 })
                | (if up { 0x04 } else { 0x00 })
                | (if left { 0x02 } else { 0x00 })
                | (if right { 0x01 } else { 0x00 });
        }

        !result & 0x0f
    }

    pub fn read(&mut self, addr: u16, config: &EmulatorConfig) -> u8 {
        match addr {
            // 0xFF00 — JOYP: Joypad matrix
            JOYP_ADDR => {
                if let Some(callback) = self.callback.as_mut() {
                    callback(&mut self.buttons);
                }
                0xc0 | ((self.selection as u8) << 4) | self.p10_p13(config)
            }
            _ => {
                warnln!("Reading from unknown Pad location 0x{:04x}", addr);
                #[allow(unreachable_code)]
                0xff
            }
        }
    }

    pub fn write(
        &mut self,
        addr: u16,
        value: u8,
        config: &EmulatorConfig,
        interrupts: &mut Interrupts,
    ) {
        match addr {
            // 0xFF00 — JOYP: Joypad matrix line select
            JOYP_ADDR => {
                self.selection = PadSelection::from_u8((value >> 4) & 0x03);
                self.check_interrupt(config, interrupts);
            }
            _ => warnln!("Writing to unknown Pad location 0x{:04x}", addr),
        }
    }

    /// Raises the joypad interrupt on any high to low transition of
    /// the four matrix output lines.
    pub fn check_interrupt(&mut self, config: &EmulatorConfig, interrupts: &mut Interrupts) {
        let p10_p13 = self.p10_p13(config);
        if (p10_p13 ^ self.last_p10_p13) & !p10_p13 & 0x0f != 0 {
            interrupts.new_if |= IF_JOYPAD;
            self.last_p10_p13 = p10_p13;
        }
    }

    #[inline(always)]
    pub fn buttons(&self) -> JoypadButtons {
        self.buttons
    }

    #[inline(always)]
    pub fn set_buttons(&mut self, buttons: JoypadButtons) {
        self.buttons = buttons;
    }

    #[inline(always)]
    pub fn selection(&self) -> PadSelection {
        self.selection
    }

    #[inline(always)]
    pub fn set_selection(&mut self, value: PadSelection) {
        self.selection = value;
    }

    #[inline(always)]
    pub fn last_p10_p13(&self) -> u8 {
        self.last_p10_p13
    }

    #[inline(always)]
    pub fn set_last_p10_p13(&mut self, value: u8) {
        self.last_p10_p13 = value;
    }

    pub fn set_callback(&mut self, callback: Option<PadCallback>) {
        self.callback = callback;
    }
}

impl Default for Pad {
    fn default() -> Self {
        Self::new()
    }
}

impl StateComponent for Pad {
    fn state(&self) -> Result<Vec<u8>, Error> {
        let mut cursor = Cursor::new(vec![]);
        write_u8(&mut cursor, self.buttons.pack())?;
        write_u8(&mut cursor, self.selection as u8)?;
        write_u8(&mut cursor, self.last_p10_p13)?;
        Ok(cursor.into_inner())
    }

    fn set_state(&mut self, data: &[u8]) -> Result<(), Error> {
        let mut cursor = Cursor::new(data);
        self.buttons = JoypadButtons::unpack(read_u8(&mut cursor)?);
        self.selection = PadSelection::from_u8(read_u8(&mut cursor)?);
        self.last_p10_p13 = read_u8(&mut cursor)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        consts::JOYP_ADDR,
        gb::EmulatorConfig,
        mmu::{Interrupts, IF_JOYPAD},
    };

    use super::{JoypadButtons, Pad, PadSelection};

    #[test]
    fn test_pack_unpack() {
        for value in 0x00..=0xff {
            let buttons = JoypadButtons::unpack(value);
            assert_eq!(buttons.pack(), value);
        }
    }

    #[test]
    fn test_matrix_read() {
        let mut pad = Pad::new();
        let config = EmulatorConfig::default();
        let mut interrupts = Interrupts::default();

        pad.set_buttons(JoypadButtons {
            a: true,
            up: true,
            ..Default::default()
        });

        // buttons line selected (bit 5 low)
        pad.write(JOYP_ADDR, 0x10, &config, &mut interrupts);
        assert_eq!(pad.read(JOYP_ADDR, &config), 0xc0 | 0x10 | 0x0e);

        // dpad line selected (bit 4 low)
        pad.write(JOYP_ADDR, 0x20, &config, &mut interrupts);
        assert_eq!(pad.read(JOYP_ADDR, &config), 0xc0 | 0x20 | 0x0b);

        // both lines low, outputs are OR'd
        pad.write(JOYP_ADDR, 0x00, &config, &mut interrupts);
        assert_eq!(pad.read(JOYP_ADDR, &config), 0xc0 | 0x0a);
    }

    #[test]
    fn test_opposite_dpad_filtering() {
        let mut pad = Pad::new();
        let mut config = EmulatorConfig::default();
        let mut interrupts = Interrupts::default();

        pad.set_buttons(JoypadButtons {
            left: true,
            right: true,
            ..Default::default()
        });
        pad.write(JOYP_ADDR, 0x20, &config, &mut interrupts);

        // left is forced released when both opposites are held
        assert_eq!(pad.read(JOYP_ADDR, &config) & 0x0f, 0x0e);

        config.allow_simultaneous_dpad_opposites = true;
        assert_eq!(pad.read(JOYP_ADDR, &config) & 0x0f, 0x0c);
    }

    #[test]
    fn test_press_interrupt_edge() {
        let mut pad = Pad::new();
        let config = EmulatorConfig::default();
        let mut interrupts = Interrupts::default();

        pad.write(JOYP_ADDR, 0x10, &config, &mut interrupts);
        assert_eq!(interrupts.new_if & IF_JOYPAD, 0x00);

        pad.set_buttons(JoypadButtons {
            a: true,
            ..Default::default()
        });
        pad.check_interrupt(&config, &mut interrupts);
        assert_eq!(interrupts.new_if & IF_JOYPAD, IF_JOYPAD);

        // releasing does not raise another interrupt
        interrupts.new_if = 0x00;
        pad.set_buttons(JoypadButtons::default());
        pad.check_interrupt(&config, &mut interrupts);
        assert_eq!(interrupts.new_if & IF_JOYPAD, 0x00);
        assert_eq!(pad.selection(), PadSelection::Buttons);
    }
}
