//! Cartridge (ROM) related functions and structures.

use core::fmt;
use std::{
    fmt::{Display, Formatter},
    io::Cursor,
};

use damage_common::{
    data::{read_bytes, read_into, read_u32, read_u8, write_bytes, write_u32, write_u8},
    error::Error,
};

use crate::{debugln, state::StateComponent, warnln};

pub const ROM_BANK_SIZE: usize = 16384;
pub const RAM_BANK_SIZE: usize = 8192;

/// Cart slices (and multi-cart sub images) are aligned at 32 KiB.
pub const CART_SLICE_SIZE: usize = 32768;

/// Expected value of the shift-xor checksum over the logo area
/// (0x0104-0x0133) of a valid cartridge header.
pub const LOGO_CHECKSUM: u32 = 0xe06c8834;

pub const MBC2_RAM_SIZE: usize = 0x200;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MbcType {
    NoMbc,
    Mbc1,
    Mbc2,
    Mbc3,
    Mbc5,
    Mmm01,
    Huc1,
    Unknown,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RomType {
    RomOnly = 0x00,
    Mbc1 = 0x01,
    Mbc1Ram = 0x02,
    Mbc1RamBattery = 0x03,
    Mbc2 = 0x05,
    Mbc2Battery = 0x06,
    RomRam = 0x08,
    RomRamBattery = 0x09,
    Mmm01 = 0x0b,
    Mmm01Ram = 0x0c,
    Mmm01RamBattery = 0x0d,
    Mbc3TimerBattery = 0x0f,
    Mbc3TimerRamBattery = 0x10,
    Mbc3 = 0x11,
    Mbc3Ram = 0x12,
    Mbc3RamBattery = 0x13,
    Mbc5 = 0x19,
    Mbc5Ram = 0x1a,
    Mbc5RamBattery = 0x1b,
    Mbc5Rumble = 0x1c,
    Mbc5RumbleRam = 0x1d,
    Mbc5RumbleRamBattery = 0x1e,
    PocketCamera = 0xfc,
    BandaiTama5 = 0xfd,
    HuC3 = 0xfe,
    HuC1RamBattery = 0xff,
    Unknown = 0xef,
}

impl RomType {
    pub fn description(&self) -> &'static str {
        match self {
            RomType::RomOnly => "ROM Only",
            RomType::Mbc1 => "MBC1",
            RomType::Mbc1Ram => "MBC1 + RAM",
            RomType::Mbc1RamBattery => "MBC1 + RAM + BATTERY",
            RomType::Mbc2 => "MBC2",
            RomType::Mbc2Battery => "MBC2 + BATTERY",
            RomType::RomRam => "ROM + RAM",
            RomType::RomRamBattery => "ROM + RAM + BATTERY",
            RomType::Mmm01 => "MMM01",
            RomType::Mmm01Ram => "MMM01 + RAM",
            RomType::Mmm01RamBattery => "MMM01 + RAM + BATTERY",
            RomType::Mbc3TimerBattery => "MBC3 + TIMER + BATTERY",
            RomType::Mbc3TimerRamBattery => "MBC3 + TIMER + RAM + BATTERY",
            RomType::Mbc3 => "MBC3",
            RomType::Mbc3Ram => "MBC3 + RAM",
            RomType::Mbc3RamBattery => "MBC3 + RAM + BATTERY",
            RomType::Mbc5 => "MBC5",
            RomType::Mbc5Ram => "MBC5 + RAM",
            RomType::Mbc5RamBattery => "MBC5 + RAM + BATTERY",
            RomType::Mbc5Rumble => "MBC5 + RUMBLE",
            RomType::Mbc5RumbleRam => "MBC5 + RUMBLE + RAM",
            RomType::Mbc5RumbleRamBattery => "MBC5 + RUMBLE + RAM + BATTERY",
            RomType::PocketCamera => "POCKET CAMERA",
            RomType::BandaiTama5 => "BANDAI TAMA5",
            RomType::HuC3 => "HuC3",
            RomType::HuC1RamBattery => "HuC1 + RAM + BATTERY",
            RomType::Unknown => "Unknown",
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => RomType::RomOnly,
            0x01 => RomType::Mbc1,
            0x02 => RomType::Mbc1Ram,
            0x03 => RomType::Mbc1RamBattery,
            0x05 => RomType::Mbc2,
            0x06 => RomType::Mbc2Battery,
            0x08 => RomType::RomRam,
            0x09 => RomType::RomRamBattery,
            0x0b => RomType::Mmm01,
            0x0c => RomType::Mmm01Ram,
            0x0d => RomType::Mmm01RamBattery,
            0x0f => RomType::Mbc3TimerBattery,
            0x10 => RomType::Mbc3TimerRamBattery,
            0x11 => RomType::Mbc3,
            0x12 => RomType::Mbc3Ram,
            0x13 => RomType::Mbc3RamBattery,
            0x19 => RomType::Mbc5,
            0x1a => RomType::Mbc5Ram,
            0x1b => RomType::Mbc5RamBattery,
            0x1c => RomType::Mbc5Rumble,
            0x1d => RomType::Mbc5RumbleRam,
            0x1e => RomType::Mbc5RumbleRamBattery,
            0xfc => RomType::PocketCamera,
            0xfd => RomType::BandaiTama5,
            0xfe => RomType::HuC3,
            0xff => RomType::HuC1RamBattery,
            _ => RomType::Unknown,
        }
    }

    pub fn mbc_type(&self) -> MbcType {
        match self {
            RomType::RomOnly | RomType::RomRam | RomType::RomRamBattery => MbcType::NoMbc,
            RomType::Mbc1 | RomType::Mbc1Ram | RomType::Mbc1RamBattery => MbcType::Mbc1,
            RomType::Mbc2 | RomType::Mbc2Battery => MbcType::Mbc2,
            RomType::Mmm01 | RomType::Mmm01Ram | RomType::Mmm01RamBattery => MbcType::Mmm01,
            RomType::Mbc3
            | RomType::Mbc3Ram
            | RomType::Mbc3RamBattery
            | RomType::Mbc3TimerBattery
            | RomType::Mbc3TimerRamBattery => MbcType::Mbc3,
            RomType::Mbc5
            | RomType::Mbc5Ram
            | RomType::Mbc5RamBattery
            | RomType::Mbc5Rumble
            | RomType::Mbc5RumbleRam
            | RomType::Mbc5RumbleRamBattery => MbcType::Mbc5,
            RomType::HuC1RamBattery => MbcType::Huc1,
            _ => MbcType::Unknown,
        }
    }

    pub fn has_ram(&self) -> bool {
        matches!(
            self,
            RomType::Mbc1Ram
                | RomType::Mbc1RamBattery
                | RomType::RomRam
                | RomType::RomRamBattery
                | RomType::Mmm01Ram
                | RomType::Mmm01RamBattery
                | RomType::Mbc3TimerRamBattery
                | RomType::Mbc3Ram
                | RomType::Mbc3RamBattery
                | RomType::Mbc5Ram
                | RomType::Mbc5RamBattery
                | RomType::Mbc5RumbleRam
                | RomType::Mbc5RumbleRamBattery
                | RomType::HuC1RamBattery
        )
    }

    pub fn has_battery(&self) -> bool {
        matches!(
            self,
            RomType::Mbc1RamBattery
                | RomType::Mbc2Battery
                | RomType::RomRamBattery
                | RomType::Mmm01RamBattery
                | RomType::Mbc3TimerBattery
                | RomType::Mbc3TimerRamBattery
                | RomType::Mbc3RamBattery
                | RomType::Mbc5RamBattery
                | RomType::Mbc5RumbleRamBattery
                | RomType::HuC1RamBattery
        )
    }
}

impl Display for RomType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RomSize {
    Size32K,
    Size64K,
    Size128K,
    Size256K,
    Size512K,
    Size1M,
    Size2M,
    Size4M,
    Size8M,
    SizeUnknown,
}

impl RomSize {
    pub fn description(&self) -> &'static str {
        match self {
            RomSize::Size32K => "32 KB",
            RomSize::Size64K => "64 KB",
            RomSize::Size128K => "128 KB",
            RomSize::Size256K => "256 KB",
            RomSize::Size512K => "512 KB",
            RomSize::Size1M => "1 MB",
            RomSize::Size2M => "2 MB",
            RomSize::Size4M => "4 MB",
            RomSize::Size8M => "8 MB",
            RomSize::SizeUnknown => "Unknown",
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => RomSize::Size32K,
            0x01 => RomSize::Size64K,
            0x02 => RomSize::Size128K,
            0x03 => RomSize::Size256K,
            0x04 => RomSize::Size512K,
            0x05 => RomSize::Size1M,
            0x06 => RomSize::Size2M,
            0x07 => RomSize::Size4M,
            0x08 => RomSize::Size8M,
            _ => RomSize::SizeUnknown,
        }
    }

    pub fn rom_banks(&self) -> u16 {
        match self {
            RomSize::Size32K => 2,
            RomSize::Size64K => 4,
            RomSize::Size128K => 8,
            RomSize::Size256K => 16,
            RomSize::Size512K => 32,
            RomSize::Size1M => 64,
            RomSize::Size2M => 128,
            RomSize::Size4M => 256,
            RomSize::Size8M => 512,
            RomSize::SizeUnknown => 0,
        }
    }
}

impl Display for RomSize {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RamSize {
    NoRam,
    Size2K,
    Size8K,
    Size32K,
    Size128K,
    Size64K,
    SizeUnknown,
}

impl RamSize {
    pub fn description(&self) -> &'static str {
        match self {
            RamSize::NoRam => "No RAM",
            RamSize::Size2K => "2 KB",
            RamSize::Size8K => "8 KB",
            RamSize::Size32K => "32 KB",
            RamSize::Size128K => "128 KB",
            RamSize::Size64K => "64 KB",
            RamSize::SizeUnknown => "Unknown",
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => RamSize::NoRam,
            0x01 => RamSize::Size2K,
            0x02 => RamSize::Size8K,
            0x03 => RamSize::Size32K,
            0x04 => RamSize::Size128K,
            0x05 => RamSize::Size64K,
            _ => RamSize::SizeUnknown,
        }
    }

    pub fn byte_size(&self) -> usize {
        match self {
            RamSize::NoRam => 0,
            RamSize::Size2K => 2048,
            RamSize::Size8K => 8192,
            RamSize::Size32K => 32768,
            RamSize::Size128K => 131072,
            RamSize::Size64K => 65536,
            RamSize::SizeUnknown => 0,
        }
    }

    pub fn ram_banks(&self) -> u16 {
        (self.byte_size() / RAM_BANK_SIZE) as u16
    }
}

impl Display for RamSize {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// MBC1/HUC1 second latch routing: either high ROM bank bits or
/// the external RAM bank, selected by the mode register.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BankMode {
    Rom = 0x00,
    Ram = 0x01,
}

impl BankMode {
    pub fn from_u8(value: u8) -> Self {
        match value & 0x01 {
            0x00 => BankMode::Rom,
            _ => BankMode::Ram,
        }
    }
}

/// Bank switching state for the supported cartridge controllers.
///
/// Each variant carries the raw register latches the controller keeps,
/// the effective ROM/RAM offsets are recomputed after every command.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Mbc {
    NoMbc,
    Mbc1 {
        r2000_3fff: u8,
        r4000_5fff: u8,
        bank_mode: BankMode,
    },
    Mbc2,
    Mbc3,
    Mbc5 {
        r2000_2fff: u8,
        r3000_3fff: u8,
    },
    Mmm01 {
        r2000_3fff: u8,
    },
    Huc1 {
        r2000_3fff: u8,
        r4000_5fff: u8,
        bank_mode: BankMode,
    },
}

impl Mbc {
    pub fn new(mbc_type: MbcType) -> Result<Self, Error> {
        Ok(match mbc_type {
            MbcType::NoMbc => Mbc::NoMbc,
            MbcType::Mbc1 => Mbc::Mbc1 {
                r2000_3fff: 0x00,
                r4000_5fff: 0x00,
                bank_mode: BankMode::Rom,
            },
            MbcType::Mbc2 => Mbc::Mbc2,
            MbcType::Mbc3 => Mbc::Mbc3,
            MbcType::Mbc5 => Mbc::Mbc5 {
                r2000_2fff: 0x01,
                r3000_3fff: 0x00,
            },
            MbcType::Mmm01 => Mbc::Mmm01 { r2000_3fff: 0x00 },
            MbcType::Huc1 => Mbc::Huc1 {
                r2000_3fff: 0x00,
                r4000_5fff: 0x00,
                bank_mode: BankMode::Rom,
            },
            MbcType::Unknown => {
                return Err(Error::CustomError(String::from(
                    "No MBC controller available for cartridge type",
                )))
            }
        })
    }
}

/// Header information for one 32 KiB aligned cart slice, parsed once
/// at load time. Plain ROMs have a single slice; MMM01 and MBC1 multi
/// carts expose several.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CartInfo {
    /// Slot index of this slice (`offset >> 15`).
    pub slot: usize,

    /// Byte offset of this slice within the ROM data.
    pub offset: usize,

    /// Declared ROM byte size of the image rooted at this slice.
    pub size: usize,

    pub rom_type: RomType,
    pub rom_size: RomSize,
    pub ram_size: RamSize,
}

impl CartInfo {
    fn parse(data: &[u8], offset: usize) -> Result<Self, Error> {
        let slice = &data[offset..];
        if slice.len() < 0x0150 {
            return Err(Error::RomSize);
        }

        let mut logo_checksum: u32 = 0;
        for byte in &slice[0x0104..=0x0133] {
            logo_checksum = (logo_checksum << 1) ^ *byte as u32;
        }
        if logo_checksum != LOGO_CHECKSUM {
            return Err(Error::InvalidData);
        }

        let rom_size = RomSize::from_u8(slice[0x0148]);
        if rom_size == RomSize::SizeUnknown {
            return Err(Error::CustomError(format!(
                "Invalid ROM size code: {}",
                slice[0x0148]
            )));
        }
        let size = rom_size.rom_banks() as usize * ROM_BANK_SIZE;
        if data.len() < offset + size {
            return Err(Error::CustomError(format!(
                "File size too small (required {}, got {})",
                offset + size,
                data.len()
            )));
        }

        let rom_type = RomType::from_u8(slice[0x0147]);
        if rom_type == RomType::Unknown {
            return Err(Error::CustomError(format!(
                "Invalid cartridge type: 0x{:02x}",
                slice[0x0147]
            )));
        }

        let ram_size = RamSize::from_u8(slice[0x0149]);
        if ram_size == RamSize::SizeUnknown {
            return Err(Error::CustomError(format!(
                "Invalid RAM size code: {}",
                slice[0x0149]
            )));
        }

        Ok(Self {
            slot: offset >> 15,
            offset,
            size,
            rom_type,
            rom_size,
            ram_size,
        })
    }
}

/// Structure that defines the ROM and RAM contents of a Game Boy
/// cartridge. Should correctly address the specifics of all the
/// supported MBCs (Memory Bank Controllers).
#[derive(Clone, PartialEq, Eq)]
pub struct Cartridge {
    /// The complete data of the ROM cartridge, including the
    /// complete set of ROM banks and (multi-cart) slices.
    rom_data: Vec<u8>,

    /// The external RAM contents, in cart-natural order.
    ram_data: Vec<u8>,

    /// Bank selection state of the cartridge controller.
    mbc: Mbc,

    /// Header information for every valid 32 KiB slice.
    cart_infos: Vec<CartInfo>,

    /// Index (within `cart_infos`) of the slice currently mapped
    /// at 0x0000, switched by MMM01/MBC1M commands.
    cart_info_index: usize,

    /// Offset of the switchable ROM1 bank, relative to the active
    /// slice offset.
    rom1_offset: usize,

    /// Offset of the selected external RAM bank.
    ram_offset: usize,

    /// If access to the external RAM is currently enabled, RAM is
    /// enabled only when the low nibble of the most recent write to
    /// 0x0000-0x1FFF equals 0xA.
    ram_enabled: bool,
}

impl Cartridge {
    pub fn new() -> Self {
        Self {
            rom_data: vec![],
            ram_data: vec![],
            mbc: Mbc::NoMbc,
            cart_infos: vec![],
            cart_info_index: 0,
            rom1_offset: ROM_BANK_SIZE,
            ram_offset: 0x0000,
            ram_enabled: false,
        }
    }

    pub fn from_data(data: &[u8]) -> Result<Self, Error> {
        let mut cartridge = Cartridge::new();
        cartridge.set_data(data)?;
        Ok(cartridge)
    }

    fn set_data(&mut self, data: &[u8]) -> Result<(), Error> {
        if data.len() < CART_SLICE_SIZE {
            return Err(Error::RomSize);
        }
        if data.len() % CART_SLICE_SIZE != 0 {
            return Err(Error::RomSize);
        }

        self.rom_data = data.to_vec();
        self.scan_cart_infos()?;

        // header checksum failures are logged only, several unlicensed
        // carts ship with a broken value
        if !self.valid_checksum() {
            warnln!("Invalid header checksum for \"{}\"", self.title());
        }

        let info = self.cart_info().clone();

        self.mbc = Mbc::new(info.rom_type.mbc_type())?;
        self.allocate_ram();
        self.set_rom_bank(1);
        self.set_ram_bank(0);
        Ok(())
    }

    /// Scans the ROM data for valid cart headers at 32 KiB intervals,
    /// multi-cart images (MMM01, MBC1M) expose more than one. MMM01
    /// images keep the boot header in the last slice.
    fn scan_cart_infos(&mut self) -> Result<(), Error> {
        self.cart_infos.clear();
        let mut mmm01_index: Option<usize> = None;

        for slot in 0..self.rom_data.len() / CART_SLICE_SIZE {
            let offset = slot * CART_SLICE_SIZE;
            match CartInfo::parse(&self.rom_data, offset) {
                Ok(info) => {
                    if info.rom_type.mbc_type() == MbcType::Mmm01 {
                        mmm01_index = Some(self.cart_infos.len());
                    }
                    self.cart_infos.push(info);
                }
                Err(_) => continue,
            }
        }

        if self.cart_infos.is_empty() {
            return Err(Error::InvalidData);
        }

        self.cart_info_index = mmm01_index.unwrap_or(0);
        Ok(())
    }

    fn allocate_ram(&mut self) {
        let size = if self.cart_info().rom_type.mbc_type() == MbcType::Mbc2 {
            MBC2_RAM_SIZE
        } else {
            self.cart_infos
                .iter()
                .map(|info| info.ram_size.byte_size())
                .max()
                .unwrap_or(0)
        };
        self.ram_data = vec![0x00; size];
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            // 0x0000-0x3FFF - ROM bank 0 (fixed)
            0x0000..=0x3fff => self.rom_data[self.cart_info().offset + addr as usize],
            // 0x4000-0x7FFF - ROM bank 1 (switchable)
            0x4000..=0x7fff => {
                self.rom_data[self.cart_info().offset + self.rom1_offset + (addr & 0x3fff) as usize]
            }
            // 0xA000-0xBFFF - External RAM
            0xa000..=0xbfff => self.read_ram(addr & 0x1fff),
            _ => {
                debugln!("Reading from unknown Cartridge location 0x{:04x}", addr);
                0xff
            }
        }
    }

    pub fn write(&mut self, addr: u16, value: u8) {
        match addr {
            // 0x0000-0x7FFF - MBC commands
            0x0000..=0x7fff => self.write_rom(addr, value),
            // 0xA000-0xBFFF - External RAM
            0xa000..=0xbfff => self.write_ram(addr & 0x1fff, value),
            _ => debugln!("Writing to unknown Cartridge location 0x{:04x}", addr),
        }
    }

    fn read_ram(&self, addr: u16) -> u8 {
        if !self.ram_enabled || self.ram_data.is_empty() {
            return 0xff;
        }
        match self.mbc {
            Mbc::Mbc2 => self.ram_data[(addr & 0x1ff) as usize] | 0xf0,
            _ => self.ram_data[(self.ram_offset | addr as usize) & (self.ram_data.len() - 1)],
        }
    }

    fn write_ram(&mut self, addr: u16, value: u8) {
        if !self.ram_enabled || self.ram_data.is_empty() {
            return;
        }
        match self.mbc {
            Mbc::Mbc2 => self.ram_data[(addr & 0x1ff) as usize] = value & 0x0f,
            _ => {
                let mask = self.ram_data.len() - 1;
                self.ram_data[(self.ram_offset | addr as usize) & mask] = value;
            }
        }
    }

    /// Handles a write to the 0x0000-0x7FFF range, interpreted as a
    /// bank switching command by the cartridge controller. After any
    /// command the effective ROM1/RAM offsets are recomputed.
    fn write_rom(&mut self, addr: u16, value: u8) {
        match self.mbc {
            Mbc::NoMbc => (),
            Mbc::Mbc1 {
                mut r2000_3fff,
                mut r4000_5fff,
                mut bank_mode,
            } => {
                match addr >> 13 {
                    0x0 => self.ram_enabled = (value & 0x0f) == 0x0a,
                    0x1 => r2000_3fff = value,
                    0x2 => r4000_5fff = value,
                    _ => bank_mode = BankMode::from_u8(value),
                }
                self.mbc = Mbc::Mbc1 {
                    r2000_3fff,
                    r4000_5fff,
                    bank_mode,
                };

                let mut rom_bank = (r2000_3fff & 0x1f) as u16;
                if rom_bank == 0 {
                    rom_bank = 1;
                }

                let mut ram_bank = 0;
                let high = r4000_5fff & 0x03;
                if bank_mode == BankMode::Rom {
                    rom_bank |= (high as u16) << 5;
                } else if self.cart_infos.len() > 1 && r4000_5fff > 0 {
                    // MBC1 multi-cart, the second latch switches the
                    // active 32 KiB slice (slices at 256 KiB intervals)
                    self.set_cart_slot((r4000_5fff as usize) << 3);
                } else {
                    ram_bank = high;
                }

                self.set_rom_bank(rom_bank);
                self.set_ram_bank(ram_bank);
            }
            Mbc::Mbc2 => match addr >> 13 {
                0x0 => {
                    if (addr & 0x0100) == 0 {
                        self.ram_enabled = (value & 0x0f) == 0x0a;
                    }
                }
                0x1 => {
                    if (addr & 0x0100) != 0 {
                        let mut rom_bank = (value & 0x0f) as u16 & self.rom_bank_mask();
                        if rom_bank == 0 {
                            rom_bank = 1;
                        }
                        self.set_rom_bank(rom_bank);
                    }
                }
                _ => (),
            },
            Mbc::Mbc3 => match addr >> 13 {
                0x0 => self.ram_enabled = (value & 0x0f) == 0x0a,
                0x1 => {
                    let mut rom_bank = (value & 0x7f) as u16 & self.rom_bank_mask();
                    if rom_bank == 0 {
                        rom_bank = 1;
                    }
                    self.set_rom_bank(rom_bank);
                }
                0x2 => self.set_ram_bank(value & 0x07),
                _ => (),
            },
            Mbc::Mbc5 {
                mut r2000_2fff,
                mut r3000_3fff,
            } => {
                match addr >> 12 {
                    0x0 | 0x1 => self.ram_enabled = (value & 0x0f) == 0x0a,
                    0x2 => r2000_2fff = value,
                    0x3 => r3000_3fff = value,
                    0x4 | 0x5 => self.set_ram_bank(value & 0x0f),
                    _ => (),
                }
                self.mbc = Mbc::Mbc5 {
                    r2000_2fff,
                    r3000_3fff,
                };

                let rom_bank = (((r3000_3fff & 0x01) as u16) << 8) | r2000_2fff as u16;
                self.set_rom_bank(rom_bank);
            }
            Mbc::Mmm01 { mut r2000_3fff } => match addr >> 13 {
                0x0 => {
                    let size = self.cart_info().size;
                    let offset = ((r2000_3fff as usize) << 14) & (size - 1);
                    self.set_cart_slot(offset >> 15);
                }
                0x1 => {
                    r2000_3fff = value;
                    self.mbc = Mbc::Mmm01 { r2000_3fff };
                }
                _ => (),
            },
            Mbc::Huc1 {
                mut r2000_3fff,
                mut r4000_5fff,
                mut bank_mode,
            } => {
                match addr >> 13 {
                    0x0 => self.ram_enabled = (value & 0x0f) == 0x0a,
                    0x1 => r2000_3fff = value,
                    0x2 => r4000_5fff = value,
                    _ => bank_mode = BankMode::from_u8(value),
                }
                self.mbc = Mbc::Huc1 {
                    r2000_3fff,
                    r4000_5fff,
                    bank_mode,
                };

                let mut rom_bank = (r2000_3fff & 0x3f) as u16;
                if rom_bank == 0 {
                    rom_bank = 1;
                }

                let mut ram_bank = 0;
                let high = r4000_5fff & 0x03;
                if bank_mode == BankMode::Rom {
                    rom_bank |= (high as u16) << 6;
                } else {
                    ram_bank = high;
                }

                self.set_rom_bank(rom_bank);
                self.set_ram_bank(ram_bank);
            }
        }
    }

    /// Switches the active cart slice, keeping the current one when
    /// the requested slot holds no valid header.
    fn set_cart_slot(&mut self, slot: usize) {
        match self.cart_infos.iter().position(|info| info.slot == slot) {
            Some(index) => self.cart_info_index = index,
            None => warnln!("Unable to switch cart to slot {}", slot),
        }
    }

    #[inline(always)]
    fn rom_bank_mask(&self) -> u16 {
        self.cart_info().rom_size.rom_banks().saturating_sub(1)
    }

    pub fn set_rom_bank(&mut self, rom_bank: u16) {
        self.rom1_offset = ((rom_bank & self.rom_bank_mask()) as usize) * ROM_BANK_SIZE;
    }

    pub fn set_ram_bank(&mut self, ram_bank: u8) {
        let mask = self.cart_info().ram_size.ram_banks().saturating_sub(1) as usize;
        self.ram_offset = (ram_bank as usize & mask) * RAM_BANK_SIZE;
    }

    #[inline(always)]
    pub fn cart_info(&self) -> &CartInfo {
        &self.cart_infos[self.cart_info_index]
    }

    #[inline(always)]
    pub fn cart_info_index(&self) -> usize {
        self.cart_info_index
    }

    pub fn set_cart_info_index(&mut self, index: usize) {
        if index < self.cart_infos.len() {
            self.cart_info_index = index;
        }
    }

    #[inline(always)]
    pub fn rom_bank(&self) -> u16 {
        (self.rom1_offset / ROM_BANK_SIZE) as u16
    }

    #[inline(always)]
    pub fn ram_bank(&self) -> u8 {
        (self.ram_offset / RAM_BANK_SIZE) as u8
    }

    #[inline(always)]
    pub fn ram_enabled(&self) -> bool {
        self.ram_enabled
    }

    pub fn title(&self) -> String {
        let offset = self.cart_info().offset;
        let title = &self.rom_data[offset + 0x0134..offset + 0x0144];
        let end = title.iter().position(|byte| *byte == 0).unwrap_or(16);
        String::from(std::str::from_utf8(&title[..end]).unwrap_or("").trim())
    }

    pub fn cgb_flag(&self) -> u8 {
        self.rom_data[self.cart_info().offset + 0x0143]
    }

    pub fn sgb_flag(&self) -> u8 {
        self.rom_data[self.cart_info().offset + 0x0146]
    }

    pub fn rom_type(&self) -> RomType {
        self.cart_info().rom_type
    }

    pub fn rom_size(&self) -> RomSize {
        self.cart_info().rom_size
    }

    pub fn ram_size(&self) -> RamSize {
        self.cart_info().ram_size
    }

    pub fn has_battery(&self) -> bool {
        self.cart_info().rom_type.has_battery()
    }

    pub fn checksum(&self) -> u8 {
        let offset = self.cart_info().offset;
        let mut sum: u8 = 0;
        for i in 0x0134..=0x014c {
            sum = sum.wrapping_sub(self.rom_data[offset + i]).wrapping_sub(1);
        }
        sum
    }

    pub fn valid_checksum(&self) -> bool {
        self.rom_data[self.cart_info().offset + 0x014d] == self.checksum()
    }

    pub fn rom_data(&self) -> &[u8] {
        &self.rom_data
    }

    pub fn ram_data(&self) -> &[u8] {
        &self.ram_data
    }

    pub fn set_ram_data(&mut self, data: &[u8]) -> Result<(), Error> {
        if data.len() != self.ram_data.len() {
            return Err(Error::CustomError(format!(
                "RAM size mismatch (expected {}, got {})",
                self.ram_data.len(),
                data.len()
            )));
        }
        self.ram_data.copy_from_slice(data);
        Ok(())
    }

    pub fn ram_data_mut(&mut self) -> &mut [u8] {
        &mut self.ram_data
    }

    pub fn mbc(&self) -> &Mbc {
        &self.mbc
    }

    pub fn set_mbc(&mut self, mbc: Mbc) {
        self.mbc = mbc;
    }

    pub fn set_ram_enabled(&mut self, value: bool) {
        self.ram_enabled = value;
    }

    pub fn set_rom1_offset(&mut self, value: usize) {
        self.rom1_offset = value;
    }

    pub fn rom1_offset(&self) -> usize {
        self.rom1_offset
    }

    pub fn ram_offset(&self) -> usize {
        self.ram_offset
    }

    pub fn set_ram_offset(&mut self, value: usize) {
        self.ram_offset = value;
    }

    pub fn description(&self, column_length: usize) -> String {
        let title_l = format!("{:width$}", "Title", width = column_length);
        let type_l = format!("{:width$}", "Type", width = column_length);
        let rom_size_l = format!("{:width$}", "ROM Size", width = column_length);
        let ram_size_l = format!("{:width$}", "RAM Size", width = column_length);
        format!(
            "{}  {}\n{}  {}\n{}  {}\n{}  {}",
            title_l,
            self.title(),
            type_l,
            self.rom_type(),
            rom_size_l,
            self.rom_size(),
            ram_size_l,
            self.ram_size()
        )
    }
}

impl Default for Cartridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for Cartridge {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description(9))
    }
}

impl StateComponent for Cartridge {
    fn state(&self) -> Result<Vec<u8>, Error> {
        let mut cursor = Cursor::new(vec![]);
        write_u32(&mut cursor, self.cart_info_index as u32)?;
        let (tag, latches) = match self.mbc {
            Mbc::NoMbc => (0x00, [0x00, 0x00, 0x00]),
            Mbc::Mbc1 {
                r2000_3fff,
                r4000_5fff,
                bank_mode,
            } => (0x01, [r2000_3fff, r4000_5fff, bank_mode as u8]),
            Mbc::Mbc2 => (0x02, [0x00, 0x00, 0x00]),
            Mbc::Mbc3 => (0x03, [0x00, 0x00, 0x00]),
            Mbc::Mbc5 {
                r2000_2fff,
                r3000_3fff,
            } => (0x04, [r2000_2fff, r3000_3fff, 0x00]),
            Mbc::Mmm01 { r2000_3fff } => (0x05, [r2000_3fff, 0x00, 0x00]),
            Mbc::Huc1 {
                r2000_3fff,
                r4000_5fff,
                bank_mode,
            } => (0x06, [r2000_3fff, r4000_5fff, bank_mode as u8]),
        };
        write_u8(&mut cursor, tag)?;
        write_bytes(&mut cursor, &latches)?;
        write_u32(&mut cursor, self.rom1_offset as u32)?;
        write_u32(&mut cursor, self.ram_offset as u32)?;
        write_u8(&mut cursor, self.ram_enabled as u8)?;
        write_u32(&mut cursor, self.ram_data.len() as u32)?;
        write_bytes(&mut cursor, &self.ram_data)?;
        Ok(cursor.into_inner())
    }

    fn set_state(&mut self, data: &[u8]) -> Result<(), Error> {
        let mut cursor = Cursor::new(data);
        let index = read_u32(&mut cursor)? as usize;
        if index >= self.cart_infos.len() {
            return Err(Error::InvalidData);
        }
        self.cart_info_index = index;
        let tag = read_u8(&mut cursor)?;
        let latches = read_bytes(&mut cursor, 3)?;
        self.mbc = match tag {
            0x00 => Mbc::NoMbc,
            0x01 => Mbc::Mbc1 {
                r2000_3fff: latches[0],
                r4000_5fff: latches[1],
                bank_mode: BankMode::from_u8(latches[2]),
            },
            0x02 => Mbc::Mbc2,
            0x03 => Mbc::Mbc3,
            0x04 => Mbc::Mbc5 {
                r2000_2fff: latches[0],
                r3000_3fff: latches[1],
            },
            0x05 => Mbc::Mmm01 {
                r2000_3fff: latches[0],
            },
            0x06 => Mbc::Huc1 {
                r2000_3fff: latches[0],
                r4000_5fff: latches[1],
                bank_mode: BankMode::from_u8(latches[2]),
            },
            _ => return Err(Error::InvalidData),
        };
        self.rom1_offset = read_u32(&mut cursor)? as usize;
        self.ram_offset = read_u32(&mut cursor)? as usize;
        self.ram_enabled = read_u8(&mut cursor)? != 0;
        let length = read_u32(&mut cursor)? as usize;
        if length != self.ram_data.len() {
            return Err(Error::InvalidData);
        }
        read_into(&mut cursor, &mut self.ram_data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::test::build_rom;

    use super::{Cartridge, MbcType, RamSize, RomType};

    #[test]
    fn test_load_plain_rom() {
        let rom = build_rom(0x00, 0x00, 0x00);
        let cartridge = Cartridge::from_data(&rom).unwrap();
        assert_eq!(cartridge.rom_type(), RomType::RomOnly);
        assert_eq!(cartridge.ram_size(), RamSize::NoRam);
        assert!(cartridge.valid_checksum());
        assert!(!cartridge.has_battery());
    }

    #[test]
    fn test_reject_small_rom() {
        let rom = vec![0x00; 0x4000];
        assert!(Cartridge::from_data(&rom).is_err());
    }

    #[test]
    fn test_reject_bad_logo() {
        let mut rom = build_rom(0x00, 0x00, 0x00);
        rom[0x0104] ^= 0xff;
        assert!(Cartridge::from_data(&rom).is_err());
    }

    #[test]
    fn test_mbc1_bank_selection() {
        let rom = build_rom(0x03, 0x06, 0x03);
        let mut cartridge = Cartridge::from_data(&rom).unwrap();
        assert_eq!(cartridge.rom_type().mbc_type(), MbcType::Mbc1);

        // bank 0 selects bank 1
        cartridge.write(0x2000, 0x00);
        assert_eq!(cartridge.rom_bank(), 1);

        cartridge.write(0x2000, 0x12);
        assert_eq!(cartridge.rom_bank(), 0x12);

        // high bits come from the second latch in ROM mode
        cartridge.write(0x4000, 0x01);
        assert_eq!(cartridge.rom_bank(), 0x32);

        // RAM access is gated on the 0xA low nibble
        assert!(!cartridge.ram_enabled());
        cartridge.write(0x0000, 0x0a);
        assert!(cartridge.ram_enabled());
        cartridge.write(0x0000, 0x00);
        assert!(!cartridge.ram_enabled());
    }

    #[test]
    fn test_mbc1_ram_disabled_reads() {
        let rom = build_rom(0x03, 0x02, 0x02);
        let mut cartridge = Cartridge::from_data(&rom).unwrap();

        cartridge.write(0xa000, 0x42);
        assert_eq!(cartridge.read(0xa000), 0xff);

        cartridge.write(0x0000, 0x0a);
        cartridge.write(0xa000, 0x42);
        assert_eq!(cartridge.read(0xa000), 0x42);
    }

    #[test]
    fn test_mbc2_nibble_ram() {
        let rom = build_rom(0x06, 0x01, 0x00);
        let mut cartridge = Cartridge::from_data(&rom).unwrap();

        cartridge.write(0x0000, 0x0a);
        cartridge.write(0xa000, 0xff);
        assert_eq!(cartridge.read(0xa000), 0xff);
        cartridge.write(0xa000, 0x05);
        assert_eq!(cartridge.read(0xa000), 0xf5);

        // the RAM enable command requires bit 8 of the address clear
        cartridge.write(0x0100, 0x00);
        assert!(cartridge.ram_enabled());
        cartridge.write(0x0000, 0x00);
        assert!(!cartridge.ram_enabled());
    }

    #[test]
    fn test_mbc5_nine_bit_bank() {
        let rom = build_rom(0x19, 0x08, 0x00);
        let mut cartridge = Cartridge::from_data(&rom).unwrap();

        cartridge.write(0x2000, 0x34);
        cartridge.write(0x3000, 0x01);
        assert_eq!(cartridge.rom_bank(), 0x134);

        // MBC5 allows bank 0 in the switchable area
        cartridge.write(0x2000, 0x00);
        cartridge.write(0x3000, 0x00);
        assert_eq!(cartridge.rom_bank(), 0);
    }
}
