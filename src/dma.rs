//! DMA (Direct Memory Access) functions and structures.
//!
//! Holds the state of the 160 byte OAM transfer engine, the actual
//! byte copies are performed at the bus level (`Mmu::dma_mcycle`)
//! since they need full address space access.

use std::{
    fmt::{self, Display, Formatter},
    io::Cursor,
};

use damage_common::{
    data::{read_u16, read_u8, write_u16, write_u8},
    error::Error,
};

use crate::{
    mmu::{MemoryRegion, Mmu},
    state::StateComponent,
};

/// T-cycles of startup delay between the trigger write and the first
/// transferred byte.
pub const DMA_DELAY_CYCLES: u16 = 8;

/// Total T-cycles of a transfer, delay included.
pub const DMA_CYCLES: u16 = 648;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DmaState {
    Inactive = 0x00,
    Triggered = 0x01,
    Active = 0x02,
}

impl DmaState {
    pub fn description(&self) -> &'static str {
        match self {
            DmaState::Inactive => "Inactive",
            DmaState::Triggered => "Triggered",
            DmaState::Active => "Active",
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            0x01 => DmaState::Triggered,
            0x02 => DmaState::Active,
            _ => DmaState::Inactive,
        }
    }
}

impl Display for DmaState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

pub struct Dma {
    state: DmaState,

    /// Source location snapshotted at trigger time as a decoded
    /// region and offset pair.
    source: (MemoryRegion, u16),

    cycles: u16,
}

impl Dma {
    pub fn new() -> Self {
        Self {
            state: DmaState::Inactive,
            source: (MemoryRegion::Rom0, 0x0000),
            cycles: 0,
        }
    }

    pub fn reset(&mut self) {
        self.state = DmaState::Inactive;
        self.source = (MemoryRegion::Rom0, 0x0000);
        self.cycles = 0;
    }

    /// Starts (or restarts) a transfer from the provided base address,
    /// a re-trigger while a transfer is running keeps the current
    /// state and only replaces source and cycle count.
    pub fn trigger(&mut self, value: u8) {
        if self.state == DmaState::Inactive {
            self.state = DmaState::Triggered;
        }
        self.source = Mmu::map_address((value as u16) << 8);
        self.cycles = 0;
    }

    #[inline(always)]
    pub fn state(&self) -> DmaState {
        self.state
    }

    #[inline(always)]
    pub fn set_state(&mut self, value: DmaState) {
        self.state = value;
    }

    #[inline(always)]
    pub fn active(&self) -> bool {
        self.state == DmaState::Active
    }

    #[inline(always)]
    pub fn source(&self) -> (MemoryRegion, u16) {
        self.source
    }

    #[inline(always)]
    pub fn set_source(&mut self, value: (MemoryRegion, u16)) {
        self.source = value;
    }

    #[inline(always)]
    pub fn cycles(&self) -> u16 {
        self.cycles
    }

    #[inline(always)]
    pub fn set_cycles(&mut self, value: u16) {
        self.cycles = value;
    }

    pub fn description(&self) -> String {
        format!(
            "state: {}, source: 0x{:04x}, cycles: {}",
            self.state, self.source.1, self.cycles
        )
    }
}

impl Default for Dma {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for Dma {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl StateComponent for Dma {
    fn state(&self) -> Result<Vec<u8>, Error> {
        let mut cursor = Cursor::new(vec![]);
        write_u8(&mut cursor, self.state as u8)?;
        write_u8(&mut cursor, self.source.0 as u8)?;
        write_u16(&mut cursor, self.source.1)?;
        write_u16(&mut cursor, self.cycles)?;
        Ok(cursor.into_inner())
    }

    fn set_state(&mut self, data: &[u8]) -> Result<(), Error> {
        let mut cursor = Cursor::new(data);
        self.state = DmaState::from_u8(read_u8(&mut cursor)?);
        let region = MemoryRegion::from_u8(read_u8(&mut cursor)?);
        let addr = read_u16(&mut cursor)?;
        self.source = (region, addr);
        self.cycles = read_u16(&mut cursor)?;
        Ok(())
    }
}
