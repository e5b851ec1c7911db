//! In-memory register store
//!
//! Four independent tables addressed from zero. Coils and discrete inputs
//! hold bits, holding and input registers hold 16-bit words. Each table sits
//! behind its own lock and every operation takes exactly one lock, so a
//! single read or write is atomic with respect to other connections.

use std::fmt;
use std::ops::Range;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

use crate::config::{TableConfig, TablesConfig};

/// Largest table the 16-bit Modbus address space can reach
pub const MAX_TABLE_SIZE: usize = 65_536;

/// The four Modbus data spaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataSpace {
    Coils,
    DiscreteInputs,
    HoldingRegisters,
    InputRegisters,
}

impl DataSpace {
    pub const ALL: [DataSpace; 4] = [
        DataSpace::Coils,
        DataSpace::DiscreteInputs,
        DataSpace::HoldingRegisters,
        DataSpace::InputRegisters,
    ];

    /// True for 1-bit spaces
    pub fn is_bit(self) -> bool {
        matches!(self, Self::Coils | Self::DiscreteInputs)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Coils => "coils",
            Self::DiscreteInputs => "discrete_inputs",
            Self::HoldingRegisters => "holding_registers",
            Self::InputRegisters => "input_registers",
        }
    }
}

impl fmt::Display for DataSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Cell values moved in or out of a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cells {
    Bits(Vec<bool>),
    Words(Vec<u16>),
}

impl Cells {
    pub fn len(&self) -> usize {
        match self {
            Self::Bits(bits) => bits.len(),
            Self::Words(words) => words.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{space}: {quantity} cells at {start} out of range for table of {size}")]
    OutOfRange {
        space: DataSpace,
        start: u16,
        quantity: usize,
        size: usize,
    },

    #[error("{space} holds {expected}")]
    TypeMismatch {
        space: DataSpace,
        expected: &'static str,
    },

    #[error("{space}: fill value {value} does not fit a 1-bit cell")]
    InvalidFill { space: DataSpace, value: u16 },

    #[error("{space}: fill pattern is empty")]
    EmptyFill { space: DataSpace },

    #[error("{space}: size {size} not in 1..=65536")]
    InvalidSize { space: DataSpace, size: usize },
}

#[derive(Debug)]
pub struct RegisterStore {
    coils: RwLock<Vec<bool>>,
    discrete_inputs: RwLock<Vec<bool>>,
    holding_registers: RwLock<Vec<u16>>,
    input_registers: RwLock<Vec<u16>>,
}

impl RegisterStore {
    /// Build all four tables, repeating each fill pattern across the table
    pub fn from_config(tables: &TablesConfig) -> Result<Self, StoreError> {
        let store = Self {
            coils: RwLock::new(build_bits(DataSpace::Coils, &tables.coils)?),
            discrete_inputs: RwLock::new(build_bits(
                DataSpace::DiscreteInputs,
                &tables.discrete_inputs,
            )?),
            holding_registers: RwLock::new(build_words(
                DataSpace::HoldingRegisters,
                &tables.holding_registers,
            )?),
            input_registers: RwLock::new(build_words(
                DataSpace::InputRegisters,
                &tables.input_registers,
            )?),
        };

        debug!(
            "Store ready: coils={} di={} hr={} ir={}",
            store.size(DataSpace::Coils),
            store.size(DataSpace::DiscreteInputs),
            store.size(DataSpace::HoldingRegisters),
            store.size(DataSpace::InputRegisters)
        );
        Ok(store)
    }

    pub fn size(&self, space: DataSpace) -> usize {
        match space {
            DataSpace::Coils => self.coils.read().len(),
            DataSpace::DiscreteInputs => self.discrete_inputs.read().len(),
            DataSpace::HoldingRegisters => self.holding_registers.read().len(),
            DataSpace::InputRegisters => self.input_registers.read().len(),
        }
    }

    /// Read `quantity` cells starting at `start`
    pub fn read(&self, space: DataSpace, start: u16, quantity: u16) -> Result<Cells, StoreError> {
        let quantity = usize::from(quantity);
        match space {
            DataSpace::Coils => read_table(&self.coils, space, start, quantity).map(Cells::Bits),
            DataSpace::DiscreteInputs => {
                read_table(&self.discrete_inputs, space, start, quantity).map(Cells::Bits)
            },
            DataSpace::HoldingRegisters => {
                read_table(&self.holding_registers, space, start, quantity).map(Cells::Words)
            },
            DataSpace::InputRegisters => {
                read_table(&self.input_registers, space, start, quantity).map(Cells::Words)
            },
        }
    }

    /// Write cells starting at `start`; nothing changes unless all fit
    pub fn write(&self, space: DataSpace, start: u16, cells: &Cells) -> Result<(), StoreError> {
        match (space, cells) {
            (DataSpace::Coils, Cells::Bits(bits)) => write_table(&self.coils, space, start, bits),
            (DataSpace::DiscreteInputs, Cells::Bits(bits)) => {
                write_table(&self.discrete_inputs, space, start, bits)
            },
            (DataSpace::HoldingRegisters, Cells::Words(words)) => {
                write_table(&self.holding_registers, space, start, words)
            },
            (DataSpace::InputRegisters, Cells::Words(words)) => {
                write_table(&self.input_registers, space, start, words)
            },
            (space, _) => Err(StoreError::TypeMismatch {
                space,
                expected: if space.is_bit() { "bits" } else { "words" },
            }),
        }
    }

    pub fn read_bits(
        &self,
        space: DataSpace,
        start: u16,
        quantity: u16,
    ) -> Result<Vec<bool>, StoreError> {
        match self.read(space, start, quantity)? {
            Cells::Bits(bits) => Ok(bits),
            Cells::Words(_) => Err(StoreError::TypeMismatch {
                space,
                expected: "words",
            }),
        }
    }

    pub fn read_words(
        &self,
        space: DataSpace,
        start: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, StoreError> {
        match self.read(space, start, quantity)? {
            Cells::Words(words) => Ok(words),
            Cells::Bits(_) => Err(StoreError::TypeMismatch {
                space,
                expected: "bits",
            }),
        }
    }
}

fn checked_range(
    space: DataSpace,
    start: u16,
    quantity: usize,
    size: usize,
) -> Result<Range<usize>, StoreError> {
    let begin = usize::from(start);
    let end = begin + quantity;
    if quantity == 0 || end > size {
        return Err(StoreError::OutOfRange {
            space,
            start,
            quantity,
            size,
        });
    }
    Ok(begin..end)
}

fn read_table<T: Copy>(
    table: &RwLock<Vec<T>>,
    space: DataSpace,
    start: u16,
    quantity: usize,
) -> Result<Vec<T>, StoreError> {
    let cells = table.read();
    let range = checked_range(space, start, quantity, cells.len())?;
    Ok(cells[range].to_vec())
}

fn write_table<T: Copy>(
    table: &RwLock<Vec<T>>,
    space: DataSpace,
    start: u16,
    values: &[T],
) -> Result<(), StoreError> {
    let mut cells = table.write();
    let range = checked_range(space, start, values.len(), cells.len())?;
    cells[range].copy_from_slice(values);
    Ok(())
}

pub(crate) fn validate_table(space: DataSpace, table: &TableConfig) -> Result<(), StoreError> {
    if table.size == 0 || table.size > MAX_TABLE_SIZE {
        return Err(StoreError::InvalidSize {
            space,
            size: table.size,
        });
    }
    if table.fill.is_empty() {
        return Err(StoreError::EmptyFill { space });
    }
    if space.is_bit() {
        if let Some(&value) = table.fill.iter().find(|value| **value > 1) {
            return Err(StoreError::InvalidFill { space, value });
        }
    }
    Ok(())
}

fn build_bits(space: DataSpace, table: &TableConfig) -> Result<Vec<bool>, StoreError> {
    validate_table(space, table)?;
    Ok(table
        .fill
        .iter()
        .cycle()
        .take(table.size)
        .map(|value| *value == 1)
        .collect())
}

fn build_words(space: DataSpace, table: &TableConfig) -> Result<Vec<u16>, StoreError> {
    validate_table(space, table)?;
    Ok(table.fill.iter().copied().cycle().take(table.size).collect())
}
