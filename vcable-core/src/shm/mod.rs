// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Shared region: mapping, header, register file and cell bitmap.
//!
//! The resource manager owns the layout and the bitmap; the register file is
//! the only part the real-time side writes.

mod cells;
mod header;
mod region;
mod registers;

pub use cells::{CellAllocator, CellRange};
pub use header::{RegionLayout, CELL_AREA_ALIGNMENT, LAYOUT_VERSION, MAGIC, REGISTER_AREA_OFFSET};
pub use region::SharedMemoryRegion;
pub use registers::{
    EndpointRegisters, Generation, RegisterSlot, RegisterSnapshot, REGISTER_SLOT_SIZE,
};
