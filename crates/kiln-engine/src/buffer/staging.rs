use crate::backend::Backend;
use crate::encoder::FrameSerial;
use crate::error::Result;

/// Offset alignment for staging reservations.
pub const STAGING_ALIGNMENT: u64 = 256;

/// Round `value` up to the nearest multiple of `alignment` (> 0).
///
/// Saturates instead of overflowing on pathological sizes.
pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment > 0);
    match value.checked_add(alignment - 1) {
        Some(v) => v / alignment * alignment,
        None => u64::MAX / alignment * alignment,
    }
}

/// Transient per-frame copy vehicle for dynamic buffer updates.
///
/// A single backend buffer with a bump cursor. The cursor rewinds whenever
/// the frame serial has advanced since the previous reservation, and wraps
/// to zero when a reservation does not fit in the remaining space.
pub struct StagingRing<Buf> {
    buffer: Option<Buf>,
    capacity: u64,
    cursor: u64,
    last_serial: Option<FrameSerial>,
}

impl<Buf> StagingRing<Buf> {
    pub fn new(capacity: u64) -> Self {
        Self {
            buffer: None,
            capacity: align_up(capacity.max(STAGING_ALIGNMENT), STAGING_ALIGNMENT),
            cursor: 0,
            last_serial: None,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Reserves `len` bytes for frame `serial`, returning the staging buffer
    /// and the reserved offset.
    pub fn reserve<B>(&mut self, backend: &mut B, len: u64, serial: FrameSerial) -> Result<(&Buf, u64)>
    where
        B: Backend<Buffer = Buf>,
    {
        if self.last_serial != Some(serial) {
            self.cursor = 0;
            self.last_serial = Some(serial);
        }

        if len > self.capacity {
            let grown = len.checked_next_power_of_two().unwrap_or(len);
            log::debug!("staging ring grows {} -> {} bytes", self.capacity, grown);
            self.capacity = align_up(grown, STAGING_ALIGNMENT);
            self.buffer = None;
            self.cursor = 0;
        }

        let mut offset = align_up(self.cursor, STAGING_ALIGNMENT);
        if offset.saturating_add(len) > self.capacity {
            offset = 0;
        }
        self.cursor = offset + len;

        let buffer = match self.buffer.take() {
            Some(buffer) => buffer,
            None => backend.create_buffer(self.capacity, Some("kiln staging ring"))?,
        };
        let buffer = self.buffer.insert(buffer);
        Ok((&*buffer, offset))
    }
}
