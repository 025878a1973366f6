//! Logical buffers over backend allocations.
//!
//! Static buffers own one slot. Dynamic buffers own three slots of
//! `align_up(size, 256)` bytes inside one backend allocation; the slot a
//! frame writes is `frame_serial % 3`, which keeps the CPU at most two frames
//! ahead of any slot still being read. Dynamic updates travel through the
//! shared [`StagingRing`].
//!
//! Backends that copy in granules (4 bytes under wgpu) get every upload
//! widened to whole granules. The edge bytes come from a host shadow of the
//! allocation, so neighbouring contents are rewritten unchanged.

mod staging;

use std::num::NonZeroU64;

use rustc_hash::FxHashMap;

use crate::backend::{Backend, BufferBinding};
use crate::encoder::FrameSerial;
use crate::error::{Error, Result};

pub use staging::{STAGING_ALIGNMENT, StagingRing};
pub(crate) use staging::align_up;

pub const DYNAMIC_SLOT_COUNT: u32 = 3;
pub const DYNAMIC_SLOT_ALIGNMENT: u64 = 256;

/// Static slots are sized in 4-byte granules at least.
const BACKEND_SIZE_ALIGNMENT: u64 = 4;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BufferHandle(NonZeroU64);

impl BufferHandle {
    pub fn to_raw(self) -> u64 {
        self.0.get()
    }

    /// `0` is the "no buffer" value and yields `None`.
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BufferUsage {
    Static,
    Dynamic,
}

impl BufferUsage {
    pub fn from_token(token: i32) -> Result<Self> {
        match token {
            0 => Ok(BufferUsage::Static),
            1 => Ok(BufferUsage::Dynamic),
            other => Err(Error::invalid(format!("unknown buffer usage {other}"))),
        }
    }

    pub fn slot_count(self) -> u32 {
        match self {
            BufferUsage::Static => 1,
            BufferUsage::Dynamic => DYNAMIC_SLOT_COUNT,
        }
    }
}

#[derive(Debug)]
pub struct BufferRecord<Buf> {
    pub usage: BufferUsage,
    pub size: u64,
    pub slot_size: u64,
    pub slot_count: u32,
    pub buffer: Buf,
    shadow: Option<Vec<u8>>,
}

impl<Buf> BufferRecord<Buf> {
    pub fn slot_offset(&self, slot: u32) -> u64 {
        u64::from(slot) * self.slot_size
    }

    /// Slot read and written during frame `serial`.
    pub fn active_slot(&self, serial: FrameSerial) -> u32 {
        serial.slot(self.slot_count)
    }
}

/// Mirrors `bytes` at `offset` into `shadow` and returns the granule-aligned
/// range covering them. Without a shadow the range is returned untouched.
fn widen<'a>(shadow: &'a mut Option<Vec<u8>>, offset: u64, bytes: &'a [u8], granule: u64) -> (u64, &'a [u8]) {
    let Some(shadow) = shadow.as_mut() else {
        return (offset, bytes);
    };
    let start = offset as usize;
    shadow[start..start + bytes.len()].copy_from_slice(bytes);

    let lo = offset / granule * granule;
    let hi = align_up(offset + bytes.len() as u64, granule).min(shadow.len() as u64);
    (lo, &shadow[lo as usize..hi as usize])
}

fn zeroed_shadow(len: u64) -> Result<Vec<u8>> {
    let len = usize::try_from(len)
        .ok()
        .filter(|&len| len <= isize::MAX as usize)
        .ok_or_else(|| Error::InitializationFailed(format!("no host shadow for {len} bytes")))?;
    let mut bytes = Vec::new();
    bytes
        .try_reserve_exact(len)
        .map_err(|err| Error::InitializationFailed(format!("host shadow of {len} bytes: {err}")))?;
    bytes.resize(len, 0);
    Ok(bytes)
}

pub struct BufferAllocator<B: Backend> {
    records: FxHashMap<BufferHandle, BufferRecord<B::Buffer>>,
    next_id: u64,
    staging: StagingRing<B::Buffer>,
    labels: bool,
}

impl<B: Backend> BufferAllocator<B> {
    pub fn new(staging_capacity: u64, labels: bool) -> Self {
        Self {
            records: FxHashMap::default(),
            next_id: 1,
            staging: StagingRing::new(staging_capacity),
            labels,
        }
    }

    pub fn create_buffer(
        &mut self,
        backend: &mut B,
        usage: BufferUsage,
        size: i64,
        initial_data: Option<&[u8]>,
    ) -> Result<BufferHandle> {
        if size <= 0 {
            return Err(Error::invalid(format!("buffer size must be positive, got {size}")));
        }
        let size = size as u64;
        if let Some(data) = initial_data.filter(|d| d.len() as u64 > size) {
            return Err(Error::invalid(format!(
                "initial data ({} bytes) exceeds buffer size ({size} bytes)",
                data.len()
            )));
        }

        let granule = backend.copy_alignment().max(1);
        let slot_count = usage.slot_count();
        let slot_size = match usage {
            BufferUsage::Static => align_up(size, BACKEND_SIZE_ALIGNMENT.max(granule)),
            BufferUsage::Dynamic => align_up(size, DYNAMIC_SLOT_ALIGNMENT.max(granule)),
        };
        let total = slot_size
            .checked_mul(u64::from(slot_count))
            .ok_or_else(|| Error::invalid("buffer size overflows"))?;

        let id = self.next_id;
        let label = self.labels.then(|| format!("kiln {usage:?} buffer #{id}"));
        let buffer = backend.create_buffer(total, label.as_deref())?;
        let shadow = if granule > 1 { Some(zeroed_shadow(total)?) } else { None };

        let mut record = BufferRecord {
            usage,
            size,
            slot_size,
            slot_count,
            buffer,
            shadow,
        };

        if let Some(data) = initial_data.filter(|d| !d.is_empty()) {
            for slot in 0..slot_count {
                let slot_offset = record.slot_offset(slot);
                let (at, bytes) = widen(&mut record.shadow, slot_offset, data, granule);
                backend.write_buffer(&record.buffer, at, bytes)?;
            }
        }

        self.next_id += 1;
        let handle = BufferHandle(NonZeroU64::new(id).ok_or_else(|| Error::invalid("buffer ids exhausted"))?);
        self.records.insert(handle, record);
        log::debug!("created {usage:?} buffer {id}: {size} bytes x {slot_count} slot(s)");
        Ok(handle)
    }

    pub fn update_buffer(
        &mut self,
        backend: &mut B,
        handle: BufferHandle,
        offset: i64,
        data: Option<&[u8]>,
        length: i64,
        serial: FrameSerial,
    ) -> Result<()> {
        if offset < 0 || length < 0 {
            return Err(Error::invalid("buffer update offset and length must be non-negative"));
        }
        let granule = backend.copy_alignment().max(1);
        let record = self
            .records
            .get_mut(&handle)
            .ok_or_else(|| Error::invalid(format!("unknown buffer {}", handle.to_raw())))?;

        let (offset, length) = (offset as u64, length as u64);
        let end = offset
            .checked_add(length)
            .ok_or_else(|| Error::invalid("buffer update range overflows"))?;
        if end > record.size {
            return Err(Error::invalid(format!(
                "update {offset}..{end} exceeds buffer size {}",
                record.size
            )));
        }
        if length == 0 {
            return Ok(());
        }
        let data = data.ok_or_else(|| Error::invalid("update data is missing"))?;
        if (data.len() as u64) < length {
            return Err(Error::invalid(format!(
                "update data ({} bytes) shorter than length {length}",
                data.len()
            )));
        }
        let payload = &data[..length as usize];

        match record.usage {
            BufferUsage::Static => {
                let (at, bytes) = widen(&mut record.shadow, offset, payload, granule);
                backend.write_buffer(&record.buffer, at, bytes)?;
            }
            BufferUsage::Dynamic => {
                let slot = record.active_slot(serial);
                let dst_offset = record.slot_offset(slot) + offset;
                let (at, bytes) = widen(&mut record.shadow, dst_offset, payload, granule);
                let len = bytes.len() as u64;
                let (staging, staging_offset) = self.staging.reserve(backend, len, serial)?;
                backend.write_buffer(staging, staging_offset, bytes)?;
                backend.copy_buffer(staging, staging_offset, &record.buffer, at, len)?;
            }
        }
        Ok(())
    }

    pub fn destroy_buffer(&mut self, handle: BufferHandle) -> Result<()> {
        match self.records.remove(&handle) {
            Some(_) => {
                log::debug!("destroyed buffer {}", handle.to_raw());
                Ok(())
            }
            None => Err(Error::invalid(format!("unknown buffer {}", handle.to_raw()))),
        }
    }

    pub fn record(&self, handle: BufferHandle) -> Option<&BufferRecord<B::Buffer>> {
        self.records.get(&handle)
    }

    /// Byte range draws read during frame `serial`.
    pub fn binding(&self, handle: BufferHandle, serial: FrameSerial) -> Result<BufferBinding<'_, B::Buffer>> {
        let record = self
            .record(handle)
            .ok_or_else(|| Error::invalid(format!("unknown buffer {}", handle.to_raw())))?;
        Ok(BufferBinding {
            buffer: &record.buffer,
            offset: record.slot_offset(record.active_slot(serial)),
            size: record.size,
        })
    }

    pub fn live_buffers(&self) -> usize {
        self.records.len()
    }

    pub fn staging_capacity(&self) -> u64 {
        self.staging.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Readback;
    use crate::backend::headless::HeadlessBackend;
    use pretty_assertions::assert_eq;

    fn allocator() -> (HeadlessBackend, BufferAllocator<HeadlessBackend>) {
        (HeadlessBackend::new(), BufferAllocator::new(1024, false))
    }

    fn slot_bytes(
        backend: &HeadlessBackend,
        alloc: &BufferAllocator<HeadlessBackend>,
        handle: BufferHandle,
        slot: u32,
        len: u64,
    ) -> Vec<u8> {
        let record = alloc.record(handle).unwrap();
        backend.read_buffer(&record.buffer, record.slot_offset(slot), len).unwrap()
    }

    #[test]
    fn raw_handles_round_trip_and_zero_is_none() {
        assert_eq!(BufferHandle::from_raw(0), None);
        assert_eq!(BufferHandle::from_raw(9).map(BufferHandle::to_raw), Some(9));
    }

    #[test]
    fn invalid_creation_arguments_are_rejected() {
        let (mut backend, mut alloc) = allocator();
        assert!(matches!(
            alloc.create_buffer(&mut backend, BufferUsage::Static, 0, None),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            alloc.create_buffer(&mut backend, BufferUsage::Static, 64, Some(&[0u8; 128])),
            Err(Error::InvalidArgument(_))
        ));
        assert!(BufferUsage::from_token(2).is_err());
        assert_eq!(alloc.live_buffers(), 0);
    }

    #[test]
    fn dynamic_slots_are_256_aligned_and_seeded() {
        let (mut backend, mut alloc) = allocator();
        let h = alloc
            .create_buffer(&mut backend, BufferUsage::Dynamic, 100, Some(&[7u8; 100]))
            .unwrap();
        let record = alloc.record(h).unwrap();
        assert_eq!((record.slot_size, record.slot_count), (256, 3));
        for slot in 0..3 {
            assert_eq!(slot_bytes(&backend, &alloc, h, slot, 100), vec![7u8; 100]);
        }
    }

    #[test]
    fn static_update_is_read_back_exactly() {
        let (mut backend, mut alloc) = allocator();
        let h = alloc.create_buffer(&mut backend, BufferUsage::Static, 64, None).unwrap();
        let payload: Vec<u8> = (0..16).collect();
        alloc
            .update_buffer(&mut backend, h, 8, Some(&payload), 16, FrameSerial::default())
            .unwrap();

        let record = alloc.record(h).unwrap();
        assert_eq!(backend.read_buffer(&record.buffer, 8, 16).unwrap(), payload);
    }

    #[test]
    fn update_range_is_validated() {
        let (mut backend, mut alloc) = allocator();
        let h = alloc.create_buffer(&mut backend, BufferUsage::Static, 64, None).unwrap();
        let s = FrameSerial::default();
        let data = [0u8; 64];

        assert!(alloc.update_buffer(&mut backend, h, 60, Some(&data), 8, s).is_err());
        assert!(alloc.update_buffer(&mut backend, h, -1, Some(&data), 4, s).is_err());
        assert!(alloc.update_buffer(&mut backend, h, 0, None, 4, s).is_err());
        assert!(alloc.update_buffer(&mut backend, h, 0, Some(&data[..2]), 4, s).is_err());
        assert!(alloc.update_buffer(&mut backend, h, 0, None, 0, s).is_ok());
    }

    #[test]
    fn dynamic_updates_land_in_the_serial_slot() {
        let (mut backend, mut alloc) = allocator();
        let h = alloc.create_buffer(&mut backend, BufferUsage::Dynamic, 16, None).unwrap();
        let mut serial = FrameSerial::default();

        for frame in 0u8..4 {
            alloc
                .update_buffer(&mut backend, h, 0, Some(&[frame; 16]), 16, serial)
                .unwrap();
            let slot = u32::from(frame) % DYNAMIC_SLOT_COUNT;
            assert_eq!(slot_bytes(&backend, &alloc, h, slot, 16), vec![frame; 16]);
            serial.advance();
        }
        // Frame 3 reused slot 0; slots 1 and 2 keep frames 1 and 2.
        assert_eq!(slot_bytes(&backend, &alloc, h, 1, 16), vec![1u8; 16]);
        assert_eq!(slot_bytes(&backend, &alloc, h, 2, 16), vec![2u8; 16]);
        assert_eq!(backend.copy_count(), 4);
    }

    #[test]
    fn odd_sized_static_data_fits_a_granular_backend() {
        let mut backend = HeadlessBackend::with_copy_alignment(4);
        let mut alloc = BufferAllocator::new(1024, false);
        let indices = [1u8, 0, 2, 0, 3, 0];
        let h = alloc
            .create_buffer(&mut backend, BufferUsage::Static, 6, Some(&indices))
            .unwrap();
        assert_eq!(slot_bytes(&backend, &alloc, h, 0, 6), indices.to_vec());

        alloc
            .update_buffer(&mut backend, h, 1, Some(&[9, 9, 9]), 3, FrameSerial::default())
            .unwrap();
        assert_eq!(slot_bytes(&backend, &alloc, h, 0, 6), vec![1, 9, 9, 9, 3, 0]);
    }

    #[test]
    fn unaligned_dynamic_update_keeps_neighbouring_bytes() {
        let mut backend = HeadlessBackend::with_copy_alignment(4);
        let mut alloc = BufferAllocator::new(1024, false);
        let seed: Vec<u8> = (10..22).collect();
        let h = alloc
            .create_buffer(&mut backend, BufferUsage::Dynamic, 12, Some(&seed))
            .unwrap();

        let mut serial = FrameSerial::default();
        serial.advance();
        alloc
            .update_buffer(&mut backend, h, 2, Some(&[0xAA; 6]), 6, serial)
            .unwrap();

        let mut expected = seed.clone();
        expected[2..8].fill(0xAA);
        assert_eq!(slot_bytes(&backend, &alloc, h, 1, 12), expected);
        // Other slots keep the seed.
        assert_eq!(slot_bytes(&backend, &alloc, h, 0, 12), seed);
        assert_eq!(slot_bytes(&backend, &alloc, h, 2, 12), seed);
    }

    #[test]
    fn destroy_rejects_unknown_handles() {
        let (mut backend, mut alloc) = allocator();
        let h = alloc.create_buffer(&mut backend, BufferUsage::Static, 4, None).unwrap();
        alloc.destroy_buffer(h).unwrap();
        assert!(matches!(alloc.destroy_buffer(h), Err(Error::InvalidArgument(_))));
        assert!(alloc.binding(h, FrameSerial::default()).is_err());
    }
}
