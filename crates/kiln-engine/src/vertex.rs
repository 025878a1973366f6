//! Vertex layout registry.
//!
//! Hosts describe a vertex layout as a packed array of little-endian `i32`
//! words, seven per attribute:
//! `index, usage, component_type, component_count, offset, normalized, uv_index`.
//! Registration parses and validates the description once and stores an
//! immutable backend layout object behind a [`VertexLayoutHandle`].

use std::num::NonZeroU64;

use bytemuck::{Pod, Zeroable};
use rustc_hash::FxHashMap;
use wgpu::VertexFormat;

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::state::tokens::gl;

/// Words per packed attribute.
pub const PACKED_ATTRIBUTE_WORDS: usize = 7;
const PACKED_ATTRIBUTE_BYTES: usize = PACKED_ATTRIBUTE_WORDS * 4;

/// Highest shader location accepted (wgpu's default attribute limit).
const MAX_ATTRIBUTES: u32 = 16;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct VertexLayoutHandle(NonZeroU64);

impl VertexLayoutHandle {
    pub fn to_raw(self) -> u64 {
        self.0.get()
    }

    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VertexUsage {
    Position,
    Normal,
    Color,
    Uv,
    Generic,
}

impl VertexUsage {
    fn from_tag(tag: i32) -> Result<Self> {
        match tag {
            0 => Ok(VertexUsage::Position),
            1 => Ok(VertexUsage::Normal),
            2 => Ok(VertexUsage::Color),
            3 => Ok(VertexUsage::Uv),
            4 => Ok(VertexUsage::Generic),
            other => Err(Error::invalid(format!("unknown vertex usage tag {other}"))),
        }
    }
}

/// One attribute exactly as laid out in the packed buffer.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct PackedAttribute {
    index: i32,
    usage: i32,
    component_type: i32,
    component_count: i32,
    offset: i32,
    normalized: i32,
    uv_index: i32,
}

impl PackedAttribute {
    fn to_native(mut self) -> Self {
        for word in bytemuck::bytes_of_mut(&mut self).chunks_exact_mut(4) {
            let v = i32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            word.copy_from_slice(&v.to_ne_bytes());
        }
        self
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VertexElement {
    pub shader_location: u32,
    pub usage: VertexUsage,
    pub format: VertexFormat,
    pub offset: u64,
    pub uv_index: u32,
}

/// Parsed, validated layout handed to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexLayoutDesc {
    pub stride: u64,
    pub elements: Vec<VertexElement>,
}

impl VertexLayoutDesc {
    pub fn attributes(&self) -> Vec<wgpu::VertexAttribute> {
        self.elements
            .iter()
            .map(|e| wgpu::VertexAttribute {
                format: e.format,
                offset: e.offset,
                shader_location: e.shader_location,
            })
            .collect()
    }

    pub fn position(&self) -> Option<&VertexElement> {
        self.elements.iter().find(|e| e.usage == VertexUsage::Position)
    }
}

/// `(component_type, component_count, normalized)` → vertex format.
///
/// Tuples missing from the table are rejected; there is no default format.
pub fn vertex_format(component_type: u32, count: u32, normalized: bool) -> Option<VertexFormat> {
    use VertexFormat as F;
    let format = match (component_type, count, normalized) {
        (gl::FLOAT, 1, false) => F::Float32,
        (gl::FLOAT, 2, false) => F::Float32x2,
        (gl::FLOAT, 3, false) => F::Float32x3,
        (gl::FLOAT, 4, false) => F::Float32x4,

        (gl::UNSIGNED_BYTE, 2, true) => F::Unorm8x2,
        (gl::UNSIGNED_BYTE, 4, true) => F::Unorm8x4,
        (gl::UNSIGNED_BYTE, 2, false) => F::Uint8x2,
        (gl::UNSIGNED_BYTE, 4, false) => F::Uint8x4,
        (gl::BYTE, 2, true) => F::Snorm8x2,
        (gl::BYTE, 4, true) => F::Snorm8x4,
        (gl::BYTE, 2, false) => F::Sint8x2,
        (gl::BYTE, 4, false) => F::Sint8x4,

        (gl::UNSIGNED_SHORT, 2, true) => F::Unorm16x2,
        (gl::UNSIGNED_SHORT, 4, true) => F::Unorm16x4,
        (gl::UNSIGNED_SHORT, 2, false) => F::Uint16x2,
        (gl::UNSIGNED_SHORT, 4, false) => F::Uint16x4,
        (gl::SHORT, 2, true) => F::Snorm16x2,
        (gl::SHORT, 4, true) => F::Snorm16x4,
        (gl::SHORT, 2, false) => F::Sint16x2,
        (gl::SHORT, 4, false) => F::Sint16x4,

        (gl::INT, 1, false) => F::Sint32,
        (gl::INT, 2, false) => F::Sint32x2,
        (gl::INT, 3, false) => F::Sint32x3,
        (gl::INT, 4, false) => F::Sint32x4,
        (gl::UNSIGNED_INT, 1, false) => F::Uint32,
        (gl::UNSIGNED_INT, 2, false) => F::Uint32x2,
        (gl::UNSIGNED_INT, 3, false) => F::Uint32x3,
        (gl::UNSIGNED_INT, 4, false) => F::Uint32x4,

        _ => return None,
    };
    Some(format)
}

/// Parses and validates a packed attribute description.
pub fn parse_layout(stride: i32, attribute_count: i32, packed: &[u8]) -> Result<VertexLayoutDesc> {
    if stride <= 0 {
        return Err(Error::invalid(format!("vertex stride must be positive, got {stride}")));
    }
    if attribute_count <= 0 {
        return Err(Error::invalid(format!(
            "attribute count must be positive, got {attribute_count}"
        )));
    }
    let expected = attribute_count as usize * PACKED_ATTRIBUTE_BYTES;
    if packed.len() != expected {
        return Err(Error::invalid(format!(
            "packed attributes are {} bytes, expected {expected} for {attribute_count} attribute(s)",
            packed.len()
        )));
    }

    let stride = stride as u64;
    let mut elements: Vec<VertexElement> = Vec::with_capacity(attribute_count as usize);

    for (i, chunk) in packed.chunks_exact(PACKED_ATTRIBUTE_BYTES).enumerate() {
        let raw = bytemuck::pod_read_unaligned::<PackedAttribute>(chunk).to_native();

        let usage = VertexUsage::from_tag(raw.usage)?;
        if !(0..MAX_ATTRIBUTES as i32).contains(&raw.index) {
            return Err(Error::invalid(format!("attribute {i}: index {} out of range", raw.index)));
        }
        let shader_location = raw.index as u32;
        if elements.iter().any(|e| e.shader_location == shader_location) {
            return Err(Error::invalid(format!("attribute {i}: duplicate index {shader_location}")));
        }
        if raw.component_type < 0 || raw.component_count < 0 {
            return Err(Error::invalid(format!("attribute {i}: negative type or count")));
        }
        let format = vertex_format(
            raw.component_type as u32,
            raw.component_count as u32,
            raw.normalized != 0,
        )
        .ok_or_else(|| {
            Error::invalid(format!(
                "attribute {i}: no vertex format for type {:#x} x{} (normalized={})",
                raw.component_type,
                raw.component_count,
                raw.normalized != 0
            ))
        })?;
        if raw.offset < 0 {
            return Err(Error::invalid(format!("attribute {i}: negative offset")));
        }
        let offset = raw.offset as u64;
        if offset + format.size() > stride {
            return Err(Error::invalid(format!(
                "attribute {i}: {format:?} at offset {offset} overruns stride {stride}"
            )));
        }

        elements.push(VertexElement {
            shader_location,
            usage,
            format,
            offset,
            uv_index: raw.uv_index.max(0) as u32,
        });
    }

    Ok(VertexLayoutDesc { stride, elements })
}

pub struct VertexDescriptorRecord<L> {
    pub desc: VertexLayoutDesc,
    pub layout: L,
}

pub struct VertexLayoutRegistry<B: Backend> {
    records: FxHashMap<VertexLayoutHandle, VertexDescriptorRecord<B::VertexLayout>>,
    next_id: u64,
}

impl<B: Backend> Default for VertexLayoutRegistry<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> VertexLayoutRegistry<B> {
    pub fn new() -> Self {
        Self {
            records: FxHashMap::default(),
            next_id: 1,
        }
    }

    pub fn register(
        &mut self,
        backend: &mut B,
        stride: i32,
        attribute_count: i32,
        packed: &[u8],
    ) -> Result<VertexLayoutHandle> {
        let desc = parse_layout(stride, attribute_count, packed)?;
        let layout = backend.create_vertex_layout(&desc)?;

        let handle = VertexLayoutHandle::from_raw(self.next_id)
            .ok_or_else(|| Error::invalid("vertex layout ids exhausted"))?;
        self.next_id += 1;
        log::debug!(
            "registered vertex layout {}: stride {}, {} attribute(s)",
            handle.to_raw(),
            desc.stride,
            desc.elements.len()
        );
        self.records.insert(handle, VertexDescriptorRecord { desc, layout });
        Ok(handle)
    }

    pub fn get(&self, handle: VertexLayoutHandle) -> Option<&VertexDescriptorRecord<B::VertexLayout>> {
        self.records.get(&handle)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Packs attribute words the way hosts send them. Handy for hosts written in
/// Rust and for tests.
pub fn pack_attributes(attributes: &[[i32; PACKED_ATTRIBUTE_WORDS]]) -> Vec<u8> {
    attributes
        .iter()
        .flat_map(|words| words.iter().flat_map(|w| w.to_le_bytes()))
        .collect()
}
