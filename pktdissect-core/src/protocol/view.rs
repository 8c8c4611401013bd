//! Views over decoded headers and their fields.
//!
//! A [`HeaderView`] borrows the packet buffer and the compiled schema; it is
//! what accessors, binding predicates and formatters evaluate against.

use std::fmt;

use crate::schema::{FieldRuntime, HeaderSchema, Text};

use super::{DecodedHeader, FieldValue, OptionEntry, ProtocolId};

/// One header of one packet, ready to be read.
#[derive(Clone, Copy)]
pub struct HeaderView<'a> {
    buffer: &'a [u8],
    offset: usize,
    length: usize,
    protocol: ProtocolId,
    kind: Option<u8>,
    schema: &'a HeaderSchema,
    options: &'a [OptionEntry],
}

impl<'a> HeaderView<'a> {
    /// View a decoded header.
    pub fn new(buffer: &'a [u8], header: &'a DecodedHeader, schema: &'a HeaderSchema) -> Self {
        Self {
            buffer,
            offset: header.offset,
            length: header.length,
            protocol: header.protocol,
            kind: None,
            schema,
            options: &header.options,
        }
    }

    pub fn buffer(&self) -> &'a [u8] {
        self.buffer
    }

    /// Byte offset in the packet.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Byte length.
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn protocol(&self) -> ProtocolId {
        self.protocol
    }

    /// Option type octet, for option views.
    pub fn kind(&self) -> Option<u8> {
        self.kind
    }

    pub fn schema(&self) -> &'a HeaderSchema {
        self.schema
    }

    pub fn name(&self) -> &'static str {
        self.schema.name()
    }

    /// This header's bytes, clamped to the captured buffer.
    pub fn bytes(&self) -> &'a [u8] {
        let start = self.offset.min(self.buffer.len());
        let end = self.offset.saturating_add(self.length).min(self.buffer.len());
        &self.buffer[start..end]
    }

    /// Bytes after this header.
    pub fn payload(&self) -> &'a [u8] {
        let start = self.offset.saturating_add(self.length).min(self.buffer.len());
        &self.buffer[start..]
    }

    #[inline]
    pub fn u8_at(&self, offset: usize) -> Option<u8> {
        self.bytes().get(offset).copied()
    }

    #[inline]
    pub fn u16_at(&self, offset: usize) -> Option<u16> {
        let b = self.bytes().get(offset..offset.checked_add(2)?)?;
        Some(u16::from_be_bytes([b[0], b[1]]))
    }

    #[inline]
    pub fn u32_at(&self, offset: usize) -> Option<u32> {
        let b = self.bytes().get(offset..offset.checked_add(4)?)?;
        Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// `len` bits (1..=64) starting `offset` bits into the header, big-endian.
    pub fn bits(&self, offset: i32, len: i32) -> Option<u64> {
        if offset < 0 || !(1..=64).contains(&len) {
            return None;
        }
        let (offset, len) = (offset as usize, len as usize);
        let end = offset + len;
        let bytes = self.bytes();
        if end > bytes.len() * 8 {
            return None;
        }
        let first = offset / 8;
        let last = (end - 1) / 8;
        let mut acc: u128 = 0;
        for byte in &bytes[first..=last] {
            acc = (acc << 8) | *byte as u128;
        }
        let trailing = (last + 1) * 8 - end;
        let mask = if len == 64 { u64::MAX } else { (1u64 << len) - 1 };
        Some((acc >> trailing) as u64 & mask)
    }

    /// Options recorded for this header.
    pub fn options(&self) -> &'a [OptionEntry] {
        self.options
    }

    /// Views over this header's options, in packet order.
    pub fn sub_headers(&self) -> impl Iterator<Item = HeaderView<'a>> + 'a {
        let this = *self;
        self.options
            .iter()
            .filter_map(move |entry| this.sub_header(entry))
    }

    /// First option of type `kind`.
    pub fn option(&self, kind: u8) -> Option<HeaderView<'a>> {
        self.options
            .iter()
            .find(|entry| entry.kind == kind)
            .and_then(|entry| self.sub_header(entry))
    }

    fn sub_header(&self, entry: &OptionEntry) -> Option<HeaderView<'a>> {
        let sub = self.schema.options()?.lookup(entry.kind)?;
        Some(HeaderView {
            buffer: self.buffer,
            offset: entry.offset,
            length: entry.length,
            protocol: self.protocol,
            kind: Some(entry.kind),
            schema: sub.schema(),
            options: &[],
        })
    }

    /// Top-level fields in offset order.
    pub fn fields(&self) -> impl Iterator<Item = FieldView<'a>> + 'a {
        let view = *self;
        self.schema
            .fields()
            .iter()
            .map(move |runtime| FieldView { runtime, view })
    }

    /// Field (or sub-field) by name.
    pub fn field(&self, name: &str) -> Option<FieldView<'a>> {
        self.schema
            .field(name)
            .map(|runtime| FieldView { runtime, view: *self })
    }

    /// Shorthand for `field(name)?.value()`.
    pub fn value(&self, name: &str) -> Option<FieldValue<'a>> {
        self.field(name).map(|field| field.value())
    }
}

impl fmt::Debug for HeaderView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeaderView")
            .field("name", &self.name())
            .field("protocol", &self.protocol)
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("options", &self.options.len())
            .finish()
    }
}

/// A field evaluated against one header.
#[derive(Clone, Copy)]
pub struct FieldView<'a> {
    runtime: &'a FieldRuntime,
    view: HeaderView<'a>,
}

impl<'a> FieldView<'a> {
    pub fn name(&self) -> &'static str {
        self.runtime.name()
    }

    pub fn runtime(&self) -> &'a FieldRuntime {
        self.runtime
    }

    pub fn value(&self) -> FieldValue<'a> {
        self.runtime.value(&self.view)
    }

    pub fn description(&self) -> Option<Text> {
        self.runtime.description(&self.view)
    }

    pub fn display(&self) -> Option<Text> {
        self.runtime.display(&self.view)
    }

    pub fn units(&self) -> Option<Text> {
        self.runtime.units(&self.view)
    }

    pub fn mask(&self) -> u64 {
        self.runtime.mask_value(&self.view)
    }

    /// Offset in bits, relative to the parent field for sub-fields.
    pub fn offset_bits(&self) -> i32 {
        self.runtime.offset_bits(&self.view)
    }

    /// Offset in bits from the start of the header.
    pub fn absolute_offset_bits(&self) -> i32 {
        self.runtime.absolute_offset_bits(&self.view)
    }

    pub fn length_bits(&self) -> i32 {
        self.runtime.length_bits(&self.view)
    }

    pub fn is_present(&self) -> bool {
        self.runtime.is_present(&self.view)
    }

    /// Sub-fields in offset order.
    pub fn children(&self) -> impl Iterator<Item = FieldView<'a>> + 'a {
        let view = self.view;
        self.runtime
            .children()
            .iter()
            .map(move |runtime| FieldView { runtime, view })
    }
}

impl fmt::Debug for FieldView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldView")
            .field("name", &self.name())
            .field("value", &self.value())
            .finish()
    }
}
