//! User-defined structures and their template encoding.
//!
//! A structure's handle is a CRC-16 of its canonical text
//! (`"Name,Type1,Type2[a,b,c],..."`). The handle doubles as the template
//! object instance number, and the template definition bytes let clients
//! rebuild the member layout themselves.

use std::collections::HashSet;

use bytes::BufMut;

use crate::error::{EipError, Result};
use crate::types::{DataType, TYPE_ARRAY_1D, TYPE_STRUCT};

use super::value::{element_count, pack_dims, TagKind};

const CRC16_TABLE: [u16; 256] = crc16_table();

const fn crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ 0xA001 } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// CRC-16/ARC (reflected 0x8005, seed 0).
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |crc, b| {
        (crc >> 8) ^ CRC16_TABLE[((crc ^ *b as u16) & 0xFF) as usize]
    })
}

/// A member as supplied by the host, before layout.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemberDef {
    /// Member name.
    pub name: String,
    /// Elementary type name or the name of an already defined structure.
    pub type_name: String,
    /// Array dimensions; empty for a scalar.
    pub dims: Vec<usize>,
    /// Explicit byte offset; auto-packed when `None`.
    pub offset: Option<usize>,
    /// Bit within a shared host byte, for packed BOOL members.
    pub bit: Option<u8>,
}

impl MemberDef {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            ..Default::default()
        }
    }

    pub fn with_dims(mut self, dims: &[usize]) -> Self {
        self.dims = dims.to_vec();
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_bit(mut self, bit: u8) -> Self {
        self.bit = Some(bit);
        self
    }
}

/// A resolved member type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeRef {
    Atomic(DataType),
    Structure { handle: u16, size: usize },
}

/// A laid-out structure member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub name: String,
    pub kind: TagKind,
    pub dims: [usize; 3],
    /// Byte offset inside the structure.
    pub offset: usize,
    /// Size of one element in bytes.
    pub element_len: usize,
    /// Bit within the host byte at `offset`, for packed BOOL members.
    pub bit: Option<u8>,
}

impl Member {
    /// Number of elements.
    pub fn count(&self) -> usize {
        element_count(&self.dims)
    }

    fn rank(&self) -> usize {
        self.dims.iter().take_while(|d| **d > 0).count()
    }

    /// First word of the template member record.
    fn info_word(&self) -> u16 {
        match self.bit {
            Some(bit) => bit as u16,
            None if self.count() > 1 => self.count() as u16,
            None => 0,
        }
    }

    /// Second word of the template member record.
    fn type_word(&self) -> u16 {
        match self.kind {
            TagKind::Structure(handle) => TYPE_STRUCT | handle,
            TagKind::Atomic(ty) if self.bit.is_none() && self.count() > 1 => {
                ty.code() | TYPE_ARRAY_1D
            }
            TagKind::Atomic(ty) => ty.code(),
        }
    }
}

/// A defined structure ("UDT template").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructureDescriptor {
    name: String,
    handle: u16,
    members: Vec<Member>,
    size: usize,
    canonical: String,
    definition: Vec<u8>,
}

impl StructureDescriptor {
    /// Lay out a structure.
    ///
    /// `resolve` maps a member type name to an elementary type or a known
    /// structure. Any unresolved name fails the whole definition.
    pub fn build<F>(name: &str, defs: &[MemberDef], resolve: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<TypeRef>,
    {
        if defs.is_empty() {
            return Err(EipError::UnsupportedType(format!(
                "structure {name} has no members"
            )));
        }

        let mut seen = HashSet::new();
        let mut members = Vec::with_capacity(defs.len());
        let mut canonical = Vec::with_capacity(defs.len());
        let mut packed = 0usize;
        let mut host_byte: Option<usize> = None;

        for def in defs {
            if !seen.insert(def.name.as_str()) {
                return Err(EipError::DuplicateMember {
                    structure: name.to_string(),
                    member: def.name.clone(),
                });
            }

            let resolved = resolve(&def.type_name)
                .ok_or_else(|| EipError::UndefinedType(def.type_name.clone()))?;
            let (kind, element_len) = match resolved {
                TypeRef::Atomic(ty) => (TagKind::Atomic(ty), ty.element_len()),
                TypeRef::Structure { handle, size } => (TagKind::Structure(handle), size),
            };
            let dims = pack_dims(&def.dims)?;

            let offset = match (def.offset, def.bit) {
                (Some(offset), _) => offset,
                (None, Some(bit)) => match host_byte {
                    Some(host) if bit > 0 => host,
                    _ => {
                        let host = packed;
                        host_byte = Some(host);
                        packed += 1;
                        host
                    }
                },
                (None, None) => {
                    host_byte = None;
                    let offset = packed;
                    packed += element_len * element_count(&dims);
                    offset
                }
            };

            let member = Member {
                name: def.name.clone(),
                kind,
                dims,
                offset,
                element_len,
                bit: def.bit,
            };

            let mut text = def.type_name.clone();
            if member.rank() == 3 {
                text.push_str(&format!("[{}]", member.count()));
            }
            canonical.push(text);
            members.push(member);
        }

        let size = members
            .iter()
            .map(|m| match m.bit {
                Some(_) => m.offset + 1,
                None => m.offset + m.element_len * m.count(),
            })
            .max()
            .unwrap_or(0)
            .max(packed);

        let canonical = format!("{},{}", name, canonical.join(","));
        let handle = crc16(canonical.as_bytes());

        let mut descriptor = Self {
            name: name.to_string(),
            handle,
            members,
            size,
            canonical,
            definition: Vec::new(),
        };
        descriptor.definition = descriptor.encode_definition();
        Ok(descriptor)
    }

    /// Canonical text the handle is computed over.
    pub fn canonical_encoding(&self) -> &str {
        &self.canonical
    }

    fn encode_definition(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for member in &self.members {
            buf.put_u16_le(member.info_word());
            buf.put_u16_le(member.type_word());
            buf.put_u32_le(member.offset as u32);
        }
        buf.put_slice(self.name.as_bytes());
        buf.put_slice(b";n\0");
        for member in &self.members {
            buf.put_slice(member.name.as_bytes());
            buf.put_u8(0);
        }
        let pad = (4 - buf.len() % 4) % 4;
        buf.put_bytes(0, pad);
        buf
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Structure handle, also the template instance number.
    pub fn handle(&self) -> u16 {
        self.handle
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Look a member up by name.
    pub fn member(&self, name: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.name == name)
    }

    /// Total structure size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Template definition bytes returned by Read Template.
    pub fn definition(&self) -> &[u8] {
        &self.definition
    }

    /// Template object attributes 1-5, in attribute order.
    pub fn attributes(&self) -> Vec<(u16, Vec<u8>)> {
        vec![
            (1, self.handle.to_le_bytes().to_vec()),
            (2, (self.members.len() as u16).to_le_bytes().to_vec()),
            (3, (self.size as u16).to_le_bytes().to_vec()),
            (
                4,
                ((self.definition.len() as u32 + 20) / 4).to_le_bytes().to_vec(),
            ),
            (5, (self.size as u32).to_le_bytes().to_vec()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atomic(name: &str) -> Option<TypeRef> {
        DataType::from_name(name).map(TypeRef::Atomic)
    }

    #[test]
    fn test_crc16_check_value() {
        assert_eq!(crc16(b"123456789"), 0xBB3D);
        assert_eq!(crc16(b""), 0);
    }

    #[test]
    fn test_auto_packed_offsets() {
        let defs = vec![
            MemberDef::new("a", "DINT"),
            MemberDef::new("b", "INT").with_dims(&[3]),
            MemberDef::new("c", "REAL"),
        ];
        let st = StructureDescriptor::build("MIXED", &defs, atomic).unwrap();
        let offsets: Vec<usize> = st.members().iter().map(|m| m.offset).collect();
        assert_eq!(offsets, vec![0, 4, 10]);
        assert_eq!(st.size(), 14);
    }

    #[test]
    fn test_handle_is_crc_of_canonical_text() {
        let defs = vec![MemberDef::new("x", "DINT"), MemberDef::new("y", "DINT")];
        let st = StructureDescriptor::build("POSITION", &defs, atomic).unwrap();
        assert_eq!(st.handle(), crc16(b"POSITION,DINT,DINT"));
        assert_eq!(st.canonical_encoding(), "POSITION,DINT,DINT");
    }

    #[test]
    fn test_only_3d_members_carry_dims_in_checksum() {
        let defs = vec![
            MemberDef::new("a", "SINT").with_dims(&[3]),
            MemberDef::new("b", "SINT").with_dims(&[3, 3]),
            MemberDef::new("c", "SINT").with_dims(&[3, 3, 3]),
        ];
        let st = StructureDescriptor::build("MULTI", &defs, atomic).unwrap();
        assert_eq!(st.canonical_encoding(), "MULTI,SINT,SINT,SINT[27]");
        assert_eq!(st.handle(), 0xE91C);

        let other = vec![
            MemberDef::new("a", "SINT").with_dims(&[5]),
            MemberDef::new("b", "SINT").with_dims(&[4, 4]),
            MemberDef::new("c", "SINT").with_dims(&[3, 3, 3]),
        ];
        let collides = StructureDescriptor::build("MULTI", &other, atomic).unwrap();
        assert_eq!(st.handle(), collides.handle());

        // same element total, different shape
        let reshaped = vec![
            MemberDef::new("a", "SINT").with_dims(&[3]),
            MemberDef::new("b", "SINT").with_dims(&[3, 3]),
            MemberDef::new("c", "SINT").with_dims(&[1, 3, 9]),
        ];
        let reshaped = StructureDescriptor::build("MULTI", &reshaped, atomic).unwrap();
        assert_eq!(st.handle(), reshaped.handle());
    }

    #[test]
    fn test_definition_bytes() {
        let defs = vec![
            MemberDef::new("x", "DINT"),
            MemberDef::new("v", "INT").with_dims(&[2]),
        ];
        let st = StructureDescriptor::build("P", &defs, atomic).unwrap();
        let def = st.definition();

        assert_eq!(&def[0..8], &[0, 0, 0xC4, 0x00, 0, 0, 0, 0]);
        assert_eq!(&def[8..16], &[2, 0, 0xC3, 0x20, 4, 0, 0, 0]);
        assert_eq!(&def[16..], b"P;n\0x\0v\0");
        assert_eq!(def.len() % 4, 0);
    }

    #[test]
    fn test_definition_padding() {
        let defs = vec![MemberDef::new("abc", "SINT")];
        let st = StructureDescriptor::build("S", &defs, atomic).unwrap();
        // 8 member bytes + "S;n\0" + "abc\0"
        assert_eq!(st.definition().len(), 16);

        let defs = vec![MemberDef::new("ab", "SINT")];
        let st = StructureDescriptor::build("S", &defs, atomic).unwrap();
        assert_eq!(st.definition().len(), 16);
        assert_eq!(&st.definition()[12..], &[b'a', b'b', 0, 0]);
    }

    #[test]
    fn test_template_attributes() {
        let defs = vec![MemberDef::new("x", "DINT"), MemberDef::new("y", "DINT")];
        let st = StructureDescriptor::build("POSITION", &defs, atomic).unwrap();
        let attrs = st.attributes();

        assert_eq!(attrs[0], (1, st.handle().to_le_bytes().to_vec()));
        assert_eq!(attrs[1], (2, vec![2, 0]));
        assert_eq!(attrs[2], (3, vec![8, 0]));
        let words = (st.definition().len() as u32 + 20) / 4;
        assert_eq!(attrs[3], (4, words.to_le_bytes().to_vec()));
        assert_eq!(attrs[4], (5, vec![8, 0, 0, 0]));
    }

    #[test]
    fn test_nested_structure_member() {
        let inner = StructureDescriptor::build(
            "POSITION",
            &[MemberDef::new("x", "DINT"), MemberDef::new("y", "DINT")],
            atomic,
        )
        .unwrap();
        let handle = inner.handle();

        let resolve = |name: &str| {
            if name == "POSITION" {
                Some(TypeRef::Structure { handle, size: 8 })
            } else {
                atomic(name)
            }
        };
        let outer = StructureDescriptor::build(
            "HMM",
            &[
                MemberDef::new("sprites", "POSITION").with_dims(&[8]),
                MemberDef::new("money", "LINT"),
            ],
            resolve,
        )
        .unwrap();

        assert_eq!(outer.member("money").unwrap().offset, 64);
        assert_eq!(outer.size(), 72);
        let type_word = u16::from_le_bytes([outer.definition()[2], outer.definition()[3]]);
        assert_eq!(type_word, TYPE_STRUCT | handle);
    }

    #[test]
    fn test_packed_bools_share_host_byte() {
        let defs = vec![
            MemberDef::new("In", "BOOL").with_bit(0),
            MemberDef::new("Out", "BOOL").with_bit(1),
            MemberDef::new("n", "INT"),
        ];
        let st = StructureDescriptor::build("BOOLS", &defs, atomic).unwrap();
        assert_eq!(st.member("In").unwrap().offset, 0);
        assert_eq!(st.member("Out").unwrap().offset, 0);
        assert_eq!(st.member("n").unwrap().offset, 1);
        assert_eq!(st.size(), 3);
        assert_eq!(&st.definition()[8..12], &[1, 0, 0xC1, 0]);
    }

    #[test]
    fn test_unknown_member_type() {
        let defs = vec![MemberDef::new("a", "DINT"), MemberDef::new("b", "MYSTERY")];
        let result = StructureDescriptor::build("BAD", &defs, atomic);
        assert!(matches!(result, Err(EipError::UndefinedType(t)) if t == "MYSTERY"));
    }

    #[test]
    fn test_duplicate_member() {
        let defs = vec![MemberDef::new("a", "DINT"), MemberDef::new("a", "INT")];
        assert!(matches!(
            StructureDescriptor::build("DUP", &defs, atomic),
            Err(EipError::DuplicateMember { .. })
        ));
    }
}
