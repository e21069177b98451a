//! The shared tag and structure table.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::{EipError, Result};
use crate::path::{self, PathElement};
use crate::types::{CipStatus, DataType, ServiceCode};

use super::builder::{Shape, TagValue};
use super::datatype_text::{is_datatype_block, parse_datatype, parse_type_spec};
use super::observer::TagObserver;
use super::udt::{MemberDef, StructureDescriptor, TypeRef};
use super::value::{Tag, TagKind};

const PROGRAM_PREFIX: &str = "Program:";

/// Data returned by a tag read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagData {
    /// Name of the tag the path resolved to.
    pub name: String,
    /// Kind of the addressed value.
    pub kind: TagKind,
    /// Size of one element of the addressed value.
    pub element_len: usize,
    /// Raw bytes, `count × element_len` long (one byte for bit reads).
    pub data: Vec<u8>,
}

/// One entry of the symbol class, as returned by tag browsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolInfo {
    /// Symbol instance number (1-based, insertion order).
    pub instance: u32,
    pub name: String,
    /// Type word including array and structure flags.
    pub symbol_type: u16,
    pub element_len: usize,
    pub dims: [usize; 3],
}

/// Resolved location of a path inside a tag.
#[derive(Debug)]
struct Location {
    name: String,
    kind: TagKind,
    element_len: usize,
    offset: usize,
    bit: Option<u8>,
}

#[derive(Default)]
struct StoreInner {
    tags: HashMap<String, Tag>,
    symbols: Vec<String>,
    structures: HashMap<String, Arc<StructureDescriptor>>,
    handles: HashMap<u16, Arc<StructureDescriptor>>,
}

impl StoreInner {
    fn insert_tag(&mut self, tag: Tag) {
        let name = tag.name().to_string();
        if self.tags.insert(name.clone(), tag).is_none() {
            self.symbols.push(name);
        }
    }

    fn element_len(&self, kind: TagKind) -> Result<usize> {
        match kind {
            TagKind::Atomic(ty) => Ok(ty.element_len()),
            TagKind::Structure(handle) => self
                .handles
                .get(&handle)
                .map(|st| st.size())
                .ok_or_else(|| EipError::UndefinedType(format!("structure 0x{handle:04X}"))),
        }
    }

    fn resolve_type(&self, name: &str) -> Option<TypeRef> {
        DataType::from_name(name).map(TypeRef::Atomic).or_else(|| {
            self.structures.get(name).map(|st| TypeRef::Structure {
                handle: st.handle(),
                size: st.size(),
            })
        })
    }

    fn locate(&self, path: &[PathElement]) -> Result<Location> {
        let (name, start) = match path {
            [PathElement::Symbol(program), PathElement::Symbol(tag), ..]
                if program.starts_with(PROGRAM_PREFIX) =>
            {
                (format!("{program}.{tag}"), 2)
            }
            [PathElement::Symbol(tag), ..] => (tag.clone(), 1),
            _ => return Err(EipError::path_syntax("path must start with a symbol")),
        };

        let tag = self
            .tags
            .get(&name)
            .ok_or_else(|| EipError::UnknownTag(name.clone()))?;

        let mut loc = Location {
            kind: tag.kind(),
            element_len: tag.element_len(),
            offset: 0,
            bit: None,
            name,
        };
        let mut dims = tag.dims();
        let mut dim = 0usize;

        for element in &path[start..] {
            if loc.bit.is_some() {
                return Err(EipError::path_syntax(format!(
                    "{}: nothing may follow a bit",
                    loc.name
                )));
            }
            match element {
                PathElement::Element(index) => {
                    let index = *index as usize;
                    let available = if dim < 3 { dims[dim] } else { 0 };
                    if index >= available {
                        return Err(EipError::CountMismatch {
                            tag: loc.name.clone(),
                            requested: index + 1,
                            available,
                        });
                    }
                    let stride: usize = dims[dim + 1..]
                        .iter()
                        .filter(|d| **d > 0)
                        .product::<usize>();
                    loc.offset += index * stride * loc.element_len;
                    dim += 1;
                }
                PathElement::Symbol(member) => {
                    let TagKind::Structure(handle) = loc.kind else {
                        return Err(EipError::path_syntax(format!(
                            "{} is not a structure",
                            loc.name
                        )));
                    };
                    let structure = self
                        .handles
                        .get(&handle)
                        .ok_or_else(|| EipError::UndefinedType(format!("0x{handle:04X}")))?;
                    let m = structure
                        .member(member)
                        .ok_or_else(|| EipError::UnknownTag(format!("{}.{member}", loc.name)))?;
                    loc.offset += m.offset;
                    loc.kind = m.kind;
                    loc.element_len = m.element_len;
                    loc.bit = m.bit;
                    if m.bit.is_some() {
                        loc.element_len = 1;
                    }
                    dims = m.dims;
                    dim = 0;
                }
                PathElement::Bit(bit) => {
                    if !matches!(loc.kind, TagKind::Atomic(_))
                        || *bit as usize >= loc.element_len * 8
                    {
                        return Err(EipError::path_syntax(format!(
                            "{}: bit {bit} out of range",
                            loc.name
                        )));
                    }
                    loc.offset += *bit as usize / 8;
                    loc.bit = Some(bit % 8);
                    loc.kind = TagKind::Atomic(DataType::Bool);
                    loc.element_len = 1;
                }
            }
        }

        Ok(loc)
    }

    /// A zero-filled tag shaped by a write request.
    fn shaped(&self, name: &str, kind: TagKind, count: usize) -> Result<Tag> {
        let array = [count];
        let dims: &[usize] = if count > 1 { &array } else { &[] };
        match kind {
            TagKind::Atomic(ty) => Tag::new(name, ty, dims),
            TagKind::Structure(handle) => {
                let st = self
                    .handles
                    .get(&handle)
                    .ok_or_else(|| EipError::UndefinedType(format!("0x{handle:04X}")))?;
                Tag::structure(name, st, dims)
            }
        }
    }

    fn create(&mut self, name: &str, kind: TagKind, count: usize) -> Result<&mut Tag> {
        let tag = self.shaped(name, kind, count)?;
        debug!(tag = name, ?kind, count, "Creating tag on write");
        self.insert_tag(tag);
        self.tags
            .get_mut(name)
            .ok_or_else(|| EipError::UnknownTag(name.to_string()))
    }

    /// Swap a tag for one of the written type and count. The symbol
    /// instance is kept because `symbols` is left alone.
    fn retype(&mut self, name: &str, kind: TagKind, count: usize, data: &[u8]) -> Result<()> {
        let tag = self.shaped(name, kind, count)?.with_data(data.to_vec())?;
        debug!(tag = name, ?kind, count, "Retyping tag on write");
        self.tags.insert(name.to_string(), tag);
        Ok(())
    }

    fn symbol_info(&self, instance: u32, name: &str) -> Option<SymbolInfo> {
        let tag = self.tags.get(name)?;
        Some(SymbolInfo {
            instance,
            name: name.to_string(),
            symbol_type: tag.symbol_type(),
            element_len: tag.element_len(),
            dims: tag.dims(),
        })
    }
}

/// Shared, lock-protected table of tags and structure definitions.
///
/// Reads take the shared lock, writes and definitions the exclusive one.
/// The observer is always invoked after the lock is released.
#[derive(Default)]
pub struct TagStore {
    inner: RwLock<StoreInner>,
    observer: RwLock<Option<Arc<dyn TagObserver>>>,
}

impl std::fmt::Debug for TagStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("TagStore")
            .field("tags", &inner.tags.len())
            .field("structures", &inner.structures.len())
            .finish()
    }
}

impl TagStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the observer notified on reads, writes and resets.
    pub fn set_observer(&self, observer: Arc<dyn TagObserver>) {
        *self.observer.write() = Some(observer);
    }

    /// Notify the observer, if any.
    pub fn notify(&self, service: ServiceCode, status: CipStatus, tag: Option<&Tag>) {
        let observer = self.observer.read().clone();
        if let Some(observer) = observer {
            observer.notify(service, status, tag);
        }
    }

    /// Register a tag, replacing any tag of the same name.
    pub fn add_tag(&self, tag: Tag) {
        debug!(tag = tag.name(), kind = ?tag.kind(), count = tag.count(), "Adding tag");
        self.inner.write().insert_tag(tag);
    }

    /// Build a tag from a native value, defining its structure if needed.
    pub fn add_value(&self, name: &str, value: TagValue) -> Result<()> {
        let mut data = Vec::new();
        value.encode(&mut data);

        let tag = match value.shape()? {
            Shape::Atomic { data_type, dims } => Tag::new(name, data_type, &dims)?.with_data(data)?,
            Shape::Text(text) => Tag::string(name, &text)?,
            Shape::Structure {
                name: type_name,
                members,
                dims,
            } => {
                let handle = self.define_structure(&type_name, &members)?;
                let st = self
                    .structure_by_handle(handle)
                    .ok_or_else(|| EipError::UndefinedType(type_name.clone()))?;
                Tag::structure(name, &st, &dims)?.with_data(data)?
            }
        };
        self.add_tag(tag);
        Ok(())
    }

    /// Create a zero-filled tag from a type description.
    ///
    /// `type_text` is an elementary type (`"DINT"`), a type with dimensions
    /// (`"INT[4,4]"`), the name of a defined structure, or a full
    /// `DATATYPE` block which is defined first.
    pub fn create_tag(&self, type_text: &str, name: &str) -> Result<()> {
        let tag = if is_datatype_block(type_text) {
            let handle = self.define_structure_from_text(type_text)?;
            let st = self
                .structure_by_handle(handle)
                .ok_or_else(|| EipError::UndefinedType(type_text.to_string()))?;
            Tag::structure(name, &st, &[])?
        } else {
            let (type_name, dims) = parse_type_spec(type_text)?;
            match self.structure(&type_name) {
                Some(st) => Tag::structure(name, &st, &dims)?,
                None => {
                    let ty = DataType::from_name(&type_name)
                        .ok_or(EipError::UndefinedType(type_name))?;
                    Tag::new(name, ty, &dims)?
                }
            }
        };
        self.add_tag(tag);
        Ok(())
    }

    /// Define a structure and return its handle.
    ///
    /// A name that is already defined returns the cached handle unchanged.
    pub fn define_structure(&self, name: &str, members: &[MemberDef]) -> Result<u16> {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.structures.get(name) {
            return Ok(existing.handle());
        }

        let st = StructureDescriptor::build(name, members, |t| inner.resolve_type(t))?;
        let handle = st.handle();
        let st = Arc::new(st);

        if inner.handles.contains_key(&handle) {
            warn!(structure = name, handle, "Structure handle collision, keeping the first");
        } else {
            inner.handles.insert(handle, Arc::clone(&st));
        }
        inner.structures.insert(name.to_string(), st);

        debug!(structure = name, handle, "Structure defined");
        Ok(handle)
    }

    /// Define a structure from a `DATATYPE ... END_DATATYPE` block.
    pub fn define_structure_from_text(&self, text: &str) -> Result<u16> {
        let (name, members) = parse_datatype(text)?;
        self.define_structure(&name, &members)
    }

    pub fn structure(&self, name: &str) -> Option<Arc<StructureDescriptor>> {
        self.inner.read().structures.get(name).cloned()
    }

    pub fn structure_by_handle(&self, handle: u16) -> Option<Arc<StructureDescriptor>> {
        self.inner.read().handles.get(&handle).cloned()
    }

    /// Handles of all defined structures, ascending.
    pub fn structure_handles(&self) -> Vec<u16> {
        let mut handles: Vec<u16> = self.inner.read().handles.keys().copied().collect();
        handles.sort_unstable();
        handles
    }

    /// Copy of a tag by exact name.
    pub fn tag(&self, name: &str) -> Option<Tag> {
        self.inner.read().tags.get(name).cloned()
    }

    /// Number of symbol instances.
    pub fn symbol_count(&self) -> usize {
        self.inner.read().symbols.len()
    }

    /// Symbol by instance number.
    pub fn symbol(&self, instance: u32) -> Option<SymbolInfo> {
        let inner = self.inner.read();
        let name = inner.symbols.get((instance as usize).checked_sub(1)?)?;
        inner.symbol_info(instance, name)
    }

    /// Symbols with instance numbers `>= first`, in instance order.
    pub fn symbols_from(&self, first: u32) -> Vec<SymbolInfo> {
        let inner = self.inner.read();
        inner
            .symbols
            .iter()
            .enumerate()
            .map(|(i, name)| (i as u32 + 1, name))
            .filter(|(instance, _)| *instance >= first.max(1))
            .filter_map(|(instance, name)| inner.symbol_info(instance, name))
            .collect()
    }

    /// Read `count` elements from a tag path given as text.
    pub fn read_tag(&self, text: &str, count: usize) -> Result<TagData> {
        self.read(&path::parse(text)?, count)
    }

    /// Read `count` elements at a parsed path.
    pub fn read(&self, path: &[PathElement], count: usize) -> Result<TagData> {
        self.read_for(ServiceCode::READ_TAG, path, count)
    }

    pub(crate) fn read_for(
        &self,
        service: ServiceCode,
        path: &[PathElement],
        count: usize,
    ) -> Result<TagData> {
        let result = {
            let inner = self.inner.read();
            Self::read_locked(&inner, path, count)
        };
        self.report(service, &result, |d| {
            Tag::snapshot(&d.name, d.kind, d.element_len, d.data.clone())
        });
        result
    }

    fn read_locked(inner: &StoreInner, path: &[PathElement], count: usize) -> Result<TagData> {
        let loc = inner.locate(path)?;
        let tag = inner
            .tags
            .get(&loc.name)
            .ok_or_else(|| EipError::UnknownTag(loc.name.clone()))?;
        let bytes = tag.data();

        let data = match loc.bit {
            Some(bit) => {
                let host = bytes.get(loc.offset).copied().unwrap_or(0);
                vec![if host >> bit & 1 != 0 { 0xFF } else { 0x00 }]
            }
            None => {
                let len = count * loc.element_len;
                let end = loc.offset + len;
                if end > bytes.len() {
                    return Err(EipError::CountMismatch {
                        tag: loc.name,
                        requested: count,
                        available: bytes.len().saturating_sub(loc.offset) / loc.element_len.max(1),
                    });
                }
                bytes[loc.offset..end].to_vec()
            }
        };

        Ok(TagData {
            name: loc.name,
            kind: loc.kind,
            element_len: loc.element_len,
            data,
        })
    }

    /// Write a tag path given as text.
    pub fn write_tag(&self, text: &str, kind: TagKind, count: usize, data: &[u8]) -> Result<()> {
        self.write(&path::parse(text)?, kind, count, data)
    }

    /// Write `count` elements of `kind` at a parsed path.
    ///
    /// `data` must be exactly `element_len(kind) × count` bytes. A bare tag
    /// name that does not exist yet is created; one whose kind or count
    /// differs is replaced. Element, member and bit paths write in place.
    pub fn write(&self, path: &[PathElement], kind: TagKind, count: usize, data: &[u8]) -> Result<()> {
        self.write_for(ServiceCode::WRITE_TAG, path, kind, count, 0, data, true)
    }

    /// Write part of a `count`-element value starting at `byte_offset`.
    pub fn write_fragment(
        &self,
        path: &[PathElement],
        kind: TagKind,
        count: usize,
        byte_offset: usize,
        data: &[u8],
    ) -> Result<()> {
        self.write_for(
            ServiceCode::WRITE_TAG_FRAGMENTED,
            path,
            kind,
            count,
            byte_offset,
            data,
            false,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn write_for(
        &self,
        service: ServiceCode,
        path: &[PathElement],
        kind: TagKind,
        count: usize,
        byte_offset: usize,
        data: &[u8],
        exact: bool,
    ) -> Result<()> {
        let result = {
            let mut inner = self.inner.write();
            Self::write_locked(&mut inner, path, kind, count, byte_offset, data, exact)
        };
        self.report(service, &result, |t| t.clone());
        result.map(|_| ())
    }

    #[allow(clippy::too_many_arguments)]
    fn write_locked(
        inner: &mut StoreInner,
        path: &[PathElement],
        kind: TagKind,
        count: usize,
        byte_offset: usize,
        data: &[u8],
        exact: bool,
    ) -> Result<Tag> {
        let total = inner.element_len(kind)? * count;
        let fits = if exact {
            data.len() == total
        } else {
            byte_offset + data.len() <= total
        };
        if !fits {
            return Err(EipError::LengthMismatch {
                expected: total,
                actual: byte_offset + data.len(),
            });
        }

        if exact {
            if let [PathElement::Symbol(name)] = path {
                let reshape = inner
                    .tags
                    .get(name)
                    .is_some_and(|tag| {
                        // a string's element is its whole buffer, so its count never matches
                        tag.kind() != kind
                            || (tag.count() != count && kind != TagKind::Atomic(DataType::String))
                    });
                if reshape {
                    inner.retype(name, kind, count, data)?;
                    let element_len = inner.element_len(kind)?;
                    return Ok(Tag::snapshot(name, kind, element_len, data.to_vec()));
                }
            }
        }

        let loc = match inner.locate(path) {
            Ok(loc) => loc,
            Err(EipError::UnknownTag(_)) if matches!(path, [PathElement::Symbol(_)]) => {
                let PathElement::Symbol(name) = &path[0] else {
                    return Err(EipError::path_syntax("path must start with a symbol"));
                };
                let tag = inner.create(name, kind, count)?;
                Location {
                    name: name.clone(),
                    kind: tag.kind(),
                    element_len: tag.element_len(),
                    offset: 0,
                    bit: None,
                }
            }
            Err(e) => return Err(e),
        };

        let tag = inner
            .tags
            .get_mut(&loc.name)
            .ok_or_else(|| EipError::UnknownTag(loc.name.clone()))?;
        let capacity = tag.data().len();

        match loc.bit {
            Some(bit) => {
                let set = data.first().is_some_and(|b| *b != 0);
                let host = tag
                    .data_mut()
                    .get_mut(loc.offset)
                    .ok_or_else(|| EipError::path_syntax("bit outside tag"))?;
                if set {
                    *host |= 1 << bit;
                } else {
                    *host &= !(1 << bit);
                }
            }
            None => {
                let start = loc.offset + byte_offset;
                let end = start + data.len();
                if end > capacity {
                    return Err(EipError::CountMismatch {
                        tag: loc.name,
                        requested: count,
                        available: capacity.saturating_sub(loc.offset) / loc.element_len.max(1),
                    });
                }
                tag.data_mut()[start..end].copy_from_slice(data);
            }
        }

        Ok(Tag::snapshot(&loc.name, kind, loc.element_len, data.to_vec()))
    }

    /// Apply `value = (value | or_mask) & and_mask` bytewise at a path.
    pub fn read_modify_write(
        &self,
        path: &[PathElement],
        or_mask: &[u8],
        and_mask: &[u8],
    ) -> Result<()> {
        let result = {
            let mut inner = self.inner.write();
            Self::modify_locked(&mut inner, path, or_mask, and_mask)
        };
        self.report(ServiceCode::READ_MODIFY_WRITE, &result, |t| t.clone());
        result.map(|_| ())
    }

    fn modify_locked(
        inner: &mut StoreInner,
        path: &[PathElement],
        or_mask: &[u8],
        and_mask: &[u8],
    ) -> Result<Tag> {
        if or_mask.len() != and_mask.len() {
            return Err(EipError::LengthMismatch {
                expected: or_mask.len(),
                actual: and_mask.len(),
            });
        }
        let loc = inner.locate(path)?;
        if loc.bit.is_some() {
            return Err(EipError::UnsupportedType(format!("{}: bit member", loc.name)));
        }
        let tag = inner
            .tags
            .get_mut(&loc.name)
            .ok_or_else(|| EipError::UnknownTag(loc.name.clone()))?;

        let end = loc.offset + or_mask.len();
        let region = tag.data_mut().get_mut(loc.offset..end).ok_or_else(|| {
            EipError::LengthMismatch {
                expected: loc.element_len,
                actual: or_mask.len(),
            }
        })?;
        for ((byte, or), and) in region.iter_mut().zip(or_mask).zip(and_mask) {
            *byte = (*byte | or) & and;
        }
        let snapshot = region.to_vec();
        Ok(Tag::snapshot(&loc.name, loc.kind, loc.element_len, snapshot))
    }

    /// Overwrite part of a tag's buffer starting at element `element_offset`.
    pub fn update_tag(&self, name: &str, element_offset: usize, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.write();
        let tag = inner
            .tags
            .get_mut(name)
            .ok_or_else(|| EipError::UnknownTag(name.to_string()))?;

        let start = element_offset * tag.element_len();
        let end = start + data.len();
        let available = tag.data().len();
        if end > available {
            return Err(EipError::LengthMismatch {
                expected: available.saturating_sub(start),
                actual: data.len(),
            });
        }
        tag.data_mut()[start..end].copy_from_slice(data);
        Ok(())
    }

    fn report<T, F>(&self, service: ServiceCode, result: &Result<T>, snapshot: F)
    where
        F: FnOnce(&T) -> Tag,
    {
        match result {
            Ok(value) => {
                let tag = snapshot(value);
                self.notify(service, CipStatus::Success, Some(&tag));
            }
            Err(e) => {
                debug!(service = %service, error = %e, "Tag access rejected");
                self.notify(service, CipStatus::PathSegmentError, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn store_with_counts() -> TagStore {
        let store = TagStore::new();
        store
            .add_value("counts", TagValue::from(vec![10i16, 20, 30, 40]))
            .unwrap();
        store
    }

    fn position_store() -> TagStore {
        let store = TagStore::new();
        store
            .define_structure_from_text("DATATYPE POSITION\n DINT x;\n DINT y;\nEND_DATATYPE")
            .unwrap();
        store.create_tag("POSITION[3]", "points").unwrap();
        store
    }

    #[test]
    fn test_read_within_declared_count() {
        let store = store_with_counts();
        let read = store.read_tag("counts", 2).unwrap();
        assert_eq!(read.kind, TagKind::Atomic(DataType::Int));
        assert_eq!(read.data, vec![10, 0, 20, 0]);

        assert!(store.read_tag("counts", 4).is_ok());
        assert!(matches!(
            store.read_tag("counts", 5),
            Err(EipError::CountMismatch { requested: 5, available: 4, .. })
        ));
    }

    #[test]
    fn test_read_unknown_tag() {
        let store = TagStore::new();
        assert!(matches!(store.read_tag("missing", 1), Err(EipError::UnknownTag(_))));
    }

    #[test]
    fn test_read_element_index() {
        let store = store_with_counts();
        assert_eq!(store.read_tag("counts[2]", 1).unwrap().data, vec![30, 0]);
        assert_eq!(store.read_tag("counts[2]", 2).unwrap().data, vec![30, 0, 40, 0]);
        assert!(store.read_tag("counts[2]", 3).is_err());
        assert!(store.read_tag("counts[4]", 1).is_err());
    }

    #[test]
    fn test_multi_dimensional_index() {
        let store = TagStore::new();
        store.create_tag("SINT[2,3]", "grid").unwrap();
        store.update_tag("grid", 0, &[0, 1, 2, 10, 11, 12]).unwrap();
        assert_eq!(store.read_tag("grid[1,2]", 1).unwrap().data, vec![12]);
        assert_eq!(store.read_tag("grid[0,1]", 1).unwrap().data, vec![1]);
        assert!(store.read_tag("grid[0,3]", 1).is_err());
    }

    #[test]
    fn test_write_then_read_returns_same_bytes() {
        let store = TagStore::new();
        let kind = TagKind::Atomic(DataType::Real);
        let bytes: Vec<u8> = [1.5f32, -2.0].iter().flat_map(|v| v.to_le_bytes()).collect();

        store.write_tag("speed", kind, 2, &bytes).unwrap();

        let read = store.read_tag("speed", 2).unwrap();
        assert_eq!(read.kind, kind);
        assert_eq!(read.data, bytes);
        assert_eq!(store.symbol_count(), 1);
    }

    #[test]
    fn test_write_length_mismatch_rejected() {
        let store = store_with_counts();
        let result = store.write_tag("counts", TagKind::Atomic(DataType::Int), 2, &[1, 2, 3]);
        assert!(matches!(
            result,
            Err(EipError::LengthMismatch { expected: 4, actual: 3 })
        ));
        assert_eq!(store.read_tag("counts", 1).unwrap().data, vec![10, 0]);
    }

    #[test]
    fn test_write_does_not_truncate() {
        let store = store_with_counts();
        let result = store.write_tag("counts[3]", TagKind::Atomic(DataType::Int), 2, &[1, 0, 2, 0]);
        assert!(matches!(result, Err(EipError::CountMismatch { .. })));
        assert_eq!(store.read_tag("counts[3]", 1).unwrap().data, vec![40, 0]);
    }

    #[test]
    fn test_write_replaces_type_and_count() {
        let store = store_with_counts();
        let dint = TagKind::Atomic(DataType::Dint);
        store.write_tag("counts", dint, 1, &[7, 0, 8, 0]).unwrap();

        let read = store.read_tag("counts", 1).unwrap();
        assert_eq!(read.kind, dint);
        assert_eq!(read.data, vec![7, 0, 8, 0]);
        assert!(store.read_tag("counts", 2).is_err());

        let symbol = store.symbol(1).unwrap();
        assert_eq!(symbol.name, "counts");
        assert_eq!(symbol.element_len, 4);
        assert_eq!(store.symbol_count(), 1);
    }

    #[test]
    fn test_scalar_rewritten_as_array() {
        let store = TagStore::new();
        store.add_value("level", TagValue::Dint(-1)).unwrap();
        store.add_value("speed", TagValue::Real(1.0)).unwrap();

        let int = TagKind::Atomic(DataType::Int);
        store.write_tag("level", int, 2, &[1, 0, 2, 0]).unwrap();

        let read = store.read_tag("level", 2).unwrap();
        assert_eq!(read.kind, int);
        assert_eq!(read.data, vec![1, 0, 2, 0]);
        assert_eq!(store.tag("level").unwrap().dims(), [2, 0, 0]);
        assert_eq!(store.symbol(1).unwrap().name, "level");
        assert_eq!(store.symbol(2).unwrap().name, "speed");
    }

    #[test]
    fn test_element_write_keeps_type() {
        let store = store_with_counts();
        store
            .write_tag("counts[1]", TagKind::Atomic(DataType::Int), 1, &[5, 0])
            .unwrap();
        let read = store.read_tag("counts", 4).unwrap();
        assert_eq!(read.kind, TagKind::Atomic(DataType::Int));
        assert_eq!(read.data, vec![10, 0, 5, 0, 30, 0, 40, 0]);
    }

    #[test]
    fn test_text_definition_handle() {
        let store = TagStore::new();
        let handle = store
            .define_structure_from_text(
                "DATATYPE MULTI (FamilyType := NoFamily)\n\tSINT A[3];\n\tSINT B[3,3];\n\tSINT C[3,3,3];\nEND_DATATYPE",
            )
            .unwrap();
        assert_eq!(handle, 0xE91C);
        assert_eq!(store.structure("MULTI").unwrap().size(), 3 + 9 + 27);
    }

    #[test]
    fn test_structure_member_access() {
        let store = position_store();
        let kind = TagKind::Atomic(DataType::Dint);
        store.write_tag("points[1].y", kind, 1, &[5, 0, 0, 0]).unwrap();

        let read = store.read_tag("points[1].y", 1).unwrap();
        assert_eq!(read.kind, kind);
        assert_eq!(read.data, vec![5, 0, 0, 0]);

        let whole = store.read_tag("points", 3).unwrap();
        assert_eq!(whole.data.len(), 24);
        assert_eq!(&whole.data[12..16], &[5, 0, 0, 0]);
        assert!(matches!(whole.kind, TagKind::Structure(_)));

        assert!(matches!(store.read_tag("points[0].z", 1), Err(EipError::UnknownTag(_))));
        assert!(matches!(store.read_tag("points[0].x.y", 1), Err(EipError::PathSyntax(_))));
    }

    #[test]
    fn test_packed_bool_members() {
        let store = TagStore::new();
        store
            .define_structure_from_text("DATATYPE BOOLS\n BOOL In;\n BOOL Out;\nEND_DATATYPE")
            .unwrap();
        store.create_tag("BOOLS", "io").unwrap();

        let kind = TagKind::Atomic(DataType::Bool);
        store.write_tag("io.Out", kind, 1, &[1]).unwrap();

        assert_eq!(store.read_tag("io.Out", 1).unwrap().data, vec![0xFF]);
        assert_eq!(store.read_tag("io.In", 1).unwrap().data, vec![0x00]);
        assert_eq!(store.tag("io").unwrap().data(), &[0b10]);

        store.write_tag("io.Out", kind, 1, &[0]).unwrap();
        assert_eq!(store.tag("io").unwrap().data(), &[0]);
    }

    #[test]
    fn test_bit_read() {
        let store = TagStore::new();
        store.add_value("flags", TagValue::Dint(0x0000_0100)).unwrap();
        assert_eq!(store.read_tag("flags.8", 1).unwrap().data, vec![0xFF]);
        assert_eq!(store.read_tag("flags.7", 1).unwrap().data, vec![0x00]);

        store.add_value("small", TagValue::Sint(1)).unwrap();
        assert!(store.read_tag("small.9", 1).is_err());
    }

    #[test]
    fn test_program_scope() {
        let store = TagStore::new();
        store.add_value("Program:Main.count", TagValue::Int(3)).unwrap();
        assert_eq!(store.read_tag("Program:Main.count", 1).unwrap().data, vec![3, 0]);
    }

    #[test]
    fn test_duplicate_structure_keeps_first() {
        let store = TagStore::new();
        let first = store
            .define_structure("S", &[MemberDef::new("a", "DINT")])
            .unwrap();
        let second = store
            .define_structure("S", &[MemberDef::new("a", "INT"), MemberDef::new("b", "INT")])
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(store.structure("S").unwrap().members().len(), 1);
    }

    #[test]
    fn test_undefined_member_type_inserts_nothing() {
        let store = TagStore::new();
        let result = store.define_structure("BAD", &[MemberDef::new("a", "NOPE")]);
        assert!(matches!(result, Err(EipError::UndefinedType(_))));
        assert!(store.structure("BAD").is_none());
        assert!(store.structure_handles().is_empty());
    }

    #[test]
    fn test_create_tag_from_text() {
        let store = TagStore::new();
        store.create_tag("DINT[4,4]", "matrix").unwrap();
        let tag = store.tag("matrix").unwrap();
        assert_eq!(tag.count(), 16);
        assert_eq!(tag.data().len(), 64);

        store
            .create_tag("DATATYPE PAIR INT a; INT b; END_DATATYPE", "pair")
            .unwrap();
        assert_eq!(store.tag("pair").unwrap().data().len(), 4);

        assert!(matches!(
            store.create_tag("WIDGET", "w"),
            Err(EipError::UndefinedType(_))
        ));
    }

    #[test]
    fn test_add_struct_value() {
        let store = TagStore::new();
        let value = TagValue::Struct {
            name: "POSITION".into(),
            fields: vec![("x".into(), 1i32.into()), ("y".into(), 2i32.into())],
        };
        store.add_value("origin", value).unwrap();
        assert_eq!(store.read_tag("origin.y", 1).unwrap().data, vec![2, 0, 0, 0]);
        assert!(store.structure("POSITION").is_some());
    }

    #[test]
    fn test_read_modify_write() {
        let store = TagStore::new();
        store.add_value("word", TagValue::Uint(0x00F0)).unwrap();
        store
            .read_modify_write(&path::parse("word").unwrap(), &[0x0F, 0x00], &[0xFF, 0x00])
            .unwrap();
        assert_eq!(store.tag("word").unwrap().data(), &[0xFF, 0x00]);
    }

    #[test]
    fn test_update_tag() {
        let store = store_with_counts();
        store.update_tag("counts", 1, &[99, 0]).unwrap();
        assert_eq!(store.read_tag("counts[1]", 1).unwrap().data, vec![99, 0]);
        assert!(store.update_tag("counts", 3, &[1, 0, 2, 0]).is_err());
        assert!(matches!(store.update_tag("nope", 0, &[]), Err(EipError::UnknownTag(_))));
    }

    #[test]
    fn test_symbols_in_insertion_order() {
        let store = TagStore::new();
        store.add_value("b", TagValue::Int(0)).unwrap();
        store.add_value("a", TagValue::from(vec![0i32; 5])).unwrap();

        let symbols = store.symbols_from(1);
        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[0].name, "b");
        assert_eq!(symbols[1].instance, 2);
        assert_eq!(symbols[1].symbol_type, 0x20C4);
        assert_eq!(symbols[1].dims, [5, 0, 0]);
        assert_eq!(store.symbol(2).unwrap().name, "a");
        assert!(store.symbol(0).is_none());
        assert!(store.symbol(3).is_none());
    }

    #[test]
    fn test_observer_notified() {
        let store = store_with_counts();
        let reads = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(AtomicUsize::new(0));
        let (r, f) = (Arc::clone(&reads), Arc::clone(&failures));

        store.set_observer(Arc::new(
            move |service: ServiceCode, status: CipStatus, tag: Option<&Tag>| {
                if status.is_ok() {
                    assert_eq!(service, ServiceCode::READ_TAG);
                    assert_eq!(tag.map(|t| t.name()), Some("counts"));
                    r.fetch_add(1, Ordering::SeqCst);
                } else {
                    assert!(tag.is_none());
                    f.fetch_add(1, Ordering::SeqCst);
                }
            },
        ));

        store.read_tag("counts", 1).unwrap();
        let _ = store.read_tag("counts", 9);
        assert_eq!(reads.load(Ordering::SeqCst), 1);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        let store = Arc::new(TagStore::new());
        let writers = 8;
        let rounds = 200;

        for w in 0..writers {
            store.add_value(&format!("tag{w}"), TagValue::Dint(0)).unwrap();
        }

        let mut handles = Vec::new();
        for w in 0..writers {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                let name = format!("tag{w}");
                for i in 1..=rounds {
                    let value = (w * 1000 + i) as i32;
                    store
                        .write_tag(&name, TagKind::Atomic(DataType::Dint), 1, &value.to_le_bytes())
                        .unwrap();
                }
            }));
        }
        for _ in 0..4 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                for i in 0..rounds {
                    let read = store.read_tag(&format!("tag{}", i % writers), 1).unwrap();
                    assert_eq!(read.data.len(), 4);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        for w in 0..writers {
            let read = store.read_tag(&format!("tag{w}"), 1).unwrap();
            let value = i32::from_le_bytes(read.data.try_into().unwrap());
            assert_eq!(value, (w * 1000 + rounds) as i32);
        }
    }
}
