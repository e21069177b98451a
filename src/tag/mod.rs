//! Tag and structure store.
//!
//! Tags are named, typed, array-capable byte buffers. Structures (UDTs)
//! are defined once and cached by name and by handle.

mod builder;
mod datatype_text;
mod observer;
mod store;
mod udt;
mod value;

pub use builder::TagValue;
pub use datatype_text::{parse_datatype, parse_type_spec};
pub use observer::TagObserver;
pub use store::{SymbolInfo, TagData, TagStore};
pub use udt::{crc16, Member, MemberDef, StructureDescriptor, TypeRef};
pub use value::{Tag, TagKind};
