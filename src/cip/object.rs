//! CIP object instances exposed through the attribute services.
//!
//! Instances are assembled on demand from the server identity and the tag
//! store, so attribute reads always see current symbol and template data.

use std::collections::BTreeMap;

use bytes::BufMut;

use crate::config::IdentityConfig;
use crate::tag::{StructureDescriptor, SymbolInfo, TagStore};
use crate::types::class;

/// Attribute blobs of one object instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectInstance {
    attributes: BTreeMap<u16, Vec<u8>>,
    get_all: Option<Vec<u16>>,
}

impl ObjectInstance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, id: u16, data: Vec<u8>) -> Self {
        self.attributes.insert(id, data);
        self
    }

    /// Restrict Get Attribute All to these attributes, in this order.
    pub fn with_get_all(mut self, ids: &[u16]) -> Self {
        self.get_all = Some(ids.to_vec());
        self
    }

    pub fn attribute(&self, id: u16) -> Option<&[u8]> {
        self.attributes.get(&id).map(Vec::as_slice)
    }

    /// Attribute blobs concatenated in ascending attribute order.
    pub fn attributes_all(&self) -> Vec<u8> {
        match &self.get_all {
            Some(ids) => ids
                .iter()
                .filter_map(|id| self.attributes.get(id))
                .flatten()
                .copied()
                .collect(),
            None => self.attributes.values().flatten().copied().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

fn uint(value: u16) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

fn udint(value: u32) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

/// Class attributes held by instance 0.
fn class_instance(
    revision: u16,
    max_instance: u32,
    instances: usize,
    max_class_attribute: u16,
    max_instance_attribute: u16,
) -> ObjectInstance {
    let max_class_attribute = max_class_attribute.max(7);
    ObjectInstance::new()
        .with_attribute(1, uint(revision))
        .with_attribute(2, uint(max_instance as u16))
        .with_attribute(3, uint(instances as u16))
        .with_attribute(4, uint(0))
        .with_attribute(5, uint(0))
        .with_attribute(6, uint(max_class_attribute))
        .with_attribute(7, uint(max_instance_attribute))
}

/// Identity object instance 1.
pub fn identity_instance(identity: &IdentityConfig) -> ObjectInstance {
    let name = identity.product_name.as_bytes();
    let name = &name[..name.len().min(u8::MAX as usize)];
    let mut product_name = Vec::with_capacity(1 + name.len());
    product_name.put_u8(name.len() as u8);
    product_name.put_slice(name);

    ObjectInstance::new()
        .with_attribute(1, uint(identity.vendor_id))
        .with_attribute(2, uint(identity.device_type))
        .with_attribute(3, uint(identity.product_code))
        .with_attribute(4, vec![identity.revision.0, identity.revision.1])
        .with_attribute(5, uint(identity.status))
        .with_attribute(6, udint(identity.serial_number))
        .with_attribute(7, product_name)
        .with_attribute(8, vec![identity.state])
}

/// Symbol class instance: name, type, element size, dimensions.
pub fn symbol_instance(symbol: &SymbolInfo) -> ObjectInstance {
    let mut name = Vec::with_capacity(2 + symbol.name.len());
    name.put_u16_le(symbol.name.len() as u16);
    name.put_slice(symbol.name.as_bytes());

    let mut dims = Vec::with_capacity(12);
    for d in symbol.dims {
        dims.put_u32_le(d as u32);
    }

    ObjectInstance::new()
        .with_attribute(1, name)
        .with_attribute(2, uint(symbol.symbol_type))
        .with_attribute(7, uint(symbol.element_len as u16))
        .with_attribute(8, dims)
}

/// Template class instance, addressed by structure handle.
pub fn template_instance(st: &StructureDescriptor) -> ObjectInstance {
    st.attributes()
        .into_iter()
        .fold(ObjectInstance::new(), |instance, (id, data)| {
            instance.with_attribute(id, data)
        })
}

/// Resolve `class / instance` against the identity and the tag store.
pub fn lookup(
    store: &TagStore,
    identity: &IdentityConfig,
    class_id: u32,
    instance: u32,
) -> Option<ObjectInstance> {
    match (class_id, instance) {
        (class::IDENTITY, 0) => Some(class_instance(1, 1, 1, 7, 8).with_get_all(&[1, 2, 6, 7])),
        (class::IDENTITY, 1) => Some(identity_instance(identity)),
        (class::MESSAGE_ROUTER | class::CONNECTION_MANAGER, 0) => {
            Some(class_instance(1, 1, 1, 7, 0))
        }
        (class::MESSAGE_ROUTER | class::CONNECTION_MANAGER, 1) => Some(ObjectInstance::new()),
        (class::SYMBOL, 0) => {
            let count = store.symbol_count();
            Some(class_instance(4, count as u32, count, 8, 8).with_attribute(8, udint(0)))
        }
        (class::SYMBOL, n) => store.symbol(n).map(|s| symbol_instance(&s)),
        (class::TEMPLATE, 0) => {
            let handles = store.structure_handles();
            let max = handles.last().copied().unwrap_or(0);
            Some(class_instance(1, max as u32, handles.len(), 7, 5))
        }
        (class::TEMPLATE, n) => u16::try_from(n)
            .ok()
            .and_then(|h| store.structure_by_handle(h))
            .map(|st| template_instance(&st)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::{MemberDef, Tag};
    use crate::types::DataType;

    #[test]
    fn test_identity_attributes() {
        let identity = IdentityConfig::default()
            .with_vendor_id(0x0102)
            .with_revision(3, 4)
            .with_product_name("PLC");
        let instance = identity_instance(&identity);

        assert_eq!(instance.attribute(1), Some(&[0x02, 0x01][..]));
        assert_eq!(instance.attribute(4), Some(&[3, 4][..]));
        assert_eq!(instance.attribute(7), Some(&[3, b'P', b'L', b'C'][..]));
        assert_eq!(instance.attribute(9), None);
        assert_eq!(instance.len(), 8);

        let all = instance.attributes_all();
        // 2+2+2+2+2+4+4+1
        assert_eq!(all.len(), 19);
        assert_eq!(all[..2], [0x02, 0x01]);
    }

    #[test]
    fn test_identity_class_get_all() {
        let store = TagStore::new();
        let identity = IdentityConfig::default();
        let class0 = lookup(&store, &identity, class::IDENTITY, 0).unwrap();
        // revision, max instance, max class attr, max instance attr
        assert_eq!(class0.attributes_all(), vec![1, 0, 1, 0, 7, 0, 8, 0]);
    }

    #[test]
    fn test_symbol_lookup() {
        let store = TagStore::new();
        store.add_tag(Tag::new("speeds", DataType::Int, &[10]).unwrap());
        let identity = IdentityConfig::default();

        let instance = lookup(&store, &identity, class::SYMBOL, 1).unwrap();
        assert_eq!(
            instance.attribute(1),
            Some(&[6, 0, b's', b'p', b'e', b'e', b'd', b's'][..])
        );
        assert_eq!(instance.attribute(2), Some(&[0xC3, 0x20][..]));
        assert_eq!(instance.attribute(7), Some(&[2, 0][..]));
        assert_eq!(
            instance.attribute(8),
            Some(&[10, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0][..])
        );

        assert!(lookup(&store, &identity, class::SYMBOL, 2).is_none());
        let class0 = lookup(&store, &identity, class::SYMBOL, 0).unwrap();
        assert_eq!(class0.attribute(3), Some(&[1, 0][..]));
    }

    #[test]
    fn test_template_lookup() {
        let store = TagStore::new();
        let handle = store
            .define_structure("POINT", &[MemberDef::new("x", "DINT"), MemberDef::new("y", "DINT")])
            .unwrap();
        let identity = IdentityConfig::default();

        let instance = lookup(&store, &identity, class::TEMPLATE, handle as u32).unwrap();
        assert_eq!(instance.attribute(1), Some(&handle.to_le_bytes()[..]));
        assert_eq!(instance.attribute(2), Some(&[2, 0][..]));
        assert_eq!(instance.attribute(5), Some(&[8, 0, 0, 0][..]));

        assert!(lookup(&store, &identity, class::TEMPLATE, 0x1_0000).is_none());
        assert!(lookup(&store, &identity, 0x99, 1).is_none());
    }
}
