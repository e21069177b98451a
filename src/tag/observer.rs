//! Hooks fired on tag reads, writes and resets.

use crate::types::{CipStatus, ServiceCode};

use super::value::Tag;

/// Receives a notification after every read, write and reset.
///
/// Called with the store lock released; `tag` is a detached copy of the
/// affected region and is `None` on failures and resets.
pub trait TagObserver: Send + Sync {
    fn notify(&self, service: ServiceCode, status: CipStatus, tag: Option<&Tag>);
}

impl<F> TagObserver for F
where
    F: Fn(ServiceCode, CipStatus, Option<&Tag>) + Send + Sync,
{
    fn notify(&self, service: ServiceCode, status: CipStatus, tag: Option<&Tag>) {
        self(service, status, tag)
    }
}
