//! Identity of server-resident values passed by reference or by code.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::num::NonZeroU64;

use crate::connection::ConnectionRef;

/// Handle to an object owned by the server.
///
/// Equality, ordering and hashing use the id alone. Id 0 is the wire encoding
/// of a null object and never produces a handle.
#[derive(Clone)]
pub struct RemoteObject {
    id: NonZeroU64,
    service: String,
    class: String,
    connection: ConnectionRef,
}

impl RemoteObject {
    /// Wrap an id received from `connection`; `None` for the null id.
    pub fn new(
        connection: ConnectionRef,
        service: impl Into<String>,
        class: impl Into<String>,
        id: u64,
    ) -> Option<Self> {
        NonZeroU64::new(id).map(|id| Self {
            id,
            service: service.into(),
            class: class.into(),
            connection,
        })
    }

    pub fn id(&self) -> u64 {
        self.id.get()
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    /// The connection the object was received on, while it is still open
    pub fn connection(&self) -> &ConnectionRef {
        &self.connection
    }
}

impl PartialEq for RemoteObject {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for RemoteObject {}

impl Hash for RemoteObject {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for RemoteObject {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RemoteObject {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}.{} remote object #{}>", self.service, self.class, self.id)
    }
}

/// Value of a service-defined enumeration.
///
/// Mapping the code to a named constant is left to generated stubs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteEnum {
    pub service: String,
    pub name: String,
    pub value: i32,
}

impl RemoteEnum {
    pub fn new(service: impl Into<String>, name: impl Into<String>, value: i32) -> Self {
        Self {
            service: service.into(),
            name: name.into(),
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn null_id_has_no_handle() {
        assert!(RemoteObject::new(ConnectionRef::detached(), "SpaceCenter", "Vessel", 0).is_none());
    }

    #[test]
    fn identity_is_the_id() {
        let a = RemoteObject::new(ConnectionRef::detached(), "SpaceCenter", "Vessel", 7).unwrap();
        let b = RemoteObject::new(ConnectionRef::detached(), "SpaceCenter", "Part", 7).unwrap();
        let c = RemoteObject::new(ConnectionRef::detached(), "SpaceCenter", "Vessel", 9).unwrap();

        assert_eq!(a, b);
        assert!(a < c);
        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }
}
