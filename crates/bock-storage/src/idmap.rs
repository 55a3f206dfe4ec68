//! User namespace UID/GID mapping tables.
//!
//! A table is an ordered list of contiguous ranges. An empty table means
//! identity mapping for every id, which is the default when root is not
//! remapped.

use serde::{Deserialize, Serialize};

use bock_common::{BockError, BockResult};

/// UID/GID mapping entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMap {
    /// Container ID (start).
    pub container_id: u32,
    /// Host ID (start).
    pub host_id: u32,
    /// Range size.
    pub size: u32,
}

impl IdMap {
    /// Create a new ID mapping.
    #[must_use]
    pub const fn new(container_id: u32, host_id: u32, size: u32) -> Self {
        Self {
            container_id,
            host_id,
            size,
        }
    }

    fn container_offset(&self, id: u32) -> Option<u32> {
        offset_in(self.container_id, self.size, id)
    }

    fn host_offset(&self, id: u32) -> Option<u32> {
        offset_in(self.host_id, self.size, id)
    }
}

fn offset_in(start: u32, size: u32, id: u32) -> Option<u32> {
    let end = u64::from(start) + u64::from(size);
    (id >= start && u64::from(id) < end).then(|| id - start)
}

/// An ordered set of [`IdMap`] ranges for one axis (uids or gids).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdMapTable(Vec<IdMap>);

impl IdMapTable {
    /// The identity table.
    #[must_use]
    pub const fn identity() -> Self {
        Self(Vec::new())
    }

    /// Build a table from explicit ranges.
    #[must_use]
    pub fn from_ranges(ranges: Vec<IdMap>) -> Self {
        Self(ranges)
    }

    /// Build the "remap root only" table: container 0 maps to `id` and every
    /// other id maps to itself.
    fn for_root(id: u32) -> Self {
        Self(vec![
            IdMap::new(0, id, 1),
            IdMap::new(1, 1, id - 1),
            // Empty when id is u32::MAX.
            IdMap::new(id.wrapping_add(1), id.wrapping_add(1), u32::MAX - id),
        ])
    }

    /// Returns true if this table maps every id to itself.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.0.is_empty()
    }

    /// The ranges in order.
    #[must_use]
    pub fn ranges(&self) -> &[IdMap] {
        &self.0
    }

    /// Translate a container id to the host id it corresponds to.
    ///
    /// # Errors
    ///
    /// Returns [`BockError::UnmappableId`] if the table is non-empty and no
    /// range covers `container_id`.
    pub fn to_host(&self, container_id: u32) -> BockResult<u32> {
        if self.is_identity() {
            return Ok(container_id);
        }
        self.0
            .iter()
            .find_map(|m| {
                m.container_offset(container_id)
                    .and_then(|k| m.host_id.checked_add(k))
            })
            .ok_or(BockError::UnmappableId {
                direction: "Container",
                id: container_id,
            })
    }

    /// Translate a host id back to the container id it corresponds to.
    ///
    /// # Errors
    ///
    /// Returns [`BockError::UnmappableId`] if the table is non-empty and no
    /// range covers `host_id`.
    pub fn to_container(&self, host_id: u32) -> BockResult<u32> {
        if self.is_identity() {
            return Ok(host_id);
        }
        self.0
            .iter()
            .find_map(|m| {
                m.host_offset(host_id)
                    .and_then(|k| m.container_id.checked_add(k))
            })
            .ok_or(BockError::UnmappableId {
                direction: "Host",
                id: host_id,
            })
    }

    /// The host id container root maps to.
    ///
    /// # Errors
    ///
    /// Returns an error if container id 0 is not covered.
    pub fn root_host_id(&self) -> BockResult<u32> {
        self.to_host(0)
    }
}

/// The UID and GID tables in effect for the daemon.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdMappings {
    /// UID table.
    pub uids: IdMapTable,
    /// GID table.
    pub gids: IdMapTable,
}

impl IdMappings {
    /// No remapping.
    #[must_use]
    pub const fn identity() -> Self {
        Self {
            uids: IdMapTable::identity(),
            gids: IdMapTable::identity(),
        }
    }

    /// Create the tables that remap container root to `uid`:`gid` and keep
    /// every other id unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`BockError::InvalidIdRange`] if either id is 0.
    pub fn for_root(uid: u32, gid: u32) -> BockResult<Self> {
        if uid < 1 || gid < 1 {
            return Err(BockError::InvalidIdRange { uid, gid });
        }
        Ok(Self {
            uids: IdMapTable::for_root(uid),
            gids: IdMapTable::for_root(gid),
        })
    }

    /// Returns true if neither table remaps anything.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.uids.is_identity() && self.gids.is_identity()
    }

    /// The host uid/gid pair that container root maps to; `(0, 0)` when
    /// nothing is remapped.
    ///
    /// # Errors
    ///
    /// Returns an error if container root is not covered by a table.
    pub fn root_pair(&self) -> BockResult<(u32, u32)> {
        Ok((self.uids.root_host_id()?, self.gids.root_host_id()?))
    }
}
