//! Hierarchical service/part address

use core::fmt;

/// Address of a service or one of its parts
///
/// A fixed-width triple packed into 64 bits:
///
/// ```text
///  63            32 31        16 15         0
/// +----------------+------------+------------+
/// |   cluster id   | component  |    part    |
/// +----------------+------------+------------+
/// ```
///
/// `component == 0` marks the head of a strongly-owned cluster, `part == 0`
/// marks a service itself and a nonzero `part` is the 1-based position of a
/// part in its owner's part list.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Guid(u64);

impl Guid {
    /// Sentinel value for "no entity"
    pub const NONE: Guid = Guid(u64::MAX);

    /// Address of the service `component` inside `cluster`
    #[inline]
    pub const fn of_service(cluster: u32, component: u16) -> Self {
        Guid(((cluster as u64) << 32) | ((component as u64) << 16))
    }

    /// Address of the `ordinal`-th part of the service at `owner`
    ///
    /// `ordinal` is 1-based; `owner` must be a service address.
    #[inline]
    pub const fn of_part(owner: Guid, ordinal: u16) -> Self {
        Guid((owner.0 & !0xFFFF) | ordinal as u64)
    }

    /// Rebuild from the packed representation
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Guid(raw)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn cluster(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[inline]
    pub const fn component(self) -> u16 {
        (self.0 >> 16) as u16
    }

    #[inline]
    pub const fn part(self) -> u16 {
        self.0 as u16
    }

    /// Address of the service that owns this entity (identity for services)
    #[inline]
    pub const fn service(self) -> Guid {
        Guid(self.0 & !0xFFFF)
    }

    /// Address of the cluster head this entity belongs to
    #[inline]
    pub const fn cluster_head(self) -> Guid {
        Guid::of_service(self.cluster(), 0)
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u64::MAX
    }

    #[inline]
    pub const fn is_service(self) -> bool {
        !self.is_none() && self.part() == 0
    }

    #[inline]
    pub const fn is_part(self) -> bool {
        !self.is_none() && self.part() != 0
    }

    #[inline]
    pub const fn is_cluster_head(self) -> bool {
        self.is_service() && self.component() == 0
    }

    /// Most significant bits (the cluster id) rendered as 8 hex digits
    pub fn msb(self) -> String {
        format!("{:08x}", self.cluster())
    }

    /// Field-by-field rendering: `c<cluster>.<component>:<part>`
    pub fn detailed(self) -> String {
        if self.is_none() {
            return "none".to_string();
        }
        format!("c{}.{}:{}", self.cluster(), self.component(), self.part())
    }
}

impl Default for Guid {
    fn default() -> Self {
        Guid::NONE
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "Guid(NONE)")
        } else {
            write!(f, "Guid({})", self.detailed())
        }
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::LowerHex for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}
