//! Stable capability identity

use core::fmt;

/// Registry key of a capability
///
/// Derived from the capability's fully-qualified name (namespace + type
/// name) with 64-bit FNV-1a, so the same name yields the same id in every
/// build and every process.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct InterfaceId(u64);

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

impl InterfaceId {
    /// Id for a fully-qualified capability name
    pub const fn of(name: &str) -> Self {
        let bytes = name.as_bytes();
        let mut hash = FNV_OFFSET;
        let mut i = 0;
        while i < bytes.len() {
            hash ^= bytes[i] as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
            i += 1;
        }
        InterfaceId(hash)
    }

    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        InterfaceId(raw)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InterfaceId({:016x})", self.0)
    }
}

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_id_is_stable() {
        // Reference value of FNV-1a 64 for the empty string.
        assert_eq!(InterfaceId::of("").as_u64(), FNV_OFFSET);
        assert_eq!(InterfaceId::of("app::Storage"), InterfaceId::of("app::Storage"));
    }

    #[test]
    fn test_interface_id_distinguishes_namespaces() {
        assert_ne!(InterfaceId::of("a::Log"), InterfaceId::of("b::Log"));
    }

    #[test]
    fn test_interface_id_const_eval() {
        const ID: InterfaceId = InterfaceId::of("const::Eval");
        assert_eq!(ID, InterfaceId::of("const::Eval"));
    }
}
