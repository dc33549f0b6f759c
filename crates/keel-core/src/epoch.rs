//! Per-service generation counter

use core::fmt;

/// Generation of a service
///
/// Incremented every time the service passes through initialization.
/// `Epoch::NONE` (zero) means "never initialized"; handles captured at
/// `NONE` never resolve.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Epoch(u32);

impl Epoch {
    pub const NONE: Epoch = Epoch(0);

    #[inline]
    pub const fn new(raw: u32) -> Self {
        Epoch(raw)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Next generation, skipping `NONE` on wrap
    #[inline]
    pub const fn next(self) -> Epoch {
        match self.0.wrapping_add(1) {
            0 => Epoch(1),
            n => Epoch(n),
        }
    }
}

impl fmt::Debug for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Epoch({})", self.0)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
