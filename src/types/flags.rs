//! Runtime flags carried by every fiber.

use core::fmt;

/// A small bitset of per-fiber runtime flags.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuntimeFlags(u32);

impl RuntimeFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// The fiber may be interrupted.
    pub const INTERRUPTION: Self = Self(1 << 0);
    /// The fiber yields to the scheduler after its op budget is spent.
    pub const COOPERATIVE_YIELDING: Self = Self(1 << 1);
    /// Flags of a freshly started root fiber.
    pub const DEFAULT: Self = Self(Self::INTERRUPTION.0 | Self::COOPERATIVE_YIELDING.0);

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if every flag in `flags` is enabled.
    #[must_use]
    pub const fn contains(self, flags: Self) -> bool {
        self.0 & flags.0 == flags.0
    }

    /// Returns true when interruption is enabled.
    #[must_use]
    pub const fn interruptible(self) -> bool {
        self.contains(Self::INTERRUPTION)
    }

    /// Returns true when cooperative yielding is enabled.
    #[must_use]
    pub const fn cooperative_yielding(self) -> bool {
        self.contains(Self::COOPERATIVE_YIELDING)
    }

    /// Returns a copy with `flags` enabled.
    #[must_use]
    pub const fn enable(self, flags: Self) -> Self {
        Self(self.0 | flags.0)
    }

    /// Returns a copy with `flags` disabled.
    #[must_use]
    pub const fn disable(self, flags: Self) -> Self {
        Self(self.0 & !flags.0)
    }

    /// Applies a patch.
    #[must_use]
    pub const fn patch(self, patch: RuntimeFlagsPatch) -> Self {
        Self((self.0 | patch.enable) & !patch.disable)
    }

    /// The patch that turns `self` into `target`.
    #[must_use]
    pub const fn diff(self, target: Self) -> RuntimeFlagsPatch {
        RuntimeFlagsPatch {
            enable: target.0 & !self.0,
            disable: self.0 & !target.0,
        }
    }
}

impl Default for RuntimeFlags {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Debug for RuntimeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeFlags")
            .field("interruption", &self.interruptible())
            .field("cooperative_yielding", &self.cooperative_yielding())
            .finish()
    }
}

/// A change to runtime flags: bits to enable and bits to disable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RuntimeFlagsPatch {
    enable: u32,
    disable: u32,
}

impl RuntimeFlagsPatch {
    /// The patch that changes nothing.
    pub const EMPTY: Self = Self {
        enable: 0,
        disable: 0,
    };

    /// Enables `flags`.
    #[must_use]
    pub const fn enable(flags: RuntimeFlags) -> Self {
        Self {
            enable: flags.0,
            disable: 0,
        }
    }

    /// Disables `flags`.
    #[must_use]
    pub const fn disable(flags: RuntimeFlags) -> Self {
        Self {
            enable: 0,
            disable: flags.0,
        }
    }

    /// Returns true if applying the patch never changes anything.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.enable == 0 && self.disable == 0
    }

    /// Applies `self`, then `next`.
    #[must_use]
    pub const fn and_then(self, next: Self) -> Self {
        Self {
            enable: (self.enable & !next.disable) | next.enable,
            disable: (self.disable & !next.enable) | next.disable,
        }
    }
}
