//! Protection and cache attributes for page mappings

/// Memory protection flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VmProt(u32);

impl VmProt {
    /// No access
    pub const NONE: Self = Self(0);
    /// Read access
    pub const READ: Self = Self(1);
    /// Write access
    pub const WRITE: Self = Self(2);
    /// Execute access
    pub const EXECUTE: Self = Self(4);
    /// Default (read/write)
    pub const DEFAULT: Self = Self(3);
    /// All permissions
    pub const ALL: Self = Self(7);

    pub const fn new(bits: u32) -> Self {
        Self(bits & 0x7)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    pub fn can_read(&self) -> bool {
        self.contains(Self::READ)
    }

    pub fn can_write(&self) -> bool {
        self.contains(Self::WRITE)
    }

    pub fn can_execute(&self) -> bool {
        self.contains(Self::EXECUTE)
    }
}

impl core::ops::BitOr for VmProt {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl core::ops::BitOrAssign for VmProt {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl Default for VmProt {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// CPU cache policy for a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CacheMode {
    /// Normal write-back caching
    #[default]
    Cached,
    /// Uncached, writes may be combined
    WriteCombined,
    /// Strongly uncached
    Uncached,
}

/// Attributes a mapping is installed with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageAttrs {
    pub prot: VmProt,
    pub cache: CacheMode,
}

impl PageAttrs {
    pub const fn new(prot: VmProt, cache: CacheMode) -> Self {
        Self { prot, cache }
    }
}
