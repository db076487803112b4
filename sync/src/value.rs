//! Fence value selection.

/// Value argument for fence operations.
///
/// Replaces a reserved "unspecified" number so every `u64` stays usable as a
/// real fence value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FenceValue {
    /// Let the fence pick the value.
    ///
    /// For a signal this is the current value plus one; for a wait it is the
    /// most recently signaled value.
    #[default]
    Auto,
    /// Use exactly this value.
    Exact(u64),
}

impl FenceValue {
    /// Resolve the value for a wait against the last signaled value.
    pub fn resolve(self, current: u64) -> u64 {
        match self {
            Self::Auto => current,
            Self::Exact(value) => value,
        }
    }
}

impl From<u64> for FenceValue {
    fn from(value: u64) -> Self {
        Self::Exact(value)
    }
}

impl From<Option<u64>> for FenceValue {
    fn from(value: Option<u64>) -> Self {
        value.map_or(Self::Auto, Self::Exact)
    }
}
