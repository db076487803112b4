//! Fence configuration.

/// What a fence does when asked to signal a value that is not greater than
/// its current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OrderingCheck {
    /// Treat the violation as a programming error and panic.
    #[default]
    Panic,
    /// Reject the signal with [`SyncError::NonMonotonicSignal`](crate::SyncError::NonMonotonicSignal).
    Error,
}

/// Descriptor for creating a [`Fence`](crate::Fence).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FenceDescriptor {
    /// Debug label used in log output.
    pub label: Option<String>,
    /// Handling of non-increasing explicit signal values.
    pub ordering_check: OrderingCheck,
}

impl FenceDescriptor {
    /// Create a descriptor with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set how ordering violations are reported.
    pub fn with_ordering_check(mut self, ordering_check: OrderingCheck) -> Self {
        self.ordering_check = ordering_check;
        self
    }
}

/// Descriptor for creating a [`LinearFence`](crate::LinearFence).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearFenceDescriptor {
    /// Settings of the underlying fence.
    pub fence: FenceDescriptor,
    /// Number of ring slots, i.e. the maximum number of batches in flight.
    pub depth: usize,
}

impl LinearFenceDescriptor {
    /// Create a descriptor for a ring of `depth` slots.
    pub fn new(depth: usize) -> Self {
        Self {
            fence: FenceDescriptor::default(),
            depth,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.fence = self.fence.with_label(label);
        self
    }

    /// Set how ordering violations are reported.
    pub fn with_ordering_check(mut self, ordering_check: OrderingCheck) -> Self {
        self.fence = self.fence.with_ordering_check(ordering_check);
        self
    }
}

impl Default for LinearFenceDescriptor {
    /// Two slots: the CPU records one batch while the GPU executes the other.
    fn default() -> Self {
        Self::new(2)
    }
}
