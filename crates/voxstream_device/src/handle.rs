//! Opaque device object handles.
//!
//! Handles are plain `u32` ids issued by the backend. They carry no
//! lifetime: using a handle after it was destroyed is reported by the
//! backend as [`DeviceError::InvalidHandle`](crate::DeviceError::InvalidHandle).

use std::fmt;

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(transparent)]
        pub struct $name(u32);

        impl $name {
            /// Wraps a raw backend id.
            #[inline]
            #[must_use]
            pub const fn from_raw(raw: u32) -> Self {
                Self(raw)
            }

            /// Raw backend id.
            #[inline]
            #[must_use]
            pub const fn raw(self) -> u32 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }
    };
}

define_handle!(
    /// GPU buffer.
    BufferId
);
define_handle!(
    /// GPU texture (image plus its default view).
    TextureId
);
define_handle!(
    /// Compiled graphics pipeline.
    PipelineId
);
define_handle!(
    /// Set of resources bound to a pipeline's binding slots.
    BindingSetId
);
define_handle!(
    /// Command allocator tied to one queue.
    CommandPoolId
);
define_handle!(
    /// Command buffer allocated from a [`CommandPoolId`].
    CommandBufferId
);
define_handle!(
    /// Host-waitable fence.
    FenceId
);
define_handle!(
    /// Device queue.
    QueueId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_round_trip_and_debug() {
        let id = TextureId::from_raw(42);
        assert_eq!(id.raw(), 42);
        assert_eq!(format!("{id:?}"), "TextureId(42)");
    }
}
