//! Host-visible voxel counter.

use voxstream_device::layout::counter;
use voxstream_device::{
    BufferDescriptor, BufferId, BufferUsage, DeviceResult, MemoryLocation, RenderDevice,
};

/// Two `u32` slots shared by both passes: slot 0 is incremented once per
/// covered cell by the count pass, slot 1 is the write pass's bump
/// allocator. Allocated once, never resized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoxelCounter {
    buffer: BufferId,
}

impl VoxelCounter {
    /// Allocates a zeroed counter.
    ///
    /// # Errors
    ///
    /// Propagates allocation failure.
    pub fn allocate<D: RenderDevice>(device: &D) -> DeviceResult<Self> {
        let buffer = device.create_buffer(&BufferDescriptor {
            size: counter::BYTE_SIZE,
            usage: BufferUsage::STORAGE,
            memory: MemoryLocation::HostVisible,
            label: "voxel counter",
        })?;
        Ok(Self { buffer })
    }

    /// Underlying buffer.
    #[inline]
    #[must_use]
    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    /// Zeroes both slots. Only valid while no pass is in flight.
    ///
    /// # Errors
    ///
    /// Propagates host write failure.
    pub fn reset<D: RenderDevice>(&self, device: &D) -> DeviceResult<()> {
        device.write_buffer(self.buffer, 0, &[0; counter::BYTE_SIZE as usize])
    }

    /// Reads `[counted, written]`. Only meaningful after a fence wait.
    ///
    /// # Errors
    ///
    /// Propagates host read failure.
    pub fn read<D: RenderDevice>(&self, device: &D) -> DeviceResult<[u32; counter::SLOTS]> {
        let bytes = device.read_buffer(self.buffer, 0, counter::BYTE_SIZE)?;
        let mut slots = [0u32; counter::SLOTS];
        for (slot, chunk) in slots.iter_mut().zip(bytes.chunks_exact(4)) {
            *slot = bytemuck::pod_read_unaligned(chunk);
        }
        Ok(slots)
    }

    /// Frees the buffer.
    pub fn destroy<D: RenderDevice>(self, device: &D) {
        if let Err(err) = device.destroy_buffer(self.buffer) {
            tracing::warn!(error = %err, "failed to destroy voxel counter");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxstream_device::SoftwareDevice;

    #[test]
    fn test_reset_clears_both_slots() {
        let device = SoftwareDevice::new();
        let counter = VoxelCounter::allocate(&device).unwrap();
        device
            .write_buffer(counter.buffer(), 0, bytemuck::bytes_of(&[7u32, 9u32]))
            .unwrap();
        assert_eq!(counter.read(&device).unwrap(), [7, 9]);

        counter.reset(&device).unwrap();
        assert_eq!(counter.read(&device).unwrap(), [0, 0]);

        counter.destroy(&device);
        assert_eq!(device.buffer_count(), 0);
    }
}
