//! Recording of the voxel scene draw shared by both passes.

use crate::scene::SceneResourceTable;
use voxstream_device::layout::{bindings, push_constants};
use voxstream_device::{
    BindingSetId, CommandList, IndexType, PipelineId, Rect2D, RenderingInfo, ShaderStage,
    Viewport, DRAW_COMMAND_STRIDE,
};

/// Everything one pass needs to record its draw.
#[derive(Debug, Clone, Copy)]
pub(crate) struct VoxelPass {
    pub(crate) pipeline: PipelineId,
    pub(crate) set: BindingSetId,
    pub(crate) resolution: u32,
    /// Scalar scene extents `[min, max]`.
    pub(crate) extents: [f32; 2],
    pub(crate) index_buffer: voxstream_device::BufferId,
    pub(crate) draw_buffer: voxstream_device::BufferId,
    pub(crate) draw_count: u32,
}

impl VoxelPass {
    pub(crate) fn new(
        scene: &SceneResourceTable,
        pipeline: PipelineId,
        set: BindingSetId,
        resolution: u32,
    ) -> Self {
        Self {
            pipeline,
            set,
            resolution,
            extents: scene.bounds.scalar_extents(),
            index_buffer: scene.index_buffer,
            draw_buffer: scene.draw_command_buffer,
            draw_count: scene.draw_count,
        }
    }

    /// Attachment-less render pass over a `resolution²` area drawing every
    /// scene draw command once.
    pub(crate) fn record(&self, commands: &mut CommandList) {
        let size = self.resolution;
        commands
            .begin_rendering(RenderingInfo {
                width: size,
                height: size,
                layer_count: 1,
            })
            .set_viewport(Viewport::square(size))
            .set_scissor(Rect2D {
                x: 0,
                y: 0,
                width: size,
                height: size,
            })
            .bind_pipeline(self.pipeline)
            .bind_binding_sets(bindings::SCENE_SET, &[self.set])
            .push_constants(
                ShaderStage::GEOMETRY,
                push_constants::EXTENTS_OFFSET,
                &self.extents,
            )
            .push_constants(
                ShaderStage::FRAGMENT,
                push_constants::RESOLUTION_OFFSET,
                &self.resolution,
            )
            .bind_index_buffer(self.index_buffer, 0, IndexType::U32)
            .draw_indexed_indirect(self.draw_buffer, 0, self.draw_count, DRAW_COMMAND_STRIDE)
            .end_rendering();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Aabb;
    use voxstream_device::{BufferId, Command};

    #[test]
    fn test_record_layout() {
        let scene = SceneResourceTable {
            vertex_buffer: BufferId::from_raw(1),
            index_buffer: BufferId::from_raw(2),
            transform_buffer: BufferId::from_raw(3),
            material_buffer: BufferId::from_raw(4),
            draw_command_buffer: BufferId::from_raw(5),
            draw_count: 3,
            bounds: Aabb::new([-2.0, 0.0, 0.0], [1.0, 4.0, 1.0]),
        };
        let pass = VoxelPass::new(
            &scene,
            PipelineId::from_raw(6),
            BindingSetId::from_raw(7),
            64,
        );
        let mut commands = CommandList::new();
        pass.record(&mut commands);

        let recorded = commands.commands();
        assert!(matches!(recorded.first(), Some(Command::BeginRendering(info)) if info.width == 64));
        assert!(matches!(recorded.last(), Some(Command::EndRendering)));
        assert!(recorded.iter().any(|c| matches!(
            c,
            Command::PushConstants { offset: 0, data, .. } if data.as_slice() == bytemuck::bytes_of(&[-2.0f32, 4.0f32])
        )));
        assert!(recorded.iter().any(|c| matches!(
            c,
            Command::DrawIndexedIndirect { draw_count: 3, stride, .. } if *stride == DRAW_COMMAND_STRIDE
        )));
    }
}
