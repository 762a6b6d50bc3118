use std::sync::Arc;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use glam::Mat4;
use crate::renderer::core::context::Context;
use crate::renderer::descriptor::layout::{BindingMap, DescriptorBinding, DescriptorSetLayoutBuilder};
use crate::renderer::descriptor::pool::DescriptorPool;
use crate::renderer::descriptor::set_buffer::DescriptorSetBuffer;
use crate::renderer::pipeline::builder::Pipeline;
use crate::renderer::pipeline::material::MaterialId;
use crate::renderer::resources::buffer::Buffer;
use crate::renderer::resources::texture::Texture;
use crate::renderer::scene::mesh::MeshData;

pub const UNIFORM_BINDING: u32 = 0;
pub const TEXTURE_BINDING: u32 = 1;
pub const SAMPLER_BINDING: u32 = 2;

/// Per object data passed into the uniform buffer at binding 0
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct ObjectUniforms {
    pub model: Mat4,
    pub view_projection: Mat4,
}

/// Layout of descriptor set 0 as the built-in mesh shaders declare it
pub fn object_bindings() -> BindingMap {
    DescriptorSetLayoutBuilder::new()
        .add_binding(
            UNIFORM_BINDING,
            DescriptorBinding::uniform_buffer(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT),
        )
        .add_binding(TEXTURE_BINDING, DescriptorBinding::sampled_image(vk::ShaderStageFlags::FRAGMENT))
        .add_binding(SAMPLER_BINDING, DescriptorBinding::sampler(vk::ShaderStageFlags::FRAGMENT))
        .bindings()
        .clone()
}

/// Device-local geometry plus the pipeline it is drawn with
pub struct Drawable {
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    index_count: u32,
    index_type: vk::IndexType,
    pipeline: Arc<Pipeline>,
}

impl Drawable {
    pub fn new(ctx: &Context, mesh: &MeshData, pipeline: Arc<Pipeline>) -> Result<Self> {
        mesh.validate()?;
        if mesh.vertex_layout != *pipeline.vertex_layout() {
            return Err(eyre!(
                "Mesh vertex layout {:?} does not match pipeline layout {:?}",
                mesh.vertex_layout,
                pipeline.vertex_layout(),
            ));
        }

        let vertex_buffer = Buffer::new_with_data(
            ctx,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &mesh.vertices,
            "Vertex buffer",
        )?;
        let index_buffer = Buffer::new_with_data(
            ctx,
            vk::BufferUsageFlags::INDEX_BUFFER,
            mesh.indices.as_bytes(),
            "Index buffer",
        )?;
        log::debug!(
            "Uploaded drawable with {} vertices and {} indices",
            mesh.vertex_count(),
            mesh.indices.len(),
        );

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: mesh.indices.len() as u32,
            index_type: mesh.indices.index_type(),
            pipeline,
        })
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn material_id(&self) -> MaterialId {
        self.pipeline.material().id()
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn draw(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        descriptor_sets: &[vk::DescriptorSet],
    ) {
        self.pipeline.bind(cmd);
        self.pipeline.bind_descriptor_sets(cmd, 0, descriptor_sets);
        unsafe {
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.handle], &[0]);
            device.cmd_bind_index_buffer(cmd, self.index_buffer.handle, 0, self.index_type);
            device.cmd_draw_indexed(cmd, self.index_count, 1, 0, 0, 0);
        }
    }
}

/// A placed drawable. Uniforms are buffered once per swap chain image.
pub struct Object {
    pub transform: Mat4,
    descriptors: DescriptorSetBuffer,
    texture: Arc<Texture>,
    drawable: Arc<Drawable>,
}

impl Object {
    pub fn new(
        ctx: &Context,
        pool: &mut DescriptorPool,
        drawable: Arc<Drawable>,
        texture: Arc<Texture>,
        image_count: usize,
    ) -> Result<Self> {
        let layout = drawable
            .pipeline()
            .material()
            .set_layouts()
            .first()
            .ok_or_eyre("Object material has no descriptor set layout")?
            .clone();
        let mut descriptors = DescriptorSetBuffer::new(ctx, pool, layout, image_count)?;
        descriptors.bind_uniform_buffers(ctx, UNIFORM_BINDING, size_of::<ObjectUniforms>() as u64)?;
        descriptors.bind_all(TEXTURE_BINDING, texture.image_descriptor())?;
        descriptors.bind_all(SAMPLER_BINDING, texture.sampler_descriptor())?;
        descriptors.flush();

        Ok(Self {
            transform: Mat4::IDENTITY,
            descriptors,
            texture,
            drawable,
        })
    }

    pub fn drawable(&self) -> &Arc<Drawable> {
        &self.drawable
    }

    pub fn texture(&self) -> &Arc<Texture> {
        &self.texture
    }

    /// Writes the uniforms read by the command buffer of `image_index`
    pub fn update(&mut self, image_index: usize, view_projection: Mat4) -> Result<()> {
        let uniforms = ObjectUniforms {
            model: self.transform,
            view_projection,
        };
        self.descriptors.update_uniform(image_index, UNIFORM_BINDING, &uniforms)
    }

    pub fn draw(&self, device: &ash::Device, cmd: vk::CommandBuffer, image_index: usize) -> Result<()> {
        self.descriptors.ensure_complete(image_index)?;
        let set = self.descriptors.set(image_index)?;
        self.drawable.draw(device, cmd, &[set]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniforms_are_two_matrices() {
        assert_eq!(size_of::<ObjectUniforms>(), 128);
    }

    #[test]
    fn object_layout_matches_shader_bindings() {
        let bindings = object_bindings();
        assert_eq!(bindings.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(bindings[&UNIFORM_BINDING].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(bindings[&TEXTURE_BINDING].descriptor_type, vk::DescriptorType::SAMPLED_IMAGE);
        assert_eq!(bindings[&SAMPLER_BINDING].descriptor_type, vk::DescriptorType::SAMPLER);
    }
}
