use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use ash::vk;
use color_eyre::Result;
use crate::renderer::descriptor::layout::DescriptorSetLayout;
use crate::renderer::resources::shader::{expect_stage, Program};

static MATERIAL_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(u64);

impl MaterialId {
    pub fn next() -> Self {
        Self(MATERIAL_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A vertex and fragment program pair plus the resource interface both expect:
/// descriptor set layouts in set order and push constant ranges
pub struct Material {
    id: MaterialId,
    vertex: Arc<Program>,
    fragment: Arc<Program>,
    set_layouts: Vec<Arc<DescriptorSetLayout>>,
    push_constants: Vec<vk::PushConstantRange>,
}

impl Material {
    pub fn new(
        vertex: Arc<Program>,
        fragment: Arc<Program>,
        set_layouts: Vec<Arc<DescriptorSetLayout>>,
        push_constants: Vec<vk::PushConstantRange>,
    ) -> Result<Self> {
        expect_stage(vertex.stage, vk::ShaderStageFlags::VERTEX)?;
        expect_stage(fragment.stage, vk::ShaderStageFlags::FRAGMENT)?;

        Ok(Self {
            id: MaterialId::next(),
            vertex,
            fragment,
            set_layouts,
            push_constants,
        })
    }

    pub fn id(&self) -> MaterialId {
        self.id
    }

    pub fn vertex(&self) -> &Arc<Program> {
        &self.vertex
    }

    pub fn fragment(&self) -> &Arc<Program> {
        &self.fragment
    }

    pub fn set_layouts(&self) -> &[Arc<DescriptorSetLayout>] {
        &self.set_layouts
    }

    pub fn push_constants(&self) -> &[vk::PushConstantRange] {
        &self.push_constants
    }

    pub fn stage_infos(&self) -> [vk::PipelineShaderStageCreateInfo<'_>; 2] {
        [self.vertex.stage_info(), self.fragment.stage_info()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn material_ids_are_unique() {
        let a = MaterialId::next();
        let b = MaterialId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }
}
