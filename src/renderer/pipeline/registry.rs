use std::collections::HashMap;
use std::sync::Arc;
use color_eyre::Result;
use crate::renderer::core::context::Context;
use crate::renderer::pipeline::builder::{Pipeline, PipelineBuilder};
use crate::renderer::pipeline::material::MaterialId;

/// Tracks every pipeline built from a material. Materials do not point back at their
/// pipelines, lookups go through here instead.
pub struct PipelineRegistry<P = Pipeline> {
    by_material: HashMap<MaterialId, Vec<Arc<P>>>,
}

impl<P> Default for PipelineRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> PipelineRegistry<P> {
    pub fn new() -> Self {
        Self {
            by_material: HashMap::new(),
        }
    }

    pub fn register(&mut self, material: MaterialId, pipeline: P) -> Arc<P> {
        let pipeline = Arc::new(pipeline);
        self.by_material
            .entry(material)
            .or_default()
            .push(pipeline.clone());
        pipeline
    }

    pub fn pipelines_for(&self, material: MaterialId) -> &[Arc<P>] {
        self.by_material
            .get(&material)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn latest_for(&self, material: MaterialId) -> Option<&Arc<P>> {
        self.pipelines_for(material).last()
    }

    /// Forgets the pipelines built from `material`. Pipelines still held elsewhere stay alive.
    pub fn remove_material(&mut self, material: MaterialId) -> Vec<Arc<P>> {
        self.by_material.remove(&material).unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.by_material.clear();
    }

    /// Total number of registered pipelines
    pub fn len(&self) -> usize {
        self.by_material.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PipelineRegistry<Pipeline> {
    pub fn build(&mut self, ctx: &Context, builder: PipelineBuilder) -> Result<Arc<Pipeline>> {
        let pipeline = builder.create_pipeline(ctx)?;
        let material = pipeline.material().id();
        log::debug!("Registered pipeline {:?} for material {:?}", pipeline.handle, material);
        Ok(self.register(material, pipeline))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipelines_are_grouped_by_material() {
        let first = MaterialId::next();
        let second = MaterialId::next();
        let mut registry = PipelineRegistry::<&'static str>::new();

        registry.register(first, "opaque");
        registry.register(first, "wireframe");
        registry.register(second, "transparent");

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.pipelines_for(first).len(), 2);
        assert_eq!(registry.latest_for(first).map(|p| **p), Some("wireframe"));
        assert!(registry.pipelines_for(MaterialId::next()).is_empty());
    }

    #[test]
    fn removed_pipelines_survive_while_referenced() {
        let material = MaterialId::next();
        let mut registry = PipelineRegistry::<u32>::new();
        let held = registry.register(material, 7);

        let removed = registry.remove_material(material);
        assert_eq!(removed.len(), 1);
        assert!(registry.is_empty());
        assert_eq!(*held, 7);
    }
}
