use std::path::{Path, PathBuf};
use std::sync::Arc;
use color_eyre::Result;
use crate::renderer::cache::Cache;
use crate::renderer::core::context::Context;
use crate::renderer::pipeline::builder::Pipeline;
use crate::renderer::scene::drawable::Drawable;
use crate::renderer::scene::mesh::MeshData;

/// Address of the shared pipeline a drawable is bound to. Stable while the cached drawable
/// holds its reference.
type PipelineKey = usize;

fn pipeline_key<P>(pipeline: &Arc<P>) -> PipelineKey {
    Arc::as_ptr(pipeline) as *const () as usize
}

/// Interns drawables by model path and the pipeline they are drawn with. The same model
/// drawn with two pipelines is uploaded twice, even when both share a material.
pub struct ModelLibrary<D = Drawable> {
    drawables: Cache<(PathBuf, PipelineKey), D>,
}

impl<D> Default for ModelLibrary<D> {
    fn default() -> Self {
        Self {
            drawables: Cache::default(),
        }
    }
}

impl<D> ModelLibrary<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_load<P>(
        &mut self,
        path: &Path,
        pipeline: &Arc<P>,
        load: impl FnOnce(&Path) -> Result<D>,
    ) -> Result<Arc<D>> {
        self.drawables.get_or_load((path.to_path_buf(), pipeline_key(pipeline)), |(path, _)| load(path))
    }

    /// Releases drawables no object references any more
    pub fn optimize(&mut self) -> usize {
        let released = self.drawables.optimize();
        if released > 0 {
            log::debug!("Released {released} drawables");
        }
        released
    }

    pub fn clear(&mut self) {
        self.drawables.clear();
    }

    pub fn len(&self) -> usize {
        self.drawables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drawables.is_empty()
    }
}

impl ModelLibrary<Drawable> {
    /// Drawable for the model at `path` drawn with `pipeline`, parsing the model through
    /// `load_mesh` only on first use
    pub fn load_drawable(
        &mut self,
        ctx: &Context,
        path: &Path,
        pipeline: &Arc<Pipeline>,
        load_mesh: impl FnOnce(&Path) -> Result<MeshData>,
    ) -> Result<Arc<Drawable>> {
        self.get_or_load(path, pipeline, |path| {
            let mesh = load_mesh(path)?;
            Drawable::new(ctx, &mesh, pipeline.clone())
        })
    }
}
