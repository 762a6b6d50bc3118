use std::path::{Path, PathBuf};
use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use crate::renderer::cache::Cache;
use crate::renderer::core::context::Context;
use crate::renderer::descriptor::layout::DescriptorSetLayout;
use crate::renderer::pipeline::material::Material;
use crate::renderer::resources::shader::Program;

/// Identity of a program pair: the addresses of the two shared programs
type ProgramPair = (usize, usize);

fn identity<T>(value: &Arc<T>) -> usize {
    Arc::as_ptr(value) as *const () as usize
}

/// Interns programs by path and materials by the program pair they combine, so every
/// shader file is loaded once and every pair has exactly one material
pub struct ShaderLibrary<P = Program, M = Material> {
    programs: Cache<PathBuf, P>,
    materials: Cache<ProgramPair, M>,
}

impl<P, M> Default for ShaderLibrary<P, M> {
    fn default() -> Self {
        Self {
            programs: Cache::default(),
            materials: Cache::default(),
        }
    }
}

impl<P, M> ShaderLibrary<P, M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn program(
        &mut self,
        path: &Path,
        load: impl FnOnce(&Path) -> Result<P>,
    ) -> Result<Arc<P>> {
        self.programs.get_or_load(path.to_path_buf(), |path| load(path))
    }

    /// Material for the program pair at these paths, loading whatever is missing
    pub fn material(
        &mut self,
        vertex_path: &Path,
        fragment_path: &Path,
        mut load_program: impl FnMut(&Path) -> Result<P>,
        build: impl FnOnce(Arc<P>, Arc<P>) -> Result<M>,
    ) -> Result<Arc<M>> {
        let vertex = self.program(vertex_path, &mut load_program)?;
        let fragment = self.program(fragment_path, &mut load_program)?;
        let key = (identity(&vertex), identity(&fragment));
        self.materials.get_or_load(key, |_| build(vertex, fragment))
    }

    /// Releases materials and then programs that nothing outside the library references
    pub fn optimize(&mut self) {
        let materials = self.materials.optimize();
        let programs = self.programs.optimize();
        if materials + programs > 0 {
            log::debug!("Released {materials} materials and {programs} programs");
        }
    }

    pub fn clear(&mut self) {
        self.materials.clear();
        self.programs.clear();
    }

    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    pub fn material_count(&self) -> usize {
        self.materials.len()
    }
}

impl ShaderLibrary<Program, Material> {
    pub fn load_material(
        &mut self,
        ctx: &Context,
        vertex_path: &Path,
        fragment_path: &Path,
        set_layouts: Vec<Arc<DescriptorSetLayout>>,
        push_constants: Vec<vk::PushConstantRange>,
    ) -> Result<Arc<Material>> {
        self.material(
            vertex_path,
            fragment_path,
            |path| Program::load(ctx, path),
            |vertex, fragment| Material::new(vertex, fragment, set_layouts, push_constants),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Debug)]
    struct FakeProgram(PathBuf);

    #[derive(Debug)]
    struct FakeMaterial {
        vertex: Arc<FakeProgram>,
        fragment: Arc<FakeProgram>,
    }

    fn request(
        library: &mut ShaderLibrary<FakeProgram, FakeMaterial>,
        loads: &RefCell<Vec<PathBuf>>,
        vertex: &str,
        fragment: &str,
    ) -> Arc<FakeMaterial> {
        library
            .material(
                Path::new(vertex),
                Path::new(fragment),
                |path| {
                    loads.borrow_mut().push(path.to_path_buf());
                    Ok(FakeProgram(path.to_path_buf()))
                },
                |vertex, fragment| Ok(FakeMaterial { vertex, fragment }),
            )
            .unwrap()
    }

    #[test]
    fn same_pair_returns_same_material() {
        let mut library = ShaderLibrary::new();
        let loads = RefCell::new(Vec::new());

        let first = request(&mut library, &loads, "mesh.vert.spv", "mesh.frag.spv");
        let second = request(&mut library, &loads, "mesh.vert.spv", "mesh.frag.spv");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(library.material_count(), 1);
        assert_eq!(loads.borrow().len(), 2);
    }

    #[test]
    fn shared_programs_load_once() {
        let mut library = ShaderLibrary::new();
        let loads = RefCell::new(Vec::new());

        let lit = request(&mut library, &loads, "mesh.vert.spv", "lit.frag.spv");
        let unlit = request(&mut library, &loads, "mesh.vert.spv", "unlit.frag.spv");

        assert!(!Arc::ptr_eq(&lit, &unlit));
        assert!(Arc::ptr_eq(&lit.vertex, &unlit.vertex));
        assert_eq!(unlit.fragment.0, PathBuf::from("unlit.frag.spv"));
        assert_eq!(library.program_count(), 3);
        assert_eq!(
            loads.borrow().iter().filter(|p| p.ends_with("mesh.vert.spv")).count(),
            1,
        );
    }

    #[test]
    fn optimize_releases_unused_materials_and_programs() {
        let mut library = ShaderLibrary::new();
        let loads = RefCell::new(Vec::new());

        let kept = request(&mut library, &loads, "a.vert.spv", "a.frag.spv");
        drop(request(&mut library, &loads, "b.vert.spv", "b.frag.spv"));

        library.optimize();
        assert_eq!(library.material_count(), 1);
        assert_eq!(library.program_count(), 2);

        drop(kept);
        library.optimize();
        assert_eq!(library.material_count(), 0);
        assert_eq!(library.program_count(), 0);
    }
}
