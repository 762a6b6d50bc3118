use ash::vk;
use color_eyre::Result;
use glam::Mat4;
use crate::renderer::scene::drawable::Object;

/// Something a scene can hold that owns per-image data and records its own draw
pub trait Renderable {
    /// Refreshes the data read by the command buffer of `image_index`
    fn update(&mut self, image_index: usize, world: Mat4, view_projection: Mat4) -> Result<()>;

    fn draw(&self, device: &ash::Device, cmd: vk::CommandBuffer, image_index: usize) -> Result<()>;
}

impl Renderable for Object {
    fn update(&mut self, image_index: usize, world: Mat4, view_projection: Mat4) -> Result<()> {
        let local = self.transform;
        self.transform = world * local;
        let result = Object::update(self, image_index, view_projection);
        self.transform = local;
        result
    }

    fn draw(&self, device: &ash::Device, cmd: vk::CommandBuffer, image_index: usize) -> Result<()> {
        Object::draw(self, device, cmd, image_index)
    }
}

pub trait SceneVisitor<T> {
    fn visit(&mut self, world: Mat4, leaf: &mut T) -> Result<()>;
}

impl<T, F: FnMut(Mat4, &mut T) -> Result<()>> SceneVisitor<T> for F {
    fn visit(&mut self, world: Mat4, leaf: &mut T) -> Result<()> {
        self(world, leaf)
    }
}

pub struct SceneNode<T = Object> {
    pub transform: Mat4,
    pub leaf: Option<T>,
    pub children: Vec<SceneNode<T>>,
}

impl<T> SceneNode<T> {
    pub fn new(transform: Mat4) -> Self {
        Self {
            transform,
            leaf: None,
            children: Vec::new(),
        }
    }

    pub fn with_leaf(transform: Mat4, leaf: T) -> Self {
        Self {
            leaf: Some(leaf),
            ..Self::new(transform)
        }
    }

    pub fn add_child(&mut self, child: SceneNode<T>) -> &mut SceneNode<T> {
        self.children.push(child);
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    /// Visits this node's leaf and then its children, depth first
    pub fn accept(&mut self, parent: Mat4, visitor: &mut dyn SceneVisitor<T>) -> Result<()> {
        let world = parent * self.transform;
        if let Some(leaf) = self.leaf.as_mut() {
            visitor.visit(world, leaf)?;
        }
        for child in &mut self.children {
            child.accept(world, visitor)?;
        }
        Ok(())
    }
}

pub struct Scene<T = Object> {
    pub view_projection: Mat4,
    roots: Vec<SceneNode<T>>,
}

impl<T> Default for Scene<T> {
    fn default() -> Self {
        Self {
            view_projection: Mat4::IDENTITY,
            roots: Vec::new(),
        }
    }
}

impl<T> Scene<T> {
    pub fn new(view_projection: Mat4) -> Self {
        Self {
            view_projection,
            roots: Vec::new(),
        }
    }

    pub fn add_root(&mut self, node: SceneNode<T>) -> &mut SceneNode<T> {
        self.roots.push(node);
        let last = self.roots.len() - 1;
        &mut self.roots[last]
    }

    pub fn roots_mut(&mut self) -> &mut [SceneNode<T>] {
        &mut self.roots
    }

    pub fn accept(&mut self, visitor: &mut dyn SceneVisitor<T>) -> Result<()> {
        for root in &mut self.roots {
            root.accept(Mat4::IDENTITY, visitor)?;
        }
        Ok(())
    }
}

impl<T: Renderable> Scene<T> {
    pub fn prepare(&mut self, image_index: usize) -> Result<()> {
        let view_projection = self.view_projection;
        self.accept(&mut |world: Mat4, leaf: &mut T| leaf.update(image_index, world, view_projection))
    }

    pub fn record(&mut self, device: &ash::Device, cmd: vk::CommandBuffer, image_index: usize) -> Result<()> {
        self.accept(&mut |_world: Mat4, leaf: &mut T| leaf.draw(device, cmd, image_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[derive(Default)]
    struct Probe {
        name: &'static str,
        updates: Vec<(usize, Mat4)>,
    }

    impl Renderable for Probe {
        fn update(&mut self, image_index: usize, world: Mat4, _view_projection: Mat4) -> Result<()> {
            self.updates.push((image_index, world));
            Ok(())
        }

        fn draw(&self, _device: &ash::Device, _cmd: vk::CommandBuffer, _image_index: usize) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn children_inherit_parent_transforms() {
        let mut scene = Scene::default();
        let root = scene.add_root(SceneNode::with_leaf(
            Mat4::from_translation(Vec3::X),
            Probe { name: "root", ..Default::default() },
        ));
        root.add_child(SceneNode::with_leaf(
            Mat4::from_translation(Vec3::Y),
            Probe { name: "child", ..Default::default() },
        ));

        scene.prepare(2).unwrap();

        let root = &scene.roots_mut()[0];
        let child = root.children[0].leaf.as_ref().unwrap();
        assert_eq!(root.leaf.as_ref().unwrap().updates, vec![(2, Mat4::from_translation(Vec3::X))]);
        assert_eq!(child.updates, vec![(2, Mat4::from_translation(Vec3::X + Vec3::Y))]);
    }

    #[test]
    fn visitation_is_depth_first() {
        let mut scene = Scene::default();
        let a = scene.add_root(SceneNode::with_leaf(Mat4::IDENTITY, Probe { name: "a", ..Default::default() }));
        let b = a.add_child(SceneNode::new(Mat4::IDENTITY));
        b.add_child(SceneNode::with_leaf(Mat4::IDENTITY, Probe { name: "c", ..Default::default() }));
        a.add_child(SceneNode::with_leaf(Mat4::IDENTITY, Probe { name: "d", ..Default::default() }));
        scene.add_root(SceneNode::with_leaf(Mat4::IDENTITY, Probe { name: "e", ..Default::default() }));

        let mut order = Vec::new();
        scene
            .accept(&mut |_world: Mat4, leaf: &mut Probe| {
                order.push(leaf.name);
                Ok(())
            })
            .unwrap();
        assert_eq!(order, vec!["a", "c", "d", "e"]);
    }
}
