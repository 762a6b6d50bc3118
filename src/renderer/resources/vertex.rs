use ash::vk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    pub format: vk::Format,
    pub offset: u32,
}

/// Describes how one interleaved vertex buffer is laid out.
/// Attribute locations follow declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexBufferLayout {
    pub stride: u32,
    pub input_rate: vk::VertexInputRate,
    pub attributes: Vec<VertexAttribute>,
}

impl VertexBufferLayout {
    pub fn new(stride: u32) -> Self {
        Self {
            stride,
            input_rate: vk::VertexInputRate::VERTEX,
            attributes: Vec::new(),
        }
    }

    pub fn per_instance(mut self) -> Self {
        self.input_rate = vk::VertexInputRate::INSTANCE;
        self
    }

    pub fn with_attribute(mut self, format: vk::Format, offset: u32) -> Self {
        self.attributes.push(VertexAttribute { format, offset });
        self
    }

    pub fn binding_description(&self, binding: u32) -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding,
            stride: self.stride,
            input_rate: self.input_rate,
        }
    }

    pub fn attribute_descriptions(&self, binding: u32) -> Vec<vk::VertexInputAttributeDescription> {
        self.attributes
            .iter()
            .enumerate()
            .map(|(location, attribute)| vk::VertexInputAttributeDescription {
                location: location as u32,
                binding,
                format: attribute.format,
                offset: attribute.offset,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locations_follow_declaration_order() {
        let layout = VertexBufferLayout::new(32)
            .with_attribute(vk::Format::R32G32B32_SFLOAT, 0)
            .with_attribute(vk::Format::R32G32B32_SFLOAT, 12)
            .with_attribute(vk::Format::R32G32_SFLOAT, 24);

        let attributes = layout.attribute_descriptions(0);
        assert_eq!(attributes.len(), 3);
        assert_eq!(
            attributes.iter().map(|a| (a.location, a.offset)).collect::<Vec<_>>(),
            vec![(0, 0), (1, 12), (2, 24)],
        );
        assert_eq!(layout.binding_description(0).stride, 32);
        assert_eq!(layout.binding_description(0).input_rate, vk::VertexInputRate::VERTEX);
    }
}
