// renderer/material.rs

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use glam::{Mat4, Vec4};

use crate::asset::Handle;
use crate::renderer::channel::ChannelType;
use crate::renderer::device::{Effect, Technique, Texture};

/// Kind of rendering pass a draw context collects for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderingPass {
    Color,
    Shadow,
    Reflection,
    Depth,
}

/// A single shader input written by name.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropertyValue {
    Float(f32),
    Int(i32),
    Bool(bool),
    Vector(Vec4),
    Matrix(Mat4),
    Texture(Handle<Texture>),
}

/// Named constants and textures applied to an effect before drawing.
///
/// Property sets are shared through `Rc` and compared by identity: two
/// render ops holding the same `Rc` never cause a redundant upload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaterialProperties {
    values: BTreeMap<String, PropertyValue>,
}

impl MaterialProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: PropertyValue) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: PropertyValue) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PassTechniques {
    effect: Handle<Effect>,
    technique: Handle<Technique>,
    instanced: Option<Handle<Technique>>,
}

/// What a material resolves to for one rendering pass.
#[derive(Debug, Clone)]
pub struct ResolvedMaterial {
    pub effect: Handle<Effect>,
    pub technique: Handle<Technique>,
    pub properties: Rc<MaterialProperties>,
    pub instanced: bool,
}

/// A material with per-pass effect/technique selection.
///
/// A material that has no technique for a pass opts out of it; draws made
/// with it in that pass are dropped without error.
#[derive(Debug, Clone)]
pub struct Material {
    channel: ChannelType,
    properties: Rc<MaterialProperties>,
    passes: HashMap<RenderingPass, PassTechniques>,
}

impl Material {
    pub fn new(channel: ChannelType, properties: MaterialProperties) -> Self {
        Self::with_shared_properties(channel, Rc::new(properties))
    }

    pub fn with_shared_properties(
        channel: ChannelType,
        properties: Rc<MaterialProperties>,
    ) -> Self {
        Self {
            channel,
            properties,
            passes: HashMap::new(),
        }
    }

    pub fn with_pass(
        mut self,
        pass: RenderingPass,
        effect: Handle<Effect>,
        technique: Handle<Technique>,
    ) -> Self {
        self.passes.insert(
            pass,
            PassTechniques {
                effect,
                technique,
                instanced: None,
            },
        );
        self
    }

    /// Registers a pass that also has a hardware-instanced technique.
    pub fn with_instanced_pass(
        mut self,
        pass: RenderingPass,
        effect: Handle<Effect>,
        technique: Handle<Technique>,
        instanced: Handle<Technique>,
    ) -> Self {
        self.passes.insert(
            pass,
            PassTechniques {
                effect,
                technique,
                instanced: Some(instanced),
            },
        );
        self
    }

    pub fn channel(&self) -> ChannelType {
        self.channel
    }

    pub fn properties(&self) -> &Rc<MaterialProperties> {
        &self.properties
    }

    pub fn supports_pass(&self, pass: RenderingPass) -> bool {
        self.passes.contains_key(&pass)
    }

    /// Resolves the technique for `pass`, falling back to the non-instanced
    /// technique when no instanced one exists. `None` means the material does
    /// not take part in the pass.
    pub fn resolve(&self, pass: RenderingPass, wants_instancing: bool) -> Option<ResolvedMaterial> {
        let techniques = self.passes.get(&pass)?;
        let (technique, instanced) = match (wants_instancing, techniques.instanced) {
            (true, Some(instanced)) => (instanced, true),
            _ => (techniques.technique, false),
        };

        Some(ResolvedMaterial {
            effect: techniques.effect,
            technique,
            properties: Rc::clone(&self.properties),
            instanced,
        })
    }
}

/// Replaces every drawn material while pushed on a draw context.
///
/// Used for passes that render scene geometry with a single shader, such as
/// depth-only or highlight passes.
#[derive(Debug, Clone)]
pub struct OverrideBlock {
    rigid: Material,
    skinned: Material,
}

impl OverrideBlock {
    pub fn new(rigid: Material, skinned: Material) -> Self {
        Self { rigid, skinned }
    }

    pub fn process<'a>(&'a self, _material: &'a Material, is_skinned: bool) -> &'a Material {
        if is_skinned {
            &self.skinned
        } else {
            &self.rigid
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material() -> Material {
        Material::new(
            ChannelType::Opaque,
            MaterialProperties::new().with("tint", PropertyValue::Float(0.5)),
        )
        .with_instanced_pass(
            RenderingPass::Color,
            Handle::new(0),
            Handle::new(0),
            Handle::new(1),
        )
        .with_pass(RenderingPass::Shadow, Handle::new(1), Handle::new(0))
    }

    #[test]
    fn resolve_prefers_instanced_technique_when_requested() {
        let resolved = material().resolve(RenderingPass::Color, true).unwrap();
        assert!(resolved.instanced);
        assert_eq!(resolved.technique, Handle::new(1));

        let resolved = material().resolve(RenderingPass::Color, false).unwrap();
        assert!(!resolved.instanced);
        assert_eq!(resolved.technique, Handle::new(0));
    }

    #[test]
    fn resolve_falls_back_when_no_instanced_technique() {
        let resolved = material().resolve(RenderingPass::Shadow, true).unwrap();
        assert!(!resolved.instanced);
        assert_eq!(resolved.effect, Handle::new(1));
    }

    #[test]
    fn unsupported_pass_resolves_to_none() {
        assert!(material().resolve(RenderingPass::Reflection, false).is_none());
        assert!(!material().supports_pass(RenderingPass::Depth));
    }

    #[test]
    fn clones_share_property_identity() {
        let a = material();
        let b = a.clone();
        assert!(Rc::ptr_eq(a.properties(), b.properties()));
    }

    #[test]
    fn override_block_selects_by_skinning() {
        let rigid = Material::new(ChannelType::Opaque, MaterialProperties::new());
        let skinned = Material::new(ChannelType::Transparent, MaterialProperties::new());
        let block = OverrideBlock::new(rigid, skinned);
        let original = material();

        assert_eq!(block.process(&original, false).channel(), ChannelType::Opaque);
        assert_eq!(
            block.process(&original, true).channel(),
            ChannelType::Transparent
        );
    }
}
