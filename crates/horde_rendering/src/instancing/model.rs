//! Model table.
//!
//! One entry per distinct mesh, resolved once at setup through a
//! [`GeometryProvider`] and read-only afterwards.

use crate::error::{RenderError, RenderResult};
use crate::instancing::instance_data::{DrawIndexedIndirectArgs, ModelSlot};

/// Opaque mesh handle owned by the geometry provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryHandle(pub u32);

/// Opaque material handle owned by the draw backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MaterialHandle(pub u32);

/// What the caller supplies per model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelDesc {
    /// Mesh.
    pub geometry: GeometryHandle,
    /// Material.
    pub material: MaterialHandle,
}

impl ModelDesc {
    /// Model with the default material.
    #[must_use]
    pub const fn new(geometry: GeometryHandle) -> Self {
        Self { geometry, material: MaterialHandle(0) }
    }

    /// Sets the material.
    #[must_use]
    pub const fn with_material(mut self, material: MaterialHandle) -> Self {
        self.material = material;
        self
    }
}

/// Mesh layout queries, consumed once at setup.
pub trait GeometryProvider {
    /// Indices per instance of the mesh.
    fn index_count(&self, geometry: GeometryHandle) -> u32;

    /// First index in the shared index buffer.
    fn index_start(&self, geometry: GeometryHandle) -> u32;

    /// Value added to each index before vertex fetch.
    fn base_vertex(&self, geometry: GeometryHandle) -> u32;

    /// Radius of the mesh's bounding sphere in object space.
    fn bounding_radius(&self, geometry: GeometryHandle) -> f32;
}

/// Layout of one mesh in shared vertex/index buffers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshRange {
    /// Indices in the mesh.
    pub index_count: u32,
    /// First index.
    pub index_start: u32,
    /// Base vertex.
    pub base_vertex: u32,
    /// Bounding sphere radius around the object origin.
    pub bounding_radius: f32,
}

/// A [`GeometryProvider`] backed by a list of mesh ranges.
///
/// Unknown handles report zero indices, which setup rejects.
#[derive(Debug, Clone, Default)]
pub struct StaticGeometry {
    meshes: Vec<MeshRange>,
}

impl StaticGeometry {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a mesh and returns its handle.
    #[allow(clippy::cast_possible_truncation)]
    pub fn push(&mut self, mesh: MeshRange) -> GeometryHandle {
        self.meshes.push(mesh);
        GeometryHandle(self.meshes.len() as u32 - 1)
    }

    /// Looks up a mesh.
    #[must_use]
    pub fn get(&self, geometry: GeometryHandle) -> Option<&MeshRange> {
        self.meshes.get(geometry.0 as usize)
    }
}

impl GeometryProvider for StaticGeometry {
    fn index_count(&self, geometry: GeometryHandle) -> u32 {
        self.get(geometry).map_or(0, |m| m.index_count)
    }

    fn index_start(&self, geometry: GeometryHandle) -> u32 {
        self.get(geometry).map_or(0, |m| m.index_start)
    }

    fn base_vertex(&self, geometry: GeometryHandle) -> u32 {
        self.get(geometry).map_or(0, |m| m.base_vertex)
    }

    fn bounding_radius(&self, geometry: GeometryHandle) -> f32 {
        self.get(geometry).map_or(0.0, |m| m.bounding_radius)
    }
}

/// A resolved model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Model {
    /// Index in the model table; the culling routing key.
    pub id: u32,
    /// Mesh.
    pub geometry: GeometryHandle,
    /// Material.
    pub material: MaterialHandle,
    /// Indices per instance.
    pub index_count: u32,
    /// First index.
    pub index_start: u32,
    /// Base vertex.
    pub base_vertex: i32,
    /// Object-space bounding radius.
    pub bounding_radius: f32,
    /// Instances this model may ever hold; sizes its visible set.
    pub instance_capacity: u32,
    /// First element of its visible set partition.
    pub visible_base: u32,
}

impl Model {
    /// Static indirect args; `instance_count` starts at zero.
    #[must_use]
    pub const fn initial_args(&self) -> DrawIndexedIndirectArgs {
        DrawIndexedIndirectArgs {
            index_count: self.index_count,
            instance_count: 0,
            first_index: self.index_start,
            base_vertex: self.base_vertex,
            first_instance: self.visible_base,
        }
    }

    /// Routing entry for the cull kernel.
    #[must_use]
    pub const fn slot(&self) -> ModelSlot {
        ModelSlot {
            visible_base: self.visible_base,
            capacity: self.instance_capacity,
            _pad: [0; 2],
        }
    }
}

/// All models, with visible set partitions laid out back to back.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelTable {
    models: Vec<Model>,
    visible_capacity: u32,
}

impl ModelTable {
    /// Resolves every model through the provider.
    ///
    /// # Errors
    ///
    /// [`RenderError::Configuration`] for an empty table, a mesh with zero
    /// indices, a non-finite or negative radius, a base vertex out of `i32`
    /// range, or visible sets too large to address.
    pub fn build(
        descs: &[ModelDesc],
        geometry: &impl GeometryProvider,
        instances_per_model: u32,
    ) -> RenderResult<Self> {
        if descs.is_empty() {
            return Err(RenderError::Configuration("model table is empty".into()));
        }
        let model_count =
            u32::try_from(descs.len()).map_err(|_| RenderError::Configuration("too many models".into()))?;
        let visible_capacity = model_count.checked_mul(instances_per_model).ok_or_else(|| {
            RenderError::Configuration(format!("{model_count} x {instances_per_model} visible slots overflow"))
        })?;

        let mut models = Vec::with_capacity(descs.len());
        for (id, desc) in (0..model_count).zip(descs) {
            let index_count = geometry.index_count(desc.geometry);
            if index_count == 0 {
                return Err(RenderError::Configuration(format!(
                    "model {id}: geometry {:?} has no indices",
                    desc.geometry
                )));
            }
            let bounding_radius = geometry.bounding_radius(desc.geometry);
            if !bounding_radius.is_finite() || bounding_radius < 0.0 {
                return Err(RenderError::Configuration(format!(
                    "model {id}: invalid bounding radius {bounding_radius}"
                )));
            }
            let base_vertex = i32::try_from(geometry.base_vertex(desc.geometry))
                .map_err(|_| RenderError::Configuration(format!("model {id}: base vertex exceeds i32")))?;

            models.push(Model {
                id,
                geometry: desc.geometry,
                material: desc.material,
                index_count,
                index_start: geometry.index_start(desc.geometry),
                base_vertex,
                bounding_radius,
                instance_capacity: instances_per_model,
                visible_base: id * instances_per_model,
            });
        }

        Ok(Self { models, visible_capacity })
    }

    /// Models in id order.
    #[must_use]
    pub fn models(&self) -> &[Model] {
        &self.models
    }

    /// Looks up a model.
    #[must_use]
    pub fn get(&self, id: u32) -> Option<&Model> {
        self.models.get(id as usize)
    }

    /// Number of models.
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Always false for a built table.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Model count as `u32`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn count(&self) -> u32 {
        self.models.len() as u32
    }

    /// Total elements across all visible sets.
    #[must_use]
    pub fn visible_capacity(&self) -> u32 {
        self.visible_capacity
    }

    /// Checks that no model holds more instances than its visible set can take.
    ///
    /// # Errors
    ///
    /// [`RenderError::CapacityOverflow`] for the first model that does.
    pub fn validate_capacity(&self, instance_counts: impl IntoIterator<Item = u32>) -> RenderResult<()> {
        for (model, instances) in self.models.iter().zip(instance_counts) {
            if instances > model.instance_capacity {
                return Err(RenderError::CapacityOverflow {
                    model: model.id,
                    instances,
                    capacity: model.instance_capacity,
                });
            }
        }
        Ok(())
    }
}
