//! Instance store.
//!
//! One flat array holds every instance of every model. Models are interleaved
//! round-robin (`index = i * model_count + model`), so a model's instances
//! are never contiguous and culling has to route by `model_id`. Each model
//! keeps the list of store indices it owns for host-side work.

use horde_shared::{Mat4, Vec3};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use super::instance_data::{GpuInstance, Instance};
use super::model::ModelTable;
use super::placement;
use crate::config::RendererConfig;
use crate::culling::Aabb;
use crate::error::{RenderError, RenderResult};

/// All instances, in upload order.
#[derive(Debug, Clone)]
pub struct InstanceStore {
    instances: Vec<GpuInstance>,
    partitions: Vec<Vec<u32>>,
    bounds: Vec<Aabb>,
    seed: u64,
    generation: u64,
}

impl InstanceStore {
    /// Generates `config.instances_per_model` instances for every model.
    ///
    /// # Errors
    ///
    /// [`RenderError::Configuration`] if the config is invalid for this table
    /// or the total exceeds the hard cap.
    pub fn initialize(models: &ModelTable, config: &RendererConfig) -> RenderResult<Self> {
        config.validate(models.len())?;
        let mut store = Self {
            instances: Vec::new(),
            partitions: vec![Vec::new(); models.len()],
            bounds: vec![Aabb::EMPTY; models.len()],
            seed: config.seed,
            generation: 0,
        };
        store.generate(models, config, config.seed)?;
        Ok(store)
    }

    /// Builds a store from caller-supplied instances.
    ///
    /// # Errors
    ///
    /// [`RenderError::Configuration`] if an instance names an unknown model
    /// or the total exceeds `max_total_instances`.
    pub fn from_instances(models: &ModelTable, instances: &[Instance], max_total_instances: u32) -> RenderResult<Self> {
        let total = u32::try_from(instances.len())
            .ok()
            .filter(|n| *n <= max_total_instances)
            .ok_or_else(|| {
                RenderError::Configuration(format!(
                    "{} instances exceed the hard cap of {max_total_instances}",
                    instances.len()
                ))
            })?;

        let mut store = Self {
            instances: Vec::with_capacity(total as usize),
            partitions: vec![Vec::new(); models.len()],
            bounds: vec![Aabb::EMPTY; models.len()],
            seed: 0,
            generation: 0,
        };
        for (index, instance) in (0..total).zip(instances) {
            let model = models.get(instance.model_id).ok_or_else(|| {
                RenderError::Configuration(format!("instance {index} references unknown model {}", instance.model_id))
            })?;
            store.push(index, GpuInstance::from_instance(instance, model.bounding_radius));
        }
        Ok(store)
    }

    /// Regenerates every instance from `seed`, keeping counts.
    ///
    /// The caller must re-upload and invalidate visible sets before the next cull.
    ///
    /// # Errors
    ///
    /// Same as [`InstanceStore::initialize`].
    pub fn rebuild(&mut self, models: &ModelTable, config: &RendererConfig, seed: u64) -> RenderResult<()> {
        config.validate(models.len())?;
        if models.len() != self.partitions.len() {
            return Err(RenderError::Configuration(format!(
                "rebuild with {} models, store holds {}",
                models.len(),
                self.partitions.len()
            )));
        }
        self.generate(models, config, seed)?;
        self.seed = seed;
        self.generation += 1;
        debug!(seed, generation = self.generation, "instance store rebuilt");
        Ok(())
    }

    fn generate(&mut self, models: &ModelTable, config: &RendererConfig, seed: u64) -> RenderResult<()> {
        let per_model = config.instances_per_model;
        let model_count = models.count();
        let total = model_count.checked_mul(per_model).ok_or_else(|| {
            RenderError::Configuration(format!("{model_count} x {per_model} instances overflow"))
        })?;

        // One independent stream per model keeps populations stable when models are added
        let mut rngs: Vec<ChaCha8Rng> = (0..model_count)
            .map(|m| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                rng.set_stream(u64::from(m));
                rng
            })
            .collect();

        self.instances.clear();
        self.instances.reserve(total as usize);
        for partition in &mut self.partitions {
            partition.clear();
            partition.reserve(per_model as usize);
        }
        self.bounds.fill(Aabb::EMPTY);

        for i in 0..per_model {
            for (model, rng) in models.models().iter().zip(&mut rngs) {
                let policy = config.placement_for(model.id);
                let position = placement::position(policy, i, per_model, rng);
                let rotation = if config.random_rotation {
                    placement::rotation(rng)
                } else {
                    horde_shared::Quaternion::IDENTITY
                };
                let color = config.colorize.then(|| placement::color(rng));

                let instance = Instance {
                    transform: Mat4::from_trs(position, rotation, Vec3::ONE),
                    model_id: model.id,
                    color,
                };
                let index = i * model_count + model.id;
                self.push(index, GpuInstance::from_instance(&instance, model.bounding_radius));
            }
        }
        debug!(total, models = model_count, seed, "instance store generated");
        Ok(())
    }

    fn push(&mut self, index: u32, instance: GpuInstance) {
        let model = instance.model_id as usize;
        self.bounds[model].expand(&Aabb::from_sphere(instance.center(), instance.radius()));
        self.partitions[model].push(index);
        self.instances.push(instance);
    }

    /// Flat instance array.
    #[must_use]
    pub fn instances(&self) -> &[GpuInstance] {
        &self.instances
    }

    /// Flat instance array as upload bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.instances)
    }

    /// One instance by store index.
    #[must_use]
    pub fn instance(&self, index: u32) -> Option<&GpuInstance> {
        self.instances.get(index as usize)
    }

    /// Total instances.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn len(&self) -> u32 {
        self.instances.len() as u32
    }

    /// True when the store holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Store indices owned by a model, in store order.
    #[must_use]
    pub fn model_instances(&self, model: u32) -> &[u32] {
        self.partitions.get(model as usize).map_or(&[][..], Vec::as_slice)
    }

    /// Instances owned by a model.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn model_instance_count(&self, model: u32) -> u32 {
        self.model_instances(model).len() as u32
    }

    /// Per-model instance counts in model order.
    #[allow(clippy::cast_possible_truncation)]
    pub fn model_counts(&self) -> impl Iterator<Item = u32> + '_ {
        self.partitions.iter().map(|p| p.len() as u32)
    }

    /// Bounds enclosing every instance sphere of a model.
    #[must_use]
    pub fn model_bounds(&self, model: u32) -> Aabb {
        self.bounds.get(model as usize).copied().unwrap_or(Aabb::EMPTY)
    }

    /// Seed of the current population.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Incremented by every rebuild.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
