//! WGSL sources for the instancing pipeline.
//!
//! 1. Cull kernel - six-plane sphere test, per-model append
//! 2. Instance shader - vertex/fragment for both draw paths
//!
//! Struct layouts mirror `instancing::instance_data` exactly.

/// Entry point of the cull kernel.
pub const CULL_ENTRY_POINT: &str = "cull_main";

/// Vertex entry point for the indirect path (instance fetched through the visible set).
pub const VS_INDIRECT_ENTRY_POINT: &str = "vs_indirect";

/// Vertex entry point for the batched path (instance data in a vertex buffer).
pub const VS_BATCHED_ENTRY_POINT: &str = "vs_batched";

/// Fragment entry point shared by both paths.
pub const FS_ENTRY_POINT: &str = "fs_main";

/// Frustum cull compute kernel.
///
/// Bindings (group 0):
/// - 0: `CullParams` uniform
/// - 1: instance store (read)
/// - 2: model slots (read)
/// - 3: per-model counters (atomic, cleared before dispatch)
/// - 4: visible sets, partitioned by `ModelSlot::visible_base`
pub const CULL_SHADER_WGSL: &str = r#"
// Frustum Cull Compute Shader
// One lane per instance; survivors are appended to their model's visible set

struct Instance {
    transform: mat4x4<f32>,
    color: vec4<f32>,
    bounds: vec4<f32>,      // xyz = world center, w = radius
    model_id: u32,
    flags: u32,
    _pad: vec2<u32>,
}

struct ModelSlot {
    visible_base: u32,
    capacity: u32,
    _pad: vec2<u32>,
}

struct CullParams {
    planes: array<vec4<f32>, 6>,
    instance_count: u32,
    model_count: u32,
    _pad: vec2<u32>,
}

@group(0) @binding(0) var<uniform> params: CullParams;
@group(0) @binding(1) var<storage, read> instances: array<Instance>;
@group(0) @binding(2) var<storage, read> models: array<ModelSlot>;
@group(0) @binding(3) var<storage, read_write> counters: array<atomic<u32>>;
@group(0) @binding(4) var<storage, read_write> visible: array<u32>;

fn sphere_visible(center: vec3<f32>, radius: f32) -> bool {
    for (var i = 0u; i < 6u; i++) {
        let p = params.planes[i];
        if p.x * center.x + p.y * center.y + p.z * center.z + p.w < -radius {
            return false;
        }
    }
    return true;
}

@compute @workgroup_size(64)
fn cull_main(@builtin(global_invocation_id) global_id: vec3<u32>) {
    let index = global_id.x;
    if index >= params.instance_count {
        return;
    }

    let instance = instances[index];
    if instance.model_id >= params.model_count {
        return;
    }

    if !sphere_visible(instance.bounds.xyz, instance.bounds.w) {
        return;
    }

    let model = models[instance.model_id];
    let slot = atomicAdd(&counters[instance.model_id], 1u);

    // Capacity is validated at setup; the guard only keeps writes in range
    if slot < model.capacity {
        visible[model.visible_base + slot] = index;
    }
}
"#;

/// Vertex and fragment shader for instanced draws.
///
/// `vs_indirect` resolves `instance_index` (which starts at the model's
/// visible base via `first_instance`) through the visible set into the
/// instance store. `vs_batched` reads the same data from per-instance
/// vertex attributes.
pub const INSTANCE_SHADER_WGSL: &str = r#"
// Instanced Mesh Shader

struct Instance {
    transform: mat4x4<f32>,
    color: vec4<f32>,
    bounds: vec4<f32>,
    model_id: u32,
    flags: u32,
    _pad: vec2<u32>,
}

struct Camera {
    view_proj: mat4x4<f32>,
}

struct Material {
    tint: vec4<f32>,
}

@group(0) @binding(0) var<uniform> camera: Camera;
@group(0) @binding(1) var<uniform> material: Material;

@group(1) @binding(0) var<storage, read> instances: array<Instance>;
@group(1) @binding(1) var<storage, read> visible: array<u32>;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) color: vec4<f32>,
    @location(1) normal: vec3<f32>,
}

fn shade(vertex: VertexInput, transform: mat4x4<f32>, color: vec4<f32>) -> VertexOutput {
    var out: VertexOutput;
    let world = transform * vec4<f32>(vertex.position, 1.0);
    out.clip_position = camera.view_proj * world;
    out.normal = normalize((transform * vec4<f32>(vertex.normal, 0.0)).xyz);
    out.color = color * material.tint;
    return out;
}

@vertex
fn vs_indirect(vertex: VertexInput, @builtin(instance_index) instance_index: u32) -> VertexOutput {
    let instance = instances[visible[instance_index]];
    return shade(vertex, instance.transform, instance.color);
}

@vertex
fn vs_batched(
    vertex: VertexInput,
    @location(2) col0: vec4<f32>,
    @location(3) col1: vec4<f32>,
    @location(4) col2: vec4<f32>,
    @location(5) col3: vec4<f32>,
    @location(6) color: vec4<f32>,
) -> VertexOutput {
    return shade(vertex, mat4x4<f32>(col0, col1, col2, col3), color);
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    // Fixed key light, enough to read shape
    let light = normalize(vec3<f32>(0.4, 0.8, 0.45));
    let diffuse = max(dot(in.normal, light), 0.0) * 0.8 + 0.2;
    return vec4<f32>(in.color.rgb * diffuse, in.color.a);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_points_present() {
        assert!(CULL_SHADER_WGSL.contains(&format!("fn {CULL_ENTRY_POINT}(")));
        assert!(INSTANCE_SHADER_WGSL.contains(&format!("fn {VS_INDIRECT_ENTRY_POINT}(")));
        assert!(INSTANCE_SHADER_WGSL.contains(&format!("fn {VS_BATCHED_ENTRY_POINT}(")));
        assert!(INSTANCE_SHADER_WGSL.contains(&format!("fn {FS_ENTRY_POINT}(")));
    }

    #[test]
    fn test_workgroup_size_matches_constant() {
        let attr = format!("@workgroup_size({})", horde_shared::CULL_WORKGROUP_SIZE);
        assert!(CULL_SHADER_WGSL.contains(&attr));
    }
}
