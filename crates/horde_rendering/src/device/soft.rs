//! Software device.
//!
//! Buffers are arrays of `AtomicU32` words so cull lanes can append with a
//! plain `fetch_add`, the same primitive the WGSL kernel uses. Commands are
//! queued and run in order on `submit`; the cull dispatch runs its lanes on
//! the rayon pool with no ordering between them.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytemuck::Pod;
use horde_shared::{Mat4, Vec4, CULL_WORKGROUP_SIZE};
use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{debug, trace, warn};

use super::{BufferDesc, BufferRole, CullBindings, GpuDevice};
use crate::culling::sphere_in_planes;
use crate::draw::{BatchDraw, DrawBackend, IndirectDraw};
use crate::error::{RenderError, RenderResult};
use crate::instancing::{CullParams, DrawIndexedIndirectArgs, GpuInstance, ModelSlot};

const PARAM_WORDS: usize = std::mem::size_of::<CullParams>() / 4;
const INSTANCE_WORDS: usize = GpuInstance::SIZE / 4;
const SLOT_WORDS: usize = std::mem::size_of::<ModelSlot>() / 4;
const ARGS_WORDS: usize = DrawIndexedIndirectArgs::SIZE as usize / 4;

/// A buffer of 32-bit words in host memory.
#[derive(Debug)]
pub struct SoftBuffer {
    label: &'static str,
    role: BufferRole,
    words: Box<[AtomicU32]>,
}

impl SoftBuffer {
    fn new(desc: &BufferDesc) -> Self {
        let len = usize::try_from(desc.size.div_ceil(4)).unwrap_or(0);
        Self {
            label: desc.label,
            role: desc.role,
            words: (0..len).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    /// Debug label.
    #[must_use]
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Usage.
    #[must_use]
    pub fn role(&self) -> BufferRole {
        self.role
    }

    /// Size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.words.len() as u64 * 4
    }

    /// Reads one word.
    #[must_use]
    pub fn read_word(&self, index: usize) -> Option<u32> {
        self.words.get(index).map(|w| w.load(Ordering::Acquire))
    }

    /// Snapshot of the whole buffer.
    #[must_use]
    pub fn read_words(&self) -> Vec<u32> {
        self.words.iter().map(|w| w.load(Ordering::Acquire)).collect()
    }

    /// Snapshot of the buffer as an array of `T` records.
    #[must_use]
    pub fn read_records<T: Pod>(&self) -> Vec<T> {
        let words = self.read_words();
        let bytes: &[u8] = bytemuck::cast_slice(&words);
        let size = std::mem::size_of::<T>().max(1);
        bytes.chunks_exact(size).map(bytemuck::pod_read_unaligned).collect()
    }

    fn load<const N: usize>(&self, at: usize) -> Option<[u32; N]> {
        let src = self.words.get(at..at.checked_add(N)?)?;
        let mut out = [0u32; N];
        for (dst, word) in out.iter_mut().zip(src) {
            *dst = word.load(Ordering::Relaxed);
        }
        Some(out)
    }

    fn store(&self, at: usize, words: &[u32]) -> bool {
        let Some(dst) = at.checked_add(words.len()).and_then(|end| self.words.get(at..end)) else {
            return false;
        };
        for (word, value) in dst.iter().zip(words) {
            word.store(*value, Ordering::Release);
        }
        true
    }

    fn zero(&self) {
        for word in self.words.iter() {
            word.store(0, Ordering::Release);
        }
    }
}

/// One observable step on the device or draw timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineEvent {
    /// Queue write executed.
    Write(&'static str),
    /// Buffer cleared.
    Clear(&'static str),
    /// Cull kernel ran.
    Dispatch {
        /// Workgroups launched.
        workgroups: u32,
    },
    /// Buffer copy executed.
    Copy {
        /// Source label.
        src: &'static str,
        /// Destination label.
        dst: &'static str,
    },
    /// A submit finished executing.
    Submit,
    /// Indirect draw recorded.
    DrawIndirect {
        /// Model id.
        model: u32,
    },
    /// Direct batch draw recorded.
    DrawBatch {
        /// Model id.
        model: u32,
        /// Instances in the batch.
        count: u32,
    },
}

type SharedTimeline = Arc<Mutex<Vec<TimelineEvent>>>;

fn record(timeline: Option<&SharedTimeline>, event: TimelineEvent) {
    if let Some(timeline) = timeline {
        timeline.lock().push(event);
    }
}

enum Command {
    Write {
        buffer: Arc<SoftBuffer>,
        at: usize,
        words: Vec<u32>,
    },
    Clear(Arc<SoftBuffer>),
    Dispatch {
        params: Arc<SoftBuffer>,
        instances: Arc<SoftBuffer>,
        models: Arc<SoftBuffer>,
        counters: Arc<SoftBuffer>,
        visible: Arc<SoftBuffer>,
        workgroups: u32,
    },
    Copy {
        src: Arc<SoftBuffer>,
        src_at: usize,
        dst: Arc<SoftBuffer>,
        dst_at: usize,
        words: usize,
    },
}

/// CPU implementation of [`GpuDevice`].
pub struct SoftDevice {
    indirect: bool,
    lost: bool,
    fault: Option<String>,
    queue: Vec<Command>,
    live_buffers: usize,
    timeline: Option<SharedTimeline>,
}

impl SoftDevice {
    /// Device with indirect draw support.
    #[must_use]
    pub fn new() -> Self {
        Self {
            indirect: true,
            lost: false,
            fault: None,
            queue: Vec::new(),
            live_buffers: 0,
            timeline: None,
        }
    }

    /// Records executed commands, and draws of backends created afterwards,
    /// until drained with [`SoftDevice::take_timeline`].
    ///
    /// Off by default so a long-running headless device keeps no log.
    #[must_use]
    pub fn with_timeline(mut self) -> Self {
        self.timeline = Some(Arc::new(Mutex::new(Vec::new())));
        self
    }

    /// Device that reports no indirect support.
    #[must_use]
    pub fn without_indirect() -> Self {
        Self { indirect: false, ..Self::new() }
    }

    /// Simulates device loss: the next submit fails and buffers stop being
    /// created until [`SoftDevice::recover`].
    pub fn lose_device(&mut self) {
        warn!("soft device: simulated device loss");
        self.lost = true;
    }

    /// Brings a lost device back.
    pub fn recover(&mut self) {
        self.lost = false;
    }

    /// Buffers created and not yet released.
    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.live_buffers
    }

    /// Draw backend sharing this device's timeline, if it keeps one.
    #[must_use]
    pub fn draw_backend(&self) -> SoftDrawBackend {
        SoftDrawBackend::with_timeline(self.indirect, self.timeline.clone())
    }

    /// Drains the recorded timeline. Empty unless built with
    /// [`SoftDevice::with_timeline`].
    pub fn take_timeline(&self) -> Vec<TimelineEvent> {
        self.timeline.as_ref().map(|t| std::mem::take(&mut *t.lock())).unwrap_or_default()
    }

    fn record(&self, event: TimelineEvent) {
        record(self.timeline.as_ref(), event);
    }

    fn execute(&self, command: Command) -> RenderResult<()> {
        match command {
            Command::Write { buffer, at, words } => {
                if !buffer.store(at, &words) {
                    return Err(RenderError::Configuration(format!("write out of bounds on '{}'", buffer.label)));
                }
                self.record(TimelineEvent::Write(buffer.label));
            }
            Command::Clear(buffer) => {
                buffer.zero();
                self.record(TimelineEvent::Clear(buffer.label));
            }
            Command::Dispatch { params, instances, models, counters, visible, workgroups } => {
                run_cull(&params, &instances, &models, &counters, &visible, workgroups);
                self.record(TimelineEvent::Dispatch { workgroups });
            }
            Command::Copy { src, src_at, dst, dst_at, words } => {
                let Some(data) = src_at
                    .checked_add(words)
                    .and_then(|end| src.words.get(src_at..end))
                    .map(|s| s.iter().map(|w| w.load(Ordering::Acquire)).collect::<Vec<_>>())
                else {
                    return Err(RenderError::Configuration(format!("copy out of bounds on '{}'", src.label)));
                };
                if !dst.store(dst_at, &data) {
                    return Err(RenderError::Configuration(format!("copy out of bounds on '{}'", dst.label)));
                }
                self.record(TimelineEvent::Copy { src: src.label, dst: dst.label });
            }
        }
        Ok(())
    }
}

impl Default for SoftDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SoftDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftDevice")
            .field("indirect", &self.indirect)
            .field("lost", &self.lost)
            .field("queued", &self.queue.len())
            .field("live_buffers", &self.live_buffers)
            .finish_non_exhaustive()
    }
}

fn word_index(bytes: u64) -> Option<usize> {
    (bytes % 4 == 0).then(|| usize::try_from(bytes / 4).ok()).flatten()
}

impl GpuDevice for SoftDevice {
    type Buffer = Arc<SoftBuffer>;

    fn supports_indirect(&self) -> bool {
        self.indirect
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> RenderResult<Self::Buffer> {
        if self.lost {
            return Err(RenderError::DeviceLost(format!("cannot create '{}'", desc.label)));
        }
        if desc.size % 4 != 0 {
            return Err(RenderError::Configuration(format!(
                "buffer '{}' size {} is not a multiple of 4",
                desc.label, desc.size
            )));
        }
        self.live_buffers += 1;
        debug!(label = desc.label, role = desc.role.name(), size = desc.size, "soft device: buffer created");
        Ok(Arc::new(SoftBuffer::new(desc)))
    }

    fn write_buffer(&mut self, buffer: &Self::Buffer, offset: u64, data: &[u8]) {
        let Some(at) = word_index(offset).filter(|_| data.len() % 4 == 0) else {
            self.fault = Some(format!("unaligned write on '{}'", buffer.label));
            return;
        };
        let words = data.chunks_exact(4).map(bytemuck::pod_read_unaligned::<u32>).collect();
        self.queue.push(Command::Write { buffer: Arc::clone(buffer), at, words });
    }

    fn clear_buffer(&mut self, buffer: &Self::Buffer) {
        self.queue.push(Command::Clear(Arc::clone(buffer)));
    }

    fn dispatch_cull(&mut self, bindings: &CullBindings<'_, Self::Buffer>, workgroups: u32) {
        self.queue.push(Command::Dispatch {
            params: Arc::clone(bindings.params),
            instances: Arc::clone(bindings.instances),
            models: Arc::clone(bindings.models),
            counters: Arc::clone(bindings.counters),
            visible: Arc::clone(bindings.visible),
            workgroups,
        });
    }

    fn copy_buffer(&mut self, src: &Self::Buffer, src_offset: u64, dst: &Self::Buffer, dst_offset: u64, size: u64) {
        match (word_index(src_offset), word_index(dst_offset), word_index(size)) {
            (Some(src_at), Some(dst_at), Some(words)) => self.queue.push(Command::Copy {
                src: Arc::clone(src),
                src_at,
                dst: Arc::clone(dst),
                dst_at,
                words,
            }),
            _ => self.fault = Some(format!("unaligned copy '{}' -> '{}'", src.label, dst.label)),
        }
    }

    fn submit(&mut self) -> RenderResult<()> {
        let commands = std::mem::take(&mut self.queue);
        if self.lost {
            // Faults belong to the discarded commands
            self.fault = None;
            return Err(RenderError::DeviceLost(format!("{} commands discarded", commands.len())));
        }
        if let Some(fault) = self.fault.take() {
            return Err(RenderError::Configuration(fault));
        }
        trace!(commands = commands.len(), "soft device: submit");
        for command in commands {
            self.execute(command)?;
        }
        self.record(TimelineEvent::Submit);
        Ok(())
    }

    fn release_buffer(&mut self, buffer: Self::Buffer) {
        self.live_buffers = self.live_buffers.saturating_sub(1);
        debug!(label = buffer.label, "soft device: buffer released");
    }
}

#[allow(clippy::cast_possible_truncation)]
fn run_cull(
    params: &SoftBuffer,
    instances: &SoftBuffer,
    models: &SoftBuffer,
    counters: &SoftBuffer,
    visible: &SoftBuffer,
    workgroups: u32,
) {
    let Some(raw) = params.load::<PARAM_WORDS>(0) else {
        return;
    };
    let params: CullParams = bytemuck::cast(raw);
    let lanes = workgroups as usize * CULL_WORKGROUP_SIZE as usize;
    let count = lanes.min(params.instance_count as usize);

    (0..count).into_par_iter().for_each(|index| {
        let Some(raw) = instances.load::<INSTANCE_WORDS>(index * INSTANCE_WORDS) else {
            return;
        };
        let instance: GpuInstance = bytemuck::cast(raw);
        if instance.model_id >= params.model_count {
            return;
        }
        let [x, y, z, radius] = instance.bounds;
        if !sphere_in_planes(&params.planes, [x, y, z], radius) {
            return;
        }

        let model = instance.model_id as usize;
        let (Some(raw_slot), Some(counter)) = (models.load::<SLOT_WORDS>(model * SLOT_WORDS), counters.words.get(model))
        else {
            return;
        };
        let slot_info: ModelSlot = bytemuck::cast(raw_slot);
        let slot = counter.fetch_add(1, Ordering::Relaxed);
        if slot < slot_info.capacity {
            if let Some(word) = visible.words.get((slot_info.visible_base + slot) as usize) {
                word.store(index as u32, Ordering::Relaxed);
            }
        }
    });
}

/// A draw as the soft backend saw it.
#[derive(Debug, Clone, PartialEq)]
pub enum SoftDrawCall {
    /// Indirect draw with the args resolved at draw time.
    Indirect {
        /// Model id.
        model: u32,
        /// Args record as the draw consumed it.
        args: DrawIndexedIndirectArgs,
        /// Instance store indices the draw would fetch.
        visible: Vec<u32>,
    },
    /// Direct batch.
    Batch {
        /// Model id.
        model: u32,
        /// Position within the model's batches.
        batch_index: u32,
        /// Transforms drawn.
        transforms: Vec<Mat4>,
        /// Colors drawn.
        colors: Option<Vec<Vec4>>,
    },
}

impl SoftDrawCall {
    /// Model the call draws.
    #[must_use]
    pub fn model(&self) -> u32 {
        match self {
            Self::Indirect { model, .. } | Self::Batch { model, .. } => *model,
        }
    }

    /// Instances the call draws.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn instance_count(&self) -> u32 {
        match self {
            Self::Indirect { args, .. } => args.instance_count,
            Self::Batch { transforms, .. } => transforms.len() as u32,
        }
    }
}

/// Recording [`DrawBackend`] for [`SoftDevice`] buffers.
///
/// Indirect draws read the args record when they are issued, which is what a
/// GPU does when it executes the draw after the copy.
#[derive(Debug)]
pub struct SoftDrawBackend {
    indirect: bool,
    max_per_call: u32,
    calls: Vec<SoftDrawCall>,
    timeline: Option<SharedTimeline>,
}

impl SoftDrawBackend {
    fn with_timeline(indirect: bool, timeline: Option<SharedTimeline>) -> Self {
        Self {
            indirect,
            max_per_call: horde_shared::MAX_INSTANCES_PER_DRAW_CALL,
            calls: Vec::new(),
            timeline,
        }
    }

    /// Standalone backend that records calls but no timeline.
    #[must_use]
    pub fn new(indirect: bool) -> Self {
        Self::with_timeline(indirect, None)
    }

    /// Overrides the per-call instance cap.
    #[must_use]
    pub fn with_max_instances_per_call(mut self, max: u32) -> Self {
        self.max_per_call = max;
        self
    }

    /// Calls recorded since the last `begin_frame`.
    #[must_use]
    pub fn calls(&self) -> &[SoftDrawCall] {
        &self.calls
    }

    /// Total instances drawn per model this frame.
    #[must_use]
    pub fn instances_per_model(&self, model_count: usize) -> Vec<u32> {
        let mut totals = vec![0u32; model_count];
        for call in &self.calls {
            if let Some(total) = totals.get_mut(call.model() as usize) {
                *total += call.instance_count();
            }
        }
        totals
    }
}

impl DrawBackend<Arc<SoftBuffer>> for SoftDrawBackend {
    fn supports_indirect(&self) -> bool {
        self.indirect
    }

    fn max_instances_per_call(&self) -> u32 {
        self.max_per_call
    }

    fn begin_frame(&mut self) {
        self.calls.clear();
    }

    fn draw_indexed_indirect(&mut self, draw: &IndirectDraw<'_, Arc<SoftBuffer>>) -> RenderResult<()> {
        let at = word_index(draw.args_offset)
            .ok_or_else(|| RenderError::Configuration("unaligned indirect args offset".into()))?;
        let raw = draw
            .args
            .load::<ARGS_WORDS>(at)
            .ok_or_else(|| RenderError::Configuration(format!("args offset {} out of range", draw.args_offset)))?;
        let args: DrawIndexedIndirectArgs = bytemuck::cast(raw);

        let first = args.first_instance as usize;
        let visible = (first..first + args.instance_count as usize)
            .filter_map(|i| draw.visible.read_word(i))
            .collect();

        record(self.timeline.as_ref(), TimelineEvent::DrawIndirect { model: draw.model });
        self.calls.push(SoftDrawCall::Indirect { model: draw.model, args, visible });
        Ok(())
    }

    fn draw_instanced(&mut self, draw: &BatchDraw<'_>) -> RenderResult<()> {
        if draw.count() > self.max_per_call {
            return Err(RenderError::Configuration(format!(
                "batch of {} exceeds per-call cap {}",
                draw.count(),
                self.max_per_call
            )));
        }
        record(self.timeline.as_ref(), TimelineEvent::DrawBatch { model: draw.model, count: draw.count() });
        self.calls.push(SoftDrawCall::Batch {
            model: draw.model,
            batch_index: draw.batch_index,
            transforms: draw.transforms.to_vec(),
            colors: draw.colors.map(<[Vec4]>::to_vec),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(device: &mut SoftDevice, label: &'static str, size: u64) -> Arc<SoftBuffer> {
        device
            .create_buffer(&BufferDesc { label, size, role: BufferRole::Counters })
            .unwrap()
    }

    #[test]
    fn test_commands_run_in_order_on_submit() {
        let mut device = SoftDevice::new().with_timeline();
        let a = buffer(&mut device, "a", 16);
        let b = buffer(&mut device, "b", 16);

        device.write_buffer(&a, 4, bytemuck::bytes_of(&7u32));
        device.copy_buffer(&a, 4, &b, 8, 4);
        device.clear_buffer(&a);

        // Nothing happens before submit
        assert_eq!(a.read_word(1), Some(0));

        device.submit().unwrap();
        assert_eq!(a.read_words(), vec![0; 4]);
        assert_eq!(b.read_words(), vec![0, 0, 7, 0]);
        assert_eq!(
            device.take_timeline(),
            vec![
                TimelineEvent::Write("a"),
                TimelineEvent::Copy { src: "a", dst: "b" },
                TimelineEvent::Clear("a"),
                TimelineEvent::Submit,
            ]
        );
    }

    #[test]
    fn test_lost_device_discards_commands() {
        let mut device = SoftDevice::new();
        let a = buffer(&mut device, "a", 8);
        device.write_buffer(&a, 0, bytemuck::bytes_of(&1u32));
        device.lose_device();

        let err = device.submit().unwrap_err();
        assert!(err.requires_reinit());
        assert_eq!(a.read_word(0), Some(0));
        assert!(device.create_buffer(&BufferDesc { label: "b", size: 4, role: BufferRole::Uniform }).is_err());

        device.recover();
        device.submit().unwrap();
    }

    #[test]
    fn test_timeline_off_by_default() {
        let mut device = SoftDevice::new();
        let a = buffer(&mut device, "a", 8);
        for _ in 0..100 {
            device.write_buffer(&a, 0, bytemuck::bytes_of(&1u32));
            device.clear_buffer(&a);
            device.submit().unwrap();
        }
        assert!(device.take_timeline().is_empty());
    }

    #[test]
    fn test_fault_discarded_with_lost_commands() {
        let mut device = SoftDevice::new();
        let a = buffer(&mut device, "a", 8);
        device.write_buffer(&a, 2, &[1, 2, 3, 4]);
        device.lose_device();
        assert!(matches!(device.submit(), Err(RenderError::DeviceLost(_))));

        device.recover();
        device.write_buffer(&a, 0, bytemuck::bytes_of(&5u32));
        device.submit().unwrap();
        assert_eq!(a.read_word(0), Some(5));
    }

    #[test]
    fn test_unaligned_write_fails_submit() {
        let mut device = SoftDevice::new();
        let a = buffer(&mut device, "a", 8);
        device.write_buffer(&a, 2, &[1, 2, 3, 4]);
        assert!(matches!(device.submit(), Err(RenderError::Configuration(_))));
    }

    #[test]
    fn test_release_tracks_live_buffers() {
        let mut device = SoftDevice::new();
        let a = buffer(&mut device, "a", 8);
        let b = buffer(&mut device, "b", 8);
        assert_eq!(device.live_buffers(), 2);
        device.release_buffer(a);
        device.release_buffer(b);
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn test_read_records() {
        let mut device = SoftDevice::new();
        let args = buffer(&mut device, "args", DrawIndexedIndirectArgs::SIZE * 2);
        let record = DrawIndexedIndirectArgs { index_count: 36, instance_count: 5, first_instance: 9, ..Default::default() };
        device.write_buffer(&args, DrawIndexedIndirectArgs::SIZE, bytemuck::bytes_of(&record));
        device.submit().unwrap();

        let records: Vec<DrawIndexedIndirectArgs> = args.read_records();
        assert_eq!(records, vec![DrawIndexedIndirectArgs::default(), record]);
    }
}
