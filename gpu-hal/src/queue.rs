use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use crate::device::DeviceShared;
use crate::error::DeviceError;
use crate::sync::{TimelineSemaphore, TimelineSemaphoreHandle};

/// One queue plus the timeline semaphore that tracks its completed work,
/// grounded in `gpu-hal/src/vulkan/queue.rs`'s `Queue::submit`, extended to
/// expose the timeline handle for cross-queue waits rather than treating it
/// purely as a CPU-side fence.
pub struct CommandQueue {
    pub(crate) device: Arc<DeviceShared>,
    pub(crate) raw: vk::Queue,
    pub(crate) family_index: u32,
    timeline: Mutex<TimelineSemaphore>,
}

/// A GPU-side wait on another queue's timeline semaphore, batched into the
/// next submission's `VkTimelineSemaphoreSubmitInfo::pWaitSemaphoreValues`.
pub struct TimelineWait {
    pub semaphore: TimelineSemaphoreHandle,
    pub stage: vk::PipelineStageFlags2,
}

/// Raw binary-semaphore waits/signals. The caller (`gpu-core`'s frame ring,
/// or `Surface` for swapchain acquire/present) owns the `BinarySemaphore`
/// state machine and is responsible for calling `mark_waited`/`mark_signalled`
/// around this submission; `CommandQueue` only sees the handles.
#[derive(Default)]
pub struct SubmitBatch {
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub timeline_waits: Vec<TimelineWait>,
    pub binary_waits: Vec<(vk::Semaphore, vk::PipelineStageFlags2)>,
    pub binary_signals: Vec<vk::Semaphore>,
}

impl CommandQueue {
    pub fn new(device: &Arc<DeviceShared>, family_index: u32) -> Result<Self, DeviceError> {
        let raw = unsafe { device.raw.get_device_queue(family_index, 0) };
        let timeline = TimelineSemaphore::new(&device.raw, family_index)?;
        Ok(Self {
            device: device.clone(),
            raw,
            family_index,
            timeline: Mutex::new(timeline),
        })
    }

    pub fn timeline_handle(&self) -> TimelineSemaphoreHandle {
        self.timeline.lock().handle()
    }

    pub fn family_index(&self) -> u32 {
        self.family_index
    }

    /// Submit a batch of command buffers, waiting on any given timeline or
    /// binary semaphores and signalling this queue's own timeline semaphore
    /// to a fresh value, returned to the caller for later polling.
    ///
    /// Mirrors `gpu-hal`'s `Queue::submit`: one `vkQueueSubmit2` call built
    /// from `VkSemaphoreSubmitInfo` wait/signal arrays, using
    /// `synchronization2` instead of the legacy `pWaitDstStageMask` array so
    /// binary and timeline waits share one submission path.
    pub fn submit(&self, batch: SubmitBatch) -> Result<u64, DeviceError> {
        let mut timeline = self.timeline.lock();
        let signal_value = timeline.next_signal_value();

        let mut wait_infos: Vec<vk::SemaphoreSubmitInfo> = Vec::new();
        for wait in &batch.timeline_waits {
            wait_infos.push(
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(wait.semaphore.raw)
                    .value(wait.semaphore.value)
                    .stage_mask(wait.stage),
            );
        }
        for (semaphore, stage) in &batch.binary_waits {
            wait_infos.push(
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(*semaphore)
                    .stage_mask(*stage),
            );
        }

        let mut signal_infos = vec![vk::SemaphoreSubmitInfo::default()
            .semaphore(timeline.raw)
            .value(signal_value)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)];
        for semaphore in &batch.binary_signals {
            signal_infos.push(
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(*semaphore)
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS),
            );
        }

        let command_buffer_infos: Vec<vk::CommandBufferSubmitInfo> = batch
            .command_buffers
            .iter()
            .map(|&cmd| vk::CommandBufferSubmitInfo::default().command_buffer(cmd))
            .collect();

        let submit_info = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&wait_infos)
            .command_buffer_infos(&command_buffer_infos)
            .signal_semaphore_infos(&signal_infos);

        unsafe {
            self.device
                .raw
                .queue_submit2(self.raw, &[submit_info], vk::Fence::null())?
        };

        Ok(signal_value)
    }

    /// Present a swapchain image, waiting on `wait` (a binary semaphore per
    /// the Vulkan WSI contract, which does not support timeline semaphores).
    /// Returns `Ok(true)` if the surface is suboptimal but still presentable.
    /// The caller is responsible for `wait`'s state-machine transition.
    pub fn present(
        &self,
        swapchain_fn: &ash::khr::swapchain::Device,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<bool, DeviceError> {
        let wait_semaphores = [wait];
        let swapchains = [swapchain];
        let indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);

        let result = unsafe { swapchain_fn.queue_present(self.raw, &present_info) };
        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(err) => Err(err.into()),
        }
    }

    pub fn wait_idle(&self) -> Result<(), DeviceError> {
        unsafe { self.device.raw.queue_wait_idle(self.raw)? };
        Ok(())
    }

    /// Block the CPU until this queue's timeline semaphore reaches `value`.
    /// The frame ring uses this to recycle the oldest slot without a full
    /// `wait_idle`, waiting only on the specific submission that slot's
    /// commands belonged to.
    pub fn wait_for_timeline_value(&self, value: u64, timeout_ns: u64) -> Result<(), DeviceError> {
        self.timeline.lock().wait(&self.device.raw, value, timeout_ns)?;
        Ok(())
    }

    pub fn current_timeline_value(&self) -> u64 {
        self.timeline.lock().current_value()
    }

    pub fn get_timestamp_period(&self) -> f32 {
        self.device.capabilities.timestamp_period
    }
}
