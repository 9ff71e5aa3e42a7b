use ash::vk;

/// A GPU-GPU and CPU-GPU timeline semaphore, one per `CommandQueue`.
///
/// Unlike `wgpu-hal`'s `Fence`, which only ever observes a timeline
/// semaphore from the CPU side, this crate also hands the raw handle and
/// current target value to *other queues'* submissions as a
/// `VkTimelineSemaphoreSubmitInfo` wait, so this wraps the handle without
/// hiding it behind a CPU-only polling API.
#[derive(Clone, Copy, Debug)]
pub struct TimelineSemaphoreHandle {
    pub queue_family_index: u32,
    pub raw: vk::Semaphore,
    pub value: u64,
}

pub struct TimelineSemaphore {
    pub(crate) raw: vk::Semaphore,
    pub(crate) queue_family_index: u32,
    next_value: u64,
}

impl TimelineSemaphore {
    pub fn new(device: &ash::Device, queue_family_index: u32) -> Result<Self, vk::Result> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);
        let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
        let raw = unsafe { device.create_semaphore(&create_info, None) }?;
        Ok(Self {
            raw,
            queue_family_index,
            next_value: 0,
        })
    }

    /// Reserve and return the next signal value a submission will bump this
    /// semaphore to. Call exactly once per `vkQueueSubmit`.
    pub fn next_signal_value(&mut self) -> u64 {
        self.next_value += 1;
        self.next_value
    }

    pub fn current_value(&self) -> u64 {
        self.next_value
    }

    pub fn handle(&self) -> TimelineSemaphoreHandle {
        TimelineSemaphoreHandle {
            queue_family_index: self.queue_family_index,
            raw: self.raw,
            value: self.next_value,
        }
    }

    pub fn query_completed_value(&self, device: &ash::Device) -> Result<u64, vk::Result> {
        unsafe { device.get_semaphore_counter_value(self.raw) }
    }

    /// Block the calling thread until `value` is reached, the CPU-side wait
    /// used by frame-ring recycling.
    pub fn wait(&self, device: &ash::Device, value: u64, timeout_ns: u64) -> Result<(), vk::Result> {
        let semaphores = [self.raw];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        unsafe { device.wait_semaphores(&wait_info, timeout_ns) }
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe { device.destroy_semaphore(self.raw, None) };
    }
}

/// Binary semaphore lifecycle state, ported from `original_source`'s
/// `BinarySemaphore::State`.
///
/// A binary semaphore may only be waited on exactly once after being
/// signalled; reusing one out of order is a Vulkan validation-layer fatal
/// error, not a recoverable `Result`, so transitions assert unconditionally
/// in both debug and release builds (a resolved open question — see
/// DESIGN.md).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BinarySemaphoreState {
    Init,
    Signalled,
    Waited,
}

pub struct BinarySemaphore {
    pub(crate) raw: vk::Semaphore,
    state: BinarySemaphoreState,
}

impl BinarySemaphore {
    pub fn new(device: &ash::Device) -> Result<Self, vk::Result> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let raw = unsafe { device.create_semaphore(&create_info, None) }?;
        Ok(Self {
            raw,
            state: BinarySemaphoreState::Init,
        })
    }

    pub fn raw(&self) -> vk::Semaphore {
        self.raw
    }

    /// Mark as signalled by a just-submitted batch (e.g. swapchain acquire,
    /// or a queue relay semaphore).
    pub fn mark_signalled(&mut self) {
        assert_eq!(
            self.state,
            BinarySemaphoreState::Init,
            "binary semaphore signalled twice without an intervening wait"
        );
        self.state = BinarySemaphoreState::Signalled;
    }

    /// Mark as consumed by a wait in a submission or present call.
    pub fn mark_waited(&mut self) {
        assert_eq!(
            self.state,
            BinarySemaphoreState::Signalled,
            "binary semaphore waited on before being signalled"
        );
        self.state = BinarySemaphoreState::Waited;
    }

    /// Reset to `Init` once the GPU work that consumed it has retired,
    /// ready for reuse in the frame-ring.
    pub fn reset(&mut self) {
        assert_eq!(
            self.state,
            BinarySemaphoreState::Waited,
            "binary semaphore reset before being waited on"
        );
        self.state = BinarySemaphoreState::Init;
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe { device.destroy_semaphore(self.raw, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake(state: BinarySemaphoreState) -> BinarySemaphore {
        BinarySemaphore {
            raw: vk::Semaphore::null(),
            state,
        }
    }

    #[test]
    #[should_panic(expected = "signalled twice")]
    fn double_signal_panics() {
        let mut sem = fake(BinarySemaphoreState::Signalled);
        sem.mark_signalled();
    }

    #[test]
    #[should_panic(expected = "waited on before being signalled")]
    fn wait_before_signal_panics() {
        let mut sem = fake(BinarySemaphoreState::Init);
        sem.mark_waited();
    }

    #[test]
    fn happy_path_cycle() {
        let mut sem = fake(BinarySemaphoreState::Init);
        sem.mark_signalled();
        sem.mark_waited();
        sem.reset();
        assert_eq!(sem.state, BinarySemaphoreState::Init);
    }
}
