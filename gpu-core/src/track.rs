use ash::vk;

/// The pipeline stages this system's barrier synthesis distinguishes.
/// Concretizes `original_source`'s `FlagMap`-indexed visibility matrix,
/// which is keyed by an internal stage enum rather than the raw
/// `VkPipelineStageFlags2` bitmask (a resolved Open Question — see
/// DESIGN.md — since a `[T; N]` array needs a dense index, not a bitmask).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum PipelineStage {
    TopOfPipe = 0,
    DrawIndirect = 1,
    VertexInput = 2,
    VertexShader = 3,
    EarlyFragmentTests = 4,
    FragmentShader = 5,
    LateFragmentTests = 6,
    ColorAttachmentOutput = 7,
    ComputeShader = 8,
    Transfer = 9,
    RayTracingShader = 10,
    AccelerationStructureBuild = 11,
    BottomOfPipe = 12,
}

impl PipelineStage {
    pub const COUNT: usize = 13;

    const ALL: [PipelineStage; Self::COUNT] = [
        Self::TopOfPipe,
        Self::DrawIndirect,
        Self::VertexInput,
        Self::VertexShader,
        Self::EarlyFragmentTests,
        Self::FragmentShader,
        Self::LateFragmentTests,
        Self::ColorAttachmentOutput,
        Self::ComputeShader,
        Self::Transfer,
        Self::RayTracingShader,
        Self::AccelerationStructureBuild,
        Self::BottomOfPipe,
    ];

    pub(crate) fn vk_mask(self) -> vk::PipelineStageFlags2 {
        match self {
            Self::TopOfPipe => vk::PipelineStageFlags2::TOP_OF_PIPE,
            Self::DrawIndirect => vk::PipelineStageFlags2::DRAW_INDIRECT,
            Self::VertexInput => vk::PipelineStageFlags2::VERTEX_INPUT,
            Self::VertexShader => vk::PipelineStageFlags2::VERTEX_SHADER,
            Self::EarlyFragmentTests => vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS,
            Self::FragmentShader => vk::PipelineStageFlags2::FRAGMENT_SHADER,
            Self::LateFragmentTests => vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
            Self::ColorAttachmentOutput => vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            Self::ComputeShader => vk::PipelineStageFlags2::COMPUTE_SHADER,
            Self::Transfer => vk::PipelineStageFlags2::TRANSFER,
            Self::RayTracingShader => vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
            Self::AccelerationStructureBuild => {
                vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR
            }
            Self::BottomOfPipe => vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
        }
    }

    /// Every concrete stage that overlaps `mask`, in index order — a
    /// submitted stage mask is usually a single bit but may legally name
    /// several (e.g. `VERTEX_SHADER | FRAGMENT_SHADER`).
    fn iter_matching(mask: vk::PipelineStageFlags2) -> impl Iterator<Item = PipelineStage> {
        Self::ALL
            .into_iter()
            .filter(move |stage| mask.contains(stage.vk_mask()) || mask == stage.vk_mask())
    }
}

/// A resource's synchronization state between one cache-state transition
/// and the next.
///
/// Ported in meaning from `original_source`'s `ResourceCacheState`: rather
/// than recording a full history, each resource carries just enough state
/// to decide, at the next access, whether a pipeline barrier is required
/// and what its src/dst stage and access masks must be. `join` merges two
/// states — used where the render graph's DAG reconverges after a resource
/// was read or written along independent branches.
#[derive(Clone, Copy, Debug)]
pub struct CacheState {
    pub queue_owner: Option<u32>,
    pub layout: vk::ImageLayout,
    /// Stages whose writes have not yet been made available (flushed) to
    /// any later stage.
    unavailable_stages: vk::PipelineStageFlags2,
    unavailable_accesses: vk::AccessFlags2,
    /// Stages this resource's last write has already been synchronized
    /// against, via a semaphore wait or an in-queue barrier/event —
    /// `original_source`'s `sync_stages`. A fresh resource starts fully
    /// synced (there is nothing to wait for yet); `commit_wait_semaphore`
    /// and `commit_wait_event_or_barrier` are the only things that narrow
    /// or widen it afterwards.
    sync_stages: vk::PipelineStageFlags2,
    /// Per-stage set of accesses already visible (invalidated into caches)
    /// at that stage — the `FlagMap` equivalent.
    visible: [vk::AccessFlags2; PipelineStage::COUNT],
}

impl Default for CacheState {
    fn default() -> Self {
        Self {
            queue_owner: None,
            layout: vk::ImageLayout::UNDEFINED,
            unavailable_stages: vk::PipelineStageFlags2::empty(),
            unavailable_accesses: vk::AccessFlags2::empty(),
            sync_stages: vk::PipelineStageFlags2::ALL_COMMANDS,
            visible: [vk::AccessFlags2::empty(); PipelineStage::COUNT],
        }
    }
}

/// What `commit_access` decided needs to happen before the access it was
/// given can proceed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BarrierRequirement {
    pub needs_barrier: bool,
    pub needs_layout_transition: bool,
    pub needs_ownership_transfer: bool,
    pub src_stages: vk::PipelineStageFlags2,
    pub src_accesses: vk::AccessFlags2,
}

impl CacheState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset state for a swapchain image handed back by `vkAcquireNextImageKHR`:
    /// its contents are undefined and ownership is established by the
    /// acquire semaphore, not by a tracked queue-family transfer.
    pub fn commit_acquire_swapchain(&mut self, queue_family: u32) {
        *self = Self {
            queue_owner: Some(queue_family),
            layout: vk::ImageLayout::UNDEFINED,
            sync_stages: vk::PipelineStageFlags2::empty(),
            ..Self::default()
        };
    }

    /// An explicit binary/timeline semaphore wait makes every prior write
    /// available and visible to every later stage: this system's semaphore
    /// waits are always full execution+memory barriers (`TimelineWait`'s
    /// `stage` is always `ALL_COMMANDS`, see `GpuSystem::submit_frame`),
    /// never scoped ones, and hand ownership to `queue_family`.
    pub fn commit_wait_semaphore(&mut self, queue_family: u32) {
        self.queue_owner = Some(queue_family);
        self.sync_stages = vk::PipelineStageFlags2::ALL_COMMANDS;
        self.unavailable_stages = vk::PipelineStageFlags2::empty();
        self.unavailable_accesses = vk::AccessFlags2::empty();
        for visible in &mut self.visible {
            *visible = vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE;
        }
    }

    /// A `vkCmdPipelineBarrier`/`vkCmdWaitEvents` with an explicit
    /// `dst_stage`/`dst_access` makes prior writes visible to exactly that
    /// stage/access pair, not to everything (unlike a semaphore wait), and
    /// widens `sync_stages` to include it. `layout_change` additionally
    /// invalidates every other stage's visibility, since a layout
    /// transition's reads are only ever defined against the new layout.
    pub fn commit_wait_event_or_barrier(
        &mut self,
        queue_family: u32,
        dst_stage: PipelineStage,
        dst_access: vk::AccessFlags2,
        layout_change: bool,
    ) {
        self.queue_owner = Some(queue_family);
        self.sync_stages |= dst_stage.vk_mask();
        self.unavailable_stages = vk::PipelineStageFlags2::empty();
        self.unavailable_accesses = vk::AccessFlags2::empty();
        if layout_change {
            for visible in &mut self.visible {
                *visible = vk::AccessFlags2::empty();
            }
        }
        self.visible[dst_stage as usize] |= dst_access;
    }

    /// Does `stage`/`access` need an invalidate (i.e. is there an
    /// unavailable write this stage/access pair hasn't yet been made
    /// visible to)?
    pub fn need_invalidate(&self, stage: PipelineStage, access: vk::AccessFlags2) -> bool {
        if self.unavailable_accesses.is_empty() {
            return false;
        }
        !self.visible[stage as usize].contains(access)
    }

    /// Record a new access at `stage`, returning what barrier (if any) must
    /// be emitted before it. `queue_family` is the family the access is
    /// recorded on; a mismatch against `queue_owner` requires a queue
    /// family ownership transfer in addition to any execution/memory
    /// barrier. `new_layout` is only meaningful for textures.
    pub fn commit_access(
        &mut self,
        queue_family: u32,
        stage: PipelineStage,
        access: vk::AccessFlags2,
        is_write: bool,
        new_layout: vk::ImageLayout,
    ) -> BarrierRequirement {
        let needs_ownership_transfer = match self.queue_owner {
            Some(owner) => owner != queue_family,
            None => false,
        };
        let needs_layout_transition =
            new_layout != vk::ImageLayout::UNDEFINED && new_layout != self.layout;
        let needs_invalidate = self.need_invalidate(stage, access);

        let requirement = BarrierRequirement {
            needs_barrier: needs_invalidate || needs_layout_transition || needs_ownership_transfer,
            needs_layout_transition,
            needs_ownership_transfer,
            src_stages: self.unavailable_stages,
            src_accesses: self.unavailable_accesses,
        };

        // Delegate to whichever of the two committing primitives matches
        // what this access actually needs, rather than duplicating their
        // bookkeeping inline: an ownership transfer always rides a
        // semaphore wait in this system's submission model (see
        // `GpuSystem::submit_frame`), which is strictly more permissive
        // than a same-queue barrier, so it takes priority.
        if requirement.needs_ownership_transfer {
            self.commit_wait_semaphore(queue_family);
        } else if requirement.needs_barrier {
            self.commit_wait_event_or_barrier(queue_family, stage, access, needs_layout_transition);
        } else {
            self.visible[stage as usize] |= access;
            self.sync_stages |= stage.vk_mask();
        }

        if is_write {
            self.unavailable_stages |= stage.vk_mask();
            self.unavailable_accesses |= access;
            for visible in &mut self.visible {
                *visible = vk::AccessFlags2::empty();
            }
        }

        self.queue_owner = Some(queue_family);
        self.layout = new_layout;
        requirement
    }

    /// Merge two states for the same resource observed along independent
    /// render-graph branches that have just reconverged: the merged state
    /// must distrust any visibility the two branches don't agree on, and
    /// carry forward the union of outstanding writes so neither branch's
    /// write gets silently dropped.
    pub fn join(&self, other: &Self) -> Self {
        let mut visible = [vk::AccessFlags2::empty(); PipelineStage::COUNT];
        for i in 0..PipelineStage::COUNT {
            visible[i] = self.visible[i] & other.visible[i];
        }
        Self {
            queue_owner: if self.queue_owner == other.queue_owner {
                self.queue_owner
            } else {
                None
            },
            layout: if self.layout == other.layout {
                self.layout
            } else {
                vk::ImageLayout::UNDEFINED
            },
            unavailable_stages: self.unavailable_stages | other.unavailable_stages,
            unavailable_accesses: self.unavailable_accesses | other.unavailable_accesses,
            sync_stages: self.sync_stages & other.sync_stages,
            visible,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_needs_no_invalidate() {
        let state = CacheState::new();
        assert!(!state.need_invalidate(PipelineStage::FragmentShader, vk::AccessFlags2::SHADER_READ));
    }

    #[test]
    fn write_then_read_requires_one_barrier_then_none() {
        let mut state = CacheState::new();
        let write = state.commit_access(
            0,
            PipelineStage::Transfer,
            vk::AccessFlags2::TRANSFER_WRITE,
            true,
            vk::ImageLayout::UNDEFINED,
        );
        assert!(!write.needs_barrier, "first access on a fresh resource needs no barrier");

        let read = state.commit_access(
            0,
            PipelineStage::FragmentShader,
            vk::AccessFlags2::SHADER_READ,
            false,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert!(read.needs_barrier, "read after write must invalidate");
        assert!(read.needs_layout_transition);

        let read_again = state.commit_access(
            0,
            PipelineStage::FragmentShader,
            vk::AccessFlags2::SHADER_READ,
            false,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert!(
            !read_again.needs_barrier,
            "second read at the same stage/access/layout needs no further barrier"
        );
    }

    #[test]
    fn queue_family_mismatch_requires_ownership_transfer() {
        let mut state = CacheState::new();
        state.commit_access(
            0,
            PipelineStage::Transfer,
            vk::AccessFlags2::TRANSFER_WRITE,
            true,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        let on_other_queue = state.commit_access(
            1,
            PipelineStage::ComputeShader,
            vk::AccessFlags2::SHADER_READ,
            false,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        assert!(on_other_queue.needs_ownership_transfer);
    }

    #[test]
    fn semaphore_wait_clears_outstanding_writes() {
        let mut state = CacheState::new();
        state.commit_access(
            0,
            PipelineStage::Transfer,
            vk::AccessFlags2::TRANSFER_WRITE,
            true,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        state.commit_wait_semaphore(0);
        assert!(!state.need_invalidate(PipelineStage::FragmentShader, vk::AccessFlags2::SHADER_READ));
    }

    #[test]
    fn wait_event_or_barrier_widens_sync_stages() {
        let mut state = CacheState::new();
        state.commit_access(
            0,
            PipelineStage::Transfer,
            vk::AccessFlags2::TRANSFER_WRITE,
            true,
            vk::ImageLayout::UNDEFINED,
        );
        state.commit_wait_event_or_barrier(0, PipelineStage::FragmentShader, vk::AccessFlags2::SHADER_READ, false);
        assert!(!state.need_invalidate(PipelineStage::FragmentShader, vk::AccessFlags2::SHADER_READ));
    }

    #[test]
    fn join_distrusts_divergent_layouts() {
        let mut a = CacheState::new();
        a.commit_access(0, PipelineStage::Transfer, vk::AccessFlags2::TRANSFER_WRITE, true, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        let mut b = CacheState::new();
        b.commit_access(0, PipelineStage::FragmentShader, vk::AccessFlags2::SHADER_READ, false, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        let joined = a.join(&b);
        assert_eq!(joined.layout, vk::ImageLayout::UNDEFINED);
    }
}
