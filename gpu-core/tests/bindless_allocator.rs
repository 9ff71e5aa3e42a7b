//! Integration tests for the bindless descriptor allocator's free-list
//! allocation behavior, exercised through `BindlessDescriptorSet` directly
//! (no device needed for `allocate`/`free` — only `write_*` touches Vulkan).

use ash::vk;

use gpu_core::bindless::BindlessDescriptorSet;

fn fake_set(capacity: u32) -> BindlessDescriptorSet {
    BindlessDescriptorSet::new(vk::DescriptorSet::null(), vk::DescriptorSetLayout::null(), 0, capacity)
}

#[test]
fn allocate_hands_out_distinct_ids_until_exhausted() {
    let set = fake_set(4);
    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(set.allocate().expect("capacity not yet exhausted"));
    }
    assert!(set.allocate().is_none(), "a 5th allocation past capacity should fail");

    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 4, "every allocated id should be distinct");
}

#[test]
fn freed_slot_is_recycled_on_next_allocate() {
    let set = fake_set(2);
    let a = set.allocate().unwrap();
    let _b = set.allocate().unwrap();
    set.free(a);
    let recycled = set.allocate().expect("freeing a slot should make room for a new allocation");
    assert_eq!(recycled, a);
}

#[test]
fn concurrent_allocate_calls_never_double_hand_out_a_slot() {
    let set = fake_set(64);
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    let mut ids = Vec::new();
                    for _ in 0..8 {
                        if let Some(id) = set.allocate() {
                            ids.push(id);
                        }
                    }
                    ids
                })
            })
            .collect();
        let mut all: Vec<u32> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        let before_dedup = all.len();
        all.dedup();
        assert_eq!(all.len(), before_dedup, "no two threads should ever receive the same descriptor id");
        assert_eq!(before_dedup, 64, "exactly the full capacity should have been handed out across all threads");
    });
}
