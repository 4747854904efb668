// SPDX-License-Identifier: CEPL-1.0
use std::{cell::Cell, collections::VecDeque};

use anyhow::{bail, Result};
use vela_render::{
    AcquireOutcome, DrawItem, FrameBackend, FrameStatus, FrameSynchronizer, MaterialPass, MeshId,
    PresentOutcome, RecreateCause, RenderSize, SurfaceProvider, MAX_FRAMES_IN_FLIGHT,
};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Call {
    Wait(usize),
    Acquire(usize),
    ResetFence(usize),
    Record { slot: usize, image: u32, draws: usize },
    Submit(usize),
    Present { slot: usize, image: u32 },
    Recreate(RenderSize),
    WaitIdle,
}

/// Models fences the way the GPU would: a submitted slot stays pending until
/// somebody waits on it, so in-flight depth is observable.
struct MockBackend {
    calls: Vec<Call>,
    acquire_script: VecDeque<AcquireOutcome>,
    present_script: VecDeque<PresentOutcome>,
    image_count: u32,
    next_image: u32,
    fence_signaled: Vec<bool>,
    pending: Vec<bool>,
    submits_since_reset: Vec<u32>,
    max_in_flight: usize,
    fail_submit: bool,
}

impl MockBackend {
    fn new(slots: usize, image_count: u32) -> Self {
        MockBackend {
            calls: Vec::new(),
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            image_count,
            next_image: 0,
            fence_signaled: vec![true; slots],
            pending: vec![false; slots],
            submits_since_reset: vec![0; slots],
            max_in_flight: 0,
            fail_submit: false,
        }
    }

    fn recreate_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, Call::Recreate(_)))
            .count()
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }
}

impl FrameBackend for MockBackend {
    fn frame_slots(&self) -> usize {
        self.fence_signaled.len()
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        self.calls.push(Call::Wait(slot));
        if !self.fence_signaled[slot] {
            assert!(self.pending[slot], "waiting on a reset fence that was never submitted");
            self.pending[slot] = false;
            self.fence_signaled[slot] = true;
        }
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        self.calls.push(Call::Acquire(slot));
        if let Some(outcome) = self.acquire_script.pop_front() {
            return Ok(outcome);
        }
        let image_index = self.next_image;
        self.next_image = (self.next_image + 1) % self.image_count;
        Ok(AcquireOutcome::Acquired {
            image_index,
            suboptimal: false,
        })
    }

    fn reset_slot_fence(&mut self, slot: usize) -> Result<()> {
        self.calls.push(Call::ResetFence(slot));
        assert!(self.fence_signaled[slot], "fence reset before its wait completed");
        self.fence_signaled[slot] = false;
        self.submits_since_reset[slot] = 0;
        Ok(())
    }

    fn record(&mut self, slot: usize, image_index: u32, draws: &[DrawItem]) -> Result<()> {
        assert!(!self.pending[slot], "re-recording a command buffer still in flight");
        self.calls.push(Call::Record {
            slot,
            image: image_index,
            draws: draws.len(),
        });
        Ok(())
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        self.calls.push(Call::Submit(slot));
        if self.fail_submit {
            bail!("queue_submit: ERROR_DEVICE_LOST");
        }
        assert!(!self.fence_signaled[slot], "submitting with a signaled fence");
        assert_eq!(self.submits_since_reset[slot], 0, "double submit before re-wait");
        self.submits_since_reset[slot] += 1;
        self.pending[slot] = true;
        let in_flight = self.pending.iter().filter(|p| **p).count();
        self.max_in_flight = self.max_in_flight.max(in_flight);
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        self.calls.push(Call::Present {
            slot,
            image: image_index,
        });
        Ok(self
            .present_script
            .pop_front()
            .unwrap_or(PresentOutcome::Presented))
    }

    fn recreate_swapchain(&mut self, size: RenderSize) -> Result<()> {
        self.calls.push(Call::Recreate(size));
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.calls.push(Call::WaitIdle);
        for slot in 0..self.pending.len() {
            self.pending[slot] = false;
            self.fence_signaled[slot] = true;
        }
        Ok(())
    }
}

struct MockSurface {
    size: RenderSize,
    resized: bool,
}

impl MockSurface {
    fn new(width: u32, height: u32) -> Self {
        MockSurface {
            size: RenderSize::new(width, height),
            resized: false,
        }
    }
}

impl SurfaceProvider for MockSurface {
    fn drawable_size(&self) -> RenderSize {
        self.size
    }

    fn was_resized(&self) -> bool {
        self.resized
    }

    fn clear_resized(&mut self) {
        self.resized = false;
    }
}

fn triangle() -> Vec<DrawItem> {
    vec![DrawItem {
        mesh: MeshId(0),
        pass: MaterialPass::Opaque,
        transform: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    }]
}

#[test]
fn normal_frame_runs_all_stages_in_order_and_advances_index() {
    let mut backend = MockBackend::new(MAX_FRAMES_IN_FLIGHT, 3);
    backend.acquire_script.push_back(AcquireOutcome::Acquired {
        image_index: 2,
        suboptimal: false,
    });
    let mut surface = MockSurface::new(800, 600);
    let mut sync = FrameSynchronizer::new(MAX_FRAMES_IN_FLIGHT);

    let status = sync
        .draw_frame(&mut backend, &mut surface, &triangle())
        .unwrap();

    assert_eq!(
        status,
        FrameStatus::Presented {
            image_index: 2,
            recreated: RecreateCause::empty()
        }
    );
    assert_eq!(sync.current_frame(), 1);
    assert_eq!(
        backend.calls,
        vec![
            Call::Wait(0),
            Call::Acquire(0),
            Call::ResetFence(0),
            Call::Record {
                slot: 0,
                image: 2,
                draws: 1
            },
            Call::Submit(0),
            Call::Present { slot: 0, image: 2 },
        ]
    );
    assert_eq!(backend.recreate_count(), 0);
}

#[test]
fn out_of_date_acquire_recreates_once_and_skips_the_frame() {
    let mut backend = MockBackend::new(MAX_FRAMES_IN_FLIGHT, 3);
    backend.acquire_script.push_back(AcquireOutcome::OutOfDate);
    let mut surface = MockSurface::new(1024, 768);
    let mut sync = FrameSynchronizer::new(MAX_FRAMES_IN_FLIGHT);

    let status = sync
        .draw_frame(&mut backend, &mut surface, &triangle())
        .unwrap();

    assert_eq!(status, FrameStatus::Skipped);
    assert_eq!(sync.current_frame(), 0);
    assert_eq!(
        backend.calls,
        vec![
            Call::Wait(0),
            Call::Acquire(0),
            Call::Recreate(RenderSize::new(1024, 768)),
        ]
    );
    // the fence was never reset, so the retry does not deadlock
    assert!(backend.fence_signaled[0]);

    let status = sync
        .draw_frame(&mut backend, &mut surface, &triangle())
        .unwrap();
    assert!(matches!(status, FrameStatus::Presented { .. }));
    assert_eq!(backend.count(|c| matches!(c, Call::Submit(0))), 1);
    assert_eq!(backend.recreate_count(), 1);
    assert_eq!(sync.current_frame(), 1);
}

#[test]
fn suboptimal_present_recreates_after_the_frame_is_presented() {
    let mut backend = MockBackend::new(MAX_FRAMES_IN_FLIGHT, 3);
    backend.present_script.push_back(PresentOutcome::Suboptimal);
    let mut surface = MockSurface::new(640, 480);
    let mut sync = FrameSynchronizer::new(MAX_FRAMES_IN_FLIGHT);

    let status = sync
        .draw_frame(&mut backend, &mut surface, &triangle())
        .unwrap();

    assert_eq!(
        status,
        FrameStatus::Presented {
            image_index: 0,
            recreated: RecreateCause::SUBOPTIMAL
        }
    );
    assert_eq!(
        &backend.calls[backend.calls.len() - 2..],
        &[
            Call::Present { slot: 0, image: 0 },
            Call::Recreate(RenderSize::new(640, 480)),
        ]
    );
    assert_eq!(backend.count(|c| matches!(c, Call::Record { .. })), 1);
    assert_eq!(sync.current_frame(), 1);
}

#[test]
fn out_of_date_present_recreates_and_still_advances() {
    let mut backend = MockBackend::new(MAX_FRAMES_IN_FLIGHT, 3);
    backend.present_script.push_back(PresentOutcome::OutOfDate);
    let mut surface = MockSurface::new(640, 480);
    let mut sync = FrameSynchronizer::new(MAX_FRAMES_IN_FLIGHT);

    let status = sync
        .draw_frame(&mut backend, &mut surface, &triangle())
        .unwrap();

    assert_eq!(
        status,
        FrameStatus::Presented {
            image_index: 0,
            recreated: RecreateCause::OUT_OF_DATE
        }
    );
    assert_eq!(backend.recreate_count(), 1);
    assert_eq!(sync.current_frame(), 1);
}

#[test]
fn suboptimal_acquire_is_not_a_recreate_trigger() {
    let mut backend = MockBackend::new(MAX_FRAMES_IN_FLIGHT, 3);
    backend.acquire_script.push_back(AcquireOutcome::Acquired {
        image_index: 1,
        suboptimal: true,
    });
    let mut surface = MockSurface::new(640, 480);
    let mut sync = FrameSynchronizer::new(MAX_FRAMES_IN_FLIGHT);

    let status = sync
        .draw_frame(&mut backend, &mut surface, &triangle())
        .unwrap();

    assert_eq!(
        status,
        FrameStatus::Presented {
            image_index: 1,
            recreated: RecreateCause::empty()
        }
    );
    assert_eq!(backend.recreate_count(), 0);
}

#[test]
fn resize_flag_triggers_recreate_with_new_size_and_is_cleared() {
    let mut backend = MockBackend::new(MAX_FRAMES_IN_FLIGHT, 3);
    let mut surface = MockSurface::new(800, 600);
    let mut sync = FrameSynchronizer::new(MAX_FRAMES_IN_FLIGHT);

    sync.draw_frame(&mut backend, &mut surface, &triangle())
        .unwrap();
    surface.size = RenderSize::new(1280, 720);
    surface.resized = true;

    let status = sync
        .draw_frame(&mut backend, &mut surface, &triangle())
        .unwrap();

    assert_eq!(
        status,
        FrameStatus::Presented {
            image_index: 1,
            recreated: RecreateCause::RESIZED
        }
    );
    assert!(!surface.resized);
    assert_eq!(
        backend.calls.last(),
        Some(&Call::Recreate(RenderSize::new(1280, 720)))
    );

    sync.draw_frame(&mut backend, &mut surface, &triangle())
        .unwrap();
    assert_eq!(backend.recreate_count(), 1);
}

#[test]
fn frame_index_wraps_around_the_slot_ring() {
    let mut backend = MockBackend::new(MAX_FRAMES_IN_FLIGHT, 3);
    let mut surface = MockSurface::new(800, 600);
    let mut sync = FrameSynchronizer::new(MAX_FRAMES_IN_FLIGHT);

    let mut slots = Vec::new();
    for _ in 0..5 {
        slots.push(sync.current_frame());
        sync.draw_frame(&mut backend, &mut surface, &triangle())
            .unwrap();
    }
    assert_eq!(slots, vec![0, 1, 0, 1, 0]);
    assert_eq!(sync.current_frame(), 1);
}

#[test]
fn never_more_submissions_outstanding_than_slots() {
    for depth in 1..=3 {
        let mut backend = MockBackend::new(depth, 3);
        let mut surface = MockSurface::new(800, 600);
        let mut sync = FrameSynchronizer::new(depth);

        for _ in 0..12 {
            sync.draw_frame(&mut backend, &mut surface, &triangle())
                .unwrap();
            let in_flight = backend.pending.iter().filter(|p| **p).count();
            assert!(in_flight <= depth);
        }
        assert_eq!(backend.max_in_flight, depth);
    }
}

#[test]
fn each_fence_reset_is_followed_by_exactly_one_submit_before_the_next_wait() {
    let mut backend = MockBackend::new(MAX_FRAMES_IN_FLIGHT, 3);
    backend.acquire_script.extend([
        AcquireOutcome::Acquired {
            image_index: 0,
            suboptimal: false,
        },
        AcquireOutcome::OutOfDate,
    ]);
    backend.present_script.push_back(PresentOutcome::Suboptimal);
    let mut surface = MockSurface::new(800, 600);
    let mut sync = FrameSynchronizer::new(MAX_FRAMES_IN_FLIGHT);

    for _ in 0..8 {
        sync.draw_frame(&mut backend, &mut surface, &triangle())
            .unwrap();
    }

    for slot in 0..MAX_FRAMES_IN_FLIGHT {
        let mut submits_since_reset: Option<u32> = None;
        for call in &backend.calls {
            match call {
                Call::ResetFence(s) if *s == slot => {
                    assert_eq!(submits_since_reset, None, "reset without a wait");
                    submits_since_reset = Some(0);
                }
                Call::Submit(s) if *s == slot => {
                    let n = submits_since_reset.as_mut().expect("submit without reset");
                    *n += 1;
                    assert_eq!(*n, 1);
                }
                Call::Wait(s) if *s == slot => {
                    if let Some(n) = submits_since_reset.take() {
                        assert_eq!(n, 1, "fence reset but never submitted");
                    }
                }
                _ => {}
            }
        }
    }
}

#[test]
fn zero_sized_surface_pauses_and_defers_recreation() {
    let mut backend = MockBackend::new(MAX_FRAMES_IN_FLIGHT, 3);
    let mut surface = MockSurface::new(0, 0);
    surface.resized = true;
    let mut sync = FrameSynchronizer::new(MAX_FRAMES_IN_FLIGHT);

    let status = sync
        .draw_frame(&mut backend, &mut surface, &triangle())
        .unwrap();

    assert_eq!(status, FrameStatus::Paused);
    assert!(backend.calls.is_empty());
    assert_eq!(sync.deferred_recreate(), RecreateCause::RESIZED);
    assert!(!surface.resized);

    surface.size = RenderSize::new(300, 200);
    sync.draw_frame(&mut backend, &mut surface, &triangle())
        .unwrap();

    assert_eq!(backend.calls[0], Call::Recreate(RenderSize::new(300, 200)));
    assert!(sync.deferred_recreate().is_empty());
    assert_eq!(sync.current_frame(), 1);
}

/// Reports its size on the first query and zero afterwards, as when the
/// window is minimized mid-frame.
struct MinimizesAfterFirstQuery {
    size: RenderSize,
    queries: Cell<u32>,
}

impl SurfaceProvider for MinimizesAfterFirstQuery {
    fn drawable_size(&self) -> RenderSize {
        let n = self.queries.get();
        self.queries.set(n + 1);
        if n == 0 {
            self.size
        } else {
            RenderSize::new(0, 0)
        }
    }

    fn was_resized(&self) -> bool {
        false
    }

    fn clear_resized(&mut self) {}
}

#[test]
fn out_of_date_present_while_minimized_is_deferred() {
    let mut backend = MockBackend::new(MAX_FRAMES_IN_FLIGHT, 3);
    backend.present_script.push_back(PresentOutcome::OutOfDate);
    let mut surface = MinimizesAfterFirstQuery {
        size: RenderSize::new(800, 600),
        queries: Cell::new(0),
    };
    let mut sync = FrameSynchronizer::new(MAX_FRAMES_IN_FLIGHT);

    let status = sync
        .draw_frame(&mut backend, &mut surface, &triangle())
        .unwrap();

    assert_eq!(
        status,
        FrameStatus::Presented {
            image_index: 0,
            recreated: RecreateCause::empty()
        }
    );
    assert_eq!(backend.recreate_count(), 0);
    assert_eq!(sync.deferred_recreate(), RecreateCause::OUT_OF_DATE);
    assert_eq!(sync.current_frame(), 1);
}

#[test]
fn back_to_back_recreates_each_use_the_live_size() {
    let mut backend = MockBackend::new(MAX_FRAMES_IN_FLIGHT, 3);
    backend
        .acquire_script
        .extend([AcquireOutcome::OutOfDate, AcquireOutcome::OutOfDate]);
    let mut surface = MockSurface::new(800, 600);
    let mut sync = FrameSynchronizer::new(MAX_FRAMES_IN_FLIGHT);

    let status = sync
        .draw_frame(&mut backend, &mut surface, &triangle())
        .unwrap();
    assert_eq!(status, FrameStatus::Skipped);

    surface.size = RenderSize::new(1024, 768);
    surface.resized = true;
    let status = sync
        .draw_frame(&mut backend, &mut surface, &triangle())
        .unwrap();
    assert_eq!(status, FrameStatus::Skipped);
    assert!(!surface.resized);

    assert_eq!(
        backend.calls,
        vec![
            Call::Wait(0),
            Call::Acquire(0),
            Call::Recreate(RenderSize::new(800, 600)),
            Call::Wait(0),
            Call::Acquire(0),
            Call::Recreate(RenderSize::new(1024, 768)),
        ]
    );
    assert!(sync.deferred_recreate().is_empty());

    let status = sync
        .draw_frame(&mut backend, &mut surface, &triangle())
        .unwrap();
    assert_eq!(
        status,
        FrameStatus::Presented {
            image_index: 0,
            recreated: RecreateCause::empty()
        }
    );
    assert_eq!(backend.recreate_count(), 2);
    assert_eq!(sync.current_frame(), 1);
}

#[test]
fn ring_deeper_than_backend_slots_is_an_error() {
    let mut backend = MockBackend::new(2, 3);
    let mut surface = MockSurface::new(800, 600);
    let mut sync = FrameSynchronizer::new(3);

    let err = sync
        .draw_frame(&mut backend, &mut surface, &triangle())
        .unwrap_err();

    assert!(err.to_string().contains("2 slots"));
    assert!(backend.calls.is_empty());
    assert_eq!(sync.current_frame(), 0);
}

#[test]
fn synchronizer_sized_from_backend_cycles_every_slot() {
    let mut backend = MockBackend::new(3, 4);
    let mut surface = MockSurface::new(800, 600);
    let mut sync = FrameSynchronizer::for_backend(&backend);
    assert_eq!(sync.frames_in_flight(), 3);

    let mut slots = Vec::new();
    for _ in 0..4 {
        slots.push(sync.current_frame());
        sync.draw_frame(&mut backend, &mut surface, &triangle())
            .unwrap();
    }
    assert_eq!(slots, vec![0, 1, 2, 0]);
    assert_eq!(backend.max_in_flight, 3);
}

#[test]
fn fatal_backend_error_propagates_without_advancing() {
    let mut backend = MockBackend::new(MAX_FRAMES_IN_FLIGHT, 3);
    backend.fail_submit = true;
    let mut surface = MockSurface::new(800, 600);
    let mut sync = FrameSynchronizer::new(MAX_FRAMES_IN_FLIGHT);

    let err = sync
        .draw_frame(&mut backend, &mut surface, &triangle())
        .unwrap_err();

    assert!(err.to_string().contains("queue_submit"));
    assert_eq!(sync.current_frame(), 0);
    assert_eq!(backend.recreate_count(), 0);
}

#[test]
fn shutdown_drains_the_device() {
    let mut backend = MockBackend::new(MAX_FRAMES_IN_FLIGHT, 3);
    let mut surface = MockSurface::new(800, 600);
    let mut sync = FrameSynchronizer::new(MAX_FRAMES_IN_FLIGHT);

    sync.draw_frame(&mut backend, &mut surface, &triangle())
        .unwrap();
    sync.shutdown(&mut backend).unwrap();

    assert_eq!(backend.calls.last(), Some(&Call::WaitIdle));
    assert!(backend.pending.iter().all(|p| !p));
}

#[test]
fn empty_draw_list_still_presents_a_cleared_frame() {
    let mut backend = MockBackend::new(MAX_FRAMES_IN_FLIGHT, 2);
    let mut surface = MockSurface::new(800, 600);
    let mut sync = FrameSynchronizer::new(MAX_FRAMES_IN_FLIGHT);

    let status = sync.draw_frame(&mut backend, &mut surface, &[]).unwrap();

    assert!(matches!(status, FrameStatus::Presented { .. }));
    assert!(backend.calls.contains(&Call::Record {
        slot: 0,
        image: 0,
        draws: 0
    }));
}
