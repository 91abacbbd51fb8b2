use super::allocator::{Repairable, RepairableAllocator};
use super::repairer::*;
use crate::error::RepairError;
use std::time::Duration;
use tokio::time::Instant;

fn repairer(capacity: usize, max_attempts: u32) -> Repairer {
    Repairer::new(
        capacity,
        Duration::from_millis(10),
        Duration::from_millis(30),
        max_attempts,
    )
}

fn frame(allocator: &RepairableAllocator, seq: u16) -> Repairable {
    allocator.allocate(seq, u32::from(seq) * 352, false, &[0; 8]).unwrap()
}

fn resend(allocator: &RepairableAllocator, seq: u16) -> Repairable {
    allocator.allocate(seq, u32::from(seq) * 352, true, &[0; 8]).unwrap()
}

fn seqs(out: Vec<Repairable>) -> Vec<u16> {
    out.iter().map(Repairable::frame).collect()
}

fn after_deadline(repairer: &Repairer) -> Instant {
    repairer.deadline().unwrap() + Duration::from_millis(1)
}

#[test]
fn test_in_order_passthrough() {
    let allocator = RepairableAllocator::new(8, 16);
    let mut repairer = repairer(5, 40);
    assert_eq!(repairer.state(), RepairState::Idle);

    for seq in 100..105 {
        let out = repairer.output_audio(frame(&allocator, seq)).unwrap();
        assert_eq!(seqs(out), vec![seq]);
    }
    assert_eq!(repairer.state(), RepairState::Draining);
    assert!(repairer.deadline().is_none());
}

#[test]
fn test_single_swap_reordered() {
    let allocator = RepairableAllocator::new(8, 16);
    let mut repairer = repairer(5, 40);

    assert_eq!(seqs(repairer.output_audio(frame(&allocator, 5)).unwrap()), vec![5]);
    assert!(repairer.output_audio(frame(&allocator, 7)).unwrap().is_empty());
    assert_eq!(repairer.state(), RepairState::Buffering);
    assert_eq!(
        seqs(repairer.output_audio(frame(&allocator, 6)).unwrap()),
        vec![6, 7]
    );
    assert_eq!(repairer.state(), RepairState::Draining);
    assert_eq!(seqs(repairer.output_audio(frame(&allocator, 8)).unwrap()), vec![8]);
}

#[test]
fn test_gap_requests_coalesced_range() {
    let allocator = RepairableAllocator::new(8, 16);
    let mut repairer = repairer(5, 40);

    repairer.output_audio(frame(&allocator, 5)).unwrap();
    repairer.output_audio(frame(&allocator, 6)).unwrap();
    assert!(repairer.output_audio(frame(&allocator, 9)).unwrap().is_empty());

    let deadline = repairer.deadline().unwrap();
    assert!(deadline <= Instant::now() + Duration::from_millis(10));

    let ranges = repairer.timer_expired(after_deadline(&repairer)).unwrap();
    assert_eq!(ranges, vec![ResendRange { start: 7, end: 8 }]);
    assert_eq!(ranges[0].count(), 2);
}

#[test]
fn test_resends_fill_gap() {
    let allocator = RepairableAllocator::new(8, 16);
    let mut repairer = repairer(5, 40);

    repairer.output_audio(frame(&allocator, 5)).unwrap();
    repairer.output_audio(frame(&allocator, 6)).unwrap();
    repairer.output_audio(frame(&allocator, 9)).unwrap();

    assert_eq!(seqs(repairer.output_audio(resend(&allocator, 7)).unwrap()), vec![7]);
    assert_eq!(
        seqs(repairer.output_audio(resend(&allocator, 8)).unwrap()),
        vec![8, 9]
    );
    assert_eq!(repairer.state(), RepairState::Draining);
    assert!(repairer.deadline().is_none());
}

#[test]
fn test_multiple_gaps() {
    let allocator = RepairableAllocator::new(16, 16);
    let mut repairer = repairer(10, 40);

    for seq in [0, 3, 6, 7, 10] {
        repairer.output_audio(frame(&allocator, seq)).unwrap();
    }
    assert_eq!(repairer.held(), 4);

    let ranges = repairer.timer_expired(after_deadline(&repairer)).unwrap();
    assert_eq!(
        ranges,
        vec![
            ResendRange { start: 1, end: 2 },
            ResendRange { start: 4, end: 5 },
            ResendRange { start: 8, end: 9 },
        ]
    );
}

#[test]
fn test_range_count_limited_to_half_capacity() {
    let allocator = RepairableAllocator::new(16, 16);
    let mut repairer = repairer(4, 40);

    for seq in [0, 2, 4, 6] {
        repairer.output_audio(frame(&allocator, seq)).unwrap();
    }
    let ranges = repairer.timer_expired(after_deadline(&repairer)).unwrap();
    assert_eq!(
        ranges,
        vec![ResendRange { start: 1, end: 1 }, ResendRange { start: 3, end: 3 }]
    );
}

#[test]
fn test_earlier_frame_becomes_first() {
    let allocator = RepairableAllocator::new(8, 16);
    let mut repairer = repairer(5, 40);

    repairer.output_audio(frame(&allocator, 0)).unwrap();
    repairer.output_audio(frame(&allocator, 4)).unwrap();
    repairer.output_audio(frame(&allocator, 2)).unwrap();

    let ranges = repairer.timer_expired(after_deadline(&repairer)).unwrap();
    assert_eq!(
        ranges,
        vec![ResendRange { start: 1, end: 1 }, ResendRange { start: 3, end: 3 }]
    );
    assert_eq!(
        seqs(repairer.output_audio(resend(&allocator, 1)).unwrap()),
        vec![1, 2]
    );
    assert_eq!(
        seqs(repairer.output_audio(resend(&allocator, 3)).unwrap()),
        vec![3, 4]
    );
}

#[test]
fn test_sequence_wraparound() {
    let allocator = RepairableAllocator::new(8, 16);
    let mut repairer = repairer(5, 40);

    for seq in [65534, 65535, 0, 1] {
        let out = repairer.output_audio(frame(&allocator, seq)).unwrap();
        assert_eq!(seqs(out), vec![seq]);
    }
}

#[test]
fn test_gap_across_wraparound() {
    let allocator = RepairableAllocator::new(8, 16);
    let mut repairer = repairer(5, 40);

    repairer.output_audio(frame(&allocator, 65534)).unwrap();
    assert!(repairer.output_audio(frame(&allocator, 1)).unwrap().is_empty());

    let ranges = repairer.timer_expired(after_deadline(&repairer)).unwrap();
    assert_eq!(ranges, vec![ResendRange { start: 65535, end: 0 }]);
    assert_eq!(ranges[0].count(), 2);

    assert_eq!(
        seqs(repairer.output_audio(resend(&allocator, 65535)).unwrap()),
        vec![65535]
    );
    assert_eq!(
        seqs(repairer.output_audio(resend(&allocator, 0)).unwrap()),
        vec![0, 1]
    );
}

#[test]
fn test_buffer_full_signalled_once() {
    let allocator = RepairableAllocator::new(8, 16);
    let mut repairer = repairer(3, 40);

    repairer.output_audio(frame(&allocator, 0)).unwrap();
    for seq in [2, 3, 4] {
        assert!(repairer.output_audio(frame(&allocator, seq)).unwrap().is_empty());
    }
    assert_eq!(
        repairer.output_audio(frame(&allocator, 5)).unwrap_err(),
        RepairError::BufferFull
    );
    assert_eq!(repairer.state(), RepairState::Idle);
    assert_eq!(allocator.available(), 8);

    // Next frame starts a new run
    assert_eq!(seqs(repairer.output_audio(frame(&allocator, 6)).unwrap()), vec![6]);
    assert_eq!(seqs(repairer.output_audio(frame(&allocator, 7)).unwrap()), vec![7]);
}

#[test]
fn test_stream_restart() {
    let allocator = RepairableAllocator::new(8, 16);
    let mut repairer = repairer(5, 40);

    repairer.output_audio(frame(&allocator, 10)).unwrap();
    repairer.output_audio(frame(&allocator, 11)).unwrap();
    assert_eq!(
        repairer.output_audio(frame(&allocator, 5)).unwrap_err(),
        RepairError::StreamRestarted
    );
    assert_eq!(repairer.state(), RepairState::Idle);
    assert_eq!(seqs(repairer.output_audio(frame(&allocator, 5)).unwrap()), vec![5]);
}

#[test]
fn test_stream_restart_while_buffering() {
    let allocator = RepairableAllocator::new(8, 16);
    let mut repairer = repairer(5, 40);

    repairer.output_audio(frame(&allocator, 10)).unwrap();
    repairer.output_audio(frame(&allocator, 13)).unwrap();
    assert_eq!(
        repairer.output_audio(frame(&allocator, 2)).unwrap_err(),
        RepairError::StreamRestarted
    );
    assert_eq!(repairer.held(), 0);
    assert!(repairer.deadline().is_none());
}

#[test]
fn test_duplicate_resend_dropped() {
    let allocator = RepairableAllocator::new(8, 16);
    let mut repairer = repairer(5, 40);

    repairer.output_audio(frame(&allocator, 10)).unwrap();
    repairer.output_audio(frame(&allocator, 11)).unwrap();
    assert!(repairer.output_audio(resend(&allocator, 10)).unwrap().is_empty());
    assert_eq!(repairer.state(), RepairState::Draining);
    assert_eq!(seqs(repairer.output_audio(frame(&allocator, 12)).unwrap()), vec![12]);
}

#[test]
fn test_duplicate_while_buffering_dropped() {
    let allocator = RepairableAllocator::new(8, 16);
    let mut repairer = repairer(5, 40);

    repairer.output_audio(frame(&allocator, 0)).unwrap();
    repairer.output_audio(frame(&allocator, 2)).unwrap();
    repairer.output_audio(frame(&allocator, 3)).unwrap();
    assert!(repairer.output_audio(frame(&allocator, 3)).unwrap().is_empty());
    assert!(repairer.output_audio(frame(&allocator, 2)).unwrap().is_empty());
    assert_eq!(repairer.held(), 2);
}

#[test]
fn test_gap_unrecoverable() {
    let allocator = RepairableAllocator::new(8, 16);
    let mut repairer = repairer(5, 2);

    repairer.output_audio(frame(&allocator, 0)).unwrap();
    repairer.output_audio(frame(&allocator, 2)).unwrap();

    for _ in 0..2 {
        let ranges = repairer.timer_expired(after_deadline(&repairer)).unwrap();
        assert_eq!(ranges, vec![ResendRange { start: 1, end: 1 }]);
    }
    assert_eq!(
        repairer.timer_expired(after_deadline(&repairer)).unwrap_err(),
        RepairError::GapUnrecoverable {
            start: 1,
            attempts: 2
        }
    );
    assert_eq!(repairer.state(), RepairState::Idle);
    assert_eq!(allocator.available(), 8);
}

#[test]
fn test_progress_resets_attempts() {
    let allocator = RepairableAllocator::new(8, 16);
    let mut repairer = repairer(5, 1);

    repairer.output_audio(frame(&allocator, 0)).unwrap();
    repairer.output_audio(frame(&allocator, 3)).unwrap();

    let ranges = repairer.timer_expired(after_deadline(&repairer)).unwrap();
    assert_eq!(ranges, vec![ResendRange { start: 1, end: 2 }]);

    assert_eq!(seqs(repairer.output_audio(resend(&allocator, 1)).unwrap()), vec![1]);
    let ranges = repairer.timer_expired(after_deadline(&repairer)).unwrap();
    assert_eq!(ranges, vec![ResendRange { start: 2, end: 2 }]);
}

#[test]
fn test_timer_before_deadline_is_noop() {
    let allocator = RepairableAllocator::new(8, 16);
    let mut repairer = repairer(5, 40);

    // Nothing to repair
    assert!(repairer.timer_expired(Instant::now()).unwrap().is_empty());

    repairer.output_audio(frame(&allocator, 0)).unwrap();
    repairer.output_audio(frame(&allocator, 2)).unwrap();
    let deadline = repairer.deadline().unwrap();
    let early = deadline.checked_sub(Duration::from_millis(1)).unwrap_or(deadline);
    if early < deadline {
        assert!(repairer.timer_expired(early).unwrap().is_empty());
    }

    let first = after_deadline(&repairer);
    repairer.timer_expired(first).unwrap();
    assert_eq!(repairer.deadline(), Some(first + Duration::from_millis(30)));
}

#[test]
fn test_drop_audio_releases_slots() {
    let allocator = RepairableAllocator::new(5, 16);
    let mut repairer = repairer(5, 40);

    repairer.output_audio(frame(&allocator, 0)).unwrap();
    repairer.output_audio(frame(&allocator, 2)).unwrap();
    repairer.output_audio(frame(&allocator, 3)).unwrap();
    assert_eq!(allocator.available(), 3);

    repairer.drop_audio();
    assert_eq!(allocator.available(), 5);
    assert_eq!(repairer.state(), RepairState::Idle);
    assert!(repairer.deadline().is_none());
}
