//! Checkpoint monotonicity

use chrono::{Days, NaiveDate};
use repo_miner::collector::{split, CollectionJob, FetchWindow};
use repo_miner::resume::{Checkpoint, ProgressCheckpoint};
use repo_miner::{EntityType, Provider};

fn d(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn job(interval: u32) -> CollectionJob {
    CollectionJob::new(Provider::StackExchange, EntityType::Questions, "stackoverflow")
        .with_range(Some(d("2024-01-01")), Some(d("2024-01-31")))
        .with_interval_days(interval)
}

#[test]
fn test_resume_point_follows_each_recorded_window() {
    for interval in [1, 3, 7] {
        let job = job(interval);
        let checkpoints = ProgressCheckpoint::in_memory();
        for window in split(job.start_date, job.end_date, interval).unwrap() {
            checkpoints.record(&job, &window, 1).unwrap();
            let expected = window.end.unwrap().checked_add_days(Days::new(1));
            assert_eq!(checkpoints.resume_point(&job).unwrap(), expected);
        }
        assert_eq!(checkpoints.resume_point(&job).unwrap(), Some(d("2024-02-01")));
    }
}

#[test]
fn test_unrecorded_window_gives_no_credit() {
    let job = job(1);
    let checkpoints = ProgressCheckpoint::in_memory();
    checkpoints
        .record(&job, &FetchWindow::new(Some(d("2024-01-01")), Some(d("2024-01-01"))), 4)
        .unwrap();
    let before = checkpoints.resume_point(&job).unwrap();

    // The window for 01-02 fails part way: nothing is recorded.
    assert_eq!(checkpoints.resume_point(&job).unwrap(), before);
    assert_eq!(before, Some(d("2024-01-02")));
}

#[test]
fn test_checkpoint_never_moves_backwards() {
    let mut checkpoint = Checkpoint::new("job");
    checkpoint.advance(d("2024-01-05"), 10);
    checkpoint.advance(d("2024-01-03"), 2);
    assert_eq!(checkpoint.last_completed_window_end(), Some(d("2024-01-05")));
    assert_eq!(checkpoint.next_start(), Some(d("2024-01-06")));
}

#[test]
fn test_jobs_keep_separate_checkpoints() {
    let checkpoints = ProgressCheckpoint::in_memory();
    let questions = job(1);
    let other = CollectionJob::new(Provider::StackExchange, EntityType::Questions, "superuser")
        .with_range(Some(d("2024-01-01")), Some(d("2024-01-31")));
    checkpoints
        .record(&questions, &FetchWindow::new(Some(d("2024-01-01")), Some(d("2024-01-10"))), 1)
        .unwrap();

    assert_ne!(questions.id(), other.id());
    assert_eq!(checkpoints.resume_point(&other).unwrap(), Some(d("2024-01-01")));
}
