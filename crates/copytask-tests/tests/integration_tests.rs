//! End-to-end tests for the copy task engine
//!
//! Every test drives a real [`TaskManager`] against temporary directories.
//! Device classification and free space are faked so results do not depend on
//! the machine running the suite.

use copytask_config::EngineSettings;
use copytask_device::BufferAdvisor;
use copytask_engine::{
    ControlAction, ControlOutcome, CopyOptions, CopyRequest, ErrorKind, OverwritePolicy, TaskLog,
    TaskManager, TaskState, VerifyMode,
};
use copytask_tests::concurrency_utils::ActivityTracker;
use copytask_tests::test_utils::{
    assert_files_equal, assert_trees_equal, create_test_file, create_tree, wait_for_snapshot,
    CommonFileSizes, FixedClass, FixedSpace, Flakiness, TestDataPattern,
};
use copytask_types::{BufferSize, DeviceClass, Error, RetryPolicy};
use proptest::prelude::*;
use rstest::rstest;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const LIMIT: Duration = Duration::from_secs(60);

fn settings(worker_count: usize) -> EngineSettings {
    EngineSettings {
        worker_count,
        progress_interval: Duration::from_millis(50),
        history_limit: 100,
        space_margin_percent: 10,
        broadcast_capacity: 4096,
    }
}

fn manager_with(worker_count: usize, free_space: u64) -> TaskManager {
    TaskManager::builder()
        .with_settings(settings(worker_count))
        .with_device_resolver(Arc::new(FixedClass(DeviceClass::SSD)))
        .with_space_probe(Arc::new(FixedSpace(free_space)))
        .build()
}

fn manager(worker_count: usize) -> TaskManager {
    manager_with(worker_count, u64::MAX)
}

fn small_chunks() -> CopyOptions {
    CopyOptions {
        chunk_size: Some(BufferSize::new(BufferSize::MIN).unwrap()),
        ..CopyOptions::default()
    }
}

mod e2e_tests {
    use super::*;

    #[tokio::test]
    async fn test_file_and_directory_request() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");

        let big = create_test_file(
            &src.join("a.txt"),
            CommonFileSizes::XLARGE,
            TestDataPattern::Random,
        );
        let dir = src.join("dir");
        let dir_bytes = create_tree(
            &dir,
            &[
                ("one.bin", CommonFileSizes::LARGE),
                ("two.bin", CommonFileSizes::LARGE / 2),
                ("nested/three.bin", CommonFileSizes::LARGE / 2),
            ],
        );
        assert_eq!(dir_bytes, 2 * 1024 * 1024);

        let manager = manager(2);
        let id = manager
            .submit(CopyRequest::new([big.clone(), dir.clone()], &dst))
            .await
            .unwrap();
        let snapshot = manager.wait(id).await.unwrap();

        assert_eq!(snapshot.state, TaskState::Completed);
        assert_eq!(snapshot.total_items, 2);
        assert_eq!(snapshot.completed_items, 2);
        assert_eq!(snapshot.total_files, 4);
        assert_eq!(snapshot.copied_files, 4);
        assert_eq!(snapshot.total_bytes, 12_582_912);
        assert_eq!(snapshot.copied_bytes, 12_582_912);
        assert!(snapshot.errors.is_empty());
        assert!(snapshot.started_at.is_some());
        assert!(snapshot.ended_at.is_some());

        assert_files_equal(&big, &dst.join("a.txt"));
        assert_trees_equal(&dir, &dst.join("dir"));
    }

    #[rstest]
    #[case::single_file(&[("only.bin", 4096)])]
    #[case::empty_file(&[("empty.bin", 0)])]
    #[case::odd_sizes(&[("a.bin", 1), ("b.bin", 4097), ("c/d.bin", 65_537)])]
    #[tokio::test]
    async fn test_completed_means_every_byte_copied(#[case] files: &[(&str, usize)]) {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        let expected = create_tree(&src, files);

        let manager = manager(2);
        let id = manager
            .submit(CopyRequest::new([&src], &dst).with_options(small_chunks()))
            .await
            .unwrap();
        let snapshot = manager.wait(id).await.unwrap();

        assert_eq!(snapshot.state, TaskState::Completed);
        assert_eq!(snapshot.total_bytes, expected);
        assert_eq!(snapshot.copied_bytes, snapshot.total_bytes);
        assert_trees_equal(&src, &dst.join("src"));
    }

    #[tokio::test]
    async fn test_resubmit_overwrites_with_identical_content() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        create_tree(&src, &[("a.bin", 10_000), ("b/c.bin", 20_000)]);

        let manager = manager(2);
        let request = CopyRequest::new([&src], &dst);

        let first = manager.submit(request.clone()).await.unwrap();
        let first = manager.wait(first).await.unwrap();
        let second = manager.submit(request).await.unwrap();
        let second = manager.wait(second).await.unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(first.state, TaskState::Completed);
        assert_eq!(second.state, TaskState::Completed);
        assert_eq!(second.copied_bytes, 30_000);
        assert_eq!(second.skipped_files, 0);
        assert_trees_equal(&src, &dst.join("src"));
    }

    #[tokio::test]
    async fn test_checksum_verification_passes() {
        let temp_dir = TempDir::new().unwrap();
        let source = create_test_file(
            &temp_dir.path().join("data.bin"),
            CommonFileSizes::MEDIUM,
            TestDataPattern::Realistic,
        );
        let dst = temp_dir.path().join("dst");

        let options = CopyOptions {
            verify: VerifyMode::Checksum,
            ..CopyOptions::default()
        };
        let manager = manager(1);
        let id = manager
            .submit(CopyRequest::new([&source], &dst).with_options(options))
            .await
            .unwrap();

        let snapshot = manager.wait(id).await.unwrap();
        assert_eq!(snapshot.state, TaskState::Completed);
        assert_files_equal(&source, &dst.join("data.bin"));
    }
}

mod error_tests {
    use super::*;

    #[tokio::test]
    async fn test_insufficient_space_fails_before_copying() {
        let temp_dir = TempDir::new().unwrap();
        let source = create_test_file(
            &temp_dir.path().join("data.bin"),
            CommonFileSizes::MEDIUM,
            TestDataPattern::Zeros,
        );
        let dst = temp_dir.path().join("dst");

        let manager = manager_with(1, 1024);
        let id = manager.submit(CopyRequest::new([&source], &dst)).await.unwrap();
        let snapshot = manager.wait(id).await.unwrap();

        assert_eq!(snapshot.state, TaskState::Failed);
        assert_eq!(snapshot.copied_bytes, 0);
        assert!(snapshot
            .fatal_error
            .as_deref()
            .is_some_and(|message| message.contains("Insufficient space")));
        assert!(!dst.join("data.bin").exists());
    }

    #[tokio::test]
    async fn test_partial_failure_completes_with_errors() {
        let temp_dir = TempDir::new().unwrap();
        let good = create_test_file(
            &temp_dir.path().join("good.bin"),
            CommonFileSizes::TINY,
            TestDataPattern::Ones,
        );
        let missing = temp_dir.path().join("missing.bin");
        let dst = temp_dir.path().join("dst");

        let manager = manager(1);
        let id = manager
            .submit(CopyRequest::new([good.clone(), missing.clone()], &dst))
            .await
            .unwrap();
        let snapshot = manager.wait(id).await.unwrap();

        assert_eq!(snapshot.state, TaskState::CompletedWithErrors);
        assert_eq!(snapshot.completed_items, 2);
        assert_eq!(snapshot.errors.len(), 1);
        assert_eq!(snapshot.errors[0].kind, ErrorKind::NotFound);
        assert_eq!(snapshot.errors[0].path, missing);
        assert!(snapshot.fatal_error.is_none());
        assert_files_equal(&good, &dst.join("good.bin"));
    }

    #[tokio::test]
    async fn test_all_items_failing_fails_task() {
        let temp_dir = TempDir::new().unwrap();
        let dst = temp_dir.path().join("dst");

        let manager = manager(1);
        let id = manager
            .submit(CopyRequest::new(
                [temp_dir.path().join("nope1"), temp_dir.path().join("nope2")],
                &dst,
            ))
            .await
            .unwrap();
        let snapshot = manager.wait(id).await.unwrap();

        assert_eq!(snapshot.state, TaskState::Failed);
        assert_eq!(snapshot.errors.len(), 2);
        assert!(snapshot.fatal_error.is_some());
    }

    #[tokio::test]
    async fn test_prompt_policy_reports_conflict() {
        let temp_dir = TempDir::new().unwrap();
        let existing = create_test_file(
            &temp_dir.path().join("existing.bin"),
            CommonFileSizes::TINY,
            TestDataPattern::Ones,
        );
        let fresh = create_test_file(
            &temp_dir.path().join("fresh.bin"),
            CommonFileSizes::TINY,
            TestDataPattern::Ones,
        );
        let dst = temp_dir.path().join("dst");
        fs::create_dir_all(&dst).unwrap();
        fs::write(dst.join("existing.bin"), b"keep me").unwrap();

        let options = CopyOptions {
            overwrite: OverwritePolicy::Prompt,
            ..CopyOptions::default()
        };
        let manager = manager(1);
        let id = manager
            .submit(CopyRequest::new([existing, fresh.clone()], &dst).with_options(options))
            .await
            .unwrap();
        let snapshot = manager.wait(id).await.unwrap();

        assert_eq!(snapshot.state, TaskState::CompletedWithErrors);
        assert_eq!(snapshot.errors.len(), 1);
        assert_eq!(snapshot.errors[0].kind, ErrorKind::DestinationExists);
        assert_eq!(fs::read(dst.join("existing.bin")).unwrap(), b"keep me");
        assert_files_equal(&fresh, &dst.join("fresh.bin"));
    }

    #[tokio::test]
    async fn test_skip_policy_counts_existing_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let source = create_test_file(
            &temp_dir.path().join("data.bin"),
            CommonFileSizes::TINY,
            TestDataPattern::Ones,
        );
        let dst = temp_dir.path().join("dst");
        fs::create_dir_all(&dst).unwrap();
        fs::write(dst.join("data.bin"), b"older copy").unwrap();

        let options = CopyOptions {
            overwrite: OverwritePolicy::Skip,
            ..CopyOptions::default()
        };
        let manager = manager(1);
        let id = manager
            .submit(CopyRequest::new([&source], &dst).with_options(options))
            .await
            .unwrap();
        let snapshot = manager.wait(id).await.unwrap();

        assert_eq!(snapshot.state, TaskState::Completed);
        assert_eq!(snapshot.skipped_files, 1);
        assert_eq!(snapshot.copied_files, 0);
        assert_eq!(snapshot.copied_bytes, CommonFileSizes::TINY as u64);
        assert_eq!(fs::read(dst.join("data.bin")).unwrap(), b"older copy");
    }

    #[tokio::test]
    async fn test_directory_into_itself_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        create_tree(&src, &[("a.bin", 100)]);

        let manager = manager(1);
        let id = manager
            .submit(CopyRequest::new([&src], src.join("inner")))
            .await
            .unwrap();
        let snapshot = manager.wait(id).await.unwrap();

        assert_eq!(snapshot.state, TaskState::Failed);
        assert_eq!(snapshot.errors[0].kind, ErrorKind::SameFile);
    }
}

mod control_tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_mid_copy_stops_work() {
        let temp_dir = TempDir::new().unwrap();
        let source = create_test_file(
            &temp_dir.path().join("huge.bin"),
            CommonFileSizes::HUGE,
            TestDataPattern::Zeros,
        );
        let dst = temp_dir.path().join("dst");

        let manager = manager(1);
        let mut updates = manager.subscribe();
        let id = manager
            .submit(CopyRequest::new([&source], &dst).with_options(small_chunks()))
            .await
            .unwrap();

        wait_for_snapshot(&mut updates, id, LIMIT, |s| {
            s.state == TaskState::Running && s.copied_bytes > 0
        })
        .await;
        assert_eq!(
            manager.control(id, ControlAction::Cancel).await.unwrap(),
            ControlOutcome::Applied
        );
        // Second cancel is a no-op
        manager.control(id, ControlAction::Cancel).await.unwrap();

        let snapshot = manager.wait(id).await.unwrap();
        assert_eq!(snapshot.state, TaskState::Cancelled);
        assert!(snapshot.copied_bytes < snapshot.total_bytes);

        let partial = fs::metadata(dst.join("huge.bin")).unwrap().len();
        assert!(partial < CommonFileSizes::HUGE as u64);
    }

    #[tokio::test]
    async fn test_cancel_while_paused_unblocks() {
        let temp_dir = TempDir::new().unwrap();
        let source = create_test_file(
            &temp_dir.path().join("data.bin"),
            CommonFileSizes::LARGE,
            TestDataPattern::Zeros,
        );
        let dst = temp_dir.path().join("dst");

        let manager = manager(1);
        let mut updates = manager.subscribe();
        let id = manager.submit(CopyRequest::new([&source], &dst)).await.unwrap();
        manager.control(id, ControlAction::Pause).await.unwrap();

        wait_for_snapshot(&mut updates, id, LIMIT, |s| s.state == TaskState::Paused).await;
        manager.control(id, ControlAction::Cancel).await.unwrap();

        let snapshot = tokio::time::timeout(Duration::from_secs(5), manager.wait(id))
            .await
            .expect("cancel must not wait for resume")
            .unwrap();
        assert_eq!(snapshot.state, TaskState::Cancelled);
        assert!(snapshot.copied_bytes < snapshot.total_bytes);

        // A stopped task has no pending requests, whichever way it is read
        assert!(!snapshot.pause_requested && !snapshot.cancel_requested);
        let stored = manager.get(id).await.unwrap();
        assert!(!stored.pause_requested && !stored.cancel_requested);
        let published =
            wait_for_snapshot(&mut updates, id, LIMIT, |s| s.state == TaskState::Cancelled).await;
        assert!(!published.pause_requested && !published.cancel_requested);
    }

    #[tokio::test]
    async fn test_pause_resume_preserves_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let source = create_test_file(
            &temp_dir.path().join("data.bin"),
            4 * CommonFileSizes::LARGE,
            TestDataPattern::Random,
        );
        let dst = temp_dir.path().join("dst");

        let manager = manager(1);
        let mut updates = manager.subscribe();
        let id = manager
            .submit(CopyRequest::new([&source], &dst).with_options(small_chunks()))
            .await
            .unwrap();
        manager.control(id, ControlAction::Pause).await.unwrap();

        let paused = wait_for_snapshot(&mut updates, id, LIMIT, |s| s.state == TaskState::Paused)
            .await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        let still_paused = manager.get(id).await.unwrap();
        assert_eq!(still_paused.state, TaskState::Paused);
        assert!(still_paused.pause_requested);
        assert_eq!(still_paused.copied_bytes, paused.copied_bytes);

        assert_eq!(
            manager.control(id, ControlAction::Resume).await.unwrap(),
            ControlOutcome::Applied
        );

        let snapshot = manager.wait(id).await.unwrap();
        assert_eq!(snapshot.state, TaskState::Completed);
        assert_eq!(snapshot.copied_bytes, 4 * CommonFileSizes::LARGE as u64);
        assert_files_equal(&source, &dst.join("data.bin"));
    }

    #[tokio::test]
    async fn test_restart_creates_new_task() {
        let temp_dir = TempDir::new().unwrap();
        let source = create_test_file(
            &temp_dir.path().join("data.bin"),
            CommonFileSizes::MEDIUM,
            TestDataPattern::Random,
        );
        let dst = temp_dir.path().join("dst");

        let manager = manager(1);
        let id = manager.submit(CopyRequest::new([&source], &dst)).await.unwrap();
        let first = manager.wait(id).await.unwrap();

        let ControlOutcome::Restarted(new_id) =
            manager.control(id, ControlAction::Restart).await.unwrap()
        else {
            panic!("restart of a finished task must allocate a new task");
        };
        assert_ne!(new_id, id);

        let second = manager.wait(new_id).await.unwrap();
        assert_eq!(second.state, TaskState::Completed);
        assert_eq!(second.restarted_from, Some(id));
        assert_eq!(manager.get(id).await.unwrap(), first);
        assert_files_equal(&source, &dst.join("data.bin"));
    }

    #[tokio::test]
    async fn test_export_log_writes_every_task() {
        let temp_dir = TempDir::new().unwrap();
        let source = create_test_file(
            &temp_dir.path().join("data.bin"),
            CommonFileSizes::TINY,
            TestDataPattern::Random,
        );
        let dst = temp_dir.path().join("dst");

        let manager = manager(2);
        for _ in 0..3 {
            let id = manager.submit(CopyRequest::new([&source], &dst)).await.unwrap();
            manager.wait(id).await.unwrap();
        }

        let log_path = temp_dir.path().join("logs/tasks.json");
        assert_eq!(manager.export_log(&log_path).await.unwrap(), 3);

        let log: TaskLog = serde_json::from_str(&fs::read_to_string(&log_path).unwrap()).unwrap();
        assert_eq!(log.tasks.len(), 3);
        assert!(log.tasks.iter().all(|t| t.state == TaskState::Completed));

        let stats = manager.statistics().await;
        assert_eq!(stats.completed, 3);
        assert_eq!(stats.copied_bytes, 3 * CommonFileSizes::TINY as u64);
    }
}

mod retry_tests {
    use super::*;
    use copytask_engine::TaskSnapshot;

    fn flaky_manager(plan: Flakiness, backoff: Duration) -> TaskManager {
        TaskManager::builder()
            .with_settings(settings(1))
            .with_device_resolver(Arc::new(FixedClass(DeviceClass::SSD)))
            .with_space_probe(Arc::new(FixedSpace(u64::MAX)))
            .with_retry_policy(RetryPolicy::new(3, backoff, backoff, 1.0).unwrap())
            .with_transfer_layer(plan.layer())
            .build()
    }

    fn retries(max_retries: u32) -> CopyOptions {
        CopyOptions {
            max_retries,
            ..CopyOptions::default()
        }
    }

    #[tokio::test]
    async fn test_transient_failures_retried_until_complete() {
        let temp_dir = TempDir::new().unwrap();
        let source = create_test_file(
            &temp_dir.path().join("data.bin"),
            CommonFileSizes::MEDIUM,
            TestDataPattern::Random,
        );
        let dst = temp_dir.path().join("dst");

        let manager = flaky_manager(Flakiness::failing(2), Duration::from_millis(10));
        let mut updates = manager.subscribe();
        let id = manager
            .submit(CopyRequest::new([&source], &dst).with_options(retries(3)))
            .await
            .unwrap();

        let mut retrying: Vec<TaskSnapshot> = Vec::new();
        let snapshot = wait_for_snapshot(&mut updates, id, LIMIT, |s| {
            if s.state == TaskState::Retrying {
                retrying.push(s.clone());
            }
            s.is_terminal()
        })
        .await;

        assert_eq!(snapshot.state, TaskState::Completed);
        assert!(snapshot.errors.is_empty());
        assert!(snapshot.retry.is_none());
        assert_files_equal(&source, &dst.join("data.bin"));

        let attempts: Vec<u32> = retrying
            .iter()
            .map(|s| s.retry.as_ref().expect("retrying snapshot without retry info").attempt)
            .collect();
        assert_eq!(attempts, [1, 2]);
        let info = retrying[0].retry.as_ref().unwrap();
        assert_eq!(info.path, source);
        assert_eq!(info.delay_ms, 10);
        assert!(info.message.contains("device busy"));
    }

    #[tokio::test]
    async fn test_exhausted_budget_is_an_item_error() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        let good = create_test_file(
            &src.join("good.bin"),
            CommonFileSizes::TINY,
            TestDataPattern::Random,
        );
        let bad = create_test_file(
            &src.join("bad.bin"),
            CommonFileSizes::TINY,
            TestDataPattern::Random,
        );
        let dst = temp_dir.path().join("dst");

        let manager = flaky_manager(
            Flakiness::failing(u32::MAX).only("bad.bin"),
            Duration::from_millis(5),
        );
        let mut updates = manager.subscribe();
        let id = manager
            .submit(CopyRequest::new([&good, &bad], &dst).with_options(retries(2)))
            .await
            .unwrap();

        let mut retry_snapshots = 0;
        let snapshot = wait_for_snapshot(&mut updates, id, LIMIT, |s| {
            if s.state == TaskState::Retrying {
                retry_snapshots += 1;
            }
            s.is_terminal()
        })
        .await;

        assert_eq!(snapshot.state, TaskState::CompletedWithErrors);
        assert_eq!(retry_snapshots, 2);
        assert_eq!(snapshot.errors.len(), 1);
        assert_eq!(snapshot.errors[0].kind, ErrorKind::Io);
        assert_eq!(snapshot.errors[0].path, bad);
        assert_eq!(snapshot.copied_bytes, CommonFileSizes::TINY as u64);
        assert_files_equal(&good, &dst.join("good.bin"));
        assert!(!dst.join("bad.bin").exists());
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_is_prompt() {
        let temp_dir = TempDir::new().unwrap();
        let source = create_test_file(
            &temp_dir.path().join("data.bin"),
            CommonFileSizes::TINY,
            TestDataPattern::Random,
        );
        let dst = temp_dir.path().join("dst");

        let manager = flaky_manager(Flakiness::failing(u32::MAX), Duration::from_secs(30));
        let mut updates = manager.subscribe();
        let id = manager
            .submit(CopyRequest::new([&source], &dst).with_options(retries(5)))
            .await
            .unwrap();

        let retrying =
            wait_for_snapshot(&mut updates, id, LIMIT, |s| s.state == TaskState::Retrying).await;
        let info = retrying.retry.expect("retrying snapshot without retry info");
        assert_eq!(info.attempt, 1);
        assert_eq!(info.delay_ms, 30_000);

        assert_eq!(
            manager.control(id, ControlAction::Cancel).await.unwrap(),
            ControlOutcome::Applied
        );
        let snapshot = tokio::time::timeout(Duration::from_secs(5), manager.wait(id))
            .await
            .expect("cancel must interrupt the backoff sleep")
            .unwrap();
        assert_eq!(snapshot.state, TaskState::Cancelled);
        assert!(snapshot.errors.is_empty());
        assert!(snapshot.retry.is_none());
    }

    #[tokio::test]
    async fn test_retried_bytes_not_counted_twice() {
        let temp_dir = TempDir::new().unwrap();
        let source = create_test_file(
            &temp_dir.path().join("data.bin"),
            CommonFileSizes::MEDIUM,
            TestDataPattern::Random,
        );
        let dst = temp_dir.path().join("dst");

        // Each failed attempt reports half the file before timing out
        let plan = Flakiness::failing(2).with_partial_bytes(CommonFileSizes::MEDIUM as u64 / 2);
        let manager = flaky_manager(plan, Duration::from_millis(10));
        let mut updates = manager.subscribe();
        let id = manager
            .submit(CopyRequest::new([&source], &dst).with_options(retries(3)))
            .await
            .unwrap();

        let mut tracker = ActivityTracker::new();
        let snapshot = wait_for_snapshot(&mut updates, id, LIMIT, |s| {
            tracker.observe(s);
            assert!(s.copied_bytes <= CommonFileSizes::MEDIUM as u64);
            s.is_terminal()
        })
        .await;

        assert_eq!(snapshot.state, TaskState::Completed);
        assert_eq!(snapshot.copied_bytes, CommonFileSizes::MEDIUM as u64);
        assert_eq!(snapshot.total_bytes, CommonFileSizes::MEDIUM as u64);
        assert_eq!(snapshot.copied_files, 1);
        assert_eq!(tracker.regressions(), 0);
        assert_files_equal(&source, &dst.join("data.bin"));
    }
}

mod concurrency_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pool_bounds_running_tasks() {
        let temp_dir = TempDir::new().unwrap();
        let dst = temp_dir.path().join("dst");

        let manager = manager(2);
        let mut updates = manager.subscribe();

        let mut ids = Vec::new();
        for i in 0..5 {
            let source = create_test_file(
                &temp_dir.path().join(format!("src{i}/data.bin")),
                CommonFileSizes::LARGE,
                TestDataPattern::Random,
            );
            let request = CopyRequest::new([&source], dst.join(format!("task{i}")))
                .with_options(small_chunks());
            ids.push(manager.submit(request).await.unwrap());
        }

        let mut tracker = ActivityTracker::new();
        tokio::time::timeout(LIMIT, async {
            while tracker.finished() < ids.len() {
                let Some(snapshot) = updates.recv().await else {
                    break;
                };
                tracker.observe(&snapshot);
                assert!(manager.busy_workers() <= 2);
            }
        })
        .await
        .expect("all tasks should finish");

        assert_eq!(updates.dropped(), 0);
        assert_eq!(tracker.finished(), 5);
        assert!(tracker.max_active() <= 2);
        assert_eq!(tracker.snapshots_after_terminal(), 0);
        assert_eq!(tracker.regressions(), 0);

        for (i, id) in ids.into_iter().enumerate() {
            let snapshot = manager.get(id).await.unwrap();
            assert_eq!(snapshot.state, TaskState::Completed);
            assert_files_equal(
                &temp_dir.path().join(format!("src{i}/data.bin")),
                &dst.join(format!("task{i}/data.bin")),
            );
        }
    }

    #[tokio::test]
    async fn test_shutdown_cancels_queued_tasks() {
        let temp_dir = TempDir::new().unwrap();
        let source = create_test_file(
            &temp_dir.path().join("data.bin"),
            CommonFileSizes::LARGE,
            TestDataPattern::Zeros,
        );

        let manager = manager(1);
        let mut ids = Vec::new();
        for i in 0..3 {
            let request = CopyRequest::new([&source], temp_dir.path().join(format!("dst{i}")));
            ids.push(manager.submit(request).await.unwrap());
        }
        manager.control(ids[0], ControlAction::Pause).await.unwrap();

        tokio::time::timeout(Duration::from_secs(10), manager.shutdown())
            .await
            .expect("shutdown should not hang on a paused task");

        for id in ids {
            let snapshot = manager.get(id).await.unwrap();
            assert!(snapshot.is_terminal());
        }
        assert!(manager
            .submit(CopyRequest::new([&source], temp_dir.path().join("late")))
            .await
            .is_err());
    }
}

mod policy_tests {
    use super::*;

    #[rstest]
    #[case(DeviceClass::USB2, DeviceClass::SSD, 64 * 1024)]
    #[case(DeviceClass::USB2, DeviceClass::HDD, 64 * 1024)]
    #[case(DeviceClass::SSD, DeviceClass::USB2, 64 * 1024)]
    #[case(DeviceClass::SSD, DeviceClass::SSD, 4 * 1024 * 1024)]
    #[case(DeviceClass::HDD, DeviceClass::SSD, 512 * 1024)]
    #[case(DeviceClass::USB3, DeviceClass::SSD, 1024 * 1024)]
    #[case(DeviceClass::MTP, DeviceClass::Network, 32 * 1024)]
    #[case(DeviceClass::Network, DeviceClass::USB3, 256 * 1024)]
    fn test_buffer_advisor_truth_table(
        #[case] source: DeviceClass,
        #[case] destination: DeviceClass,
        #[case] expected: usize,
    ) {
        let advisor = BufferAdvisor::new();
        assert_eq!(advisor.recommend(source, destination), expected);
        assert_eq!(advisor.recommend(destination, source), expected);
    }

    #[test]
    fn test_buffer_advisor_prefers_slower_side() {
        let advisor = BufferAdvisor::new();
        for a in DeviceClass::ALL {
            for b in DeviceClass::ALL {
                let size = advisor.recommend(a, b);
                assert_eq!(size, advisor.size_for(a).min(advisor.size_for(b)));
            }
        }
    }

    fn disk_full(path: &Path) -> Error {
        Error::DiskFull {
            path: path.to_path_buf(),
        }
    }

    fn transient(path: &Path) -> Error {
        Error::io(path, io::Error::new(io::ErrorKind::TimedOut, "device busy"))
    }

    proptest! {
        #[test]
        fn test_disk_full_is_never_retried(attempt in 0u32..100, max_retries in 0u32..20) {
            let policy = RetryPolicy::default().with_max_retries(max_retries);
            let (retry, delay) = policy.should_retry(attempt, &disk_full(Path::new("/dst/a")));
            prop_assert!(!retry);
            prop_assert_eq!(delay, Duration::ZERO);
        }

        #[test]
        fn test_transient_retried_within_budget(attempt in 1u32..50, max_retries in 0u32..20) {
            let policy = RetryPolicy::default().with_max_retries(max_retries);
            let (retry, delay) = policy.should_retry(attempt, &transient(Path::new("/src/a")));
            prop_assert_eq!(retry, attempt <= max_retries);
            if retry {
                prop_assert!(delay >= policy.initial_delay);
                prop_assert!(delay <= policy.max_delay);
            }
        }

        #[test]
        fn test_backoff_never_shrinks(attempt in 1u32..30) {
            let policy = RetryPolicy::default();
            prop_assert!(policy.delay_for_attempt(attempt + 1) >= policy.delay_for_attempt(attempt));
        }
    }
}
