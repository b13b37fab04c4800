//! Admission, queueing and command routing through a running engine.

mod common;

use common::harness::{asr_only, test_config};
use common::TestEngine;
use scribeflow::{AdmissionError, CommandError, JobStatus, ModelRef, ModelSelection};

#[test]
fn test_concurrency_never_exceeds_capacity() {
    let t = TestEngine::start(2);
    let sources = ["c1.wav", "c2.wav", "c3.wav", "c4.wav", "c5.wav"];
    let ids: Vec<_> = sources.iter().map(|s| t.submit(s)).collect();

    t.transcriber.wait_started("c1.wav", 1);
    t.transcriber.wait_started("c2.wav", 1);
    assert_eq!(t.processing_count(), 2);
    assert_eq!(t.engine.stats().active, 2);
    assert_eq!(t.engine.stats().queued, 3);

    for (source, id) in sources.iter().zip(&ids) {
        t.transcriber.finish(source);
        t.wait_for_status(id, JobStatus::Completed);
        assert!(t.processing_count() <= 2);
        assert!(t.engine.stats().active <= 2);
    }

    assert_eq!(t.engine.stats().active, 0);
    assert_eq!(t.engine.stats().queued, 0);
}

#[test]
fn test_fifo_admission() {
    let t = TestEngine::start(1);
    let a = t.submit("fifo-a.wav");
    let b = t.submit("fifo-b.wav");
    let c = t.submit("fifo-c.wav");

    t.transcriber.wait_started("fifo-a.wav", 1);
    assert_eq!(t.engine.queue_position(&a), None);
    assert_eq!(t.engine.queue_position(&b), Some(0));
    assert_eq!(t.engine.queue_position(&c), Some(1));

    t.transcriber.finish("fifo-a.wav");
    t.transcriber.wait_started("fifo-b.wav", 1);
    assert_eq!(t.status(&c), JobStatus::Queued);
    assert_eq!(t.transcriber.calls("fifo-c.wav"), 0);
    assert_eq!(t.engine.queue_position(&c), Some(0));

    t.transcriber.finish("fifo-b.wav");
    t.transcriber.finish("fifo-c.wav");
    t.wait_for_status(&c, JobStatus::Completed);
}

#[test]
fn test_cancel_frees_slot_for_next_job() {
    let t = TestEngine::start(1);
    let job1 = t.submit("n1-first.wav");
    let job2 = t.submit("n1-second.wav");

    t.wait_for_status(&job1, JobStatus::Processing);
    t.transcriber.wait_started("n1-first.wav", 1);
    assert_eq!(t.status(&job2), JobStatus::Queued);

    t.engine.cancel_job(&job1).unwrap();
    assert_eq!(t.status(&job1), JobStatus::Cancelling);

    // The in-flight call is never interrupted; the signal lands at the
    // stage boundary.
    t.transcriber.finish("n1-first.wav");
    let cancelled = t.wait_for_status(&job1, JobStatus::Cancelled);
    assert!(cancelled.cancellation_requested);
    assert!(cancelled.completed_at.is_none());

    t.wait_for_status(&job2, JobStatus::Processing);
    t.transcriber.finish("n1-second.wav");
    t.wait_for_status(&job2, JobStatus::Completed);
}

#[test]
fn test_cancel_is_idempotent() {
    let t = TestEngine::start(1);
    let running = t.submit("idem-running.wav");
    let waiting = t.submit("idem-waiting.wav");
    t.transcriber.wait_started("idem-running.wav", 1);

    t.engine.cancel_job(&waiting).unwrap();
    t.engine.cancel_job(&waiting).unwrap();
    assert_eq!(t.status(&waiting), JobStatus::Cancelled);
    assert_eq!(t.engine.queue_position(&waiting), None);

    t.engine.cancel_job(&running).unwrap();
    t.engine.cancel_job(&running).unwrap();
    assert_eq!(t.status(&running), JobStatus::Cancelling);

    t.transcriber.finish("idem-running.wav");
    t.wait_for_status(&running, JobStatus::Cancelled);
    t.engine.cancel_job(&running).unwrap();
    assert_eq!(t.status(&running), JobStatus::Cancelled);

    // The cancelled queued job never reached a provider.
    assert_eq!(t.transcriber.calls("idem-waiting.wav"), 0);
}

#[test]
fn test_pause_releases_slot_and_resume_requeues() {
    let t = TestEngine::start(1);
    let p = t.submit("pause-p.wav");
    let q = t.submit("pause-q.wav");
    t.transcriber.wait_started("pause-p.wav", 1);

    t.engine.pause_job(&p).unwrap();
    let pausing = t.job(&p);
    assert_eq!(pausing.status, JobStatus::Pausing);
    assert!(pausing.pause_requested);
    assert!(pausing.pause_requested_at.is_some());
    assert_eq!(t.status(&q), JobStatus::Queued);

    t.transcriber.finish("pause-p.wav");
    let paused = t.wait_for_status(&p, JobStatus::Paused);
    assert!(paused.paused_at.is_some());

    t.wait_for_status(&q, JobStatus::Processing);
    assert_eq!(t.engine.stats().active, 1);

    t.engine.resume_job(&p).unwrap();
    let resumed = t.job(&p);
    assert_eq!(resumed.status, JobStatus::Queued);
    assert_eq!(resumed.resume_count, 1);
    assert!(!resumed.pause_requested);
    assert_eq!(resumed.progress_percent, 0);
    assert_eq!(t.engine.queue_position(&p), Some(0));

    t.transcriber.finish("pause-q.wav");
    t.wait_for_status(&p, JobStatus::Processing);
    // A fresh stage run, not a continuation.
    t.transcriber.wait_started("pause-p.wav", 2);

    t.transcriber.finish("pause-p.wav");
    let done = t.wait_for_status(&p, JobStatus::Completed);
    assert_eq!(done.resume_count, 1);
    assert!(done.processing_seconds >= 0.0);
}

#[test]
fn test_resume_goes_to_back_of_queue() {
    let t = TestEngine::start(1);
    let first = t.submit("back-1.wav");
    t.transcriber.wait_started("back-1.wav", 1);
    t.engine.pause_job(&first).unwrap();
    t.transcriber.finish("back-1.wav");
    t.wait_for_status(&first, JobStatus::Paused);

    let blocker = t.submit("back-2.wav");
    t.transcriber.wait_started("back-2.wav", 1);
    let waiting = t.submit("back-3.wav");

    t.engine.resume_job(&first).unwrap();
    assert_eq!(t.engine.queue_position(&waiting), Some(0));
    assert_eq!(t.engine.queue_position(&first), Some(1));

    t.transcriber.finish("back-2.wav");
    t.transcriber.finish("back-3.wav");
    t.transcriber.finish("back-1.wav");
    t.wait_for_status(&blocker, JobStatus::Completed);
    t.wait_for_status(&waiting, JobStatus::Completed);
    t.wait_for_status(&first, JobStatus::Completed);
}

#[test]
fn test_cancel_paused_job() {
    let t = TestEngine::start(1);
    let id = t.submit("paused-cancel.wav");
    t.transcriber.wait_started("paused-cancel.wav", 1);
    t.engine.pause_job(&id).unwrap();
    t.engine.pause_job(&id).unwrap();
    t.transcriber.finish("paused-cancel.wav");
    t.wait_for_status(&id, JobStatus::Paused);
    t.engine.pause_job(&id).unwrap();

    t.engine.cancel_job(&id).unwrap();
    assert_eq!(t.status(&id), JobStatus::Cancelled);
    assert!(matches!(
        t.engine.resume_job(&id),
        Err(CommandError::InvalidState {
            status: JobStatus::Cancelled,
            ..
        })
    ));
}

#[test]
fn test_commands_rejected_in_wrong_state() {
    let t = TestEngine::start(1);
    let done = t.submit("wrong-done.wav");
    t.transcriber.finish("wrong-done.wav");
    t.wait_for_status(&done, JobStatus::Completed);

    assert!(matches!(
        t.engine.pause_job(&done),
        Err(CommandError::InvalidState {
            status: JobStatus::Completed,
            command: "pause",
            ..
        })
    ));
    assert!(matches!(
        t.engine.cancel_job(&done),
        Err(CommandError::InvalidState { .. })
    ));
    assert!(matches!(
        t.engine.resume_job(&done),
        Err(CommandError::InvalidState { .. })
    ));

    let running = t.submit("wrong-running.wav");
    t.transcriber.wait_started("wrong-running.wav", 1);
    let queued = t.submit("wrong-queued.wav");
    assert!(matches!(
        t.engine.resume_job(&running),
        Err(CommandError::InvalidState {
            status: JobStatus::Processing,
            ..
        })
    ));
    assert!(matches!(
        t.engine.pause_job(&queued),
        Err(CommandError::InvalidState {
            status: JobStatus::Queued,
            ..
        })
    ));
    assert!(matches!(
        t.engine.resume_job(&queued),
        Err(CommandError::InvalidState { .. })
    ));

    // A rejected command leaves the job alone.
    assert_eq!(t.status(&queued), JobStatus::Queued);
    assert!(!t.job(&queued).pause_requested);

    assert!(matches!(
        t.engine.cancel_job("no-such-job"),
        Err(CommandError::NotFound(_))
    ));

    t.transcriber.finish("wrong-running.wav");
    t.transcriber.finish("wrong-queued.wav");
    t.wait_for_status(&queued, JobStatus::Completed);
}

#[test]
fn test_structural_rejections() {
    let t = TestEngine::start(1);

    let err = t
        .engine
        .submit_job(
            "tester",
            "x.wav",
            ModelSelection::transcription_only(ModelRef::new("whisper", "large-v3")),
        )
        .unwrap_err();
    assert!(matches!(err, AdmissionError::ModelDisabled { .. }));

    let err = t
        .engine
        .submit_job("tester", "slides.pptx", asr_only())
        .unwrap_err();
    assert!(matches!(err, AdmissionError::UnsupportedMedia { .. }));

    assert_eq!(
        t.engine.list_jobs(&Default::default()).unwrap().total,
        0
    );

    let mut config = test_config(1);
    config.models.transcription.clear();
    let empty = TestEngine::with_config(config);
    let err = empty
        .engine
        .submit_job("tester", "x.wav", asr_only())
        .unwrap_err();
    assert!(matches!(err, AdmissionError::NoEnabledModel));
}

#[test]
fn test_restart_creates_new_job() {
    let t = TestEngine::start(1);
    let old = t.submit("restart.wav");
    t.transcriber.fail("restart.wav", "model file missing");
    let failed = t.wait_for_status(&old, JobStatus::Failed);

    let new = t.engine.restart_job(&old).unwrap();
    assert_ne!(new, old);

    let fresh = t.job(&new);
    assert_eq!(fresh.restarted_from.as_deref(), Some(old.as_str()));
    assert_eq!(fresh.source_ref, failed.source_ref);
    assert_eq!(fresh.models, failed.models);
    assert!(fresh.error.is_none());

    t.transcriber.finish("restart.wav");
    t.wait_for_status(&new, JobStatus::Completed);

    let unchanged = t.job(&old);
    assert_eq!(unchanged.status, JobStatus::Failed);
    assert_eq!(unchanged.error.as_deref(), Some("model file missing"));

    let running = t.submit("restart-running.wav");
    t.transcriber.wait_started("restart-running.wav", 1);
    assert!(matches!(
        t.engine.restart_job(&running),
        Err(CommandError::InvalidState { command: "restart", .. })
    ));
    t.transcriber.finish("restart-running.wav");
    t.wait_for_status(&running, JobStatus::Completed);
}

#[test]
fn test_list_jobs_by_owner() {
    let t = TestEngine::start(1);
    let mine = t.submit("list-mine.wav");
    let theirs = t
        .engine
        .submit_job("someone-else", "list-theirs.wav", asr_only())
        .unwrap();

    let page = t
        .engine
        .list_jobs(&scribeflow::JobQuery {
            owner: Some("someone-else".into()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.jobs[0].id, theirs);

    t.transcriber.finish("list-mine.wav");
    t.transcriber.finish("list-theirs.wav");
    t.wait_for_status(&mine, JobStatus::Completed);
    t.wait_for_status(&theirs, JobStatus::Completed);
}

#[test]
fn test_shutdown_stops_admission() {
    let t = TestEngine::start(1);
    let running = t.submit("shutdown-running.wav");
    let waiting = t.submit("shutdown-waiting.wav");
    t.transcriber.wait_started("shutdown-running.wav", 1);

    t.shutdown_finishing("shutdown-running.wav");
    assert_eq!(t.status(&running), JobStatus::Completed);
    assert_eq!(t.status(&waiting), JobStatus::Queued);
    assert_eq!(t.transcriber.calls("shutdown-waiting.wav"), 0);

    assert!(matches!(
        t.engine.submit_job("tester", "late.wav", asr_only()),
        Err(AdmissionError::ShuttingDown)
    ));
    // Second shutdown is a no-op.
    t.engine.shutdown();
}
