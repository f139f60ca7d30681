//! Integration tests for cron-driven template cloning.

mod common;

use chrono::{DateTime, Duration, TimeZone, Utc};
use common::fleet;
use fleet_orchestrator::core::Scheduler;
use fleet_orchestrator::models::{JobStatus, NewJob};
use serde_json::json;
use uuid::Uuid;

fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, h, m, s).unwrap()
}

fn template(device_ids: Vec<Uuid>, cron: &str) -> NewJob {
    NewJob {
        name: "nightly dns".to_string(),
        section: "dns".to_string(),
        patch: json!({"servers": ["10.0.0.53"]}),
        device_ids,
        cron_expression: Some(cron.to_string()),
        schedule_enabled: true,
        created_by: "ops".to_string(),
        ..Default::default()
    }
}

// ========== FIRING TESTS ==========

#[tokio::test]
async fn test_due_template_fires_once_per_occurrence() {
    let f = fleet(2).await;
    let ids: Vec<Uuid> = f.devices.iter().map(|d| d.id).collect();
    let tpl = f.orchestrator.create(template(ids, "* * * * *")).await.unwrap();
    let scheduler = Scheduler::new(f.orchestrator.clone());

    let first = scheduler.tick(at(12, 0, 5)).await;
    assert_eq!(first.cloned.len(), 1);
    assert_eq!(first.skipped, 0);

    // Same minute again: the watermark holds.
    let second = scheduler.tick(at(12, 0, 40)).await;
    assert!(second.cloned.is_empty());

    // Next minute is a new occurrence.
    let third = scheduler.tick(at(12, 1, 2)).await;
    assert_eq!(third.cloned.len(), 1);

    assert_eq!(f.orchestrator.last_fired(tpl.id).await, Some(at(12, 1, 0)));
}

#[tokio::test]
async fn test_missed_occurrence_outside_grace_is_skipped() {
    let f = fleet(1).await;
    f.orchestrator
        .create(template(vec![f.devices[0].id], "0 12 * * *"))
        .await
        .unwrap();
    let scheduler = Scheduler::new(f.orchestrator.clone());

    assert!(scheduler.tick(at(12, 3, 50)).await.cloned.is_empty());
    assert!(f.orchestrator.list().await.iter().all(|j| j.name == "nightly dns"));
}

#[tokio::test]
async fn test_fire_within_grace_then_not_again() {
    let f = fleet(1).await;
    f.orchestrator
        .create(template(vec![f.devices[0].id], "0 12 * * *"))
        .await
        .unwrap();
    let scheduler = Scheduler::new(f.orchestrator.clone());

    assert_eq!(scheduler.tick(at(12, 0, 30)).await.cloned.len(), 1);
    assert!(scheduler.tick(at(12, 0, 55)).await.cloned.is_empty());
    assert!(scheduler.tick(at(12, 3, 50)).await.cloned.is_empty());
}

#[tokio::test]
async fn test_custom_grace_window() {
    let f = fleet(1).await;
    f.orchestrator
        .create(template(vec![f.devices[0].id], "0 12 * * *"))
        .await
        .unwrap();
    let scheduler = Scheduler::with_grace(f.orchestrator.clone(), 300);

    assert_eq!(scheduler.tick(at(12, 3, 50)).await.cloned.len(), 1);
}

// ========== CLONE TESTS ==========

#[tokio::test]
async fn test_clone_copies_template_and_runs() {
    let f = fleet(2).await;
    let ids: Vec<Uuid> = f.devices.iter().map(|d| d.id).collect();
    let tpl = f
        .orchestrator
        .create(template(ids.clone(), "30 2 * * *"))
        .await
        .unwrap();
    let scheduler = Scheduler::new(f.orchestrator.clone());

    let fire = Utc.with_ymd_and_hms(2026, 3, 10, 2, 30, 0).unwrap();
    let report = scheduler.tick(fire + Duration::seconds(10)).await;
    let clone_id = report.cloned[0];

    let clone = f.orchestrator.wait(clone_id).await.unwrap();
    assert_eq!(clone.job.template_id, Some(tpl.id));
    assert_eq!(clone.job.name, "nightly dns (scheduled 2026-03-10 02:30)");
    assert_eq!(clone.job.status, JobStatus::Completed);
    assert!(clone.job.cron_expression.is_none());
    assert!(!clone.job.is_template());
    assert_eq!(clone.targets.len(), 2);

    for id in ids {
        let live = f.mock.config(id).await.unwrap();
        assert_eq!(live["dns"]["servers"], json!(["10.0.0.53"]));
    }

    let template = f.orchestrator.get(tpl.id).await.unwrap();
    assert_eq!(
        serde_json::to_value(&template.job).unwrap(),
        serde_json::to_value(&tpl).unwrap()
    );
    assert_eq!(template.job.status, JobStatus::Pending);
    assert!(template.job.is_template());
    assert!(template.targets.iter().all(|t| t.executed_at.is_none()));
    assert!(f.audit.actions().contains(&"schedule_bulk_job".to_string()));
}

#[tokio::test]
async fn test_disabled_schedule_never_fires() {
    let f = fleet(1).await;
    let mut new_job = template(vec![f.devices[0].id], "* * * * *");
    new_job.schedule_enabled = false;
    f.orchestrator.create(new_job).await.unwrap();

    let report = Scheduler::new(f.orchestrator.clone()).tick(at(9, 0, 1)).await;
    assert!(report.cloned.is_empty());
    assert_eq!(report.skipped, 0);
}

// ========== ERROR TESTS ==========

#[tokio::test]
async fn test_malformed_cron_is_skipped_and_others_fire() {
    let f = fleet(1).await;
    let device = f.devices[0].id;
    let broken = f
        .orchestrator
        .create(template(vec![device], "* * * * *"))
        .await
        .unwrap();
    f.orchestrator
        .create(template(vec![device], "* * * * *"))
        .await
        .unwrap();

    // Creation validates the expression, so corrupt it in storage.
    f.db.transaction(|state| {
        if let Some(job) = state.job_mut(broken.id) {
            job.cron_expression = Some("61 * * * *".to_string());
        }
        Ok(())
    })
    .await
    .unwrap();

    let report = Scheduler::new(f.orchestrator.clone()).tick(at(8, 15, 0)).await;
    assert_eq!(report.cloned.len(), 1);
    assert_eq!(report.skipped, 1);

    assert!(f.orchestrator.last_fired(broken.id).await.is_none());
}

#[tokio::test]
async fn test_overflowing_step_is_skipped_and_others_fire() {
    let f = fleet(1).await;
    let device = f.devices[0].id;
    let broken = f
        .orchestrator
        .create(template(vec![device], "* * * * *"))
        .await
        .unwrap();
    let healthy = f
        .orchestrator
        .create(template(vec![device], "*/5 * * * *"))
        .await
        .unwrap();

    f.db.transaction(|state| {
        if let Some(job) = state.job_mut(broken.id) {
            job.cron_expression = Some("1/4294967295 * * * *".to_string());
        }
        Ok(())
    })
    .await
    .unwrap();

    let report = Scheduler::new(f.orchestrator.clone()).tick(at(8, 15, 20)).await;
    assert_eq!(report.cloned.len(), 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(f.orchestrator.last_fired(healthy.id).await, Some(at(8, 15, 0)));
    assert!(f.orchestrator.last_fired(broken.id).await.is_none());
}

// ========== NEXT FIRE TESTS ==========

#[tokio::test]
async fn test_next_fire_for_display() {
    let f = fleet(1).await;
    let mut job = f
        .orchestrator
        .create(template(vec![f.devices[0].id], "0 3 * * 1"))
        .await
        .unwrap();

    // 2026-03-10 is a Tuesday.
    let next = Scheduler::next_fire(&job, at(12, 0, 0)).unwrap();
    assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 16, 3, 0, 0).unwrap());

    job.cron_expression = None;
    assert!(Scheduler::next_fire(&job, at(12, 0, 0)).is_none());
}
