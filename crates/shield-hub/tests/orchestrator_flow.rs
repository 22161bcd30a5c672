mod support;

use serde_json::{json, Value};
use shield_core::heuristic::{verdict_for, Verdict};
use shield_core::{Safety, ScanReport, TabRecord};
use shield_gateway::GatewayError;
use shield_hub::{OrchestratorConfig, PipelineOutcome, SenderContext};
use std::time::Duration;
use support::{safe_assessment, scan, scan_json, unsafe_assessment, Harness, ACCEPTED_PASSWORD};

fn record(value: &Value) -> TabRecord {
    serde_json::from_value(value["data"].clone()).expect("tab record")
}

#[tokio::test]
async fn never_scanned_tabs_report_null() {
    let harness = Harness::new(true);
    for tab_id in [0, 1, 42, -1, i64::MAX] {
        assert_eq!(harness.get_scan(tab_id).await, json!({"data": null}));
    }
}

#[tokio::test]
async fn unauthenticated_scan_of_tab_42_settles_without_assessment() {
    let harness = Harness::new(false);
    let dispatch = harness
        .router
        .dispatch(
            json!({"type": "PAGE_SCAN", "data": scan_json("https://x.com")}),
            SenderContext::tab(42),
        )
        .await;
    assert!(dispatch.resolve().await.is_none());

    let mut reply = harness.get_scan(42).await;
    for _ in 0..100 {
        if reply["data"]["loading"] == json!(false) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        reply = harness.get_scan(42).await;
    }

    assert_eq!(
        reply,
        json!({
            "data": {
                "scan": scan_json("https://x.com"),
                "assessment": null,
                "loading": false,
                "error": null
            }
        })
    );
    assert_eq!(harness.gateway.assess_calls(), 0);
}

#[tokio::test]
async fn authenticated_scan_of_tab_42_stores_gateway_assessment() {
    let harness = Harness::new(true);
    let gate = harness.gateway.hold("https://x.com");
    let ticket = harness
        .orchestrator
        .handle_page_scan(42, scan("https://x.com"))
        .await;

    let pending = record(&harness.get_scan(42).await);
    assert!(pending.loading);
    assert!(pending.assessment.is_none());
    assert_eq!(verdict_for(Some(&pending)), Verdict::Loading);

    gate.send(Ok(safe_assessment())).expect("release");
    assert_eq!(ticket.settled().await, PipelineOutcome::Assessed);

    let settled = record(&harness.get_scan(42).await);
    assert!(!settled.loading);
    assert_eq!(settled.error, None);
    assert_eq!(settled.assessment, Some(safe_assessment()));
    assert_eq!(settled.scan, scan("https://x.com"));
    assert_eq!(verdict_for(Some(&settled)).status_text(), "Safe");
}

#[tokio::test]
async fn assessment_receives_url_and_evidence_from_the_scan() {
    let harness = Harness::new(true);
    let message = json!({
        "type": "PAGE_SCAN",
        "data": {
            "url": "https://bank.example/login",
            "forms": [
                {"action": "https://bank.example/session", "method": "post", "hasPasswordField": true, "inputCount": 3},
                {"action": "/search", "method": "get", "hasPasswordField": false, "inputCount": 1}
            ],
            "links": {"total": 40, "external": 12},
            "meta": {"isHttps": true, "title": "Bank Login"}
        }
    });
    let report: ScanReport = serde_json::from_value(message["data"].clone()).expect("report");
    harness.router.dispatch(message, SenderContext::tab(21)).await;

    let mut settled = record(&harness.get_scan(21).await);
    for _ in 0..100 {
        if !settled.loading {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        settled = record(&harness.get_scan(21).await);
    }
    assert_eq!(settled.assessment, Some(safe_assessment()));

    let calls = harness.gateway.assessed();
    assert_eq!(
        calls,
        vec![("https://bank.example/login".to_string(), report.evidence())]
    );
    let (_, evidence) = &calls[0];
    assert_eq!(evidence.forms.len(), 2);
    assert!(evidence.forms[0].has_password_field);
    assert_eq!(evidence.links.total, 40);
    assert_eq!(evidence.links.external, 12);
    assert_eq!(evidence.meta.title, "Bank Login");
    assert_eq!(
        serde_json::to_value(evidence)
            .expect("evidence json")
            .as_object()
            .map(|object| object.keys().cloned().collect::<Vec<_>>()),
        Some(vec!["forms".to_string(), "links".to_string(), "meta".to_string()])
    );
}

#[tokio::test]
async fn gateway_rejection_is_recorded_on_the_tab() {
    let harness = Harness::new(true);
    let gate = harness.gateway.hold("https://down.example");
    let ticket = harness
        .orchestrator
        .handle_page_scan(3, scan("https://down.example"))
        .await;
    gate.send(Err(GatewayError::network("connection refused")))
        .expect("release");
    assert_eq!(ticket.settled().await, PipelineOutcome::Failed);

    let failed = record(&harness.get_scan(3).await);
    assert!(!failed.loading);
    assert!(failed.assessment.is_none());
    assert_eq!(failed.error.as_deref(), Some("connection refused"));
    assert_eq!(
        verdict_for(Some(&failed)),
        Verdict::Failed("connection refused".to_string())
    );

    // A failure does not block the next scan of the same tab.
    let retry = harness
        .orchestrator
        .handle_page_scan(3, scan("https://down.example"))
        .await;
    assert_eq!(retry.settled().await, PipelineOutcome::Assessed);
    let recovered = record(&harness.get_scan(3).await);
    assert_eq!(recovered.error, None);
    assert_eq!(recovered.assessment, Some(safe_assessment()));
}

#[tokio::test]
async fn get_scan_is_idempotent() {
    let harness = Harness::new(true);
    harness
        .orchestrator
        .handle_page_scan(9, scan("https://a.example"))
        .await
        .settled()
        .await;

    let first = harness.get_scan(9).await;
    let second = harness.get_scan(9).await;
    assert_eq!(first, second);
    assert_eq!(harness.gateway.assess_calls(), 1);
}

#[tokio::test]
async fn closing_a_tab_discards_its_in_flight_result() {
    let harness = Harness::new(true);
    let gate = harness.gateway.hold("https://a.example");
    let ticket = harness
        .orchestrator
        .handle_page_scan(5, scan("https://a.example"))
        .await;

    assert!(harness.orchestrator.handle_tab_removed(5).await);
    assert_eq!(harness.get_scan(5).await, json!({"data": null}));

    gate.send(Ok(unsafe_assessment())).expect("release");
    assert_eq!(ticket.settled().await, PipelineOutcome::Stale);
    assert_eq!(harness.get_scan(5).await, json!({"data": null}));
    assert_eq!(harness.orchestrator.tab_count().await, 0);
}

#[tokio::test]
async fn later_scan_wins_when_earlier_result_arrives_first() {
    let harness = Harness::new(true);
    let gate_a = harness.gateway.hold("https://a.example");
    let gate_b = harness.gateway.hold("https://b.example");

    let ticket_a = harness
        .orchestrator
        .handle_page_scan(7, scan("https://a.example"))
        .await;
    let ticket_b = harness
        .orchestrator
        .handle_page_scan(7, scan("https://b.example"))
        .await;
    assert!(ticket_b.generation > ticket_a.generation);

    gate_a.send(Ok(unsafe_assessment())).expect("release a");
    assert_eq!(ticket_a.settled().await, PipelineOutcome::Stale);
    let interim = record(&harness.get_scan(7).await);
    assert_eq!(interim.scan.url, "https://b.example");
    assert!(interim.loading);
    assert!(interim.assessment.is_none());

    gate_b.send(Ok(safe_assessment())).expect("release b");
    assert_eq!(ticket_b.settled().await, PipelineOutcome::Assessed);
    let last = record(&harness.get_scan(7).await);
    assert_eq!(last.scan.url, "https://b.example");
    assert_eq!(last.assessment, Some(safe_assessment()));
}

#[tokio::test]
async fn later_scan_wins_when_earlier_result_arrives_last() {
    let harness = Harness::new(true);
    let gate_a = harness.gateway.hold("https://a.example");
    let gate_b = harness.gateway.hold("https://b.example");

    let ticket_a = harness
        .orchestrator
        .handle_page_scan(7, scan("https://a.example"))
        .await;
    let ticket_b = harness
        .orchestrator
        .handle_page_scan(7, scan("https://b.example"))
        .await;

    gate_b.send(Ok(safe_assessment())).expect("release b");
    assert_eq!(ticket_b.settled().await, PipelineOutcome::Assessed);

    gate_a
        .send(Err(GatewayError::network("late failure")))
        .expect("release a");
    assert_eq!(ticket_a.settled().await, PipelineOutcome::Stale);

    let last = record(&harness.get_scan(7).await);
    assert_eq!(last.scan.url, "https://b.example");
    assert_eq!(last.assessment, Some(safe_assessment()));
    assert_eq!(last.error, None);
}

#[tokio::test]
async fn scans_of_different_tabs_are_independent() {
    let harness = Harness::new(true);
    let gate = harness.gateway.hold("https://slow.example");
    let slow = harness
        .orchestrator
        .handle_page_scan(1, scan("https://slow.example"))
        .await;
    let fast = harness
        .orchestrator
        .handle_page_scan(2, scan("https://fast.example"))
        .await;

    assert_eq!(fast.settled().await, PipelineOutcome::Assessed);
    assert!(record(&harness.get_scan(1).await).loading);

    gate.send(Ok(unsafe_assessment())).expect("release");
    assert_eq!(slow.settled().await, PipelineOutcome::Assessed);
    let slow_record = record(&harness.get_scan(1).await);
    assert_eq!(
        slow_record.assessment.map(|assessment| assessment.safety),
        Some(Safety::Unsafe)
    );
    assert_eq!(harness.orchestrator.tab_count().await, 2);
}

#[tokio::test]
async fn slow_assessment_times_out_when_bounded() {
    let harness = Harness::with_config(
        true,
        OrchestratorConfig {
            assess_timeout: Some(Duration::from_millis(50)),
        },
    );
    let _gate = harness.gateway.hold("https://slow.example");
    let ticket = harness
        .orchestrator
        .handle_page_scan(11, scan("https://slow.example"))
        .await;

    assert_eq!(ticket.settled().await, PipelineOutcome::Failed);
    let failed = record(&harness.get_scan(11).await);
    assert!(!failed.loading);
    assert_eq!(
        failed.error.as_deref(),
        Some("assessment timed out after 50ms")
    );
}

#[tokio::test]
async fn login_failure_reply_carries_gateway_message() {
    let harness = Harness::new(false);
    let reply = harness
        .send(json!({"type": "LOGIN", "email": "user@test.com", "password": "nope"}))
        .await
        .expect("login reply");
    assert_eq!(
        reply,
        json!({"success": false, "error": "Invalid credentials"})
    );
    assert_eq!(
        harness.send(json!({"type": "GET_AUTH_STATE"})).await,
        Some(json!({"authenticated": false}))
    );
}

#[tokio::test]
async fn login_then_logout_round_trip() {
    let harness = Harness::new(false);
    let login = harness
        .send(json!({
            "type": "LOGIN",
            "email": "user@test.com",
            "password": ACCEPTED_PASSWORD
        }))
        .await
        .expect("login reply");
    assert_eq!(login["success"], json!(true));
    assert_eq!(login["user"]["email"], "user@test.com");
    assert!(login.get("error").is_none());
    assert_eq!(
        harness.send(json!({"type": "GET_AUTH_STATE"})).await,
        Some(json!({"authenticated": true}))
    );

    let ticket = harness
        .orchestrator
        .handle_page_scan(4, scan("https://a.example"))
        .await;
    assert_eq!(ticket.settled().await, PipelineOutcome::Assessed);

    assert_eq!(
        harness.send(json!({"type": "LOGOUT"})).await,
        Some(json!({"success": true}))
    );
    assert_eq!(
        harness.send(json!({"type": "GET_AUTH_STATE"})).await,
        Some(json!({"authenticated": false}))
    );

    let ticket = harness
        .orchestrator
        .handle_page_scan(4, scan("https://a.example"))
        .await;
    assert_eq!(ticket.settled().await, PipelineOutcome::Unauthenticated);
    assert_eq!(harness.gateway.assessed_urls(), vec!["https://a.example"]);
}

#[tokio::test]
async fn logout_failure_still_signs_out() {
    let harness = Harness::new(true);
    harness.gateway.fail_next_logout();
    assert_eq!(
        harness.send(json!({"type": "LOGOUT"})).await,
        Some(json!({"success": false, "error": "backend unreachable"}))
    );
    assert_eq!(
        harness.send(json!({"type": "GET_AUTH_STATE"})).await,
        Some(json!({"authenticated": false}))
    );
}

#[tokio::test]
async fn unknown_messages_are_ignored() {
    let harness = Harness::new(true);
    assert_eq!(harness.send(json!({"type": "OPEN_DASHBOARD"})).await, None);
    assert_eq!(harness.send(json!({"type": "PAGE_SCAN"})).await, None);
    assert_eq!(harness.orchestrator.tab_count().await, 0);
}

#[tokio::test]
async fn heuristic_verdict_applies_while_signed_out() {
    let harness = Harness::new(false);
    let mut report = scan("http://shop.example");
    report.meta.is_https = false;
    report.forms.push(shield_core::FormSummary {
        action: "/login".to_string(),
        method: "post".to_string(),
        has_password_field: true,
        input_count: 2,
    });
    harness
        .orchestrator
        .handle_page_scan(12, report)
        .await
        .settled()
        .await;

    let settled = harness.orchestrator.snapshot(12).await;
    assert_eq!(
        verdict_for(settled.as_ref()),
        Verdict::Heuristic(Safety::Unsafe)
    );
    assert_eq!(verdict_for(None).status_text(), "No data yet");
}
