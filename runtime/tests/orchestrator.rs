//! End-to-end request handling with a scripted browser.

mod common;

use assert_json_diff::assert_json_include;
use common::{FakeRenderer, PortalScript, ScriptedSolver, CORRECT_CODE, PASSWORD, REJECTION};
use portal_runtime::config::{ExtractionMode, PortalConfig};
use portal_runtime::error::ScrapeError;
use portal_runtime::orchestrator::{execute, AppContext};
use portal_runtime::portal::pages;
use portal_runtime::protocol::{ScrapeRequest, Status, Task};
use std::sync::Arc;

const COURSE_LISTING: &str = r#"<form method="post" action="detail.asp"><table>
  <tr><td><input type="radio" name="CRSNO" value="A101"></td><td>A101</td><td>微積分</td></tr>
  <tr><td><input type="radio" name="CRSNO" value="B202"></td><td>B202</td><td>普通物理</td></tr>
</table><input type="submit" name="B1" value="查詢"></form>"#;

const TERM_LISTING: &str = r#"<form method="post" action="grade.asp">
  <select name="SYEAR"><option value="113">113</option></select>
  <select name="SEM"><option value="1">1</option><option value="2">2</option></select>
  <input type="submit" name="B1" value="查詢"></form>"#;

fn request(task: Task) -> ScrapeRequest {
    ScrapeRequest {
        account: "B1234".to_string(),
        password: PASSWORD.to_string(),
        task,
    }
}

fn browser_config() -> PortalConfig {
    PortalConfig {
        base_url: "http://portal.invalid/scoreqry/".to_string(),
        extraction_mode: ExtractionMode::Browser,
        ..PortalConfig::default()
    }
}

fn app(script: PortalScript, solver: ScriptedSolver) -> (AppContext, Arc<FakeRenderer>) {
    let renderer = Arc::new(FakeRenderer::new(script));
    let app = AppContext::new(browser_config(), Arc::new(solver), renderer.clone());
    (app, renderer)
}

fn full_script() -> PortalScript {
    let mut script = PortalScript::default();
    script
        .listings
        .insert(pages::SCORE_DETAIL, COURSE_LISTING.to_string());
    script
        .listings
        .insert(pages::HISTORICAL_GRADES, TERM_LISTING.to_string());
    script.details.insert(
        "A101".to_string(),
        "<table><tr><td>項目</td><td>分數</td></tr><tr><td>期中</td><td>80</td></tr></table>"
            .to_string(),
    );
    script.details.insert(
        "B202".to_string(),
        "<table><tr><td>項目</td><td>分數</td></tr><tr><td>期末</td><td>91</td></tr></table>"
            .to_string(),
    );
    script.terms.insert(
        ("113".to_string(), "1".to_string()),
        "<table><tr><td>課程編號</td><td>成績</td></tr><tr><td>A101</td><td>80</td></tr></table>\
         <table><tr><td>修習學分 3</td><td>排名 7/40</td></tr></table>"
            .to_string(),
    );
    script.terms.insert(
        ("113".to_string(), "2".to_string()),
        "<p>查無資料</p>".to_string(),
    );
    script
}

#[tokio::test]
async fn test_liveness_task_does_no_browser_work() {
    let (app, renderer) = app(PortalScript::default(), ScriptedSolver::always_wrong());

    let response = execute(&app, &request(Task::Test)).await.unwrap();

    assert_eq!(response.status, Status::Success);
    assert_eq!(response.message.as_deref(), Some("ok"));
    assert_eq!(renderer.recorder.lock().unwrap().contexts_opened, 0);
}

#[tokio::test]
async fn test_missing_credentials_rejected_before_browser() {
    let (app, renderer) = app(PortalScript::default(), ScriptedSolver::always_wrong());
    let req = ScrapeRequest {
        account: String::new(),
        password: String::new(),
        task: Task::Score,
    };

    let result = execute(&app, &req).await;

    assert!(matches!(result, Err(ScrapeError::ClientInput)));
    assert_eq!(renderer.recorder.lock().unwrap().contexts_opened, 0);
}

#[tokio::test]
async fn test_full_flow_in_browser_mode() {
    let (app, renderer) = app(full_script(), ScriptedSolver::wrong_then_right(1));

    let response = execute(&app, &request(Task::Both)).await.unwrap();

    assert_eq!(response.status, Status::Success);
    let results = response.results.unwrap();
    let scores = results.score_task.unwrap();
    assert_eq!(scores.len(), 2);
    assert_eq!(scores[1].details[0].get("分數"), Some("91"));

    let grades = results.grades_task.unwrap();
    assert_eq!(grades.grades.len(), 1);
    assert_eq!(grades.grades[0].get("學年度"), Some("113"));
    assert_eq!(grades.rank_stats.len(), 1);
    assert_eq!(grades.rank_stats[0].stats.rank, "7");
    assert_eq!(grades.rank_stats[0].stats.class_size, "40");
    assert_eq!(grades.rank_stats[0].stats.average_score, "N/A");

    let rec = renderer.recorder.lock().unwrap();
    assert_eq!(rec.submissions, vec!["0000", CORRECT_CODE]);
    assert_eq!(rec.contexts_opened, 1);
    assert_eq!(rec.closed, 1);
}

#[tokio::test]
async fn test_score_only_omits_grades() {
    let (app, _) = app(full_script(), ScriptedSolver::wrong_then_right(0));

    let response = execute(&app, &request(Task::Score)).await.unwrap();

    let json = serde_json::to_value(&response).unwrap();
    assert_json_include!(
        actual: json.clone(),
        expected: serde_json::json!({
            "status": "success",
            "results": {
                "score_task": [
                    {"course": "微積分", "code": "A101", "details": [{"項目": "期中", "分數": "80"}]},
                    {"course": "普通物理", "code": "B202"}
                ]
            }
        })
    );
    assert!(json["results"].get("grades_task").is_none());
    assert!(json.get("message").is_none());
}

#[tokio::test]
async fn test_rejected_credentials_fail_and_close() {
    let (app, renderer) = app(PortalScript::default(), ScriptedSolver::wrong_then_right(0));
    let req = ScrapeRequest {
        password: "not-the-password".to_string(),
        ..request(Task::Score)
    };

    let response = execute(&app, &req).await.unwrap();

    assert_eq!(response.status, Status::Failed);
    assert_eq!(response.message.as_deref(), Some(REJECTION));
    assert_eq!(renderer.recorder.lock().unwrap().closed, 1);
}

#[tokio::test]
async fn test_exhausted_retries_fail_and_close() {
    let (app, renderer) = app(PortalScript::default(), ScriptedSolver::always_wrong());

    let response = execute(&app, &request(Task::Grades)).await.unwrap();

    assert_eq!(response.status, Status::Failed);
    assert_eq!(
        response.message.as_deref(),
        Some("captcha could not be recognised after 5 attempts")
    );
    let rec = renderer.recorder.lock().unwrap();
    assert_eq!(rec.submissions.len(), 5);
    assert_eq!(rec.closed, 1);
}

#[tokio::test]
async fn test_panic_in_flow_is_reported_and_browser_closed() {
    let mut script = full_script();
    script.panic_on = Some("KIND=1".to_string());
    let (app, renderer) = app(script, ScriptedSolver::wrong_then_right(0));

    let response = execute(&app, &request(Task::Score)).await.unwrap();

    assert_eq!(response.status, Status::Error);
    assert!(response.message.unwrap().contains("scripted panic"));
    let rec = renderer.recorder.lock().unwrap();
    assert_eq!(rec.closed, 1);
}

#[tokio::test]
async fn test_classifier_fault_is_an_error() {
    let solver = ScriptedSolver::new(
        vec![Err(captcha_vision::CaptchaError::Inference(
            "session poisoned".to_string(),
        ))],
        CORRECT_CODE,
    );
    let (app, renderer) = app(PortalScript::default(), solver);

    let response = execute(&app, &request(Task::Score)).await.unwrap();

    assert_eq!(response.status, Status::Error);
    assert!(!response.message.unwrap().contains(PASSWORD));
    assert_eq!(renderer.recorder.lock().unwrap().closed, 1);
}
