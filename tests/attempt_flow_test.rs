use std::env;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    routing::{get, post},
    Router,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value as JsonValue};
use tower::ServiceExt;
use uuid::Uuid;

use academy_backend::middleware::auth::{issue_token, require_permission};
use academy_backend::models::user::{Permission, Role, User};

fn setup_env() {
    env::set_var("SERVER_ADDRESS", "127.0.0.1:0");
    env::set_var("JWT_SECRET", "test_secret_key");
    env::set_var("FCM_SERVER_KEY", "test_fcm_key");
    env::set_var("PUBLIC_RPS", "100");
    env::set_var("CLIENT_RPS", "100");
}

async fn seed_student(pool: &sqlx::PgPool, level_id: Uuid, major_id: Uuid) -> User {
    let id = Uuid::new_v4();
    let user = sqlx::query_as::<_, User>(
        r#"INSERT INTO users (id, email, name, role, is_active)
           VALUES ($1, $2, $3, $4, TRUE) RETURNING *"#,
    )
    .bind(id)
    .bind(format!("student_{}@example.com", id))
    .bind("Test Student")
    .bind(Role::Student)
    .fetch_one(pool)
    .await
    .expect("seed student");

    sqlx::query(
        r#"INSERT INTO student_profiles (user_id, level_id, major_id) VALUES ($1, $2, $3)"#,
    )
    .bind(user.id)
    .bind(level_id)
    .bind(major_id)
    .execute(pool)
    .await
    .expect("seed profile");

    user
}

fn student_router(state: academy_backend::AppState) -> Router {
    Router::new()
        .route("/api/quizzes/:id", get(academy_backend::routes::attempts::get_quiz))
        .route(
            "/api/quizzes/:id/attempts",
            post(academy_backend::routes::attempts::start_attempt),
        )
        .route(
            "/api/attempts/:id/submit",
            post(academy_backend::routes::attempts::submit_answers),
        )
        .route(
            "/api/attempts/:id/abandon",
            post(academy_backend::routes::attempts::abandon_attempt),
        )
        .route(
            "/api/attempts/:id/result",
            get(academy_backend::routes::attempts::get_result),
        )
        .route_layer(axum::middleware::from_fn(|req, next| {
            require_permission(req, next, Permission::TakeQuizzes)
        }))
        .with_state(state)
}

// Decimal fields serialize as strings; scale varies between in-memory and
// NUMERIC round-tripped values ("3" vs "3.00"), so compare numerically.
fn dec(value: &JsonValue) -> Decimal {
    match value {
        JsonValue::String(s) => s.parse().expect("decimal string"),
        JsonValue::Number(n) => n.to_string().parse().expect("decimal number"),
        other => panic!("not a decimal value: {}", other),
    }
}

async fn request(
    app: &Router,
    method: &str,
    uri: &str,
    bearer: &str,
    body: Option<JsonValue>,
) -> (StatusCode, JsonValue) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {}", bearer));
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    let json = if bytes.is_empty() {
        JsonValue::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null)
    };
    (status, json)
}

#[tokio::test]
async fn attempt_lifecycle_end_to_end() {
    dotenvy::dotenv().ok();
    if env::var("DATABASE_URL").is_err() {
        eprintln!("DATABASE_URL not set, skipping attempt_lifecycle_end_to_end");
        return;
    }
    setup_env();
    let _ = academy_backend::config::init_config();

    let pool = academy_backend::database::pool::create_pool()
        .await
        .expect("pool");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations");

    // catalog seed
    let level_id = Uuid::new_v4();
    let major_id = Uuid::new_v4();
    let subject_id = Uuid::new_v4();
    sqlx::query(r#"INSERT INTO levels (id, name) VALUES ($1, $2)"#)
        .bind(level_id)
        .bind(format!("L3-{}", level_id))
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(r#"INSERT INTO majors (id, name) VALUES ($1, $2)"#)
        .bind(major_id)
        .bind(format!("CS-{}", major_id))
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(r#"INSERT INTO subjects (id, title) VALUES ($1, 'Algorithms')"#)
        .bind(subject_id)
        .execute(&pool)
        .await
        .unwrap();

    let teacher = sqlx::query_as::<_, User>(
        r#"INSERT INTO users (id, email, name, role, is_active)
           VALUES ($1, $2, 'Teacher', $3, TRUE) RETURNING *"#,
    )
    .bind(Uuid::new_v4())
    .bind(format!("teacher_{}@example.com", Uuid::new_v4()))
    .bind(Role::Teacher)
    .fetch_one(&pool)
    .await
    .unwrap();

    let app_state = academy_backend::AppState::new(pool.clone());

    // quiz from the scoring scenario: 3pt single-choice plus 2pt
    // multi-choice needing both correct options, pass at 50%
    let quiz = app_state
        .quiz_service
        .create_quiz(
            &serde_json::from_value(json!({
                "subject_id": subject_id,
                "title": "Graded quiz",
                "duration_minutes": 30,
                "passing_percentage": "50",
                "max_attempts": 2,
                "show_correction": true,
                "questions": [
                    {
                        "type": "single_choice",
                        "text": "Pick the right one",
                        "points": "3",
                        "explanation": null,
                        "choices": [
                            {"text": "right", "is_correct": true},
                            {"text": "wrong", "is_correct": false}
                        ]
                    },
                    {
                        "type": "multi_choice",
                        "text": "Pick both right ones",
                        "points": "2",
                        "explanation": null,
                        "choices": [
                            {"text": "right a", "is_correct": true},
                            {"text": "right b", "is_correct": true},
                            {"text": "wrong", "is_correct": false}
                        ]
                    }
                ]
            }))
            .unwrap(),
            teacher.id,
        )
        .await
        .expect("create quiz");

    let student = seed_student(&pool, level_id, major_id).await;
    let token = issue_token(&student).expect("token");
    let app = student_router(app_state.clone());

    // quiz view hides correctness flags
    let (status, view) = request(&app, "GET", &format!("/api/quizzes/{}", quiz.id), &token, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(view["questions"][0]["choices"][0].get("is_correct").is_none());

    // start attempt
    let (status, started) = request(
        &app,
        "POST",
        &format!("/api/quizzes/{}/attempts", quiz.id),
        &token,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["attempt_number"], 1);
    let attempt_id = started["attempt_id"].as_str().unwrap().to_string();

    // pull ids with correctness straight from the database
    let rows = sqlx::query_as::<_, (Uuid, Uuid, bool)>(
        r#"SELECT q.id, c.id, c.is_correct
           FROM questions q JOIN choices c ON c.question_id = q.id
           WHERE q.quiz_id = $1
           ORDER BY q.position, c.position"#,
    )
    .bind(quiz.id)
    .fetch_all(&pool)
    .await
    .unwrap();
    let q1 = rows[0].0;
    let q1_right = rows.iter().find(|r| r.0 == q1 && r.2).unwrap().1;
    let q2 = rows.iter().map(|r| r.0).find(|id| *id != q1).unwrap();
    let q2_first_right = rows.iter().find(|r| r.0 == q2 && r.2).unwrap().1;

    // Q1 correct, Q2 with only one of the two correct options
    let submit_body = json!({
        "answers": [
            {"question_id": q1, "selected_choice_ids": [q1_right]},
            {"question_id": q2, "selected_choice_ids": [q2_first_right]}
        ]
    });
    let (status, result) = request(
        &app,
        "POST",
        &format!("/api/attempts/{}/submit", attempt_id),
        &token,
        Some(submit_body.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dec(&result["score"]), Decimal::new(3, 0));
    assert_eq!(dec(&result["total_points"]), Decimal::new(5, 0));
    assert_eq!(result["passed"], json!(true));
    assert_eq!(dec(&result["normalized_score"]), Decimal::new(12, 0));
    assert_eq!(dec(&result["percentage"]), Decimal::new(60, 0));
    assert!(result["corrections"].is_array());

    // resubmitting a completed attempt conflicts
    let (status, body) = request(
        &app,
        "POST",
        &format!("/api/attempts/{}/submit", attempt_id),
        &token,
        Some(submit_body),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], json!("invalid_attempt_state"));

    // the stored result is stable on re-read
    let (status, reread) = request(
        &app,
        "GET",
        &format!("/api/attempts/{}/result", attempt_id),
        &token,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dec(&reread["score"]), Decimal::new(3, 0));
    assert_eq!(dec(&reread["normalized_score"]), Decimal::new(12, 0));

    let answers_sum: Option<Decimal> = sqlx::query_scalar(
        r#"SELECT SUM(points_earned) FROM student_answers WHERE attempt_id = $1::uuid"#,
    )
    .bind(Uuid::parse_str(&attempt_id).unwrap())
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(answers_sum, Some(Decimal::new(3, 0)));

    // second attempt, abandoned
    let (status, second) = request(
        &app,
        "POST",
        &format!("/api/quizzes/{}/attempts", quiz.id),
        &token,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["attempt_number"], 2);
    let second_id = second["attempt_id"].as_str().unwrap();
    let (status, _) = request(
        &app,
        "POST",
        &format!("/api/attempts/{}/abandon", second_id),
        &token,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // abandoned attempts still count toward the limit
    let (status, body) = request(
        &app,
        "POST",
        &format!("/api/quizzes/{}/attempts", quiz.id),
        &token,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], json!("attempt_limit_exceeded"));

    // a quiz whose window has closed rejects starts even with attempts left
    let closed_quiz_id = Uuid::new_v4();
    sqlx::query(
        r#"INSERT INTO quizzes
            (id, subject_id, title, duration_minutes, passing_percentage, max_attempts,
             available_until)
           VALUES ($1, $2, 'Closed quiz', 30, 50, 5, $3)"#,
    )
    .bind(closed_quiz_id)
    .bind(subject_id)
    .bind(Utc::now() - Duration::hours(1))
    .execute(&pool)
    .await
    .unwrap();
    let (status, body) = request(
        &app,
        "POST",
        &format!("/api/quizzes/{}/attempts", closed_quiz_id),
        &token,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], json!("quiz_not_available"));

    // concurrent starts allocate gapless sequential attempt numbers
    let open_quiz_id = Uuid::new_v4();
    sqlx::query(
        r#"INSERT INTO quizzes
            (id, subject_id, title, duration_minutes, passing_percentage, max_attempts)
           VALUES ($1, $2, 'Race quiz', 30, 50, 5)"#,
    )
    .bind(open_quiz_id)
    .bind(subject_id)
    .execute(&pool)
    .await
    .unwrap();
    let racer = seed_student(&pool, level_id, major_id).await;
    let racer_id = racer.id;

    let mut handles = Vec::new();
    for _ in 0..5 {
        let engine = app_state.attempt_engine.clone();
        handles.push(tokio::spawn(async move {
            engine.start_attempt(racer_id, open_quiz_id).await
        }));
    }
    let mut numbers = Vec::new();
    for handle in handles {
        let attempt = handle.await.unwrap().expect("concurrent start");
        numbers.push(attempt.attempt_number);
    }
    numbers.sort_unstable();
    assert_eq!(numbers, vec![1, 2, 3, 4, 5]);

    // the limit is enforced once in-progress and terminal attempts add up
    let over_limit = app_state
        .attempt_engine
        .start_attempt(racer_id, open_quiz_id)
        .await;
    assert!(matches!(
        over_limit,
        Err(academy_backend::error::Error::AttemptLimitExceeded(5))
    ));
}
