use academy_backend::middleware::auth::{require_bearer_auth, require_permission};
use academy_backend::middleware::rate_limit::{rps_middleware, RateLimiter};
use academy_backend::models::user::Permission;
use academy_backend::{
    config::{get_config, init_config},
    database::pool::create_pool,
    routes, AppState,
};
use axum::{
    routing::{get, post, put},
    Router,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

const CLOSING_LEAD_MINUTES: i64 = 60;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    init_config()?;
    let config = get_config();

    let pool = create_pool().await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let app_state = AppState::new(pool);

    // Fan-out worker: drains the durable queue so publishing never waits on
    // push delivery.
    {
        let state = app_state.clone();
        let poll = Duration::from_millis(config.queue_poll_ms);
        tokio::spawn(async move {
            loop {
                match state.queue.run_once(&state.dispatcher).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tokio::time::sleep(poll).await;
                    }
                    Err(e) => {
                        tracing::error!(error = ?e, "notification queue worker error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });
    }

    // Overdue-attempt sweep: abandons attempts that outlived their quiz
    // duration plus the configured grace.
    {
        let state = app_state.clone();
        let grace = config.attempt_grace_minutes;
        tokio::spawn(async move {
            loop {
                match state.attempt_engine.abandon_overdue(grace).await {
                    Ok(0) => {}
                    Ok(n) => info!(count = n, "abandoned overdue attempts"),
                    Err(e) => tracing::error!(error = ?e, "attempt sweep error"),
                }
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
        });
    }

    // Closing-quiz scanner: enqueues quiz_closing fan-outs ahead of the
    // availability deadline.
    {
        let state = app_state.clone();
        tokio::spawn(async move {
            loop {
                match state.quiz_service.notify_closing_soon(CLOSING_LEAD_MINUTES).await {
                    Ok(0) => {}
                    Ok(n) => info!(count = n, "queued closing notices"),
                    Err(e) => tracing::error!(error = ?e, "closing scanner error"),
                }
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
        });
    }

    let base_routes = Router::new().route("/health", get(routes::health::health));

    let auth_api = Router::new()
        .route("/api/auth/otp/request", post(routes::auth::request_otp))
        .route("/api/auth/otp/verify", post(routes::auth::verify_otp))
        .layer(axum::middleware::from_fn_with_state(
            RateLimiter::new("auth", config.public_rps),
            rps_middleware,
        ));

    let student_api = Router::new()
        .route("/api/quizzes/:id", get(routes::attempts::get_quiz))
        .route(
            "/api/quizzes/:id/attempts",
            post(routes::attempts::start_attempt).get(routes::attempts::list_my_attempts),
        )
        .route(
            "/api/attempts/:id/submit",
            post(routes::attempts::submit_answers),
        )
        .route(
            "/api/attempts/:id/abandon",
            post(routes::attempts::abandon_attempt),
        )
        .route("/api/attempts/:id/result", get(routes::attempts::get_result))
        .route_layer(axum::middleware::from_fn(|req, next| {
            require_permission(req, next, Permission::TakeQuizzes)
        }))
        .layer(axum::middleware::from_fn_with_state(
            RateLimiter::new("student", config.client_rps),
            rps_middleware,
        ));

    let quiz_admin = Router::new()
        .route("/api/staff/quizzes", post(routes::staff::create_quiz))
        .route_layer(axum::middleware::from_fn(|req, next| {
            require_permission(req, next, Permission::ManageQuizzes)
        }));
    let content_admin = Router::new()
        .route("/api/staff/documents", post(routes::staff::create_document))
        .route_layer(axum::middleware::from_fn(|req, next| {
            require_permission(req, next, Permission::ManageContent)
        }));
    let reminder_admin = Router::new()
        .route(
            "/api/admin/reminders",
            post(routes::staff::send_project_reminder),
        )
        .route_layer(axum::middleware::from_fn(|req, next| {
            require_permission(req, next, Permission::DispatchReminders)
        }));
    let user_admin = Router::new()
        .route("/api/admin/teachers", post(routes::staff::create_teacher))
        .route("/api/admin/students", post(routes::staff::create_student))
        .route_layer(axum::middleware::from_fn(|req, next| {
            require_permission(req, next, Permission::ManageUsers)
        }));
    let staff_api = quiz_admin
        .merge(content_admin)
        .merge(reminder_admin)
        .merge(user_admin)
        .layer(
        axum::middleware::from_fn_with_state(
            RateLimiter::new("staff", config.client_rps),
            rps_middleware,
        ),
    );

    let client_api = Router::new()
        .route(
            "/api/notifications",
            get(routes::notifications::list_notifications),
        )
        .route(
            "/api/notifications/token",
            post(routes::notifications::register_token),
        )
        .route(
            "/api/notifications/:id/read",
            post(routes::notifications::mark_read),
        )
        .route(
            "/api/notifications/:id/clicked",
            post(routes::notifications::mark_clicked),
        )
        .route(
            "/api/notifications/preferences",
            put(routes::notifications::update_preferences),
        )
        .route(
            "/api/notifications/preferences/subject",
            put(routes::notifications::update_subject_preference),
        )
        .route_layer(axum::middleware::from_fn(require_bearer_auth))
        .layer(axum::middleware::from_fn_with_state(
            RateLimiter::new("client", config.client_rps),
            rps_middleware,
        ));

    let app = base_routes
        .merge(auth_api)
        .merge(student_api)
        .merge(staff_api)
        .merge(client_api)
        .with_state(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
