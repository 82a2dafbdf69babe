//! HTTP surface assembly: mounts every provider webhook, the Terminal dev
//! endpoint, and the admin/metrics/policy routes behind the teacher's
//! usual `tower-http` middleware stack (trace, timeout, body-limit, cors).

use axum::{
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower_http::{
    cors::CorsLayer, limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer,
};

use crate::admin::{self, AdminState};
use crate::channels::{self, ChannelState};

const MAX_BODY_BYTES: usize = 1024 * 1024;

pub fn build_router(channel_state: ChannelState, admin_state: AdminState) -> Router {
    let webhooks = Router::new()
        .route("/webhook/line", post(channels::line::handle_webhook))
        .route("/webhook/telegram", post(channels::telegram::handle_webhook))
        .route("/webhook/discord", post(channels::discord::handle_webhook))
        .route(
            "/webhook/whatsapp",
            get(channels::whatsapp::verify).post(channels::whatsapp::handle_webhook),
        )
        .route("/webhook/slack", post(channels::slack::handle_webhook))
        .route("/webhook/teams", post(channels::teams::handle_webhook))
        .route("/api/chat/terminal", post(channels::terminal::handle_chat))
        .route(
            "/api/chat/terminal/user",
            get(channels::terminal::get_user_summary),
        )
        .with_state(channel_state);

    let admin_routes = Router::new()
        .route("/api/metrics/dau", get(admin::daily_active_users))
        .route("/api/metrics/expenses-summary", get(admin::expenses_summary))
        .route("/api/metrics/category-trends", get(admin::category_trends))
        .route("/api/metrics/growth", get(admin::growth_metrics))
        .route("/api/metrics/new-users-per-day", get(admin::new_users_per_day))
        .route("/api/ai-cost/by-day", get(admin::ai_cost_by_day))
        .route("/api/ai-cost/by-operation", get(admin::ai_cost_by_operation))
        .route("/api/ai-cost/by-user", get(admin::ai_cost_by_user))
        .route("/api/policy/{key}", get(admin::get_policy))
        .with_state(admin_state);

    webhooks
        .merge(admin_routes)
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http())
}
