use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;
use tracing::info;

use crate::auth::require_api_token;
use crate::handlers::api::{
    cancel_booking, cancel_slot, checkout_slot, create_booking, create_custom_slot, create_rule,
    delete_rule, get_booking, list_bookings, list_rules, list_slots, release_slot,
    request_reschedule, reserve_slot, resolve_reschedule, run_sweep, update_rule, AppState,
};
use crate::handlers::health::health_check;

pub fn create_router(app_state: Arc<AppState>, is_production: bool) -> Router {
    let mut router = Router::new();

    // Health check is always available
    let health_route = Router::new().route("/health", get(health_check));
    router = router.merge(health_route);

    // Scheduling and booking API
    let mut api_routes = Router::new()
        .route("/rules", get(list_rules).post(create_rule))
        .route("/rules/:rule_id", patch(update_rule).delete(delete_rule))
        .route("/slots", get(list_slots))
        .route("/slots/custom", post(create_custom_slot))
        .route("/slots/:slot_id/cancel", post(cancel_slot))
        .route("/slots/:slot_id/reserve", post(reserve_slot))
        .route("/slots/:slot_id/release", post(release_slot))
        .route("/slots/:slot_id/checkout", post(checkout_slot))
        .route("/bookings", get(list_bookings).post(create_booking))
        .route("/bookings/:booking_id", get(get_booking))
        .route("/bookings/:booking_id/cancel", post(cancel_booking))
        .route("/bookings/:booking_id/reschedule", post(request_reschedule))
        .route(
            "/bookings/:booking_id/reschedule/resolve",
            post(resolve_reschedule),
        );

    // Only add admin routes if not in production mode
    if !is_production {
        api_routes = api_routes.route("/admin/sweep", post(run_sweep));
        info!("Admin routes enabled - server running in development mode");
    } else {
        info!("Running in production mode - admin routes are not exposed");
    }

    let api_routes = api_routes.route_layer(middleware::from_fn_with_state(
        app_state.clone(),
        require_api_token,
    ));
    router = router.merge(api_routes);

    router.with_state(app_state)
}
