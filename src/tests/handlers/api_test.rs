use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::{TestServer, TestServerConfig};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::BookingPolicy;
use crate::handlers::api::AppState;
use crate::routes::create_router;
use crate::tests::common::fixtures::*;

/// API handler tests
#[cfg(test)]
mod api_tests {
    use super::*;

    fn user(id: &'static str) -> (HeaderName, HeaderValue) {
        (
            HeaderName::from_static("x-user-id"),
            HeaderValue::from_static(id),
        )
    }

    fn rule_body() -> Value {
        json!({
            "weekDay": 1,
            "startMinute": 540,
            "endMinute": 660,
            "slotDurationMinutes": 60,
            "price": PRICE
        })
    }

    #[tokio::test]
    async fn test_health_check() {
        let engine = TestEngine::new();
        let server = engine.server();

        let response = server.get("/health").await;
        response.assert_status_ok();
        assert_eq!(response.text(), "OK");
    }

    #[tokio::test]
    async fn test_create_rule_and_list_month() {
        let engine = TestEngine::new();
        let server = engine.server();
        let (name, value) = user(MENTOR);

        let response = server
            .post("/rules")
            .add_header(name.clone(), value.clone())
            .json(&rule_body())
            .await;
        response.assert_status(StatusCode::CREATED);
        let rule: Value = response.json();
        assert_eq!(rule["mentorId"], MENTOR);
        assert_eq!(rule["isActive"], true);

        let response = server
            .get("/slots")
            .add_query_param("mentorId", MENTOR)
            .add_query_param("month", 1)
            .add_query_param("year", 2030)
            .await;
        response.assert_status_ok();
        let slots: Vec<Value> = response.json();
        // Mondays 7, 14, 21 and 28 January
        assert_eq!(slots.len(), 8);
        assert_eq!(slots[0]["startAt"], "2030-01-07T09:00:00Z");
        assert_eq!(slots[0]["status"], "OPEN");
        assert_eq!(slots[0]["generatedFrom"], "rule");
    }

    #[tokio::test]
    async fn test_invalid_rule_is_bad_request() {
        let engine = TestEngine::new();
        let server = engine.server();
        let (name, value) = user(MENTOR);

        let response = server
            .post("/rules")
            .add_header(name, value)
            .json(&json!({
                "weekDay": 1,
                "startMinute": 540,
                "endMinute": 600,
                "slotDurationMinutes": 45,
                "price": PRICE
            }))
            .expect_failure()
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["error"], "validation_error");
    }

    #[tokio::test]
    async fn test_missing_user_header_is_rejected() {
        let engine = TestEngine::new();
        let server = engine.server();

        let response = server
            .post("/rules")
            .json(&rule_body())
            .expect_failure()
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_reserve_conflict_over_http() {
        let engine = TestEngine::new();
        let slot = engine.custom_slot(at(2030, 1, 7, 9, 0));
        let server = engine.server();

        let (name, value) = user(MENTEE);
        let response = server
            .post(&format!("/slots/{}/reserve", slot.id))
            .add_header(name, value)
            .await;
        response.assert_status_ok();
        let reservation: Value = response.json();
        assert_eq!(reservation["holderId"], MENTEE);
        assert_eq!(reservation["expiresAt"], "2030-01-06T12:10:00Z");

        let (name, value) = user(OTHER_MENTEE);
        let response = server
            .post(&format!("/slots/{}/reserve", slot.id))
            .add_header(name, value)
            .expect_failure()
            .await;
        response.assert_status(StatusCode::CONFLICT);
        let body: Value = response.json();
        assert_eq!(
            body["message"],
            "this slot was just taken, please choose another"
        );
    }

    #[tokio::test]
    async fn test_checkout_and_cancel_over_http() {
        let engine = TestEngine::new();
        let slot = engine.custom_slot(at(2030, 1, 14, 9, 0));
        let server = engine.server();
        let (name, value) = user(MENTEE);

        server
            .post(&format!("/slots/{}/reserve", slot.id))
            .add_header(name.clone(), value.clone())
            .await
            .assert_status_ok();

        let response = server
            .post(&format!("/slots/{}/checkout", slot.id))
            .add_header(name.clone(), value.clone())
            .await;
        response.assert_status(StatusCode::CREATED);
        let booking: Value = response.json();
        assert_eq!(booking["status"], "CONFIRMED");
        let booking_id = booking["id"].as_str().unwrap().to_string();

        let response = server
            .get("/bookings")
            .add_query_param("userId", MENTEE)
            .add_header(name.clone(), value.clone())
            .await;
        let bookings: Vec<Value> = response.json();
        assert_eq!(bookings.len(), 1);

        let response = server
            .post(&format!("/bookings/{}/cancel", booking_id))
            .add_header(name, value)
            .json(&json!({ "reason": "conflict at work" }))
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["booking"]["status"], "CANCELLED");
        assert_eq!(body["slotStatus"], "OPEN");
    }

    #[tokio::test]
    async fn test_declined_payment_is_payment_required() {
        let engine = TestEngine::new();
        let slot = engine.custom_slot(at(2030, 1, 7, 9, 0));
        let server = engine.server();
        let (name, value) = user(MENTEE);

        server
            .post(&format!("/slots/{}/reserve", slot.id))
            .add_header(name.clone(), value.clone())
            .await
            .assert_status_ok();

        let response = server
            .post("/bookings")
            .add_header(name, value)
            .json(&json!({ "slotId": slot.id, "paymentRef": "pay_declined" }))
            .expect_failure()
            .await;
        response.assert_status(StatusCode::PAYMENT_REQUIRED);
        let body: Value = response.json();
        assert_eq!(body["error"], "payment_failed");
    }

    #[tokio::test]
    async fn test_other_users_bookings_are_forbidden() {
        let engine = TestEngine::new();
        let server = engine.server();
        let (name, value) = user(MENTEE);

        let response = server
            .get("/bookings")
            .add_query_param("userId", OTHER_MENTEE)
            .add_header(name, value)
            .expect_failure()
            .await;
        response.assert_status(StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_api_token_is_enforced_when_configured() {
        let engine = TestEngine::new();
        let (ports, _) = simulated_ports();
        let state = Arc::new(AppState::new(
            engine.db.clone(),
            engine.clock.clone(),
            BookingPolicy::default(),
            ports,
            Some("secret-token".to_string()),
        ));
        let config = TestServerConfig::builder().mock_transport().build();
        let server = TestServer::new_with_config(create_router(state, false), config).unwrap();

        // Health stays open
        server.get("/health").await.assert_status_ok();

        let response = server
            .get("/rules")
            .add_query_param("mentorId", MENTOR)
            .expect_failure()
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);

        let response = server
            .get("/rules")
            .add_query_param("mentorId", MENTOR)
            .add_header(
                HeaderName::from_static("authorization"),
                HeaderValue::from_static("Bearer secret-token"),
            )
            .await;
        response.assert_status_ok();
    }

    #[tokio::test]
    async fn test_admin_sweep_only_in_development() {
        let engine = TestEngine::new();
        let server = engine.server();
        let response = server.post("/admin/sweep").await;
        response.assert_status_ok();
        let report: Value = response.json();
        assert_eq!(report["expiredHolds"], 0);

        let config = TestServerConfig::builder().mock_transport().build();
        let production =
            TestServer::new_with_config(create_router(engine.state.clone(), true), config)
                .unwrap();
        production
            .post("/admin/sweep")
            .expect_failure()
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }
}
