use chrono::Duration;
use std::sync::Arc;

use crate::clock::ManualClock;
use crate::config::BookingPolicy;
use crate::error::EngineError;
use crate::models::booking::BookingStatus;
use crate::models::rule::RuleUpdate;
use crate::models::slot::SlotStatus;
use crate::ports::ledger::MockLedgerPort;
use crate::ports::payment::MockPaymentPort;
use crate::ports::simulated::{LoggingLedger, LoggingNotifier, SimulatedPayments};
use crate::ports::{PaymentConfirmation, PortError, Ports};
use crate::tests::common::fixtures::*;

/// Booking confirmation and cancellation tests
#[cfg(test)]
mod booking_tests {
    use super::*;

    #[tokio::test]
    async fn test_confirm_booking_books_slot() {
        let engine = TestEngine::new();
        let slot = engine.custom_slot(at(2030, 1, 7, 9, 0));

        let booking = engine.book(slot.id, MENTEE).await;

        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert_eq!(booking.slot_id, slot.id);
        assert_eq!(booking.mentor_id, MENTOR);
        assert_eq!(booking.amount, PRICE);

        let stored = engine.stored_slot(slot.id);
        assert_eq!(stored.status, SlotStatus::Booked);
        assert_eq!(stored.participant_id.as_deref(), Some(MENTEE));
        assert!(stored.expires_at.is_none());
    }

    #[tokio::test]
    async fn test_second_reserve_is_told_slot_was_taken() {
        let engine = TestEngine::new();
        let slot = engine.custom_slot(at(2030, 1, 7, 9, 0));

        engine.state.reservations.reserve(slot.id, MENTEE).unwrap();
        let err = engine
            .state
            .reservations
            .reserve(slot.id, OTHER_MENTEE)
            .unwrap_err();

        assert!(matches!(err, EngineError::Conflict(_)));
        assert_eq!(
            err.to_string(),
            "this slot was just taken, please choose another"
        );
        assert_eq!(
            engine.slot(slot.id).participant_id.as_deref(),
            Some(MENTEE)
        );
    }

    #[tokio::test]
    async fn test_confirm_after_hold_expired_fails_and_slot_reopens() {
        let engine = TestEngine::new();
        let slot = engine.custom_slot(at(2030, 1, 7, 9, 0));

        engine.state.reservations.reserve(slot.id, MENTEE).unwrap();
        let payment_ref = engine.payments.authorize(PRICE, MENTEE).await.unwrap();
        engine.advance(Duration::minutes(11));

        let err = engine
            .state
            .bookings
            .confirm_booking(slot.id, MENTEE, &payment_ref)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Expired(_)));
        assert_eq!(engine.slot(slot.id).status, SlotStatus::Open);
        assert!(engine.db.read(|t| t.bookings.is_empty()).unwrap());
    }

    #[tokio::test]
    async fn test_declined_payment_releases_hold() {
        let engine = TestEngine::new();
        let slot = engine.custom_slot(at(2030, 1, 7, 9, 0));
        engine.state.reservations.reserve(slot.id, MENTEE).unwrap();

        let err = engine
            .state
            .bookings
            .confirm_booking(slot.id, MENTEE, "pay_unknown")
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::PaymentFailed(_)));
        assert!(err.to_string().starts_with("payment did not complete, slot released"));
        let stored = engine.stored_slot(slot.id);
        assert_eq!(stored.status, SlotStatus::Open);
        assert!(stored.participant_id.is_none());
    }

    #[tokio::test]
    async fn test_underpaid_payment_is_rejected() {
        let engine = TestEngine::new();
        let slot = engine.custom_slot(at(2030, 1, 7, 9, 0));
        engine.state.reservations.reserve(slot.id, MENTEE).unwrap();
        let payment_ref = engine.payments.authorize(PRICE - 1, MENTEE).await.unwrap();

        let err = engine
            .state
            .bookings
            .confirm_booking(slot.id, MENTEE, &payment_ref)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PaymentFailed(_)));
        assert_eq!(engine.slot(slot.id).status, SlotStatus::Open);
    }

    #[tokio::test]
    async fn test_confirm_without_hold_conflicts() {
        let engine = TestEngine::new();
        let slot = engine.custom_slot(at(2030, 1, 7, 9, 0));
        engine.state.reservations.reserve(slot.id, MENTEE).unwrap();
        let payment_ref = engine
            .payments
            .authorize(PRICE, OTHER_MENTEE)
            .await
            .unwrap();

        let err = engine
            .state
            .bookings
            .confirm_booking(slot.id, OTHER_MENTEE, &payment_ref)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
        assert_eq!(engine.slot(slot.id).status, SlotStatus::Reserved);
    }

    #[tokio::test]
    async fn test_resubmitted_payment_returns_same_booking() {
        let engine = TestEngine::new();
        let slot = engine.custom_slot(at(2030, 1, 7, 9, 0));
        let other = engine.custom_slot(at(2030, 1, 7, 11, 0));

        let booking = engine.book(slot.id, MENTEE).await;
        let again = engine
            .state
            .bookings
            .confirm_booking(slot.id, MENTEE, &booking.payment_ref)
            .await
            .unwrap();
        assert_eq!(again.id, booking.id);

        engine.state.reservations.reserve(other.id, MENTEE).unwrap();
        let err = engine
            .state
            .bookings
            .confirm_booking(other.id, MENTEE, &booking.payment_ref)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
        assert_eq!(engine.db.read(|t| t.bookings.len()).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_captured_payment_is_refunded_when_hold_lapses_during_capture() {
        let clock = Arc::new(ManualClock::new(start_time()));
        let verify_clock = clock.clone();

        let mut payments = MockPaymentPort::new();
        payments.expect_verify().returning(move |payment_ref| {
            verify_clock.advance(Duration::minutes(11));
            Ok(PaymentConfirmation {
                payment_ref: payment_ref.to_string(),
                payer_id: MENTEE.to_string(),
                amount: PRICE,
            })
        });
        payments.expect_refund().times(1).returning(|_, _| Ok(()));

        let ports = Ports {
            payments: Arc::new(payments),
            ledger: Arc::new(LoggingLedger),
            notifier: Arc::new(LoggingNotifier),
        };
        let engine = TestEngine::with_clock(ports, BookingPolicy::default(), clock);
        let slot = engine.custom_slot(at(2030, 1, 7, 9, 0));
        engine.state.reservations.reserve(slot.id, MENTEE).unwrap();

        let err = engine
            .state
            .bookings
            .confirm_booking(slot.id, MENTEE, "pay_gateway_1")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Expired(_)));
        assert!(engine.db.read(|t| t.bookings.is_empty()).unwrap());
    }

    #[tokio::test]
    async fn test_ledger_failure_keeps_booking() {
        let mut ledger = MockLedgerPort::new();
        ledger
            .expect_record_movement()
            .times(1)
            .returning(|_| Err(PortError::Unavailable("ledger is down".into())));

        let ports = Ports {
            payments: Arc::new(SimulatedPayments::new()),
            ledger: Arc::new(ledger),
            notifier: Arc::new(LoggingNotifier),
        };
        let engine = TestEngine::with_ports(ports, BookingPolicy::default());
        let slot = engine.custom_slot(at(2030, 1, 7, 9, 0));

        let booking = engine.book(slot.id, MENTEE).await;
        assert_eq!(engine.booking(booking.id).status, BookingStatus::Confirmed);
        assert_eq!(engine.stored_slot(slot.id).status, SlotStatus::Booked);
    }

    #[tokio::test]
    async fn test_checkout_debits_balance_and_books() {
        let engine = TestEngine::new();
        let slot = engine.custom_slot(at(2030, 1, 7, 9, 0));

        let err = engine
            .state
            .bookings
            .checkout(slot.id, MENTEE)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));

        engine.state.reservations.reserve(slot.id, MENTEE).unwrap();
        let booking = engine.state.bookings.checkout(slot.id, MENTEE).await.unwrap();
        assert!(booking.payment_ref.starts_with("sim_"));
        assert_eq!(engine.stored_slot(slot.id).status, SlotStatus::Booked);
    }

    #[tokio::test]
    async fn test_mentee_cancel_inside_notice_window_is_refused() {
        let engine = TestEngine::new();
        // 21 hours ahead of the clock
        let slot = engine.custom_slot(at(2030, 1, 7, 9, 0));
        let booking = engine.book(slot.id, MENTEE).await;

        let err = engine
            .state
            .bookings
            .cancel_booking(booking.id, MENTEE, Some("sick".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Policy(_)));
        assert_eq!(err.to_string(), "minimum notice not met");
        assert_eq!(engine.booking(booking.id).status, BookingStatus::Confirmed);
        assert_eq!(engine.stored_slot(slot.id).status, SlotStatus::Booked);
    }

    #[tokio::test]
    async fn test_mentor_may_cancel_inside_notice_window() {
        let engine = TestEngine::new();
        let slot = engine.custom_slot(at(2030, 1, 7, 9, 0));
        let booking = engine.book(slot.id, MENTEE).await;

        let cancellation = engine
            .state
            .bookings
            .cancel_booking(booking.id, MENTOR, None)
            .await
            .unwrap();
        assert_eq!(cancellation.booking.status, BookingStatus::Cancelled);
        assert_eq!(cancellation.slot_status, SlotStatus::Open);
    }

    #[tokio::test]
    async fn test_mentee_cancel_reopens_custom_slot() {
        let engine = TestEngine::new();
        let slot = engine.custom_slot(at(2030, 1, 14, 9, 0));
        let booking = engine.book(slot.id, MENTEE).await;

        let cancellation = engine
            .state
            .bookings
            .cancel_booking(booking.id, MENTEE, Some("  plans changed ".into()))
            .await
            .unwrap();

        let cancelled = engine.booking(booking.id);
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert_eq!(cancelled.cancelled_at, Some(start_time()));
        assert_eq!(cancelled.cancel_reason.as_deref(), Some("plans changed"));
        assert_eq!(cancellation.slot_status, SlotStatus::Open);

        let reopened = engine.stored_slot(slot.id);
        assert_eq!(reopened.status, SlotStatus::Open);
        assert!(reopened.participant_id.is_none());

        // Back on sale for someone else
        let rebooked = engine.book(slot.id, OTHER_MENTEE).await;
        assert_eq!(rebooked.slot_id, slot.id);
    }

    #[tokio::test]
    async fn test_cancel_slot_of_disabled_rule_does_not_reopen() {
        let engine = TestEngine::new();
        let rule = engine.state.rules.create(MENTOR, monday_morning_rule()).unwrap();
        let slots = engine
            .state
            .generator
            .generate(MENTOR, at(2030, 1, 14, 0, 0).date_naive(), at(2030, 1, 14, 0, 0).date_naive())
            .unwrap();
        let booking = engine.book(slots[0].id, MENTEE).await;

        engine
            .state
            .rules
            .update(
                rule.id,
                MENTOR,
                RuleUpdate {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();

        let cancellation = engine
            .state
            .bookings
            .cancel_booking(booking.id, MENTEE, None)
            .await
            .unwrap();
        assert_eq!(cancellation.slot_status, SlotStatus::Cancelled);
        assert_eq!(engine.stored_slot(slots[0].id).status, SlotStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_release_when_rule_inactive_reopens() {
        let (ports, _) = simulated_ports();
        let policy = BookingPolicy {
            release_when_rule_inactive: true,
            ..Default::default()
        };
        let engine = TestEngine::with_ports(ports, policy);
        let rule = engine.state.rules.create(MENTOR, monday_morning_rule()).unwrap();
        let day = at(2030, 1, 14, 0, 0).date_naive();
        let slots = engine.state.generator.generate(MENTOR, day, day).unwrap();
        let booking = engine.book(slots[0].id, MENTEE).await;
        engine.state.rules.delete(rule.id, MENTOR, false).unwrap();

        let cancellation = engine
            .state
            .bookings
            .cancel_booking(booking.id, MENTEE, None)
            .await
            .unwrap();
        assert_eq!(cancellation.slot_status, SlotStatus::Open);
    }

    #[tokio::test]
    async fn test_cancel_guards() {
        let engine = TestEngine::new();
        let slot = engine.custom_slot(at(2030, 1, 14, 9, 0));
        let booking = engine.book(slot.id, MENTEE).await;

        let err = engine
            .state
            .bookings
            .cancel_booking(booking.id, OTHER_MENTEE, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Policy(_)));

        engine
            .state
            .bookings
            .cancel_booking(booking.id, MENTEE, None)
            .await
            .unwrap();
        let err = engine
            .state
            .bookings
            .cancel_booking(booking.id, MENTEE, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_finished_bookings_complete() {
        let engine = TestEngine::new();
        let slot = engine.custom_slot(at(2030, 1, 7, 9, 0));
        let booking = engine.book(slot.id, MENTEE).await;

        assert_eq!(engine.state.bookings.complete_finished().unwrap(), 0);
        engine.clock.set(at(2030, 1, 7, 10, 0));
        assert_eq!(engine.state.bookings.complete_finished().unwrap(), 1);
        assert_eq!(engine.booking(booking.id).status, BookingStatus::Completed);

        let err = engine
            .state
            .bookings
            .cancel_booking(booking.id, MENTOR, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_bookings_are_private_to_their_parties() {
        let engine = TestEngine::new();
        let slot = engine.custom_slot(at(2030, 1, 7, 9, 0));
        let booking = engine.book(slot.id, MENTEE).await;

        assert_eq!(engine.state.bookings.get(booking.id, MENTOR).unwrap().id, booking.id);
        assert!(matches!(
            engine.state.bookings.get(booking.id, OTHER_MENTEE),
            Err(EngineError::Policy(_))
        ));
        assert_eq!(engine.state.bookings.list_for_user(MENTEE).unwrap().len(), 1);
        assert!(engine.state.bookings.list_for_user(OTHER_MENTEE).unwrap().is_empty());
    }
}
