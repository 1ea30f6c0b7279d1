use axum::{
    extract::{Json as ExtractJson, Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::auth::Actor;
use crate::clock::Clock;
use crate::config::BookingPolicy;
use crate::error::{EngineError, Result};
use crate::models::booking::{
    Booking, CancelBookingRequest, CreateBookingRequest, RescheduleBody, RescheduleRequest,
    ResolveRescheduleBody,
};
use crate::models::common::{BookingQuery, DeleteRuleParams, RuleQuery, SlotQuery};
use crate::models::rule::{NewRule, RecurringRule, RuleUpdate};
use crate::models::slot::{CustomSlotRequest, Reservation, Slot, SlotStatus};
use crate::ports::Ports;
use crate::services::bookings::BookingService;
use crate::services::database::DatabaseService;
use crate::services::reschedule::RescheduleWorkflow;
use crate::services::reservations::ReservationManager;
use crate::services::rule_store::{RuleChange, RuleStore};
use crate::services::slot_generator::SlotGenerator;
use crate::services::slot_store::{month_range, SlotStore};
use crate::services::sweeper::{SweepReport, Sweeper};

// AppState struct containing shared resources
pub struct AppState {
    pub rules: RuleStore,
    pub slots: SlotStore,
    pub generator: Arc<SlotGenerator>,
    pub reservations: Arc<ReservationManager>,
    pub bookings: Arc<BookingService>,
    pub reschedules: Arc<RescheduleWorkflow>,
    pub sweeper: Arc<Sweeper>,
    pub api_auth_token: Option<String>,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseService>,
        clock: Arc<dyn Clock>,
        policy: BookingPolicy,
        ports: Ports,
        api_auth_token: Option<String>,
    ) -> Self {
        let generator = Arc::new(SlotGenerator::new(
            db.clone(),
            clock.clone(),
            policy.horizon_days,
        ));
        let reservations = Arc::new(ReservationManager::new(
            db.clone(),
            clock.clone(),
            policy,
            ports.notifier.clone(),
        ));
        let bookings = Arc::new(BookingService::new(
            db.clone(),
            clock.clone(),
            policy,
            ports.clone(),
        ));
        let reschedules = Arc::new(RescheduleWorkflow::new(
            db.clone(),
            clock.clone(),
            policy,
            ports.notifier.clone(),
        ));
        let sweeper = Arc::new(Sweeper::new(
            generator.clone(),
            reservations.clone(),
            bookings.clone(),
            reschedules.clone(),
        ));

        Self {
            rules: RuleStore::new(db.clone(), clock.clone()),
            slots: SlotStore::new(db, clock, ports.notifier.clone()),
            generator,
            reservations,
            bookings,
            reschedules,
            sweeper,
            api_auth_token,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancellationResponse {
    pub booking: Booking,
    pub slot_status: SlotStatus,
}

// List a mentor's rules
pub async fn list_rules(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RuleQuery>,
) -> Result<Json<Vec<RecurringRule>>> {
    info!("Received request to list rules of mentor {}", params.mentor_id);
    Ok(Json(state.rules.list(&params.mentor_id)?))
}

pub async fn create_rule(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    ExtractJson(input): ExtractJson<NewRule>,
) -> Result<(StatusCode, Json<RecurringRule>)> {
    info!("Received request from {} to create a rule", actor);
    let rule = state.rules.create(&actor, input)?;
    Ok((StatusCode::CREATED, Json(rule)))
}

pub async fn update_rule(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(rule_id): Path<Uuid>,
    ExtractJson(update): ExtractJson<RuleUpdate>,
) -> Result<Json<RuleChange>> {
    info!("Received request from {} to update rule {}", actor, rule_id);
    Ok(Json(state.rules.update(rule_id, &actor, update)?))
}

pub async fn delete_rule(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(rule_id): Path<Uuid>,
    Query(params): Query<DeleteRuleParams>,
) -> Result<Json<RuleChange>> {
    info!(
        "Received request from {} to delete rule {} (delete slots: {})",
        actor, rule_id, params.delete_slots
    );
    Ok(Json(state.rules.delete(rule_id, &actor, params.delete_slots)?))
}

// Month view of a mentor's calendar. Generation reads ahead for the month
// first, so the view never lags behind the rules.
pub async fn list_slots(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SlotQuery>,
) -> Result<Json<Vec<Slot>>> {
    info!(
        "Received request to list slots of mentor {} for {}-{:02}",
        params.mentor_id, params.year, params.month
    );

    let (from, to) = month_range(params.year, params.month)?;
    state.generator.generate(
        &params.mentor_id,
        from.date_naive(),
        (to - Duration::days(1)).date_naive(),
    )?;

    let slots = state
        .slots
        .list_range(&params.mentor_id, from, to, params.available_only)?;
    Ok(Json(slots))
}

pub async fn create_custom_slot(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    ExtractJson(request): ExtractJson<CustomSlotRequest>,
) -> Result<(StatusCode, Json<Slot>)> {
    info!(
        "Received request from {} to create a custom slot at {}",
        actor, request.start_at
    );
    let slot = state.slots.create_custom(&actor, &request)?;
    Ok((StatusCode::CREATED, Json(slot)))
}

pub async fn cancel_slot(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(slot_id): Path<Uuid>,
) -> Result<Json<Slot>> {
    info!("Received request from {} to cancel slot {}", actor, slot_id);
    Ok(Json(state.slots.cancel(slot_id, &actor)?))
}

pub async fn reserve_slot(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(slot_id): Path<Uuid>,
) -> Result<Json<Reservation>> {
    info!("Received request from {} to reserve slot {}", actor, slot_id);
    Ok(Json(state.reservations.reserve(slot_id, &actor)?))
}

pub async fn release_slot(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(slot_id): Path<Uuid>,
) -> Result<Json<Slot>> {
    info!("Received request from {} to release slot {}", actor, slot_id);
    state.reservations.release(slot_id, &actor)?;
    Ok(Json(state.slots.get(slot_id)?))
}

// Wallet route: debit the internal balance and confirm in one call
pub async fn checkout_slot(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(slot_id): Path<Uuid>,
) -> Result<(StatusCode, Json<Booking>)> {
    info!("Received checkout request from {} for slot {}", actor, slot_id);
    let booking = state.bookings.checkout(slot_id, &actor).await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    ExtractJson(request): ExtractJson<CreateBookingRequest>,
) -> Result<(StatusCode, Json<Booking>)> {
    info!(
        "Received booking confirmation from {} for slot {}",
        actor, request.slot_id
    );
    let booking = state
        .bookings
        .confirm_booking(request.slot_id, &actor, &request.payment_ref)
        .await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<Booking>> {
    Ok(Json(state.bookings.get(booking_id, &actor)?))
}

pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Query(params): Query<BookingQuery>,
) -> Result<Json<Vec<Booking>>> {
    if params.user_id != actor {
        return Err(EngineError::Policy(
            "users can only list their own bookings".into(),
        ));
    }
    Ok(Json(state.bookings.list_for_user(&actor)?))
}

pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(booking_id): Path<Uuid>,
    body: Option<ExtractJson<CancelBookingRequest>>,
) -> Result<Json<CancellationResponse>> {
    info!("Received request from {} to cancel booking {}", actor, booking_id);
    let reason = body.and_then(|ExtractJson(body)| body.reason);
    let cancellation = state
        .bookings
        .cancel_booking(booking_id, &actor, reason)
        .await?;

    Ok(Json(CancellationResponse {
        booking: cancellation.booking,
        slot_status: cancellation.slot_status,
    }))
}

pub async fn request_reschedule(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(booking_id): Path<Uuid>,
    ExtractJson(body): ExtractJson<RescheduleBody>,
) -> Result<(StatusCode, Json<RescheduleRequest>)> {
    info!(
        "Received request from {} to move booking {} to slot {}",
        actor, booking_id, body.requested_slot_id
    );
    let request =
        state
            .reschedules
            .request(booking_id, &actor, body.requested_slot_id, &body.reason)?;
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn resolve_reschedule(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(booking_id): Path<Uuid>,
    ExtractJson(body): ExtractJson<ResolveRescheduleBody>,
) -> Result<Json<Booking>> {
    info!(
        "Received {:?} from {} for reschedule of booking {}",
        body.action, actor, booking_id
    );
    Ok(Json(state.reschedules.resolve(booking_id, &actor, body.action)?))
}

// Run one maintenance pass on demand
pub async fn run_sweep(State(state): State<Arc<AppState>>) -> Result<Json<SweepReport>> {
    info!("Received request to run the sweep");
    Ok(Json(state.sweeper.run_once()?))
}
