use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, WriterBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::models::booking::{Booking, BookingStatus, RescheduleRequest, RescheduleStatus};
use crate::models::rule::RecurringRule;
use crate::models::slot::Slot;

const RULES_FILE: &str = "rules.csv";
const SLOTS_FILE: &str = "slots.csv";
const BOOKINGS_FILE: &str = "bookings.csv";

// Row stored in bookings.csv. The reschedule request lives in the same row.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BookingRecord {
    pub id: Uuid,
    pub slot_id: Uuid,
    pub mentor_id: String,
    pub mentee_id: String,
    pub status: BookingStatus,
    pub payment_ref: String,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub reschedule_slot_id: Option<Uuid>,
    pub reschedule_reason: Option<String>,
    pub reschedule_status: Option<RescheduleStatus>,
    pub reschedule_requested_at: Option<DateTime<Utc>>,
    pub reschedule_expires_at: Option<DateTime<Utc>>,
    pub reschedule_resolved_at: Option<DateTime<Utc>>,
}

impl From<&Booking> for BookingRecord {
    fn from(booking: &Booking) -> Self {
        let request = booking.reschedule_request.as_ref();
        Self {
            id: booking.id,
            slot_id: booking.slot_id,
            mentor_id: booking.mentor_id.clone(),
            mentee_id: booking.mentee_id.clone(),
            status: booking.status,
            payment_ref: booking.payment_ref.clone(),
            amount: booking.amount,
            created_at: booking.created_at,
            cancelled_at: booking.cancelled_at,
            cancel_reason: booking.cancel_reason.clone(),
            reschedule_slot_id: request.map(|r| r.requested_slot_id),
            reschedule_reason: request.map(|r| r.reason.clone()),
            reschedule_status: request.map(|r| r.status),
            reschedule_requested_at: request.map(|r| r.requested_at),
            reschedule_expires_at: request.map(|r| r.expires_at),
            reschedule_resolved_at: request.and_then(|r| r.resolved_at),
        }
    }
}

impl TryFrom<BookingRecord> for Booking {
    type Error = EngineError;

    fn try_from(record: BookingRecord) -> Result<Self> {
        let reschedule_request = match record.reschedule_slot_id {
            None => None,
            Some(requested_slot_id) => {
                match (
                    record.reschedule_status,
                    record.reschedule_requested_at,
                    record.reschedule_expires_at,
                ) {
                    (Some(status), Some(requested_at), Some(expires_at)) => {
                        Some(RescheduleRequest {
                            booking_id: record.id,
                            requested_slot_id,
                            reason: record.reschedule_reason.unwrap_or_default(),
                            status,
                            requested_at,
                            expires_at,
                            resolved_at: record.reschedule_resolved_at,
                        })
                    }
                    _ => {
                        return Err(EngineError::Storage(format!(
                            "booking {} has an incomplete reschedule request",
                            record.id
                        )))
                    }
                }
            }
        };

        Ok(Booking {
            id: record.id,
            slot_id: record.slot_id,
            mentor_id: record.mentor_id,
            mentee_id: record.mentee_id,
            status: record.status,
            payment_ref: record.payment_ref,
            amount: record.amount,
            created_at: record.created_at,
            cancelled_at: record.cancelled_at,
            cancel_reason: record.cancel_reason,
            reschedule_request,
        })
    }
}

/// The durable state of the engine: rules, slots and bookings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tables {
    pub rules: Vec<RecurringRule>,
    pub slots: Vec<Slot>,
    pub bookings: Vec<Booking>,
}

impl Tables {
    pub fn rule(&self, rule_id: Uuid) -> Option<&RecurringRule> {
        self.rules.iter().find(|r| r.id == rule_id)
    }

    pub fn rule_mut(&mut self, rule_id: Uuid) -> Result<&mut RecurringRule> {
        self.rules
            .iter_mut()
            .find(|r| r.id == rule_id)
            .ok_or_else(|| EngineError::NotFound(format!("rule {}", rule_id)))
    }

    pub fn slot(&self, slot_id: Uuid) -> Result<&Slot> {
        self.slots
            .iter()
            .find(|s| s.id == slot_id)
            .ok_or_else(|| EngineError::NotFound(format!("slot {}", slot_id)))
    }

    pub fn slot_mut(&mut self, slot_id: Uuid) -> Result<&mut Slot> {
        self.slots
            .iter_mut()
            .find(|s| s.id == slot_id)
            .ok_or_else(|| EngineError::NotFound(format!("slot {}", slot_id)))
    }

    pub fn booking(&self, booking_id: Uuid) -> Result<&Booking> {
        self.bookings
            .iter()
            .find(|b| b.id == booking_id)
            .ok_or_else(|| EngineError::NotFound(format!("booking {}", booking_id)))
    }

    pub fn booking_mut(&mut self, booking_id: Uuid) -> Result<&mut Booking> {
        self.bookings
            .iter_mut()
            .find(|b| b.id == booking_id)
            .ok_or_else(|| EngineError::NotFound(format!("booking {}", booking_id)))
    }

    pub fn confirmed_booking_for_slot(&self, slot_id: Uuid) -> Option<&Booking> {
        self.bookings
            .iter()
            .find(|b| b.slot_id == slot_id && b.status == BookingStatus::Confirmed)
    }

    /// The booking whose live reschedule request holds `slot_id`.
    pub fn reschedule_holding(&self, slot_id: Uuid, now: DateTime<Utc>) -> Option<&Booking> {
        self.bookings.iter().find(|b| {
            b.pending_reschedule()
                .map_or(false, |r| r.requested_slot_id == slot_id && !r.is_stale(now))
        })
    }

    /// Any non-cancelled slot of the mentor overlapping `[start_at, end_at)`.
    pub fn overlapping_live_slot(
        &self,
        mentor_id: &str,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Option<&Slot> {
        self.slots
            .iter()
            .find(|s| s.mentor_id == mentor_id && s.is_live() && s.overlaps(start_at, end_at))
    }
}

// Database service backed by one CSV file per table
//
// All tables sit behind a single mutex. Every write runs against a copy of
// the tables; the copy is persisted and swapped in only if the closure
// succeeds, so a write is one indivisible read-check-update.
pub struct DatabaseService {
    data_dir: PathBuf,
    tables: Mutex<Tables>,
}

impl DatabaseService {
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        if !data_dir.exists() {
            info!("Creating data directory at {}", data_dir.display());
            fs::create_dir_all(&data_dir).map_err(|e| {
                error!("Failed to create data directory: {}", e);
                EngineError::Storage(format!("failed to create data directory: {}", e))
            })?;
        }

        let rules: Vec<RecurringRule> = load_table(&data_dir.join(RULES_FILE))?;
        let slots: Vec<Slot> = load_table(&data_dir.join(SLOTS_FILE))?;
        let bookings = load_table::<BookingRecord>(&data_dir.join(BOOKINGS_FILE))?
            .into_iter()
            .map(Booking::try_from)
            .collect::<Result<Vec<_>>>()?;

        info!(
            "Loaded {} rules, {} slots and {} bookings from {}",
            rules.len(),
            slots.len(),
            bookings.len(),
            data_dir.display()
        );

        Ok(Self {
            data_dir,
            tables: Mutex::new(Tables {
                rules,
                slots,
                bookings,
            }),
        })
    }

    /// Run a read-only query against the current tables.
    pub fn read<T>(&self, query: impl FnOnce(&Tables) -> T) -> Result<T> {
        let tables = self
            .tables
            .lock()
            .map_err(|e| EngineError::Storage(format!("failed to acquire mutex: {}", e)))?;
        Ok(query(&tables))
    }

    /// Run an atomic update. Nothing is written if `update` returns an error.
    pub fn write<T>(&self, update: impl FnOnce(&mut Tables) -> Result<T>) -> Result<T> {
        let mut tables = self
            .tables
            .lock()
            .map_err(|e| EngineError::Storage(format!("failed to acquire mutex: {}", e)))?;

        let mut next = tables.clone();
        let output = update(&mut next)?;
        self.persist_changes(&tables, &next)?;
        *tables = next;

        Ok(output)
    }

    // Every changed table is staged to a temp file before any is renamed
    // into place, so a failed write leaves all tables on disk as they were.
    fn persist_changes(&self, current: &Tables, next: &Tables) -> Result<()> {
        let mut staged = Vec::new();
        let result = self.stage_changes(current, next, &mut staged);
        if let Err(err) = result {
            for (tmp_path, _) in &staged {
                if let Err(e) = fs::remove_file(tmp_path) {
                    warn!("Failed to remove {}: {}", tmp_path.display(), e);
                }
            }
            return Err(err);
        }

        for (tmp_path, path) in &staged {
            fs::rename(tmp_path, path).map_err(|e| {
                error!("Failed to replace {}: {}", path.display(), e);
                EngineError::Storage(format!("failed to replace {}: {}", path.display(), e))
            })?;
            debug!("Persisted {}", path.display());
        }
        Ok(())
    }

    fn stage_changes(
        &self,
        current: &Tables,
        next: &Tables,
        staged: &mut Vec<(PathBuf, PathBuf)>,
    ) -> Result<()> {
        if current.rules != next.rules {
            staged.push(stage_table(&self.data_dir.join(RULES_FILE), &next.rules)?);
        }
        if current.slots != next.slots {
            staged.push(stage_table(&self.data_dir.join(SLOTS_FILE), &next.slots)?);
        }
        if current.bookings != next.bookings {
            let records: Vec<BookingRecord> =
                next.bookings.iter().map(BookingRecord::from).collect();
            staged.push(stage_table(&self.data_dir.join(BOOKINGS_FILE), &records)?);
        }
        Ok(())
    }
}

fn load_table<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        debug!("Table {} does not exist yet", path.display());
        return Ok(Vec::new());
    }

    let file = File::open(path)
        .map_err(|e| EngineError::Storage(format!("failed to open {}: {}", path.display(), e)))?;
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);

    reader
        .deserialize()
        .map(|row| {
            row.map_err(|e| {
                EngineError::Storage(format!("failed to read {}: {}", path.display(), e))
            })
        })
        .collect()
}

// Write the whole table to a temp file next to it.
// Returns the temp path and the path it replaces.
fn stage_table<T: Serialize>(path: &Path, rows: &[T]) -> Result<(PathBuf, PathBuf)> {
    let tmp_path = path.with_extension("csv.tmp");
    let file = File::create(&tmp_path).map_err(|e| {
        EngineError::Storage(format!("failed to create {}: {}", tmp_path.display(), e))
    })?;

    let mut writer = WriterBuilder::new().has_headers(true).from_writer(file);
    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| EngineError::Storage(format!("failed to serialize record: {}", e)))?;
    }
    writer
        .flush()
        .map_err(|e| EngineError::Storage(format!("failed to flush writer: {}", e)))?;

    debug!("Staged {} rows for {}", rows.len(), path.display());
    Ok((tmp_path, path.to_path_buf()))
}

// Open the database in the configured data directory
pub fn create_database_service(data_dir: &Path) -> Result<Arc<DatabaseService>> {
    Ok(Arc::new(DatabaseService::open(data_dir)?))
}
