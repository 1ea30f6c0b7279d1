use std::fs;
use tempfile::tempdir;

use crate::error::EngineError;
use crate::models::booking::RescheduleStatus;
use crate::services::database::DatabaseService;
use crate::tests::common::fixtures::*;

/// CSV persistence tests
#[cfg(test)]
mod database_tests {
    use super::*;

    #[test]
    fn test_open_creates_missing_directory() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("nested").join("data");

        let db = DatabaseService::open(&data_dir).unwrap();
        assert!(data_dir.exists());
        assert!(db.read(|t| t.rules.is_empty() && t.slots.is_empty()).unwrap());
    }

    #[test]
    fn test_failed_write_changes_nothing() {
        let dir = tempdir().unwrap();
        let db = DatabaseService::open(dir.path()).unwrap();

        let result: crate::error::Result<()> = db.write(|tables| {
            tables.bookings.clear();
            tables.rules.clear();
            Err(EngineError::Conflict("abort".into()))
        });
        assert!(result.is_err());
        assert!(!dir.path().join("rules.csv").exists());
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let engine = TestEngine::new();
        engine.state.rules.create(MENTOR, monday_morning_rule()).unwrap();
        let current = engine.custom_slot(at(2030, 1, 14, 9, 0));
        let alternative = engine.custom_slot(at(2030, 1, 14, 11, 0));
        let booking = engine.book(current.id, MENTEE).await;
        engine
            .state
            .reschedules
            .request(booking.id, MENTEE, alternative.id, "conference, sorry")
            .unwrap();

        let before = engine.db.read(|t| t.clone()).unwrap();
        let reopened = DatabaseService::open(engine.dir.path()).unwrap();
        let after = reopened.read(|t| t.clone()).unwrap();
        assert_eq!(before, after);

        let stored = after.booking(booking.id).unwrap();
        let request = stored.reschedule_request.as_ref().unwrap();
        assert_eq!(request.status, RescheduleStatus::Pending);
        assert_eq!(request.reason, "conference, sorry");
        assert_eq!(request.requested_slot_id, alternative.id);
    }

    #[tokio::test]
    async fn test_failed_second_table_leaves_disk_untouched() {
        let engine = TestEngine::new();
        let slot = engine.custom_slot(at(2030, 1, 14, 9, 0));
        engine.book(slot.id, MENTEE).await;
        let slots_before = fs::read_to_string(engine.dir.path().join("slots.csv")).unwrap();

        // bookings.csv cannot be staged; slots.csv is staged first
        fs::create_dir(engine.dir.path().join("bookings.csv.tmp")).unwrap();
        let result: crate::error::Result<()> = engine.db.write(|tables| {
            tables.slots.clear();
            tables.bookings.clear();
            Ok(())
        });
        assert!(matches!(result, Err(EngineError::Storage(_))));

        let slots_after = fs::read_to_string(engine.dir.path().join("slots.csv")).unwrap();
        assert_eq!(slots_before, slots_after);
        assert!(!engine.dir.path().join("slots.csv.tmp").exists());
        assert_eq!(engine.db.read(|t| t.slots.len()).unwrap(), 1);

        let reopened = DatabaseService::open(engine.dir.path()).unwrap();
        let (slots, bookings) = reopened
            .read(|t| (t.slots.len(), t.bookings.len()))
            .unwrap();
        assert_eq!((slots, bookings), (1, 1));
    }

    #[test]
    fn test_tables_are_written_with_headers() {
        let engine = TestEngine::new();
        engine.state.rules.create(MENTOR, monday_morning_rule()).unwrap();

        let contents = fs::read_to_string(engine.dir.path().join("rules.csv")).unwrap();
        let header = contents.lines().next().unwrap();
        assert!(header.starts_with("id,mentorId,weekDay"));
        assert!(!engine.dir.path().join("bookings.csv").exists());
    }

    #[test]
    fn test_corrupt_table_is_a_storage_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("slots.csv"), "id,mentorId\nnot-a-uuid,mentor-1\n").unwrap();

        assert!(matches!(
            DatabaseService::open(dir.path()),
            Err(EngineError::Storage(_))
        ));
    }
}
