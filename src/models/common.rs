use serde::Deserialize;

// Query parameters for GET /rules
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleQuery {
    pub mentor_id: String,
}

// Query parameters for DELETE /rules/:id
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRuleParams {
    #[serde(default)]
    pub delete_slots: bool,
}

// Query parameters for GET /slots
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotQuery {
    pub mentor_id: String,
    pub month: u32,
    pub year: i32,
    #[serde(default)]
    pub available_only: bool,
}

// Query parameters for GET /bookings
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingQuery {
    pub user_id: String,
}
