use crate::model::Minute;

// ── Slot policy ──────────────────────────────────────────────────

/// Spacing between generated candidate slot starts. A policy constant,
/// not configurable per request.
pub const SLOT_STEP_MINUTES: Minute = 15;

/// Minutes-of-day are day-relative: valid range is `[0, MINUTES_PER_DAY)`.
pub const MINUTES_PER_DAY: Minute = 1440;

/// An appointment never spans more than one day.
pub const MAX_DURATION_MINUTES: Minute = MINUTES_PER_DAY;

// ── Per-tenant caps ──────────────────────────────────────────────

pub const MAX_PROFESSIONALS_PER_TENANT: usize = 10_000;
pub const MAX_WINDOWS_PER_PROFESSIONAL: usize = 64;
pub const MAX_BREAKS_PER_PROFESSIONAL: usize = 16;
pub const MAX_DAYS_OFF_PER_PROFESSIONAL: usize = 1_000;
pub const MAX_APPOINTMENTS_PER_PROFESSIONAL: usize = 100_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_CUSTOMER_LEN: usize = 256;

// ── Server-wide caps ─────────────────────────────────────────────

pub const MAX_TENANTS: usize = 64;
pub const MAX_TENANT_NAME_LEN: usize = 256;
