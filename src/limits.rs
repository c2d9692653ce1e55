//! Hard caps on request sizes and engine state.

pub const MAX_ROOMS: usize = 10_000;
pub const MAX_RESERVATIONS_PER_ROOM: usize = 100_000;

/// Longest Hourly stay; anything longer should be booked Overnight or Daily.
pub const MAX_HOURLY_HOURS: u32 = 24;
pub const MAX_DAILY_NIGHTS: i64 = 365;

pub const DEFAULT_WINDOW_DAYS: u32 = 7;
pub const MAX_WINDOW_DAYS: u32 = 31;

/// Largest tariff rate, add-on price or service unit price, in minor units.
/// With the stay, quantity and count caps below, every computed charge
/// stays far inside `i64`.
pub const MAX_RATE: i64 = 1_000_000_000_000;
pub const MAX_SERVICE_QUANTITY: u32 = 1_000;

pub const MAX_SERVICES_PER_RESERVATION: usize = 64;
pub const MAX_ADDONS_PER_ROOM: usize = 64;
pub const MAX_OCCUPANTS: u32 = 16;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_PHONE_LEN: usize = 32;
pub const MAX_DETAIL_LEN: usize = 512;

/// Dates outside this range are rejected before any arithmetic.
pub const MIN_VALID_YEAR: i32 = 2000;
pub const MAX_VALID_YEAR: i32 = 9999;

/// Longest accepted JSON request line, in bytes.
pub const MAX_LINE_LEN: usize = 64 * 1024;
