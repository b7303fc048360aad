use crate::model::Ms;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

pub const MAX_RESERVATIONS_PER_ITEM: usize = 100_000;
pub const MAX_ITEMS_PER_TENANT: usize = 1_000_000;
pub const MAX_PARTIES_PER_TENANT: usize = 1_000_000;

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 128;

pub const DEFAULT_PAGE_SIZE: i64 = 10;
