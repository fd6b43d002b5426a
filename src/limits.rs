//! Hard limits applied to caller-supplied input.

pub const MAX_SPACES: usize = 10_000;
pub const MAX_RESERVATIONS_PER_SPACE: usize = 100_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_TEXT_LEN: usize = 512;
pub const MAX_CANCEL_REASON_LEN: usize = 1_000;

/// Upper bound on expected headcount regardless of space capacity.
pub const MAX_HEADCOUNT: u32 = 10_000;

pub const MIN_YEAR: i32 = 2000;
pub const MAX_YEAR: i32 = 2100;
