mod user;

pub use user::{Quota, QuotaInfo, QuotaKind, Tier, User};
