//! Unix timestamp helper shared by access-token expiry and JWT claims.

use std::ops::Add;
use std::time::SystemTime;

/// Seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Ord, Eq)]
pub struct UnixTimestamp(pub i64);

impl UnixTimestamp {
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .expect("system clock before Unix epoch")
            .as_secs() as i64;
        Self(secs)
    }

    pub fn as_secs(self) -> i64 {
        self.0
    }

    pub fn is_past(self, now: UnixTimestamp) -> bool {
        self.0 <= now.0
    }
}

impl Add<i64> for UnixTimestamp {
    type Output = Self;

    fn add(self, rhs: i64) -> Self::Output {
        UnixTimestamp(self.0 + rhs)
    }
}
