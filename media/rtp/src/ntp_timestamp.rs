use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds between the NTP epoch (1900) and the unix epoch (1970)
const UNIX_OFFSET_SECS: u64 = 2_208_988_800;

/// Timestamp in the NTP era as used by RTCP sender reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NtpTimestamp {
    since_ntp_epoch: Duration,
}

impl NtpTimestamp {
    pub const ZERO: Self = Self {
        since_ntp_epoch: Duration::ZERO,
    };

    pub fn now() -> Self {
        let since_unix_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);

        Self {
            since_ntp_epoch: since_unix_epoch + Duration::from_secs(UNIX_OFFSET_SECS),
        }
    }

    /// 32.32 fixed point representation used in sender reports
    pub fn to_fixed_u64(self) -> u64 {
        let seconds = self.since_ntp_epoch.as_secs();
        let fraction =
            (u64::from(self.since_ntp_epoch.subsec_nanos()) << 32) / 1_000_000_000;

        (seconds << 32) | fraction
    }

    /// Middle 32 bits of the 32.32 representation, used in the LSR field
    pub fn to_fixed_u32(self) -> u32 {
        ((self.to_fixed_u64() >> 16) & u64::from(u32::MAX)) as u32
    }

    pub fn saturating_since(self, earlier: NtpTimestamp) -> Duration {
        self.since_ntp_epoch
            .checked_sub(earlier.since_ntp_epoch)
            .unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fixed_point_fraction() {
        let ts = NtpTimestamp {
            since_ntp_epoch: Duration::new(10, 500_000_000),
        };

        let fixed = ts.to_fixed_u64();
        assert_eq!(fixed >> 32, 10);

        // half a second is half the fraction range
        let fraction = fixed & u64::from(u32::MAX);
        let expected = u64::from(u32::MAX) / 2;
        assert!(fraction.abs_diff(expected) < 16);
    }
}
