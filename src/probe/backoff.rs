//! Delay policy between failed check attempts.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How long to wait after a failed attempt before the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffPolicy {
    /// Retry immediately.
    #[default]
    None,
    Fixed(Duration),
    /// `base * 2^(n-1)`, capped at `max`, plus up to 10% jitter.
    Exponential { base: Duration, max: Duration },
}

impl BackoffPolicy {
    /// Delay after the `failed`-th failed attempt (1-based).
    pub fn delay(&self, failed: u32) -> Duration {
        match *self {
            BackoffPolicy::None => Duration::ZERO,
            BackoffPolicy::Fixed(d) => d,
            BackoffPolicy::Exponential { base, max } => {
                let shift = failed.saturating_sub(1).min(16);
                let raw = base.saturating_mul(1u32 << shift).min(max);
                // Jitter to avoid synchronized retries across targets
                let jitter_ms = raw.as_millis() as u64 / 10;
                let jitter = if jitter_ms > 0 {
                    Duration::from_millis(rand::random::<u64>() % (jitter_ms + 1))
                } else {
                    Duration::ZERO
                };
                raw + jitter
            }
        }
    }
}

impl fmt::Display for BackoffPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackoffPolicy::None => write!(f, "none"),
            BackoffPolicy::Fixed(d) => write!(f, "fixed:{}", d.as_millis()),
            BackoffPolicy::Exponential { base, max } => {
                write!(f, "exponential:{}:{}", base.as_millis(), max.as_millis())
            }
        }
    }
}

impl FromStr for BackoffPolicy {
    type Err = String;

    /// Parses `none`, `fixed:<ms>` or `exponential:<base_ms>:<max_ms>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        let millis = |v: &str| {
            v.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| format!("invalid milliseconds: {:?}", v))
        };

        match parts.as_slice() {
            ["none"] => Ok(BackoffPolicy::None),
            ["fixed", ms] => Ok(BackoffPolicy::Fixed(millis(ms)?)),
            ["exponential", base, max] => {
                let base = millis(base)?;
                let max = millis(max)?;
                if max < base {
                    return Err("exponential max must not be below base".to_string());
                }
                Ok(BackoffPolicy::Exponential { base, max })
            }
            _ => Err(format!("unknown backoff policy: {:?}", s)),
        }
    }
}
