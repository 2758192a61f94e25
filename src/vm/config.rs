use std::num::NonZeroU64;

pub const TRACE_ENV: &str = "SEED_TRACE";
pub const GC_EVERY_ENV: &str = "SEED_GC_EVERY";

/// Engine settings, fixed for the lifetime of a [`super::Vm`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VmConfig {
    /// Emit one diagnostic line per executed instruction.
    pub trace: bool,
    /// Collect after every N-th executed instruction.
    pub gc_every: Option<NonZeroU64>,
}

impl VmConfig {
    /// Read `SEED_TRACE` and `SEED_GC_EVERY` from the process environment.
    pub fn from_env() -> Self {
        let trace = std::env::var(TRACE_ENV).ok();
        let gc_every = std::env::var(GC_EVERY_ENV).ok();
        Self::from_vars(trace.as_deref(), gc_every.as_deref())
    }

    pub fn from_vars(trace: Option<&str>, gc_every: Option<&str>) -> Self {
        VmConfig {
            trace: trace.is_some_and(parse_flag),
            gc_every: gc_every.and_then(parse_interval),
        }
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// `0` disables periodic collection.
    pub fn with_gc_every(mut self, n: u64) -> Self {
        self.gc_every = NonZeroU64::new(n);
        self
    }
}

fn parse_flag(v: &str) -> bool {
    !matches!(v, "" | "0" | "false" | "FALSE")
}

fn parse_interval(v: &str) -> Option<NonZeroU64> {
    let n: i64 = v.trim().parse().ok()?;
    u64::try_from(n).ok().and_then(NonZeroU64::new)
}
