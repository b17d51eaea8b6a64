use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// A snapshot of query phase profiling metrics.
///
/// Profiling is enabled via the `QDB_PROFILE` environment variable and
/// accumulates wall time and call counts per query phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryProfileSnapshot {
    /// Total nanoseconds spent parsing expressions.
    pub parse_ns: u64,
    /// Number of parse phases.
    pub parse_count: u64,
    /// Total nanoseconds spent resolving key sets.
    pub resolve_ns: u64,
    /// Number of resolve phases.
    pub resolve_count: u64,
    /// Total nanoseconds spent building result trees.
    pub build_ns: u64,
    /// Number of build phases.
    pub build_count: u64,
    /// Total nanoseconds spent reducing aggregations.
    pub aggregate_ns: u64,
    /// Number of aggregation phases.
    pub aggregate_count: u64,
}

#[derive(Default)]
struct QueryProfileCounters {
    parse_ns: AtomicU64,
    parse_count: AtomicU64,
    resolve_ns: AtomicU64,
    resolve_count: AtomicU64,
    build_ns: AtomicU64,
    build_count: AtomicU64,
    aggregate_ns: AtomicU64,
    aggregate_count: AtomicU64,
}

static PROFILE_ENABLED: OnceLock<bool> = OnceLock::new();
static PROFILE_COUNTERS: OnceLock<QueryProfileCounters> = OnceLock::new();

fn profiling_enabled() -> bool {
    *PROFILE_ENABLED.get_or_init(|| std::env::var_os("QDB_PROFILE").is_some())
}

fn counters() -> Option<&'static QueryProfileCounters> {
    profiling_enabled().then(|| PROFILE_COUNTERS.get_or_init(QueryProfileCounters::default))
}

pub(crate) fn profile_timer() -> Option<Instant> {
    profiling_enabled().then(Instant::now)
}

pub(crate) enum QueryProfileKind {
    /// Expression dispatch and parsing.
    Parse,
    /// Primary-index choice and key-set resolution.
    Resolve,
    /// Reference map and tree assembly.
    Build,
    /// Group-by and reduction.
    Aggregate,
}

pub(crate) fn record_profile_timer(kind: QueryProfileKind, start: Option<Instant>) {
    let Some(start) = start else {
        return;
    };
    let Some(counters) = counters() else {
        return;
    };
    let nanos = start.elapsed().as_nanos().min(u64::MAX as u128) as u64;
    let (ns, count) = match kind {
        QueryProfileKind::Parse => (&counters.parse_ns, &counters.parse_count),
        QueryProfileKind::Resolve => (&counters.resolve_ns, &counters.resolve_count),
        QueryProfileKind::Build => (&counters.build_ns, &counters.build_count),
        QueryProfileKind::Aggregate => (&counters.aggregate_ns, &counters.aggregate_count),
    };
    ns.fetch_add(nanos, Ordering::Relaxed);
    count.fetch_add(1, Ordering::Relaxed);
}

/// Retrieves a snapshot of current query profiling metrics.
///
/// Returns `None` unless `QDB_PROFILE` is set. With `reset`, counters are
/// zeroed as they are read.
///
/// ```no_run
/// use qdb::query::profile::query_profile_snapshot;
///
/// if let Some(snapshot) = query_profile_snapshot(false) {
///     println!("resolve: {}ns over {} calls", snapshot.resolve_ns, snapshot.resolve_count);
/// }
/// ```
pub fn query_profile_snapshot(reset: bool) -> Option<QueryProfileSnapshot> {
    let counters = counters()?;
    let load = |counter: &AtomicU64| {
        if reset {
            counter.swap(0, Ordering::Relaxed)
        } else {
            counter.load(Ordering::Relaxed)
        }
    };
    Some(QueryProfileSnapshot {
        parse_ns: load(&counters.parse_ns),
        parse_count: load(&counters.parse_count),
        resolve_ns: load(&counters.resolve_ns),
        resolve_count: load(&counters.resolve_count),
        build_ns: load(&counters.build_ns),
        build_count: load(&counters.build_count),
        aggregate_ns: load(&counters.aggregate_ns),
        aggregate_count: load(&counters.aggregate_count),
    })
}
