//! Runtime statistic sources.

use sysinfo::{Pid, System};

use crate::model::Metric;

/// Name of the cumulative poll counter.
pub const POLL_COUNT: &str = "PollCount";
/// Name of the per-poll random gauge.
pub const RANDOM_VALUE: &str = "RandomValue";

/// A source of metric readings, called once per poll tick.
///
/// Implementations must not perform network I/O; sampling runs on the
/// scheduler task between timer ticks.
pub trait Sampler: Send + 'static {
    /// Names (with zero values) present from startup.
    fn catalog(&self) -> Vec<Metric>;

    /// Take one reading of every metric.
    fn sample(&mut self) -> Vec<Metric>;
}

/// Samples process and host statistics via `sysinfo`.
///
/// Emits memory gauges, CPU gauges (`ProcessCPU`, `LoadAverage1`, and one
/// `CPUutilization{N}` per core), a uniform `RandomValue`, and the
/// cumulative `PollCount` counter.
pub struct RuntimeSampler {
    system: System,
    pid: Option<Pid>,
    poll_count: i64,
}

impl std::fmt::Debug for RuntimeSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeSampler")
            .field("pid", &self.pid)
            .field("poll_count", &self.poll_count)
            .finish_non_exhaustive()
    }
}

impl Default for RuntimeSampler {
    fn default() -> Self {
        Self::new()
    }
}

const MEMORY_GAUGES: [&str; 8] = [
    "Alloc",
    "Sys",
    "TotalMemory",
    "FreeMemory",
    "AvailableMemory",
    "UsedMemory",
    "TotalSwap",
    "UsedSwap",
];

impl RuntimeSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        system.refresh_cpu();
        let pid = sysinfo::get_current_pid()
            .inspect_err(|e| tracing::warn!(error = %e, "Process statistics unavailable"))
            .ok();
        Self {
            system,
            pid,
            poll_count: 0,
        }
    }

    /// Polls taken so far.
    pub fn poll_count(&self) -> i64 {
        self.poll_count
    }
}

impl Sampler for RuntimeSampler {
    fn catalog(&self) -> Vec<Metric> {
        let mut catalog: Vec<Metric> = MEMORY_GAUGES
            .iter()
            .chain(&["ProcessCPU", "LoadAverage1", RANDOM_VALUE])
            .map(|name| Metric::gauge(*name, 0.0))
            .collect();
        catalog.extend(
            (1..=self.system.cpus().len()).map(|n| Metric::gauge(format!("CPUutilization{n}"), 0.0)),
        );
        catalog.push(Metric::counter(POLL_COUNT, 0));
        catalog
    }

    fn sample(&mut self) -> Vec<Metric> {
        self.system.refresh_memory();
        self.system.refresh_cpu();
        if let Some(pid) = self.pid {
            self.system.refresh_process(pid);
        }
        let process = self.pid.and_then(|pid| self.system.process(pid));

        let (resident, virtual_bytes, process_cpu) = process
            .map(|p| (p.memory(), p.virtual_memory(), p.cpu_usage()))
            .unwrap_or_default();
        let sys = &self.system;
        let memory = [
            resident,
            virtual_bytes,
            sys.total_memory(),
            sys.free_memory(),
            sys.available_memory(),
            sys.used_memory(),
            sys.total_swap(),
            sys.used_swap(),
        ];

        let mut metrics: Vec<Metric> = MEMORY_GAUGES
            .iter()
            .zip(memory)
            .map(|(name, bytes)| Metric::gauge(*name, bytes as f64))
            .collect();
        metrics.push(Metric::gauge("ProcessCPU", f64::from(process_cpu)));
        metrics.push(Metric::gauge("LoadAverage1", System::load_average().one));
        metrics.extend(sys.cpus().iter().enumerate().map(|(i, cpu)| {
            Metric::gauge(format!("CPUutilization{}", i + 1), f64::from(cpu.cpu_usage()))
        }));
        metrics.push(Metric::gauge(RANDOM_VALUE, rand::random::<f64>()));

        self.poll_count += 1;
        metrics.push(Metric::counter(POLL_COUNT, self.poll_count));
        metrics
    }
}

/// Sampler returning fixed readings plus the poll counter.
///
/// Used to drive the agent deterministically (tests, dry runs).
#[derive(Debug, Clone, Default)]
pub struct StaticSampler {
    readings: Vec<Metric>,
    poll_count: i64,
}

impl StaticSampler {
    pub fn new(readings: Vec<Metric>) -> Self {
        Self {
            readings,
            poll_count: 0,
        }
    }
}

impl Sampler for StaticSampler {
    fn catalog(&self) -> Vec<Metric> {
        let mut catalog = self.readings.clone();
        catalog.push(Metric::counter(POLL_COUNT, 0));
        catalog
    }

    fn sample(&mut self) -> Vec<Metric> {
        self.poll_count += 1;
        let mut metrics = self.readings.clone();
        metrics.push(Metric::counter(POLL_COUNT, self.poll_count));
        metrics
    }
}
