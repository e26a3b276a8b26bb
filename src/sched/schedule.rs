//! Schedule container and per-PE usage statistics.

use crate::sched::task::Task;

/// Per-PE cursors maintained while tasks are appended.
#[derive(Clone, Debug, Default)]
pub struct Stats {
    end_times: Vec<u64>,
    idle_times: Vec<u64>,
    job_counts: Vec<u32>,
}

impl Stats {
    pub fn new(pe_count: usize) -> Self {
        Stats {
            end_times: vec![0; pe_count],
            idle_times: vec![0; pe_count],
            job_counts: vec![0; pe_count],
        }
    }

    /// Time at which `pe` becomes free.
    pub fn end_time(&self, pe: usize) -> u64 {
        self.end_times[pe]
    }

    pub fn idle_time(&self, pe: usize) -> u64 {
        self.idle_times[pe]
    }

    /// Number of jobs placed on `pe` so far.
    pub fn job_count(&self, pe: usize) -> u32 {
        self.job_counts[pe]
    }

    pub fn pe_count(&self) -> usize {
        self.end_times.len()
    }

    fn place(&mut self, pe: usize, start: u64, end: u64) -> u32 {
        self.idle_times[pe] += start - self.end_times[pe];
        self.end_times[pe] = end;
        let job_ix = self.job_counts[pe];
        self.job_counts[pe] += 1;
        job_ix
    }

    fn reset(&mut self) {
        self.end_times.fill(0);
        self.idle_times.fill(0);
        self.job_counts.fill(0);
    }
}

/// A total order of tasks plus the per-PE timelines they occupy.
#[derive(Debug, Default)]
pub struct Schedule {
    tasks: Vec<Task>,
    stats: Stats,
}

impl Schedule {
    pub fn new(pe_count: usize) -> Self {
        Schedule {
            tasks: Vec::new(),
            stats: Stats::new(pe_count),
        }
    }

    /// Append a mapped task, stamping its schedule index and its job index
    /// on the chosen PE.
    pub fn add_task(&mut self, mut task: Task) -> u32 {
        let ix = self.tasks.len() as u32;
        task.ix = ix;
        task.job_ix = self.stats.place(task.mapped_pe, task.start, task.end);
        tracing::debug!(
            task = %task.name,
            pe = task.mapped_pe,
            start = task.start,
            end = task.end,
            "task placed"
        );
        self.tasks.push(task);
        ix
    }

    pub fn task(&self, ix: u32) -> &Task {
        &self.tasks[ix as usize]
    }

    pub fn task_mut(&mut self, ix: u32) -> &mut Task {
        &mut self.tasks[ix as usize]
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn tasks_mut(&mut self) -> &mut [Task] {
        &mut self.tasks
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Overall makespan.
    pub fn end_time(&self) -> u64 {
        (0..self.stats.pe_count())
            .map(|pe| self.stats.end_time(pe))
            .max()
            .unwrap_or(0)
    }

    /// Drop every task and rewind the timelines.
    pub fn clear(&mut self) {
        self.tasks.clear();
        self.stats.reset();
    }
}
