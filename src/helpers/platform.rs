/// Default number of concurrent decode workers, used when a caller doesn't
/// pin an explicit worker count for the processing queue.
pub fn default_worker_count() -> usize {
    num_cpus::get().max(1)
}
