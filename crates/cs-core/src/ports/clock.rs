/// Wall clock in whole seconds, as written into status records.
pub trait ClockPort: Send + Sync {
    fn now_secs(&self) -> i64;
}
