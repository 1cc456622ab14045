/// The wall-clock millisecond timestamp every queue/transaction
/// operation threads through explicitly rather than reading inside
/// library code, so those libraries stay deterministic under test
/// (spec.md §4.D, §4.E operations all take `now` as an argument).
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before the Unix epoch")
        .as_millis() as i64
}
