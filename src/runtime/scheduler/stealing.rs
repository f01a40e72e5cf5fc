//! Work stealing logic.

use crossbeam_deque::{Steal, Stealer};

/// Tries to steal an item from a list of stealers.
///
/// Starts at `start` and walks the list once, retrying a victim while it
/// reports contention.
pub(crate) fn steal_from<T>(stealers: &[Stealer<T>], start: usize) -> Option<T> {
    if stealers.is_empty() {
        return None;
    }

    let len = stealers.len();
    for i in 0..len {
        let stealer = &stealers[(start + i) % len];
        loop {
            match stealer.steal() {
                Steal::Success(item) => return Some(item),
                Steal::Empty => break,
                Steal::Retry => {}
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_deque::Worker;

    #[test]
    fn steals_from_first_non_empty_victim() {
        let empty = Worker::<u32>::new_fifo();
        let busy = Worker::new_fifo();
        busy.push(7);
        busy.push(8);
        let stealers = vec![empty.stealer(), busy.stealer()];
        assert_eq!(steal_from(&stealers, 0), Some(7));
        assert_eq!(steal_from(&stealers, 1), Some(8));
        assert_eq!(steal_from(&stealers, 0), None);
    }

    #[test]
    fn no_victims() {
        let stealers: Vec<Stealer<u32>> = Vec::new();
        assert_eq!(steal_from(&stealers, 3), None);
    }
}
