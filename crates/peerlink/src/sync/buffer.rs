use std::collections::VecDeque;

/// Values stamped with a local time in milliseconds, oldest first.
#[derive(Debug, Clone)]
pub struct TimedBuffer<T> {
    entries: VecDeque<(f64, T)>,
}

impl<T> Default for TimedBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimedBuffer<T> {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    pub fn push(&mut self, time_ms: f64, value: T) {
        let index = self
            .entries
            .iter()
            .rposition(|(t, _)| *t <= time_ms)
            .map_or(0, |i| i + 1);
        self.entries.insert(index, (time_ms, value));
    }

    /// Drops everything older than `retention_ms` before `now_ms`.
    pub fn prune(&mut self, now_ms: f64, retention_ms: f64) {
        let cutoff = now_ms - retention_ms;
        while self.entries.front().is_some_and(|(t, _)| *t < cutoff) {
            self.entries.pop_front();
        }
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        self.entries.retain(|(_, value)| keep(value));
    }

    pub fn find(&self, mut predicate: impl FnMut(&T) -> bool) -> Option<&T> {
        self.entries
            .iter()
            .find(|(_, value)| predicate(value))
            .map(|(_, value)| value)
    }

    pub fn latest(&self) -> Option<&(f64, T)> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(f64, T)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prune_is_idempotent() {
        let mut buffer = TimedBuffer::new();
        for i in 0..10 {
            buffer.push(i as f64 * 100.0, i);
        }

        buffer.prune(1000.0, 500.0);
        let after_first: Vec<i32> = buffer.iter().map(|(_, v)| *v).collect();
        buffer.prune(1000.0, 500.0);
        let after_second: Vec<i32> = buffer.iter().map(|(_, v)| *v).collect();

        assert_eq!(after_first, vec![5, 6, 7, 8, 9]);
        assert_eq!(after_first, after_second);
    }

    #[test]
    fn test_out_of_order_push_stays_sorted() {
        let mut buffer = TimedBuffer::new();
        buffer.push(20.0, 'b');
        buffer.push(10.0, 'a');
        buffer.push(30.0, 'c');

        let order: String = buffer.iter().map(|(_, v)| *v).collect();
        assert_eq!(order, "abc");
        assert_eq!(buffer.latest().map(|(t, _)| *t), Some(30.0));
    }
}
