//! Task prioritization.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Priority level for scheduled tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Urgent = 3,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

/// Item with associated priority for queue ordering.
#[derive(Debug)]
struct PrioritizedItem<T> {
    priority: Priority,
    sequence: u64,
    item: T,
}

impl<T> PartialEq for PrioritizedItem<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl<T> Eq for PrioritizedItem<T> {}

impl<T> PartialOrd for PrioritizedItem<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for PrioritizedItem<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.priority as u8).cmp(&(other.priority as u8)) {
            Ordering::Equal => other.sequence.cmp(&self.sequence), // Lower sequence = earlier
            ord => ord,
        }
    }
}

/// Max-heap on `(priority, -sequence)`: highest priority first, FIFO among
/// equals. A re-pushed item gets a fresh sequence and goes behind its peers.
#[derive(Debug)]
pub struct PriorityQueue<T> {
    heap: BinaryHeap<PrioritizedItem<T>>,
    next_sequence: u64,
}

impl<T> PriorityQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_sequence: 0,
        }
    }

    pub fn push(&mut self, item: T, priority: Priority) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(PrioritizedItem {
            priority,
            sequence,
            item,
        });
    }

    pub fn pop(&mut self) -> Option<T> {
        self.heap.pop().map(|p| p.item)
    }

    /// Removes and returns the first item matching `pred`, keeping the order
    /// of everything else.
    pub fn remove_where<F>(&mut self, mut pred: F) -> Option<T>
    where
        F: FnMut(&T) -> bool,
    {
        let mut items = std::mem::take(&mut self.heap).into_vec();
        let pos = items.iter().position(|p| pred(&p.item));
        let removed = pos.map(|pos| items.swap_remove(pos).item);
        self.heap = BinaryHeap::from(items);
        removed
    }

    /// Empties the queue in priority order.
    pub fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.heap.len());
        while let Some(item) = self.pop() {
            out.push(item);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_higher_priority_first() {
        let mut queue = PriorityQueue::new();
        queue.push("low", Priority::Low);
        queue.push("urgent", Priority::Urgent);
        queue.push("normal", Priority::Normal);
        queue.push("high", Priority::High);

        assert_eq!(queue.drain(), vec!["urgent", "high", "normal", "low"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_fifo_within_priority() {
        let mut queue = PriorityQueue::new();
        for i in 0..5 {
            queue.push(i, Priority::Normal);
        }
        queue.push(99, Priority::High);

        assert_eq!(queue.pop(), Some(99));
        assert_eq!(queue.drain(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_repush_goes_behind_peers() {
        let mut queue = PriorityQueue::new();
        queue.push("a", Priority::Normal);
        queue.push("b", Priority::Normal);

        let first = queue.pop().unwrap();
        queue.push(first, Priority::Normal);

        assert_eq!(queue.drain(), vec!["b", "a"]);
    }

    #[test]
    fn test_remove_where_preserves_order() {
        let mut queue = PriorityQueue::new();
        queue.push(1, Priority::Normal);
        queue.push(2, Priority::High);
        queue.push(3, Priority::Normal);
        queue.push(4, Priority::Low);

        assert_eq!(queue.remove_where(|&n| n == 3), Some(3));
        assert_eq!(queue.remove_where(|&n| n == 42), None);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.drain(), vec![2, 1, 4]);
    }

    #[test]
    fn test_priority_parse_and_display() {
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert_eq!("urgent".parse::<Priority>().unwrap(), Priority::Urgent);
        assert!("critical".parse::<Priority>().is_err());
        assert_eq!(Priority::Low.to_string(), "low");
        assert_eq!(Priority::default(), Priority::Normal);
        assert_eq!(serde_json::to_string(&Priority::Urgent).unwrap(), "\"urgent\"");
    }
}
