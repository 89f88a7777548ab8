use std::collections::VecDeque;
use std::fmt;

/// Category of work triggered by a webhook.
pub const WEBHOOK_CATEGORY: &str = "10-webhook";

/// Category of work triggered by an operator command.
pub const COMMAND_CATEGORY: &str = "20-command";

/// Category of periodic poll work.
pub const POLL_CATEGORY: &str = "50-poll";

/// Ordering and deduplication key of a queued item
///
/// Compared lexicographically: `category` first, then `discriminator`.
/// Lower keys run sooner. The discriminator identifies the target of the
/// work, usually a head URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Priority {
    /// Kind of work, e.g. [`WEBHOOK_CATEGORY`]
    pub category: String,
    /// Target of the work
    pub discriminator: String,
}

impl Priority {
    pub fn new(category: impl Into<String>, discriminator: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            discriminator: discriminator.into(),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.discriminator)
    }
}

/// What happened to an enqueued item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Added to the queue
    Queued,
    /// Dropped: the same target is already waiting with the same or a more
    /// urgent category
    Coalesced,
    /// Replaced a less urgent item waiting for the same target
    Superseded,
}

#[derive(Debug, Clone)]
struct QueueItem<T> {
    priority: Priority,
    item: T,
}

/// Priority queue coalescing items per target
///
/// Items are kept sorted by [`Priority`]. Items with equal priority keep
/// FIFO order. At most one item per discriminator is waiting at any time.
///
/// # Examples
///
/// ```
/// use stagehand::domain::models::{Enqueued, Priority, TaskQueue};
///
/// let mut queue = TaskQueue::new();
/// queue.enqueue("poll", Priority::new("50-poll", "https://github.com/o/r/pull/1"));
/// queue.enqueue("hook", Priority::new("10-webhook", "https://github.com/o/r/pull/2"));
///
/// let again = queue.enqueue("poll", Priority::new("50-poll", "https://github.com/o/r/pull/2"));
/// assert_eq!(again, Enqueued::Coalesced);
///
/// assert_eq!(queue.dequeue().map(|(item, _)| item), Some("hook"));
/// assert_eq!(queue.dequeue().map(|(item, _)| item), Some("poll"));
/// assert!(queue.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct TaskQueue<T> {
    items: VecDeque<QueueItem<T>>,
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TaskQueue<T> {
    /// Creates a new empty task queue
    #[allow(clippy::missing_const_for_fn)]
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    /// Adds an item unless the same target is already waiting
    ///
    /// A waiting item with a less urgent category is replaced.
    pub fn enqueue(&mut self, item: T, priority: Priority) -> Enqueued {
        let mut outcome = Enqueued::Queued;

        if let Some(position) = self
            .items
            .iter()
            .position(|existing| existing.priority.discriminator == priority.discriminator)
        {
            if self.items[position].priority.category <= priority.category {
                return Enqueued::Coalesced;
            }
            self.items.remove(position);
            outcome = Enqueued::Superseded;
        }

        let position = self
            .items
            .iter()
            .position(|existing| priority < existing.priority)
            .unwrap_or(self.items.len());
        self.items.insert(position, QueueItem { priority, item });

        outcome
    }

    /// Removes and returns the most urgent item with its priority
    pub fn dequeue(&mut self) -> Option<(T, Priority)> {
        self.items
            .pop_front()
            .map(|queued| (queued.item, queued.priority))
    }

    /// Removes and returns the most urgent item accepted by `ready`
    ///
    /// Items refused by `ready` keep their place in the queue.
    pub fn dequeue_ready<F>(&mut self, ready: F) -> Option<(T, Priority)>
    where
        F: Fn(&Priority) -> bool,
    {
        let position = self.items.iter().position(|queued| ready(&queued.priority))?;
        self.items
            .remove(position)
            .map(|queued| (queued.item, queued.priority))
    }

    /// Returns the priority of the next item without removing it
    pub fn peek(&self) -> Option<&Priority> {
        self.items.front().map(|queued| &queued.priority)
    }

    /// Returns the number of waiting items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if no item is waiting
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Removes every waiting item
    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poll(target: &str) -> Priority {
        Priority::new(POLL_CATEGORY, target)
    }

    fn hook(target: &str) -> Priority {
        Priority::new(WEBHOOK_CATEGORY, target)
    }

    #[test]
    fn test_lexicographic_order() {
        let mut queue = TaskQueue::new();
        queue.enqueue(1, poll("b"));
        queue.enqueue(2, poll("a"));
        queue.enqueue(3, hook("z"));

        assert_eq!(queue.peek(), Some(&hook("z")));
        assert_eq!(queue.dequeue().map(|(i, _)| i), Some(3));
        assert_eq!(queue.dequeue().map(|(i, _)| i), Some(2));
        assert_eq!(queue.dequeue().map(|(i, _)| i), Some(1));
        assert_eq!(queue.dequeue().map(|(i, _)| i), None);
    }

    #[test]
    fn test_coalesce_same_category() {
        let mut queue = TaskQueue::new();
        assert_eq!(queue.enqueue("first", poll("x")), Enqueued::Queued);
        assert_eq!(queue.enqueue("second", poll("x")), Enqueued::Coalesced);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.dequeue().map(|(i, _)| i), Some("first"));

        // Once dequeued, the target may be queued again.
        assert_eq!(queue.enqueue("third", poll("x")), Enqueued::Queued);
    }

    #[test]
    fn test_urgent_duplicate_supersedes() {
        let mut queue = TaskQueue::new();
        queue.enqueue("poll", poll("x"));
        queue.enqueue("other", poll("a"));
        assert_eq!(queue.enqueue("hook", hook("x")), Enqueued::Superseded);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dequeue(), Some(("hook", hook("x"))));

        queue.enqueue("hook", hook("y"));
        assert_eq!(queue.enqueue("poll", poll("y")), Enqueued::Coalesced);
    }

    #[test]
    fn test_dequeue_ready_skips_refused_targets() {
        let mut queue = TaskQueue::new();
        queue.enqueue("busy", hook("x"));
        queue.enqueue("free", poll("y"));

        let next = queue.dequeue_ready(|priority| priority.discriminator != "x");
        assert_eq!(next, Some(("free", poll("y"))));
        assert_eq!(queue.dequeue_ready(|priority| priority.discriminator != "x"), None);

        // The refused item is still waiting and still coalesces.
        assert_eq!(queue.enqueue("again", poll("x")), Enqueued::Coalesced);
        assert_eq!(queue.dequeue_ready(|_| true), Some(("busy", hook("x"))));
    }

    #[test]
    fn test_clear() {
        let mut queue = TaskQueue::new();
        queue.enqueue("a", poll("x"));
        queue.enqueue("b", hook("y"));
        queue.clear();
        assert!(queue.is_empty());
    }
}
