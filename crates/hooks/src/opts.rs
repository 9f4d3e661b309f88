use std::sync::Arc;

/// Keeps the same `Arc` across renders for structurally equal values.
///
/// Downstream code compares the returned `Arc`s with [`Arc::ptr_eq`] to tell a
/// real change from a value that was merely rebuilt.
#[derive(Debug)]
pub struct Opts<T> {
    current: Arc<T>,
}

impl<T: PartialEq> Opts<T> {
    /// Starts with `initial` as the accepted value.
    pub fn new(initial: T) -> Self {
        Self {
            current: Arc::new(initial),
        }
    }

    /// Returns the previously accepted `Arc` if `value` equals it, otherwise
    /// accepts and returns `value`.
    pub fn stabilize(&mut self, value: T) -> Arc<T> {
        if *self.current != value {
            self.current = Arc::new(value);
        }

        Arc::clone(&self.current)
    }

    /// The last accepted value.
    #[must_use]
    pub fn current(&self) -> Arc<T> {
        Arc::clone(&self.current)
    }
}

impl<T: Default + PartialEq> Default for Opts<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    #[test]
    fn test_equal_values_keep_reference() {
        let mut opts = Opts::new(HashMap::from([("endpoint", "ws://x")]));
        let first = opts.current();

        let second = opts.stabilize(HashMap::from([("endpoint", "ws://x")]));

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_changed_value_is_accepted() {
        let mut opts = Opts::new(vec![1, 2]);
        let first = opts.current();

        let second = opts.stabilize(vec![1, 3]);
        let third = opts.stabilize(vec![1, 3]);

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&second, &third));
        assert_eq!(*third, vec![1, 3]);
    }

    #[test]
    fn test_only_last_value_is_remembered() {
        let mut opts = Opts::new("a");
        let a = opts.current();
        opts.stabilize("b");

        let a_again = opts.stabilize("a");

        assert!(!Arc::ptr_eq(&a, &a_again));
    }
}
