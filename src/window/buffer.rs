use std::collections::VecDeque;

/// Bounded FIFO history of one grain's signal for one output column.
///
/// Values are kept oldest-first. Once the buffer is full, appending evicts
/// the oldest value; nothing else ever removes or reorders values.
///
/// # Example
/// ```
/// use rolling_features::window::WindowBuffer;
///
/// let mut buffer = WindowBuffer::new(3);
/// buffer.append(1.0);
/// buffer.append(2.0);
/// buffer.append(3.0);
/// assert!(buffer.is_full());
///
/// buffer.append(4.0);
/// assert_eq!(buffer.snapshot(), vec![2.0, 3.0, 4.0]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct WindowBuffer {
    data: VecDeque<f64>,
    capacity: usize,
}

impl WindowBuffer {
    /// Creates an empty buffer. Storage grows with the history, up to
    /// `capacity` values.
    ///
    /// # Panics
    /// Panics if capacity is 0
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "WindowBuffer capacity must be greater than 0");
        WindowBuffer {
            data: VecDeque::new(),
            capacity,
        }
    }

    /// Creates a buffer holding the most recent `capacity` of `values`.
    pub fn from_values(capacity: usize, values: impl IntoIterator<Item = f64>) -> Self {
        let mut buffer = WindowBuffer::new(capacity);
        for value in values {
            buffer.append(value);
        }
        buffer
    }

    /// Appends a value, evicting the oldest one when full. O(1).
    pub fn append(&mut self, value: f64) {
        if self.data.len() == self.capacity {
            self.data.pop_front();
        }
        self.data.push_back(value);
    }

    /// Copy of the current contents, oldest to newest.
    pub fn snapshot(&self) -> Vec<f64> {
        self.data.iter().copied().collect()
    }

    /// Contiguous view of the current contents, oldest to newest.
    ///
    /// Rotates the ring in place when it has wrapped, so repeated calls
    /// between appends are free.
    pub fn view(&mut self) -> &[f64] {
        self.data.make_contiguous()
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.data.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.data.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_creation() {
        let buffer = WindowBuffer::new(4);
        assert_eq!(buffer.capacity(), 4);
        assert_eq!(buffer.len(), 0);
        assert!(buffer.is_empty());
        assert!(!buffer.is_full());
    }

    #[test]
    fn test_append_evicts_oldest_first() {
        let mut buffer = WindowBuffer::new(3);
        for value in [1.0, 2.0, 3.0, 4.0, 5.0] {
            buffer.append(value);
            assert!(buffer.len() <= 3);
        }
        assert_eq!(buffer.snapshot(), vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_partial_fill_keeps_arrival_order() {
        let mut buffer = WindowBuffer::new(5);
        buffer.append(10.0);
        buffer.append(4.0);
        assert_eq!(buffer.snapshot(), vec![10.0, 4.0]);
        assert!(!buffer.is_full());
    }

    #[test]
    fn test_view_after_wraparound_matches_snapshot() {
        let mut buffer = WindowBuffer::new(3);
        for value in 0..7 {
            buffer.append(value as f64);
        }
        let expected = buffer.snapshot();
        assert_eq!(buffer.view(), expected.as_slice());
        assert_eq!(buffer.view(), &[4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_from_values_truncates_to_capacity() {
        let buffer = WindowBuffer::from_values(2, vec![1.0, 2.0, 3.0]);
        assert_eq!(buffer.snapshot(), vec![2.0, 3.0]);
    }

    #[test]
    fn test_nan_is_stored_in_position() {
        let mut buffer = WindowBuffer::new(3);
        buffer.append(1.0);
        buffer.append(f64::NAN);
        buffer.append(3.0);
        let values = buffer.snapshot();
        assert_eq!(values[0], 1.0);
        assert!(values[1].is_nan());
        assert_eq!(values[2], 3.0);
    }

    #[test]
    fn test_large_capacity_allocates_only_what_is_held() {
        let mut buffer = WindowBuffer::new(i32::MAX as usize);
        for value in [1.0, 2.0, 3.0] {
            buffer.append(value);
        }
        assert_eq!(buffer.capacity(), i32::MAX as usize);
        assert_eq!(buffer.view(), &[1.0, 2.0, 3.0]);
        assert!(!buffer.is_full());
    }

    #[test]
    fn test_clear() {
        let mut buffer = WindowBuffer::from_values(3, vec![1.0, 2.0]);
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 3);
    }

    #[test]
    #[should_panic(expected = "WindowBuffer capacity must be greater than 0")]
    fn test_zero_capacity_panics() {
        let _buffer = WindowBuffer::new(0);
    }
}
