//! Channel type definitions for inter-task communication

use tokio::sync::mpsc;

use super::types::ChangeEvent;

/// Create a change event channel; a zero size is raised to one
pub fn create_change_channel(
    size: usize,
) -> (mpsc::Sender<ChangeEvent>, mpsc::Receiver<ChangeEvent>) {
    mpsc::channel(size.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_size_is_usable() {
        let (tx, _rx) = create_change_channel(0);
        assert_eq!(tx.max_capacity(), 1);
    }
}
