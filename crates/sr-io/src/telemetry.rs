//! Connectivity observers notified by the relay.
//!
//! Hooks are called from inside a tick and must return promptly.

/// Observer of relay connectivity.
pub trait Telemetry {
    /// The number of connected clients changed.
    fn client_count_changed(&mut self, count: usize);

    /// Eviction made `identity` skip `dropped` bytes during one tick.
    fn bytes_dropped(&mut self, _identity: &str, _dropped: u64) {}
}

impl Telemetry for () {
    fn client_count_changed(&mut self, _count: usize) {}
}

impl<T: Telemetry + ?Sized> Telemetry for Box<T> {
    fn client_count_changed(&mut self, count: usize) {
        (**self).client_count_changed(count)
    }

    fn bytes_dropped(&mut self, identity: &str, dropped: u64) {
        (**self).bytes_dropped(identity, dropped)
    }
}

/// Fan-out to several observers.
impl Telemetry for Vec<Box<dyn Telemetry>> {
    fn client_count_changed(&mut self, count: usize) {
        for t in self.iter_mut() {
            t.client_count_changed(count);
        }
    }

    fn bytes_dropped(&mut self, identity: &str, dropped: u64) {
        for t in self.iter_mut() {
            t.bytes_dropped(identity, dropped);
        }
    }
}

/// Logs every change of the client count.
#[derive(Debug, Default)]
pub struct LogTelemetry;

impl Telemetry for LogTelemetry {
    fn client_count_changed(&mut self, count: usize) {
        tracing::info!("Connected clients: {}", count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Counter(Rc<RefCell<Vec<usize>>>);

    impl Telemetry for Counter {
        fn client_count_changed(&mut self, count: usize) {
            self.0.borrow_mut().push(count);
        }
    }

    #[test]
    fn test_fan_out_reaches_every_observer() {
        let a = Rc::new(RefCell::new(Vec::new()));
        let b = Rc::new(RefCell::new(Vec::new()));
        let mut all: Vec<Box<dyn Telemetry>> = vec![
            Box::new(Counter(a.clone())),
            Box::new(Counter(b.clone())),
            Box::new(LogTelemetry),
        ];

        all.client_count_changed(3);
        all.bytes_dropped("x", 10);

        assert_eq!(*a.borrow(), vec![3]);
        assert_eq!(*b.borrow(), vec![3]);
    }
}
