//! The window stand-in: an affine object on main whose close ends the main loop

use std::sync::Arc;

use crate::affinity::Affine;
use crate::dispatcher::Dispatcher;
use crate::runtime::{Context, Thread};
use crate::scenario::journal::Journal;

pub struct Window {
    journal: Journal,
    main: Arc<Thread>,
    closed: bool,
}

impl Window {
    /// Create the window on the main thread
    pub fn open(dispatcher: &Dispatcher, journal: &Journal) -> Affine<Window> {
        let window = Window {
            journal: journal.clone(),
            main: Arc::clone(dispatcher.main()),
            closed: false,
        };
        dispatcher.create(&dispatcher.main_context(), "window", window)
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Record the close and quit the main loop. Closing twice is a no-op.
    pub fn close(&mut self, ctx: &Context) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.journal.record(ctx, "window", "window closed");
        self.main.request_quit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affinity::Connection;
    use crate::dispatcher::DispatcherConfig;

    #[test]
    fn test_close_quits_main_once() {
        let dispatcher = Dispatcher::new(DispatcherConfig::default());
        let ctx = dispatcher.main_context();
        let journal = Journal::new();
        let window = Window::open(&dispatcher, &journal);
        assert_eq!(window.affinity(), dispatcher.main().id());

        window.invoke_with(&ctx, Connection::Queued, |w, ctx| w.close(ctx)).unwrap();
        window.invoke_with(&ctx, Connection::Queued, |w, ctx| w.close(ctx)).unwrap();
        let stats = dispatcher.exec().unwrap();

        assert_eq!(stats.executed, 2);
        assert_eq!(journal.len(), 1);
        assert_eq!(journal.entries()[0].event, "window closed");
        assert!(window.call(&ctx, |w, _| w.is_closed()).unwrap());
    }
}
