//! Event loop configuration.
use std::rc::Rc;

use crate::{error::Error, task::EventLoop};

/// Builder for an [EventLoop].
///
/// ```
/// use coloop::EventLoop;
///
/// let lp = EventLoop::builder()
///     .name("worker")
///     .log_uncaught_errors(false)
///     .on_error(|e| eprintln!("task failed: {e}"))
///     .build();
///
/// assert_eq!(lp.name(), "worker");
/// ```
pub struct Builder {
    pub(crate) name: String,
    pub(crate) log_uncaught_errors: bool,
    pub(crate) hooks: Vec<Rc<dyn Fn(&Error)>>,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            name: "coloop".to_owned(),
            log_uncaught_errors: true,
            hooks: Vec::new(),
        }
    }
}

impl Builder {
    /// Name prefixed to the loop's log records.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Whether errors returned by task bodies are logged at `warn` level.
    /// Enabled by default.
    pub fn log_uncaught_errors(mut self, enabled: bool) -> Self {
        self.log_uncaught_errors = enabled;
        self
    }

    /// Pre-register an error hook, see [EventLoop::on_error].
    pub fn on_error(mut self, hook: impl Fn(&Error) + 'static) -> Self {
        self.hooks.push(Rc::new(hook));
        self
    }

    pub fn build(self) -> EventLoop {
        EventLoop::from_builder(self)
    }
}
