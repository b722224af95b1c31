//! Per-call options, applied before any network action.

use std::time::Duration;

use switchboard_fabric::CallContext;

/// Settings for one call
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub context: CallContext,
    pub timeout: Option<Duration>,
}

/// A single adjustment to [`CallOptions`]
pub struct CallOption(Box<dyn FnOnce(&mut CallOptions) + Send>);

impl CallOption {
    pub fn new(apply: impl FnOnce(&mut CallOptions) + Send + 'static) -> Self {
        Self(Box::new(apply))
    }

    pub(crate) fn apply(self, options: &mut CallOptions) {
        (self.0)(options)
    }
}

/// Run the call in `ctx` instead of a background context
///
/// The context supplies cancellation, the parent request id, the user id
/// and the trace context.
pub fn context(ctx: CallContext) -> CallOption {
    CallOption::new(move |options| options.context = ctx)
}

/// Bound the whole call, from resolve to the decoded response
pub fn timeout(limit: Duration) -> CallOption {
    CallOption::new(move |options| options.timeout = Some(limit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_apply_in_order() {
        let mut options = CallOptions::default();
        for option in [
            timeout(Duration::from_secs(1)),
            context(CallContext::background().with_user_id(3)),
            timeout(Duration::from_secs(2)),
        ] {
            option.apply(&mut options);
        }

        assert_eq!(options.timeout, Some(Duration::from_secs(2)));
        assert_eq!(options.context.user_id(), Some(3));
    }
}
