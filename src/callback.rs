//! Persisted callback references and their lazy resolution cache.

use crate::registry::CallbackFn;

/// A validated, re-resolvable pointer to a registered callback.
///
/// Only the name string is ever persisted with the job; the function pointer
/// itself is looked up again by whichever process ends up dispatching the
/// callback. Obtained from
/// [`FunctionRegistry::validate_callback`](crate::registry::FunctionRegistry::validate_callback).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackRef {
    name: String,
}

impl CallbackRef {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl From<CallbackRef> for String {
    fn from(r: CallbackRef) -> String {
        r.name
    }
}

/// Resolution state of one callback slot on a job.
///
/// A tagged three-state cache rather than an `Option`, so "haven't looked the
/// name up yet" is never conflated with "looked it up, there is none". The
/// slot starts `Unevaluated`, and the first accessor call settles it to
/// `Present` or `Absent`; resolution failures leave it `Unevaluated` so a
/// later attempt can retry.
#[derive(Debug, Clone, Copy, Default)]
pub enum CallbackSlot {
    #[default]
    Unevaluated,
    Absent,
    Present(CallbackFn),
}

impl CallbackSlot {
    pub fn is_unevaluated(&self) -> bool {
        matches!(self, CallbackSlot::Unevaluated)
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, CallbackSlot::Absent)
    }

    pub fn is_present(&self) -> bool {
        matches!(self, CallbackSlot::Present(_))
    }
}
