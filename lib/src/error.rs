use std::fmt;

/// How the controller loop reacts to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Expected to clear up on its own: reopen the watch after backing off.
    Transient,
    /// Bound to the event being handled: log it and move to the next event.
    Permanent,
    /// Retrying cannot help: stop the controller.
    Fatal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Permanent => "permanent",
            ErrorClass::Fatal => "fatal",
        };
        f.write_str(label)
    }
}

/// Errors that know which [`ErrorClass`] they belong to.
pub trait Classify {
    fn class(&self) -> ErrorClass;
}
