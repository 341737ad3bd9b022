//! Logging for the runtime control plane.
//!
//! Every log message occurs in the context of a pod sandbox or a container,
//! so the macros here require that context up front and attach it as a
//! structured field. Messages with no meaningful sandbox or container yet
//! (for instance before an id has been parsed) use the `globally` variants.
//!
//! The crate never installs a subscriber; the embedding launcher decides
//! where events go.

#[doc(hidden)]
pub use tracing::{event, Level};

/// The most basic requirements for emitting a log:
/// - Log level.
/// - Sandbox or container id: the scope the message belongs to.
/// - Arguments: a literal format string, followed by optional irritants.
#[macro_export]
macro_rules! log {
    ($level:expr, sandbox: $sandbox:expr, $($arg:tt)+) => {{
        // Check the type of `$sandbox` by moving the reference.
        let sandbox: &str = $sandbox;
        $crate::logging::event!($level, pod_sandbox = sandbox, $($arg)+);
    }};
    ($level:expr, container: $container:expr, $($arg:tt)+) => {{
        // Check the type of `$container` by moving the reference.
        let container: &str = $container;
        $crate::logging::event!($level, container = container, $($arg)+);
    }};
}

#[macro_export]
macro_rules! log_error {
    (sandbox: $sandbox:expr, $($arg:tt)+) => {
        $crate::log!($crate::logging::Level::ERROR, sandbox: $sandbox, $($arg)+)
    };
    (container: $container:expr, $($arg:tt)+) => {
        $crate::log!($crate::logging::Level::ERROR, container: $container, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_warn {
    (sandbox: $sandbox:expr, $($arg:tt)+) => {
        $crate::log!($crate::logging::Level::WARN, sandbox: $sandbox, $($arg)+)
    };
    (container: $container:expr, $($arg:tt)+) => {
        $crate::log!($crate::logging::Level::WARN, container: $container, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_info {
    (sandbox: $sandbox:expr, $($arg:tt)+) => {
        $crate::log!($crate::logging::Level::INFO, sandbox: $sandbox, $($arg)+)
    };
    (container: $container:expr, $($arg:tt)+) => {
        $crate::log!($crate::logging::Level::INFO, container: $container, $($arg)+)
    };
}

/// Log a warning when there really is no relevant sandbox or container id to
/// use as context, such as when sweeping the image directory.
#[macro_export]
macro_rules! log_warn_globally {
    ($($arg:tt)+) => {
        $crate::logging::event!($crate::logging::Level::WARN, $($arg)+);
    };
}
