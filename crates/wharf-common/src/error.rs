//! Common error types for the Wharf sub-agent.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`WharfError`].
pub type WharfResult<T> = Result<T, WharfError>;

/// Errors surfaced by every Wharf component.
#[derive(Error, Diagnostic, Debug)]
pub enum WharfError {
    /// The request carried no guest or a guest with an empty id.
    #[error("Missing guest with id")]
    #[diagnostic(code(wharf::guest::missing_id))]
    MissingGuestId,

    /// The request carried no image id.
    #[error("Missing image id")]
    #[diagnostic(code(wharf::image::missing_id))]
    MissingImageId,

    /// The guest id cannot be used as a container name.
    #[error("Invalid guest ID: {id}")]
    #[diagnostic(
        code(wharf::guest::invalid_id),
        help("Guest IDs must start with an alphanumeric character and contain only [A-Za-z0-9_.-], 1-128 characters")
    )]
    InvalidGuestId {
        /// The rejected id.
        id: String,
    },

    /// A guest was created without any network interface.
    #[error("Guest {id} must specify at least one nic")]
    #[diagnostic(code(wharf::guest::missing_nics))]
    MissingNics {
        /// The guest id.
        id: String,
    },

    /// Container not found in the runtime.
    #[error("Container not found: {id}")]
    #[diagnostic(code(wharf::container::not_found))]
    ContainerNotFound {
        /// The container id or name that was not found.
        id: String,
    },

    /// Image not found in the runtime.
    #[error("Image not found: {reference}")]
    #[diagnostic(code(wharf::image::not_found))]
    ImageNotFound {
        /// The image reference that was not found.
        reference: String,
    },

    /// The runtime refused to start a container that is already running.
    #[error("Container already running: {id}")]
    #[diagnostic(code(wharf::container::already_running))]
    ContainerAlreadyRunning {
        /// The container id.
        id: String,
    },

    /// The runtime refused to stop a container that is not running.
    #[error("Container not running: {id}")]
    #[diagnostic(code(wharf::container::not_running))]
    ContainerNotRunning {
        /// The container id.
        id: String,
    },

    /// The state derived after an operation is not its post-condition.
    #[error("Unexpected container state for {id}: expected {expected}, found {actual}")]
    #[diagnostic(
        code(wharf::container::unexpected_state),
        help("The runtime disagrees with the requested transition; inspect the container directly")
    )]
    UnexpectedState {
        /// The container id.
        id: String,
        /// The state the operation should have produced.
        expected: String,
        /// The state the runtime reported.
        actual: String,
    },

    /// An HTTP response code did not match the expected code.
    #[error("Unexpected http response code: expected {expected}, received {actual}, url: {url}")]
    #[diagnostic(code(wharf::http::status))]
    HttpStatus {
        /// Expected status code.
        expected: u16,
        /// Received status code.
        actual: u16,
        /// The requested url.
        url: String,
    },

    /// Transport level failure talking to a remote service.
    #[error("Network error: {message}")]
    #[diagnostic(code(wharf::network))]
    Network {
        /// The error message.
        message: String,
    },

    /// The image archive's repositories file is not `{repo: {tag: hash}}` with one of each.
    #[error("Invalid repositories file: {message}")]
    #[diagnostic(
        code(wharf::image::repositories_format),
        help("Image archives must name exactly one repository with exactly one tag")
    )]
    RepositoriesFormat {
        /// The error message.
        message: String,
    },

    /// A container runtime call failed.
    #[error("Runtime call {operation} failed: {message}")]
    #[diagnostic(code(wharf::runtime))]
    Runtime {
        /// The runtime operation.
        operation: String,
        /// The error message.
        message: String,
    },

    /// An external switch command exited unsuccessfully.
    #[error("{message}")]
    #[diagnostic(code(wharf::switch::command))]
    Command {
        /// The error message.
        message: String,
        /// The rendered command line.
        command: String,
        /// Combined stdout and stderr of the command.
        output: String,
    },

    /// No switch port matched a guest interface.
    #[error("Failed to look up name of interface {iface} for guest {guest}")]
    #[diagnostic(code(wharf::switch::port_lookup))]
    PortLookup {
        /// The guest id.
        guest: String,
        /// The interface name.
        iface: String,
    },

    /// An external call did not finish in time.
    #[error("{operation} timed out after {seconds}s")]
    #[diagnostic(code(wharf::timeout))]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout in seconds.
        seconds: u64,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(wharf::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(wharf::serialization))]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(wharf::config))]
    Config {
        /// The error message.
        message: String,
    },

    /// Internal error (should not happen).
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(wharf::internal),
        help("This is a bug, please report it at https://github.com/fishmindlabs360/wharf/issues")
    )]
    Internal {
        /// The error message.
        message: String,
    },
}

impl WharfError {
    /// Build a [`WharfError::Runtime`] for a failed runtime operation.
    pub fn runtime(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::Runtime {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Returns true for request validation failures raised before any external call.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::MissingGuestId
                | Self::MissingImageId
                | Self::InvalidGuestId { .. }
                | Self::MissingNics { .. }
        )
    }

    /// Returns true when the runtime reported a missing container or image.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ContainerNotFound { .. } | Self::ImageNotFound { .. }
        )
    }
}

impl From<serde_json::Error> for WharfError {
    fn from(err: serde_json::Error) -> Self {
        WharfError::Serialization(err.to_string())
    }
}
