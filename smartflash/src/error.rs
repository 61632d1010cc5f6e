/// An error reported by the debug transport while accessing target memory.
///
/// Timeouts and retries are handled below this layer, so every variant is final
/// for the access that produced it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, docsplay::Display)]
pub enum TransportError {
    /// The connection to the target was lost.
    Disconnected,

    /// The target did not respond to the access at {address:#010x} in time.
    Timeout { address: u32 },

    /// The access at {address:#010x} faulted.
    Fault { address: u32 },

    /// The transport does not support {0}.
    Unsupported(&'static str),

    /// {0}
    Other(String),
}

/// An error reported while the target executed an erase or program command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, docsplay::Display)]
pub enum DeviceError {
    /// The transport failed while talking to the flash controller.
    Transport(#[from] TransportError),

    /// The flash controller rejected the command with code {code}: {cause}
    Rejected { code: u32, cause: String },
}
