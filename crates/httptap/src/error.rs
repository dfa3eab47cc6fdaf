use thiserror::Error;

/// Errors raised while setting up traffic capture.
///
/// Everything here is fatal at startup; once capture is running, read
/// errors are logged and swallowed — a passive tap keeps listening.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// No interface matches the requested address. Lists what is
    /// available so the operator can pick a usable one.
    #[error(
        "can't find interface with addr {addr}; provide an IP available for \
         intercepting traffic:\n{available}"
    )]
    DeviceNotFound {
        /// The address that matched nothing
        addr: String,
        /// Rendered list of interfaces and their addresses
        available: String,
    },

    /// The bind address is neither empty nor a parseable IP.
    #[error("invalid capture address: {0:?}")]
    BindAddr(String),

    /// The device's link layer is not one we know how to strip.
    #[error("unsupported link type {linktype} on device {device}")]
    UnsupportedLinkType {
        /// Device that reported the link type
        device: String,
        /// Raw DLT value
        linktype: i32,
    },

    /// The kernel rejected the generated BPF program.
    #[error("BPF filter rejected on device {device}: {source}")]
    BpfFilter {
        /// Device the filter was meant for
        device: String,
        /// Underlying pcap error
        source: pcap::Error,
    },

    /// pcap device enumeration or activation failure.
    #[error("pcap error: {0}")]
    Pcap(#[from] pcap::Error),

    /// Raw socket creation, bind, or thread spawn failure.
    #[error("capture I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for capture setup.
pub type Result<T> = std::result::Result<T, CaptureError>;
