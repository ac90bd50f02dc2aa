/// Size of the fixed header that carries the file name.
pub const HEADER_SIZE: usize = 100;

/// Longest encodable file name, leaving room for the zero terminator.
pub const MAX_NAME_LEN: usize = HEADER_SIZE - 1;

/// Buffer size for the body copy (64KB)
pub const BUFFER_SIZE: usize = 64 * 1024;

/// ALPN protocol identifier negotiated by both peers
pub const ALPN: &[u8] = b"filetransfer";

/// Exporter label for the verification secret. No context bytes are used.
pub const EXPORT_LABEL: &[u8] = b"filetransfer";

/// Bytes of keying material behind the verification phrase
pub const EXPORTED_SECRET_LEN: usize = 16;

/// Emit a progress event every this many bytes
pub const PROGRESS_INTERVAL: u64 = BUFFER_SIZE as u64 * 16;
