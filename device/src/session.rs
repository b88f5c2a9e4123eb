use alloc::string::String;

/// A handle to a remote client's connection, independent of any link it holds.
///
/// Used for logging and diagnostics where a human-readable identifier for
/// the peer is more useful than its `LockHandle`.
pub trait Session {
    /// Return a name or identifying string (session id, remote addr, etc) for this session
    fn session_name(&self) -> String;
}
