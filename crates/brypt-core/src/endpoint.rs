//! The `Endpoint` seam. The TCP implementation is an external collaborator;
//! this trait is the interface a transport satisfies so the proxy store can
//! hand it outgoing bytes without knowing how they travel.

/// A registered transport for one peer connection. `schedule_send` queues
/// bytes for the endpoint to deliver and must not block the caller.
pub trait Endpoint: Send + Sync {
    fn protocol(&self) -> &str;
    fn schedule_send(&self, bytes: Vec<u8>);

    /// The remote address this endpoint is connected to, for bootstrap
    /// bookkeeping and diagnostics. Empty if the endpoint has none (a
    /// loopback or test double).
    fn remote_address(&self) -> String;
}

/// An in-memory endpoint useful for tests and for a synchronous loopback
/// peer: collects everything scheduled for later inspection.
pub struct RecordingEndpoint {
    protocol: String,
    remote_address: String,
    sent: std::sync::Mutex<Vec<Vec<u8>>>,
}

impl RecordingEndpoint {
    pub fn new(protocol: impl Into<String>) -> Self {
        Self { protocol: protocol.into(), remote_address: String::new(), sent: std::sync::Mutex::new(Vec::new()) }
    }

    pub fn with_remote_address(mut self, remote_address: impl Into<String>) -> Self {
        self.remote_address = remote_address.into();
        self
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }
}

impl Endpoint for RecordingEndpoint {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    fn schedule_send(&self, bytes: Vec<u8>) {
        self.sent.lock().unwrap().push(bytes);
    }

    fn remote_address(&self) -> String {
        self.remote_address.clone()
    }
}
