//! Names of the commands and messages this crate knows about
// (c) 2026 Ross Younger

// Commands (client to node) ////////////////////////////////////////////////////////////

/// Handshake request
pub const CLIENT_HELLO: &str = "ClientHello";
/// Insert request
pub const CLIENT_PUT: &str = "ClientPut";
/// Starts a Direct Disk Access test for a directory
pub const TEST_DDA_REQUEST: &str = "TestDDARequest";
/// Returns the contents of the DDA probe file
pub const TEST_DDA_RESPONSE: &str = "TestDDAResponse";
/// Subscribes to (or unsubscribes from) the node's global queue
pub const WATCH_GLOBAL: &str = "WatchGlobal";
/// Requests the node's configuration
pub const GET_CONFIG: &str = "GetConfig";
/// No-op, used as a keepalive
pub const VOID: &str = "Void";

// Messages (node to client) ////////////////////////////////////////////////////////////

/// Handshake acknowledgement
pub const NODE_HELLO: &str = "NodeHello";
/// Reply to `GetConfig`
pub const CONFIG_DATA: &str = "ConfigData";
/// Insert progress
pub const SIMPLE_PROGRESS: &str = "SimpleProgress";
/// Insert progress: compression has finished
pub const FINISHED_COMPRESSION: &str = "FinishedCompression";
/// Insert progress: the final URI is known
pub const URI_GENERATED: &str = "URIGenerated";
/// Insert progress: the data is now fetchable
pub const PUT_FETCHABLE: &str = "PutFetchable";
/// Insert completed successfully
pub const PUT_SUCCESSFUL: &str = "PutSuccessful";
/// Insert failed
pub const PUT_FAILED: &str = "PutFailed";
/// A persistent insert has been accepted onto the node's queue
pub const PERSISTENT_PUT: &str = "PersistentPut";
/// The node rejected a command
pub const PROTOCOL_ERROR: &str = "ProtocolError";
/// The node asks us to read a probe file
pub const TEST_DDA_REPLY: &str = "TestDDAReply";
/// The node reports the outcome of a DDA test
pub const TEST_DDA_COMPLETE: &str = "TestDDAComplete";
/// Another client connected with our name; the node is dropping us
pub const CLOSE_CONNECTION_DUPLICATE_CLIENT_NAME: &str = "CloseConnectionDuplicateClientName";

/// Is this one of the DDA negotiation messages, which are keyed by `Directory` rather than `Identifier`?
#[must_use]
pub fn is_dda_family(name: &str) -> bool {
    matches!(name, TEST_DDA_REPLY | TEST_DDA_COMPLETE)
}
