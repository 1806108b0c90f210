//! Protocol-wide constants shared by the server and its clients.

use std::time::Duration;

/// Maximum size of a single JSON frame on the persistent connection.
pub const WS_MAX_FRAME_SIZE: usize = 512 * 1024;

/// How long a connection may stay silent before it is considered dead.
/// Refreshed on every successful read and on every pong.
pub const WS_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Deadline applied to every individual WebSocket write.
pub const WS_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between WebSocket-level ping control frames, sent by the
/// write pump independently of application traffic. Shorter than
/// [`WS_READ_TIMEOUT`] so a healthy peer always answers in time.
pub const WS_PING_INTERVAL: Duration = Duration::from_secs(54);

/// Period of the hub's liveness sweep. A connection whose last
/// activity is older than twice this period is evicted; otherwise an
/// application-level `ping` message is enqueued.
pub const HUB_SWEEP_PERIOD: Duration = Duration::from_secs(30);

/// Capacity of each connection's outbound message queue. A broadcast
/// that finds the queue full evicts the connection instead of
/// blocking.
pub const SEND_QUEUE_CAPACITY: usize = 256;

/// Base path of the resumable upload endpoints.
pub const UPLOAD_BASE_PATH: &str = "/tus/files";

/// Protocol version reported in the `Tus-Resumable` header.
pub const TUS_VERSION: &str = "1.0.0";

/// Extensions advertised on `OPTIONS` requests. Concatenation is
/// deliberately absent: the store rejects it.
pub const TUS_EXTENSIONS: &str = "creation,creation-defer-length,termination";

/// Suffix appended to an upload identifier while its bytes are still
/// arriving. The bare identifier only ever names a finalized file.
pub const TEMP_SUFFIX: &str = ".part";

/// Suffix of the sidecar metadata record written next to a finalized
/// file.
pub const META_SUFFIX: &str = ".meta";

/// mDNS service type advertised on the local network.
pub const MDNS_SERVICE: &str = "_lanshare._tcp";
