//! # modeset-core
//!
//! Display topology resolution and mode-set staging, with no OS dependencies.
//!
//! Given the raw controller / encoder / connector listing a display driver
//! reports, this crate works out which outputs can be lit at the same time,
//! which of them may share one controller as clones, and how to turn a
//! desired multi-monitor layout into one all-or-nothing hardware transaction.
//!
//! # Architecture overview (for beginners)
//!
//! ```text
//!   DriverResources ──► build_topology ──► TopologySnapshot
//!   (driver module)     (inventory,        (controllers, encoders,
//!                        compat, clones)     connectors, modes)
//!
//!   TopologySnapshot + desired layout ──► stage ──► Transaction ──► backend
//!                                                                     │
//!                                         complete_commit / mark_stale ◄┘
//! ```
//!
//! - **`driver`** – Plain descriptor types, exactly as a driver reports them.
//!   Capability masks here are in *driver* bit order.
//!
//! - **`domain`** – The topology arena and everything derived from it: mode
//!   pooling, capability-mask translation, clone resolution, the apply pass,
//!   and the rotation/flip algebra used to size rotated outputs.
//!
//! Talking to real hardware is someone else's job; see the `modeset-manager`
//! crate for backends.

pub mod domain;
pub mod driver;

pub use domain::apply::{
    ApplyError, ApplyFailure, ControllerAssignment, OutputAssignment, Transaction,
    TransactionAction, TransactionEntry,
};
pub use domain::inventory::build_topology;
pub use domain::mask::IndexMask;
pub use domain::mode::{Mode, ModeId, ModePool};
pub use domain::topology::{
    CloneGroup, Connector, Controller, Encoder, InventoryIssue, Rect, ScreenSize,
    TopologySnapshot,
};
pub use domain::transform::MonitorTransform;
pub use driver::descriptors::{
    ConnectionState, ConnectorDescriptor, ConnectorKind, CrtcDescriptor, DriverResources,
    EdidRecord, EncoderDescriptor, HdrMetadata, RawMode,
};
