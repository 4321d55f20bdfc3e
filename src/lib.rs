//! Choreographic programming by endpoint projection
//!
//! A multi-party protocol is written once, as a [`Choreography`] over the
//! four primitives of [`ChoreoOp`]. Each participant then runs that same body
//! through a [`Projector`] bound to its own [`Location`]; the primitives decide
//! at run time whether this participant computes, sends, receives or skips a
//! step. Participants exchange values over any [`Transport`] backend.
//!
//! ```ignore
//! let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new([BUYER, SELLER]));
//! let report = Coordinator::new(transport).run_everywhere(MyProtocol).await;
//! ```

pub mod config;
pub mod error;
pub mod located;
pub mod location;
pub mod op;
pub mod payload;
pub mod projector;
pub mod runner;
pub mod transport;

// Re-export main APIs
pub use config::{EnvSource, HttpTransportConfig, TransportConfig};
pub use error::{ChoreographyError, ConfigError, Result, TransportError, TransportResult};
pub use located::{Located, MultiplyLocated};
pub use location::Location;
pub use op::{ChoreoOp, Choreography};
pub use payload::{Payload, Portable};
pub use projector::{Fanout, Participation, ProjectedOp, Projector};
pub use runner::{Coordinator, RunReport};
pub use transport::{
    Broker, BrokerMessage, Delivery, Envelope, HttpTransport, MemoryBroker, MemoryTransport,
    Metered, PubSubTransport, Retry, Traced, Transport,
};
