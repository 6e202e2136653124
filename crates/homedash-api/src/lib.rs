// homedash-api: async client for the homedash backend (session, gateway, broker)

pub mod auth;
pub mod broker;
pub mod error;
pub mod gateway;
pub mod session;
pub mod storage;
pub mod transport;

pub use auth::{BrokerStatus, Identity, TokenPair};
pub use broker::{
    BrokerConnector, BrokerLink, LinkEvent, LinkOptions, MqttConnector, ProtocolVersion, QoS,
};
pub use error::Error;
pub use gateway::{ApiRequest, Gateway, LoginRedirect};
pub use session::{Session, SessionStore};
pub use storage::{CredentialStorage, KeyringStorage, MemoryStorage, StorageScope};
pub use transport::{TlsMode, TransportConfig};
