// Ember Core Library
// Platform-agnostic wallet message pipeline: provider, relay, broker, approvals

pub mod approval;
pub mod broker;
pub mod collaborators;
pub mod error;
pub mod models;
pub mod protocol;
pub mod relay;
pub mod scheduler;
pub mod settings;
pub mod shim;
pub mod storage_trait;

#[cfg(feature = "native")]
pub mod native;

#[cfg(all(feature = "wasm", target_arch = "wasm32"))]
pub mod wasm;

// Re-exports
pub use approval::ApprovalSurface;
pub use broker::{run, Broker, BrokerChannel, BrokerHandle, ExtensionHost, Reply, SenderInfo};
pub use collaborators::{SecretStore, Signer, WalletKeys};
pub use error::CoreError;
pub use models::*;
pub use protocol::{BroadcastEvent, BrokerResponse, Envelope, ErrorCode, MessageKind, RpcError};
pub use relay::{PageContext, PagePort, Relay};
pub use scheduler::{expiry_channel, Clock, Scheduler, Sleeper, SystemClock, TimeoutHandle};
pub use settings::Settings;
pub use shim::{Provider, ProviderInfo, ProviderRegistry, RequestArguments};
pub use storage_trait::*;
