//! Upload Gateway
//!
//! Single-endpoint gateway that accepts one file per request and relays it to
//! the Gemini Files API. Each upload is buffered either in process memory or
//! on local disk, picked per request from the declared size and current host
//! memory pressure. Every disk artifact a request creates is removed before
//! its response is sent.
//!
//! ## Request flow
//!
//! ```text
//!  POST /upload
//!       │
//!       ▼
//! ┌──────────────┐  sample  ┌──────────────┐
//! │ Storage      │─────────▶│ Memory       │
//! │ Selector     │          │ Probe        │
//! └──────────────┘          └──────────────┘
//!       │ Memory | Disk
//!       ▼
//! ┌──────────────┐          uploads/
//! │ Upload       │─────────▶ <ts>-<name>        (Disk)
//! │ Receiver     │
//! └──────────────┘
//!       │
//!       ▼
//! ┌──────────────┐          uploads/
//! │ Relay        │─────────▶ temp-<ts>-<name>   (Memory, materialized)
//! │              │
//! │              │  race    ┌──────────────┐
//! │              │─────────▶│ Gemini Files │
//! │              │  timeout │ API          │
//! └──────────────┘          └──────────────┘
//!       │
//!       ▼
//!  cleanup, then 200 / 400 / 500
//! ```

pub mod cleanup;
pub mod config;
pub mod error;
pub mod memory_probe;
pub mod relay_client;
pub mod routes;
pub mod storage_selector;
pub mod upload_receiver;

#[cfg(test)]
pub(crate) mod test_support;

pub use cleanup::TempArtifact;
pub use config::Config;
pub use error::GatewayError;
pub use memory_probe::{MemoryProbe, MemorySample, ProbeError, SysinfoProbe};
pub use relay_client::{GeminiFilesClient, IngestionClient, Relay, RelayError};
pub use routes::{create_router, start_api_server, AppState, UploadResponse};
pub use storage_selector::{StorageMode, StorageSelector};
pub use upload_receiver::{BufferedData, BufferedFile, ReceiveError, UploadReceiver};
