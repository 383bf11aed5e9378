//! MVG Observer - live and historical delays of the Munich U-Bahn.
//!
//! # Overview
//!
//! MVG Observer follows the upstream departure feed and keeps a consistent
//! view of every station's upcoming departures and delays. Next to the live
//! view it serves historical delay charts, gap-filled so that every interval
//! of a day has a slot.
//!
//! # Modules
//!
//! - [`model`]: Departures, stations, buckets and chart settings
//! - [`live`]: Reducer folding the event feed into per-station state
//! - [`reconcile`]: Gap filling of historical delay buckets
//! - [`sse`]: Decoder for the event stream
//! - [`client`]: Upstream HTTP client and live feed runner
//! - [`history`]: Debounced, generation-tagged history session
//! - [`api`]: HTTP API handlers
//! - [`config`]: Environment configuration
//! - [`error`]: Error type

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod history;
pub mod live;
pub mod model;
pub mod reconcile;
pub mod sse;
