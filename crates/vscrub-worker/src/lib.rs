//! Job orchestration: pipeline state machine, worker agents and the pool
//! controller.
//!
//! This crate provides:
//! - `StateMachine`: one stage attempt per call, with retry/backoff and
//!   guarded, version-checked persistence
//! - `WorkerAgent`: lease, heartbeat, settle, self-terminate when idle
//! - `WorkerRegistry` / `LocalWorkerPool`: pool membership and agent tasks
//! - `PoolController`: queue-depth autoscaling and the dead-letter reaper
//! - `JobService`: submit, status and cancel

pub mod agent;
pub mod config;
pub mod controller;
pub mod error;
pub mod interrupt;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod pool;
pub mod registry;
pub mod retry;
pub mod runtime;
pub mod service;
pub mod stages;

pub use agent::{AgentExit, WorkerAgent};
pub use config::{ControllerConfig, WorkerConfig};
pub use controller::{plan, PoolController, PoolSample, ScalingDecision, TickReport};
pub use error::{StageError, WorkerError, WorkerResult, CANCELLED, DELIVERY_EXHAUSTED};
pub use interrupt::{interrupt_channel, InterruptHandle, InterruptSignal};
pub use logging::JobLogger;
pub use pipeline::{AdvanceOutcome, PipelineConfig, StateMachine};
pub use pool::{LocalWorkerPool, WorkerPool};
pub use registry::WorkerRegistry;
pub use retry::{backoff_delay, FailureTracker, RetryConfig};
pub use runtime::{Backends, StoreBackend, WorkerRuntime};
pub use service::{CancelAck, JobService, SubmitRequest};
pub use stages::artifact_key;
