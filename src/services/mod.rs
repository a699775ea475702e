// Service layer: the run lock, external tool execution, the per-profile
// pipeline, progress fan-out, run persistence, and the orchestrator that
// ties them together.

pub mod disk;
pub mod lock;
pub mod orchestrator;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod recorder;

pub use disk::DiskSpaceGuard;
pub use lock::{LockError, RunLock, RunLockGuard};
pub use orchestrator::{RunReport, TriggerStatus, UpdateError, UpdateOrchestrator};
pub use pipeline::{PipelineConfig, ProfilePipeline};
pub use process::{ProcessError, ProcessRunner, TokioProcessRunner, ToolCommand, ToolOutput};
pub use progress::{ProgressSink, ProgressSubscription, RUN_FINISHED_MESSAGE};
pub use recorder::{RecorderError, RunRecorder};
