pub mod host_uds;
pub mod orchestrator;
pub mod router;

pub use host_uds::HostConfig;
pub use orchestrator::{
    Orchestrator, OrchestratorConfig, PipelineOutcome, PipelineTicket, TabEvent,
};
pub use router::{Dispatch, Router, SenderContext};
