mod boundary;
mod codec;
mod message;

pub use boundary::{Boundary, ContextFactory, Endpoint, SpawnedExecutor};
pub use codec::{decode, encode, Inbound};
pub use message::{
    Action,
    Command,
    CorrelationId,
    Envelope,
    Message,
    ProgressReport,
    Response,
    Sample,
    SampleResult,
    WorkerMessage,
};
