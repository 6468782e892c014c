//! The payment pipeline, the PaymentMaker contract, and destination mappers
//! (spec §4.4-§4.6).

mod error;
mod maker;
mod mapper;
mod pipeline;

pub use error::{PaymentMakerError, PaymentPipelineError};
pub use maker::{PaymentMaker, SourceAddressQuery};
pub use mapper::{AtxpAddressDiscoveryMapper, DestinationMapper, IdentityMapper};
pub use pipeline::{ApprovalCallback, PaymentObserver, PaymentPipeline, PipelineOutcome};
