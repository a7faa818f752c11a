//! tauon: declarative HTTP test-case execution engine.
//!
//! A case is a data record: method, URL, headers, body, assertions,
//! extraction rules and dependency rules. The engine resolves `${...}`
//! placeholders against a shared variable pool, sends the request,
//! validates the response through named predicates, and harvests new
//! variables for later cases. Cases may depend on variables, other
//! cases, or database queries; dependencies execute recursively with
//! cycle protection.

pub mod assertion;
pub mod corpus;
pub mod database;
mod dependence;
pub mod error;
pub mod executor;
pub mod expression;
pub mod extract;
pub mod generators;
pub mod model;
pub mod pool;
pub mod request;
pub mod resolver;
pub mod steps;

pub use corpus::CaseCorpus;
pub use database::{DbConfig, MySqlExecutor, SqlExecutor};
pub use error::{TauonError, TauonResult};
pub use executor::{Executor, RequestSigner};
pub use generators::GeneratorRegistry;
pub use model::{CaseOutcome, CaseRecord, CaseResponse, RequestType, ResolvedCase, RunReport};
pub use pool::VariablePool;
pub use request::RequestSender;
pub use resolver::Resolver;
pub use steps::{RecordingStepSink, StepSink, TracingStepSink};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
